//! Utilities

pub mod config_store;

pub use config_store::{load_config, load_result_set_config, save_config};
