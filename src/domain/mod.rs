//! Domain - Pure Data Structures
//!
//! Records, criteria, sort specifiers and configuration. Nothing here touches
//! the cache or the runtime.

pub mod config;
pub mod criteria;
pub mod record;
pub mod sort;
pub mod value;
