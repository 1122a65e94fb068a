//! State - The Result Set and Its Cache
//!
//! `ResultSet` is the public handle. The synchronous cache logic lives in
//! `cache_state` (fetch planning and completion) and `sync` (change
//! notifications); `row_cache` is the sparse slot storage underneath.

mod cache_state;
mod fetch_plan;
pub mod history;
pub mod provider;
pub mod result_set;
mod row_cache;
mod sync;

pub use history::{FetchHistory, FetchOutcome, FetchRecord};
pub use provider::PagedDataProvider;
pub use result_set::{ResultSet, ResultSetBuilder};
pub use row_cache::Row;
