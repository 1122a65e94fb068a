//! Result Set Constants
//!
//! Centralized defaults shared by the config layer and the cache.

/// Rows fetched per batch in paged mode
pub const DEFAULT_RESULT_SIZE: usize = 75;

/// Debounce before a fetch for missing rows is issued
pub const DEFAULT_FETCH_DELAY_MS: u64 = 0;

/// Primary key field used when none is configured
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Fetch history capacity (diagnostics only)
pub const FETCH_HISTORY_CAPACITY: usize = 64;
