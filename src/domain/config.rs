//! Config - Result Set Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_FETCH_DELAY_MS, DEFAULT_PRIMARY_KEY, DEFAULT_RESULT_SIZE};
use crate::domain::criteria::{Criteria, TextMatchStyle};
use crate::error::{Error, Result};

/// How records are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchMode {
    /// Requested ranges only, with read-ahead; sorting on the fetcher side
    #[default]
    Paged,
    /// Every row matching the criteria in one request; sorting local
    Basic,
    /// Every row regardless of criteria; filtering and sorting local
    Local,
}

/// When a criteria change drops the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriteriaPolicy {
    /// Drop on any change
    DropOnChange,
    /// Keep the cache while criteria only become more restrictive
    #[default]
    DropOnShortening,
}

/// What to do with `total_rows` of a response from an abandoned generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StaleTotalsPolicy {
    /// Ignore the whole response
    #[default]
    Discard,
    /// Keep the count as last-known total (rows are still discarded)
    Record,
}

/// Result set configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultSetConfig {
    /// Fetch strategy
    pub fetch_mode: FetchMode,
    /// Rows per batch in paged mode
    pub result_size: usize,
    /// Debounce before missing rows are fetched, in milliseconds
    pub fetch_delay_ms: u64,
    /// Primary key field(s) used for record identity
    pub primary_keys: Vec<String>,
    /// Criteria change policy
    pub criteria_policy: CriteriaPolicy,
    /// Text match style for local filtering
    pub text_match_style: TextMatchStyle,
    /// Sort locally once all matching rows are cached
    pub use_client_sorting: bool,
    /// Filter locally once all matching rows are cached
    pub use_client_filtering: bool,
    /// Drop all cached rows on any change notification
    pub drop_cache_on_update: bool,
    /// Ignore change notifications entirely
    pub disable_cache_sync: bool,
    /// Keep updated rows even if they stop matching the criteria
    pub never_drop_updated_rows: bool,
    /// Integrate changes into a partial cache (false: invalidate immediately)
    pub update_partial_cache: bool,
    /// Handling of totals from superseded fetches
    pub stale_totals: StaleTotalsPolicy,
    /// Forwarded on every request; `Some(true)` also treats advertised totals
    /// as a lower bound until a short page arrives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progressive_loading: Option<bool>,
    /// Request exactly the visible rows: no read-ahead in paged mode, and
    /// paged requests instead of one full fetch in basic mode
    pub always_request_visible_rows: bool,
    /// Constraints added to every request and local filter, never exposed as
    /// the current criteria
    pub implicit_criteria: Criteria,
}

impl Default for ResultSetConfig {
    fn default() -> Self {
        Self {
            fetch_mode: FetchMode::default(),
            result_size: DEFAULT_RESULT_SIZE,
            fetch_delay_ms: DEFAULT_FETCH_DELAY_MS,
            primary_keys: vec![DEFAULT_PRIMARY_KEY.to_string()],
            criteria_policy: CriteriaPolicy::default(),
            text_match_style: TextMatchStyle::default(),
            use_client_sorting: true,
            use_client_filtering: true,
            drop_cache_on_update: false,
            disable_cache_sync: false,
            never_drop_updated_rows: false,
            update_partial_cache: true,
            stale_totals: StaleTotalsPolicy::default(),
            progressive_loading: None,
            always_request_visible_rows: false,
            implicit_criteria: Criteria::new(),
        }
    }
}

impl ResultSetConfig {
    /// Debounce as a duration
    pub fn fetch_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_delay_ms)
    }

    /// Check invariants the cache relies on
    pub fn validate(&self) -> Result<()> {
        if self.result_size == 0 {
            return Err(Error::Invalid {
                message: "result_size must be at least 1".to_string(),
            });
        }
        if self.primary_keys.is_empty() {
            return Err(Error::Invalid {
                message: "at least one primary key field is required".to_string(),
            });
        }
        if self.always_request_visible_rows && self.fetch_mode == FetchMode::Local {
            return Err(Error::Invalid {
                message: "always_request_visible_rows needs paged or basic fetch mode".to_string(),
            });
        }
        Ok(())
    }

    /// Parse from TOML, falling back to defaults for missing keys
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ResultSetConfig::from_toml_str(
            r#"
            fetch_mode = "local"
            result_size = 20
            primary_keys = ["org", "id"]
            "#,
        )
        .expect("valid config");

        assert_eq!(config.fetch_mode, FetchMode::Local);
        assert_eq!(config.result_size, 20);
        assert_eq!(config.primary_keys, vec!["org", "id"]);
        assert!(config.update_partial_cache);
        assert_eq!(config.criteria_policy, CriteriaPolicy::DropOnShortening);
    }

    #[test]
    fn implicit_criteria_from_toml() {
        let config = ResultSetConfig::from_toml_str(
            r#"
            progressive_loading = true

            [implicit_criteria]
            tenant = { operator = "equals", value = "acme" }
            "#,
        )
        .expect("valid config");

        assert_eq!(config.progressive_loading, Some(true));
        assert_eq!(config.implicit_criteria, Criteria::new().equals("tenant", "acme"));
    }

    #[test]
    fn visible_rows_only_rejected_in_local_mode() {
        let err = ResultSetConfig::from_toml_str(
            r#"
            fetch_mode = "local"
            always_request_visible_rows = true
            "#,
        )
        .expect_err("invalid");
        assert!(matches!(err, Error::Invalid { .. }));
    }

    #[test]
    fn zero_result_size_rejected() {
        let err = ResultSetConfig::from_toml_str("result_size = 0").expect_err("invalid");
        assert!(matches!(err, Error::Invalid { .. }));
    }
}
