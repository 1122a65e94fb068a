//! Error types for the result set
//!
//! Centralized error handling using snafu for ergonomic error definitions.
//! None of these are fatal: fetch failures degrade to "not yet loaded",
//! incomparable criteria degrade to a cache drop, unknown identities are ignored.

use snafu::Snafu;

/// Main error type for the crate
#[derive(Debug, Snafu)]
pub enum Error {
    /// The fetcher failed to deliver a row range
    #[snafu(display("Fetch of rows {start}..{end} failed: {message}"))]
    FetchFailed {
        start: usize,
        end: usize,
        message: String,
    },

    /// New criteria cannot be proven to select a subset of the cached rows
    #[snafu(display("Criteria on field '{field}' are not comparable with the cached criteria"))]
    CriteriaIncomparable { field: String },

    /// A change notification referenced a record that is not cached
    #[snafu(display("No cached record with key {key}"))]
    IdentityNotFound { key: String },

    /// Invalid input or configuration
    #[snafu(display("Invalid: {message}"))]
    Invalid { message: String },

    /// IO error (config files)
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// JSON serialization/deserialization error
    #[snafu(display("JSON error: {source}"))]
    Json { source: serde_json::Error },

    /// TOML deserialization error
    #[snafu(display("TOML parse error: {source}"))]
    TomlDe { source: toml::de::Error },

    /// TOML serialization error
    #[snafu(display("TOML serialize error: {source}"))]
    TomlSe { source: toml::ser::Error },

    /// Channel send error
    #[snafu(display("Channel send error: {message}"))]
    ChannelSend { message: String },
}

impl Error {
    /// Build a fetch failure for a row range from any displayable cause
    pub fn fetch_failed(start: usize, end: usize, cause: impl std::fmt::Display) -> Self {
        Error::FetchFailed {
            start,
            end,
            message: cause.to_string(),
        }
    }

    /// Whether a later access may succeed without caller intervention
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::FetchFailed { .. }
                | Error::CriteriaIncomparable { .. }
                | Error::IdentityNotFound { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Json { source }
    }
}

impl From<toml::de::Error> for Error {
    fn from(source: toml::de::Error) -> Self {
        Error::TomlDe { source }
    }
}

impl From<toml::ser::Error> for Error {
    fn from(source: toml::ser::Error) -> Self {
        Error::TomlSe { source }
    }
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(err: flume::SendError<T>) -> Self {
        Error::ChannelSend {
            message: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T, E = Error> = std::result::Result<T, E>;
