//! Result Set Cache Library
//!
//! A client-side, lazily populated view over records matching a set of
//! criteria and a sort order. Rows come from an asynchronous [`Fetcher`] one
//! page at a time; out-of-band changes from a [`ChangeNotifier`] keep the
//! cache consistent without refetching.

pub mod constants;
pub mod domain;
pub mod error;
pub mod services;
pub mod state;
pub mod utils;

pub use domain::config::{CriteriaPolicy, FetchMode, ResultSetConfig, StaleTotalsPolicy};
pub use domain::criteria::{
    Criteria, CriteriaComparison, CriteriaFilter, Criterion, RecordFilter, TextMatchStyle,
};
pub use domain::record::{Record, RecordKey, RecordRef};
pub use domain::sort::{RecordComparator, SortChain, SortNormalizer, SortSpecifier};
pub use error::{Error, Result};
pub use services::{
    ChangeEvent, ChangeKind, ChangeNotifier, FetchRequest, FetchResponse, Fetcher, MemoryFetcher,
    ResultSetEvent,
};
pub use state::{PagedDataProvider, ResultSet, ResultSetBuilder, Row};
