//! Service Layer
//!
//! Everything the result set talks to asynchronously: the fetcher contract,
//! change notifications, emitted events and the tokio runtime bridge.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ResultSet                              │
//! └─────────────────────────────────────────────────────────────┘
//!        │ FetchRequest          ▲ ChangeEvent         │ ResultSetEvent
//!        ▼                       │                     ▼
//! ┌──────────────┐     ┌──────────────────┐    ┌──────────────────┐
//! │   Fetcher    │     │  ChangeNotifier  │    │    Broadcast     │
//! │ (async I/O)  │     │ (out-of-band)    │    │ (per subscriber) │
//! └──────────────┘     └──────────────────┘    └──────────────────┘
//! ```

mod broadcast;
mod events;
mod fetcher;
mod memory;
mod notifier;
mod runtime;

pub use broadcast::*;
pub use events::*;
pub use fetcher::*;
pub use memory::*;
pub use notifier::*;
pub use runtime::*;
