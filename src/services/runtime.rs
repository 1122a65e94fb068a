//! Tokio Runtime Bridge
//!
//! Fetch completions and change-notification loops run as detached tokio
//! tasks. Inside a runtime (the usual case, and every test) they go to the
//! ambient runtime; callers without one get a lazily created global runtime.
//!
//! ```text
//! ResultSet::get_range()
//!       │
//!       ▼
//! spawn_named("resultset-fetch", fetcher.fetch(..))
//!       │
//!       ▼
//! ambient Handle::try_current() ── or ──> global Runtime
//!       │
//!       ▼
//! completion applied under the cache lock
//! ```

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};

/// Global tokio runtime instance, only created when no runtime is ambient
static TOKIO_RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();

fn global_handle() -> Option<Handle> {
    TOKIO_RUNTIME
        .get_or_init(|| match Runtime::new() {
            Ok(runtime) => Some(runtime),
            Err(e) => {
                tracing::error!("Failed to create tokio runtime: {}", e);
                None
            }
        })
        .as_ref()
        .map(|runtime| runtime.handle().clone())
}

/// Handle of the ambient runtime, falling back to the global one
pub fn runtime_handle() -> Option<Handle> {
    Handle::try_current().ok().or_else(global_handle)
}

/// Spawn a detached task
pub fn spawn_in_tokio<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match runtime_handle() {
        Some(handle) => {
            handle.spawn(future);
        }
        None => tracing::error!("No tokio runtime available, task dropped"),
    }
}

/// Spawn a detached task with a name (for debugging)
pub fn spawn_named_in_tokio<F>(name: &'static str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::trace!("Spawning tokio task: {}", name);
    spawn_in_tokio(async move {
        future.await;
        tracing::trace!("Tokio task completed: {}", name);
    });
}
