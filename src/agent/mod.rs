//! Agent orchestration
//!
//! The `Agent` owns the lifecycle of the sidecar:
//!
//! ```text
//! Created ──connect──► Connected ──run──► Running ──shutdown──► Stopping ──► Stopped
//!                                            │
//!                  ┌─────────────────────────┼──────────────────────────┐
//!                  ▼                         ▼                          ▼
//!          PolicySynchronizer        ProcessValidator        FileIntegrityValidator
//!                  │                         │                          │
//!                  ▼                         └──────────┬───────────────┘
//!             PolicyCache ◄──── snapshot ───────────────┤
//!                                                       ▼
//!                                              ViolationReporter ──► Authority
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub mod controller;
pub mod state;

pub use controller::{Agent, AgentError};
pub use state::AgentState;

/// Sleep until the next pass; `false` if shutdown arrived first
pub(crate) async fn wait_for_next_pass(interval: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
