//! PodSentinel - runtime security sidecar for a single pod
//!
//! Pulls the constraints that apply to its pod from a remote policy
//! authority, then keeps checking the pod's live processes and monitored
//! files against them, reporting every violation back as an event.
//!
//! # Modules
//!
//! - `agent` - Lifecycle orchestration of the loops below
//! - `policy` - Constraint cache and the synchronizer that fills it
//! - `validator` - Process and file integrity validation
//! - `reporter` - Violation events sent to the authority
//! - `grpc` - Protobuf types, transport, and the authority client
//! - `config` / `pod` - Agent settings and pod identity
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Log output and optional OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use podsentinel::{Agent, AgentConfig};
//!
//! let agent = Agent::new(AgentConfig::default());
//! let shutdown = agent.shutdown_token();
//!
//! // cancel `shutdown` from a signal handler
//! agent.run().await?;
//! ```

pub mod agent;
pub mod config;
pub mod grpc;
pub mod metrics;
pub mod pod;
pub mod policy;
pub mod reporter;
pub mod tracing;
pub mod validator;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root for convenience
pub use agent::{Agent, AgentError, AgentState};
pub use config::{AgentConfig, AuthorityConfig, TransportSecurity};
pub use pod::PodIdentity;
