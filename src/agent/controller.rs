//! Agent Controller - lifecycle of the pod agent
//!
//! Dials the authority, starts the three loops, and on shutdown waits for
//! all of them before dropping the channel.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument, Span};

use super::AgentState;
use crate::config::AgentConfig;
use crate::grpc::{self, Authority, GrpcAuthority, TransportError};
use crate::policy::{PolicyCache, PolicySynchronizer};
use crate::reporter::ViolationReporter;
use crate::validator::{FileIntegrityValidator, ProcFs, ProcessSource, ProcessValidator};

/// Error type for agent lifecycle operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// The authority could not be reached at startup
    #[error(transparent)]
    Connect(#[from] TransportError),
    /// Operation not valid in the current lifecycle state
    #[error("agent is {actual}, can not move to {requested}")]
    InvalidState {
        requested: AgentState,
        actual: AgentState,
    },
    /// A loop died instead of observing shutdown
    #[error("agent loop panicked: {0}")]
    LoopPanicked(String),
}

/// The pod agent
///
/// # Example
///
/// ```ignore
/// let agent = Agent::new(config);
/// let shutdown = agent.shutdown_token();
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.cancel();
/// });
///
/// agent.run().await?;
/// ```
pub struct Agent {
    config: AgentConfig,
    state: watch::Sender<AgentState>,
    shutdown: CancellationToken,
    authority: Option<Arc<dyn Authority>>,
    process_source: Arc<dyn ProcessSource>,
    cache: Arc<PolicyCache>,
    /// Carries the pod identity into every log line the agent emits
    span: Span,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let span = info_span!(
            "pod_agent",
            pod = %config.pod.name,
            namespace = %config.pod.namespace,
            uid = %config.pod.uid,
        );
        let (state, _) = watch::channel(AgentState::Created);

        Self {
            process_source: Arc::new(ProcFs::new(&config.proc_root)),
            config,
            state,
            shutdown: CancellationToken::new(),
            authority: None,
            cache: Arc::new(PolicyCache::new()),
            span,
        }
    }

    /// Use an already-established authority client instead of dialing
    ///
    /// Moves a `Created` agent straight to `Connected`. Ignored, with a
    /// warning, once the agent is past `Created`.
    pub fn with_authority(mut self, authority: Arc<dyn Authority>) -> Self {
        let current = self.state();
        if current != AgentState::Created {
            warn!(state = %current, "agent already has an authority, ignoring the new one");
            return self;
        }
        self.authority = Some(authority);
        self.state.send_replace(AgentState::Connected);
        self
    }

    /// Enumerate processes from somewhere other than `proc_root`
    pub fn with_process_source(mut self, source: Arc<dyn ProcessSource>) -> Self {
        self.process_source = source;
        self
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Cancelling this token stops the agent
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The policy the validators evaluate against
    pub fn policy(&self) -> Arc<PolicyCache> {
        Arc::clone(&self.cache)
    }

    fn transition(&self, next: AgentState) -> Result<(), AgentError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(AgentError::InvalidState {
                requested: next,
                actual: current,
            });
        }
        self.state.send_replace(next);
        info!(from = %current, to = %next, "agent state changed");
        Ok(())
    }

    /// Dial the authority (`Created` → `Connected`)
    pub async fn connect(&mut self) -> Result<(), AgentError> {
        let span = self.span.clone();
        self.connect_inner().instrument(span).await
    }

    async fn connect_inner(&mut self) -> Result<(), AgentError> {
        let current = self.state();
        if current != AgentState::Created {
            return Err(AgentError::InvalidState {
                requested: AgentState::Connected,
                actual: current,
            });
        }

        let channel = grpc::connect(&self.config.authority).await.map_err(|e| {
            error!(error = %e, "couldn't connect to the authority");
            e
        })?;

        self.authority = Some(Arc::new(GrpcAuthority::new(
            channel,
            self.config.token_path.clone(),
            self.config.sync_timeout,
        )));
        self.transition(AgentState::Connected)
    }

    /// Run until the shutdown token is cancelled
    ///
    /// Connects first if needed. Consumes the agent: once stopped it cannot
    /// be started again.
    pub async fn run(self) -> Result<(), AgentError> {
        let span = self.span.clone();
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<(), AgentError> {
        if self.state() == AgentState::Created {
            self.connect_inner().await?;
        }

        let Some(authority) = self.authority.take() else {
            return Err(AgentError::InvalidState {
                requested: AgentState::Running,
                actual: self.state(),
            });
        };

        if self.shutdown.is_cancelled() {
            return self.transition(AgentState::Stopped);
        }

        let pod = &self.config.pod;
        let reporter = Arc::new(ViolationReporter::new(Arc::clone(&authority), pod.clone()));

        let synchronizer = PolicySynchronizer::new(
            Arc::clone(&authority),
            Arc::clone(&self.cache),
            pod.namespace.clone(),
            pod.labels.clone(),
            self.config.validation_interval,
        );
        let process_validator = ProcessValidator::new(
            Arc::clone(&self.process_source),
            Arc::clone(&self.cache),
            Arc::clone(&reporter),
            self.config.validation_interval,
        );
        let file_validator = FileIntegrityValidator::new(
            Arc::clone(&self.cache),
            reporter,
            self.config.file_validation_interval,
        );

        self.transition(AgentState::Running)?;
        info!("pod agent is running");

        let mut loops = JoinSet::new();
        let current = Span::current();
        loops.spawn(synchronizer.run(self.shutdown.clone()).instrument(current.clone()));
        loops.spawn(process_validator.run(self.shutdown.clone()).instrument(current.clone()));
        loops.spawn(file_validator.run(self.shutdown.clone()).instrument(current));

        let shutdown = self.shutdown.clone();
        let mut stopping = false;
        let mut panicked = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled(), if !stopping => {
                    stopping = true;
                    self.transition(AgentState::Stopping)?;
                }
                joined = loops.join_next() => match joined {
                    None => break,
                    Some(Ok(())) => {
                        if !shutdown.is_cancelled() {
                            warn!("agent loop returned before shutdown");
                        }
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "agent loop panicked, shutting down");
                        panicked.get_or_insert_with(|| e.to_string());
                        shutdown.cancel();
                    }
                },
            }
        }

        if !stopping {
            self.transition(AgentState::Stopping)?;
        }

        // Last handle on the channel; the loops dropped theirs on return
        drop(authority);
        self.transition(AgentState::Stopped)?;
        info!("pod agent shutdown gracefully");

        match panicked {
            Some(message) => Err(AgentError::LoopPanicked(message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAuthority, StaticProcesses};
    use std::time::Duration;

    #[test]
    fn test_new_agent_is_created() {
        let agent = Agent::new(AgentConfig::default());
        assert_eq!(agent.state(), AgentState::Created);
    }

    #[test]
    fn test_with_authority_is_connected() {
        let agent = Agent::new(AgentConfig::default())
            .with_authority(Arc::new(FakeAuthority::default()));
        assert_eq!(agent.state(), AgentState::Connected);
    }

    #[test]
    fn test_with_authority_after_connected_keeps_the_first() {
        let first = Arc::new(FakeAuthority::default());
        let agent = Agent::new(AgentConfig::default())
            .with_authority(first.clone())
            .with_authority(Arc::new(FakeAuthority::default()));

        assert_eq!(agent.state(), AgentState::Connected);
        let kept = agent.authority.as_ref().unwrap();
        assert_eq!(Arc::as_ptr(kept) as *const (), Arc::as_ptr(&first) as *const ());
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let mut agent = Agent::new(AgentConfig::default())
            .with_authority(Arc::new(FakeAuthority::default()));

        let err = agent.connect().await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::InvalidState {
                actual: AgentState::Connected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_run_stops_immediately() {
        let agent = Agent::new(AgentConfig::default())
            .with_authority(Arc::new(FakeAuthority::default()));
        let mut states = agent.subscribe();
        agent.shutdown_token().cancel();

        agent.run().await.unwrap();
        assert_eq!(*states.borrow_and_update(), AgentState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_walks_through_lifecycle() {
        let config = AgentConfig {
            validation_interval: Duration::from_millis(100),
            file_validation_interval: Duration::from_millis(100),
            ..AgentConfig::default()
        };
        let authority = Arc::new(FakeAuthority::default());
        let agent = Agent::new(config)
            .with_authority(authority.clone())
            .with_process_source(Arc::new(StaticProcesses::from_pairs(&[(1, "nginx")])));

        let mut states = agent.subscribe();
        let shutdown = agent.shutdown_token();
        let task = tokio::spawn(agent.run());

        states.wait_for(|s| *s == AgentState::Running).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown.cancel();

        task.await.unwrap().unwrap();
        assert_eq!(*states.borrow(), AgentState::Stopped);
        assert!(authority.fetches().len() >= 3);
    }
}
