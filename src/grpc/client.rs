//! Client for the policy authority
//!
//! `Authority` is the seam the rest of the agent talks to: fetch the
//! constraints for this pod, push a violation event. `GrpcAuthority` is the
//! tonic implementation over a shared `Channel`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tonic::Request;
use tracing::{debug, warn};

use super::pb::config_service_client::ConfigServiceClient;
use super::pb::event_service_client::EventServiceClient;
use super::pb::{Constraint, Event, GetConstraintsRequest, IngestEventRequest, Label};

/// Error type for authority RPCs
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("authority returned {}: {}", .0.code(), .0.message())]
    Status(#[from] tonic::Status),
    #[error("authority did not answer within {0:?}")]
    Timeout(Duration),
}

/// Remote source of policy and sink for events
#[tonic::async_trait]
pub trait Authority: Send + Sync {
    /// Constraints applying to a pod in `namespace` carrying `labels`
    async fn fetch_constraints(
        &self,
        namespace: &str,
        labels: &[Label],
    ) -> Result<Vec<Constraint>, AuthorityError>;

    /// Deliver one event; returns the uid the authority assigned
    async fn ingest_event(&self, event: Event) -> Result<String, AuthorityError>;
}

/// tonic-backed authority client
///
/// The channel is shared by every loop; tonic clients are cheap clones over
/// it, so each call takes its own.
#[derive(Clone)]
pub struct GrpcAuthority {
    config: ConfigServiceClient<Channel>,
    events: EventServiceClient<Channel>,
    token_path: PathBuf,
    timeout: Duration,
}

impl GrpcAuthority {
    /// Wrap a connected channel
    ///
    /// # Arguments
    /// * `channel` - Connected channel to the authority
    /// * `token_path` - Bearer token file, re-read on every call so rotated tokens are picked up
    /// * `timeout` - Deadline for each RPC
    pub fn new(channel: Channel, token_path: PathBuf, timeout: Duration) -> Self {
        Self {
            config: ConfigServiceClient::new(channel.clone()),
            events: EventServiceClient::new(channel),
            token_path,
            timeout,
        }
    }

    /// Build a request carrying the current bearer token and deadline
    fn authorized<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request.set_timeout(self.timeout);

        match bearer_token(&self.token_path) {
            Some(token) => match MetadataValue::try_from(format!("Bearer {}", token)) {
                Ok(value) => {
                    request.metadata_mut().insert("authorization", value);
                }
                Err(_) => warn!(
                    path = %self.token_path.display(),
                    "service account token is not a valid header value, sending request without it"
                ),
            },
            None => warn!(
                path = %self.token_path.display(),
                "no service account token available, sending request without it"
            ),
        }

        request
    }

    /// Bound a call client-side as well, in case the deadline isn't honoured
    async fn bounded<F, T>(&self, call: F) -> Result<T, AuthorityError>
    where
        F: std::future::Future<Output = Result<T, tonic::Status>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AuthorityError::Timeout(self.timeout)),
        }
    }
}

#[tonic::async_trait]
impl Authority for GrpcAuthority {
    async fn fetch_constraints(
        &self,
        namespace: &str,
        labels: &[Label],
    ) -> Result<Vec<Constraint>, AuthorityError> {
        let request = self.authorized(GetConstraintsRequest {
            namespace: namespace.to_string(),
            labels: labels.to_vec(),
        });

        let mut client = self.config.clone();
        let response = self.bounded(client.get_constraints(request)).await?;
        Ok(response.into_inner().constraints)
    }

    async fn ingest_event(&self, event: Event) -> Result<String, AuthorityError> {
        let request = self.authorized(IngestEventRequest { event: Some(event) });

        let mut client = self.events.clone();
        let response = self.bounded(client.ingest_event(request)).await?;
        let uid = response.into_inner().uid;
        debug!(uid = %uid, "event ingested");
        Ok(uid)
    }
}

/// Read the token file, trimmed; `None` when missing or empty
fn bearer_token(path: &std::path::Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(token) => {
            let token = token.trim();
            (!token.is_empty()).then(|| token.to_string())
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "can not read service account token");
            None
        }
    }
}
