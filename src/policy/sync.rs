//! Policy Synchronizer - keeps the cache in step with the authority
//!
//! Every interval: fetch the constraints scoped to this pod's namespace and
//! labels, install them. A failed fetch leaves the previous set in place and
//! is retried next interval, without backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::PolicyCache;
use crate::agent::wait_for_next_pass;
use crate::grpc::pb::Label;
use crate::grpc::{Authority, AuthorityError};
use crate::metrics::POLICY_SYNC_TOTAL;

pub struct PolicySynchronizer {
    authority: Arc<dyn Authority>,
    cache: Arc<PolicyCache>,
    namespace: String,
    labels: Vec<Label>,
    interval: Duration,
}

impl PolicySynchronizer {
    pub fn new(
        authority: Arc<dyn Authority>,
        cache: Arc<PolicyCache>,
        namespace: String,
        labels: Vec<Label>,
        interval: Duration,
    ) -> Self {
        Self {
            authority,
            cache,
            namespace,
            labels,
            interval,
        }
    }

    /// One fetch-and-install; returns the number of constraints installed
    pub async fn sync_once(&self) -> Result<usize, AuthorityError> {
        match self
            .authority
            .fetch_constraints(&self.namespace, &self.labels)
            .await
        {
            Ok(constraints) => {
                let count = constraints.len();
                debug!(count, "received constraints from the authority");
                self.cache.set(constraints).await;
                POLICY_SYNC_TOTAL.with_label_values(&["success"]).inc();
                Ok(count)
            }
            Err(e) => {
                error!(
                    error = %e,
                    "error while getting constraints from the authority, keeping previous policy"
                );
                POLICY_SYNC_TOTAL.with_label_values(&["error"]).inc();
                Err(e)
            }
        }
    }

    /// Sync until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(namespace = %self.namespace, interval = ?self.interval, "policy sync started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.sync_once() => {}
            }

            if !wait_for_next_pass(self.interval, &shutdown).await {
                break;
            }
        }

        info!("policy sync stopped");
    }
}
