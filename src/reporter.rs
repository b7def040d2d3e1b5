//! Violation Reporter - turns a pass's violations into one event
//!
//! Delivery is fire-and-forget: a failed report is logged and dropped. The
//! next pass detects the same violation again and reports it again, which
//! is the only retry there is.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, error};
use uuid::Uuid;

use crate::grpc::pb::{Event, Process, Target, ViolatedFile};
use crate::grpc::Authority;
use crate::metrics::REPORTS_TOTAL;
use crate::pod::PodIdentity;

/// Event type for policy violations
pub const EVENT_TYPE_VIOLATION: &str = "violation";

/// Build a violation event for `pod`
///
/// One target carrying the pod identity and whichever lists are non-empty.
pub fn build_violation_event(
    pod: &PodIdentity,
    processes: Vec<Process>,
    files: Vec<ViolatedFile>,
) -> Event {
    Event {
        r#type: EVENT_TYPE_VIOLATION.to_string(),
        client_timestamp: Some(prost_types::Timestamp::from(SystemTime::now())),
        targets: vec![Target {
            pod: Some(pod.to_pb()),
            violated_processes: processes,
            violated_files: files,
        }],
        ..Default::default()
    }
}

pub struct ViolationReporter {
    authority: Arc<dyn Authority>,
    pod: PodIdentity,
}

impl ViolationReporter {
    pub fn new(authority: Arc<dyn Authority>, pod: PodIdentity) -> Self {
        Self { authority, pod }
    }

    /// Report the processes one pass found in violation
    pub async fn report_processes(&self, processes: Vec<Process>) {
        let count = processes.len();
        self.deliver(build_violation_event(&self.pod, processes, Vec::new()), count)
            .await;
    }

    /// Report the files one pass found in violation
    pub async fn report_files(&self, files: Vec<ViolatedFile>) {
        let count = files.len();
        self.deliver(build_violation_event(&self.pod, Vec::new(), files), count)
            .await;
    }

    async fn deliver(&self, event: Event, violations: usize) {
        // Correlates the agent-side log lines of one report
        let trace_id = Uuid::now_v7().to_string();

        match self.authority.ingest_event(event).await {
            Ok(uid) => {
                REPORTS_TOTAL.with_label_values(&["success"]).inc();
                debug!(trace_id = %trace_id, uid = %uid, violations, "reported violation event");
            }
            Err(e) => {
                REPORTS_TOTAL.with_label_values(&["error"]).inc();
                error!(
                    trace_id = %trace_id,
                    error = %e,
                    violations,
                    "error while reporting violation events"
                );
            }
        }
    }
}
