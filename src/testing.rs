//! In-memory test doubles for the agent's seams

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::grpc::pb::{Constraint, Event, Label, Process};
use crate::grpc::{Authority, AuthorityError};
use crate::validator::ProcessSource;

/// Authority that serves a fixed constraint set and records everything
#[derive(Default)]
pub struct FakeAuthority {
    constraints: Mutex<Vec<Constraint>>,
    fetches: Mutex<Vec<(String, Vec<Label>)>>,
    events: Mutex<Vec<Event>>,
    fail_fetches: AtomicBool,
    fail_ingest: AtomicBool,
}

impl FakeAuthority {
    pub fn with_constraints(constraints: Vec<Constraint>) -> Self {
        Self {
            constraints: Mutex::new(constraints),
            ..Default::default()
        }
    }

    pub fn set_constraints(&self, constraints: Vec<Constraint>) {
        *self.constraints.lock().unwrap() = constraints;
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_ingest(&self, fail: bool) {
        self.fail_ingest.store(fail, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> Vec<(String, Vec<Label>)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[tonic::async_trait]
impl Authority for FakeAuthority {
    async fn fetch_constraints(
        &self,
        namespace: &str,
        labels: &[Label],
    ) -> Result<Vec<Constraint>, AuthorityError> {
        self.fetches
            .lock()
            .unwrap()
            .push((namespace.to_string(), labels.to_vec()));

        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(tonic::Status::unavailable("authority down").into());
        }
        Ok(self.constraints.lock().unwrap().clone())
    }

    async fn ingest_event(&self, event: Event) -> Result<String, AuthorityError> {
        if self.fail_ingest.load(Ordering::SeqCst) {
            return Err(tonic::Status::unavailable("authority down").into());
        }
        let mut events = self.events.lock().unwrap();
        events.push(event);
        Ok(format!("event-{}", events.len()))
    }
}

/// Process table with a fixed set of entries
pub struct StaticProcesses(pub Vec<Process>);

impl StaticProcesses {
    pub fn from_pairs(pairs: &[(i32, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(pid, name)| Process {
                    pid: *pid,
                    name: name.to_string(),
                })
                .collect(),
        )
    }
}

impl ProcessSource for StaticProcesses {
    fn processes(&self) -> io::Result<Vec<Process>> {
        Ok(self.0.clone())
    }
}
