//! Pod identity and the downward-API labels file
//!
//! The admission webhook mounts the pod's labels as a file with one
//! `key="value"` pair per line. The identity built from it is fixed for the
//! lifetime of the agent and stamped onto every reported event.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::grpc::pb;

/// Who the agent is watching
#[derive(Debug, Clone, PartialEq)]
pub struct PodIdentity {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub labels: Vec<pb::Label>,
}

impl Default for PodIdentity {
    fn default() -> Self {
        Self {
            uid: String::new(),
            name: String::new(),
            namespace: "default".to_string(),
            labels: Vec::new(),
        }
    }
}

impl PodIdentity {
    /// Wire form attached to each event target
    pub fn to_pb(&self) -> pb::Pod {
        pb::Pod {
            uid: self.uid.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            labels: self.labels.clone(),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to read pod labels file {path}: {source}")]
pub struct LabelsError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Parse `KEY="VALUE"` lines
///
/// Splits on the first `=` and trims surrounding double quotes from the
/// value. Lines without `=` are ignored.
pub fn parse_labels(content: &str) -> Vec<pb::Label> {
    content
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some(pb::Label {
                key: key.to_string(),
                value: value.trim_matches('"').to_string(),
            })
        })
        .collect()
}

/// Read and parse a labels file
pub fn read_labels_file(path: &Path) -> Result<Vec<pb::Label>, LabelsError> {
    let content = fs::read_to_string(path).map_err(|source| LabelsError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_labels(&content))
}
