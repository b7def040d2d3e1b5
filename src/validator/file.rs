//! File Integrity Validator - monitored files vs. SHA-256 allow-rules
//!
//! Each rule names a file and the lowercase hex digest it must have. Files
//! are stream-hashed on a blocking thread against a snapshot of the policy,
//! so slow disks never hold up the synchronizer.
//!
//! An unreadable file is a mismatch, reported with an empty actual digest:
//! integrity checks fail closed.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::agent::wait_for_next_pass;
use crate::grpc::pb::{Constraint, ViolatedFile};
use crate::metrics::{VALIDATION_PASS_DURATION, VIOLATIONS_DETECTED};
use crate::policy::PolicyCache;
use crate::reporter::ViolationReporter;

/// Lowercase hex SHA-256 of a file's contents
///
/// Anything but a regular file is refused: opening a FIFO would otherwise
/// block until a writer shows up and stall the whole pass.
pub fn sha256_hex(path: &Path) -> io::Result<String> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    options.custom_flags(libc::O_NONBLOCK);

    let mut file = options.open(path)?;
    if !file.metadata()?.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Files whose digest no rule accepts, keyed by file name
///
/// Rules without a name or an expected digest are skipped. A file matched
/// by any rule is dropped from the result even if another rule expected a
/// different digest.
pub fn find_violated_files(constraints: &[Constraint]) -> BTreeMap<String, ViolatedFile> {
    let mut violated = BTreeMap::new();
    let mut allowed = BTreeSet::new();

    for constraint in constraints {
        for rule in &constraint.allowed_files {
            let expected = match rule.sha256sum.as_deref() {
                Some(sum) if !rule.name.is_empty() && !sum.is_empty() => sum,
                _ => continue,
            };

            debug!(
                file = %rule.name,
                allowed_sha256sum = expected,
                "validating file sha256 checksum"
            );

            let actual = match sha256_hex(Path::new(&rule.name)) {
                Ok(digest) => digest,
                Err(e) => {
                    error!(
                        file = %rule.name,
                        error = %e,
                        "can not read file to check the sha256 checksum"
                    );
                    String::new()
                }
            };

            if actual == expected {
                allowed.insert(rule.name.clone());
            } else {
                violated.insert(
                    rule.name.clone(),
                    ViolatedFile {
                        name: rule.name.clone(),
                        expected_sha256sum: expected.to_string(),
                        actual_sha256sum: actual,
                    },
                );
            }
        }
    }

    violated.retain(|name, _| !allowed.contains(name));
    violated
}

/// Periodically checks monitored files against the policy
pub struct FileIntegrityValidator {
    cache: Arc<PolicyCache>,
    reporter: Arc<ViolationReporter>,
    interval: Duration,
}

impl FileIntegrityValidator {
    pub fn new(
        cache: Arc<PolicyCache>,
        reporter: Arc<ViolationReporter>,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            reporter,
            interval,
        }
    }

    /// One validation pass; reports and returns the violated files
    pub async fn validate_once(&self) -> BTreeMap<String, ViolatedFile> {
        let start = Instant::now();
        let constraints = self.cache.get().await;

        let violated =
            match tokio::task::spawn_blocking(move || find_violated_files(&constraints)).await {
                Ok(violated) => violated,
                Err(e) => {
                    error!(error = %e, "file checksum task failed, skipping pass");
                    return BTreeMap::new();
                }
            };

        VALIDATION_PASS_DURATION
            .with_label_values(&["file"])
            .observe(start.elapsed().as_secs_f64());

        if !violated.is_empty() {
            for file in violated.values() {
                debug!(
                    file = %file.name,
                    actual = %file.actual_sha256sum,
                    expected = %file.expected_sha256sum,
                    "found a file that violates checksum"
                );
            }
            VIOLATIONS_DETECTED
                .with_label_values(&["file"])
                .inc_by(violated.len() as f64);

            self.reporter
                .report_files(violated.values().cloned().collect())
                .await;
        }

        violated
    }

    /// Validate until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval = ?self.interval, "file integrity validation started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.validate_once() => {}
            }

            if !wait_for_next_pass(self.interval, &shutdown).await {
                break;
            }
        }

        info!("file integrity validation stopped");
    }
}
