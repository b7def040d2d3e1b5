//! Validation loops
//!
//! Two independent validators evaluate the live workload against the
//! current policy snapshot every interval:
//!
//! - `ProcessValidator` - live processes vs. process allow-rules (regex on name)
//! - `FileIntegrityValidator` - monitored files vs. SHA-256 allow-rules
//!
//! Both follow the same override rule within a pass: anything allowed by
//! *some* rule is removed from the violation set, whatever other rules said.

pub mod file;
pub mod process;
pub mod procfs;

pub use file::{find_violated_files, sha256_hex, FileIntegrityValidator};
pub use process::{PatternCache, ProcessValidator};
pub use procfs::{ProcFs, ProcessSource};
