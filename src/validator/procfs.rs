//! Process enumeration from procfs
//!
//! ```text
//! /proc/
//! ├── 1/
//! │   ├── comm        ← "nginx\n" (truncated to 15 bytes by the kernel)
//! │   └── cmdline     ← argv, NUL separated
//! ├── 42/
//! └── self -> 42      ← non-numeric entries are skipped
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::grpc::pb::Process;

/// `comm` holds at most TASK_COMM_LEN - 1 bytes
const TRUNCATED_COMM_LEN: usize = 15;

/// Something that can list the live processes
pub trait ProcessSource: Send + Sync {
    fn processes(&self) -> io::Result<Vec<Process>>;
}

/// Reads processes from a procfs mount
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessSource for ProcFs {
    /// All processes, ordered by pid
    ///
    /// Processes that exit between listing and reading are skipped.
    fn processes(&self) -> io::Result<Vec<Process>> {
        let mut processes = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable procfs entry");
                    continue;
                }
            };

            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            else {
                continue;
            };

            match process_name(&entry.path()) {
                Ok(name) => processes.push(Process { pid, name }),
                Err(e) => debug!(pid, error = %e, "can not read process name"),
            }
        }

        processes.sort_by_key(|p| p.pid);
        Ok(processes)
    }
}

/// Name of the process in `dir`
///
/// When `comm` looks truncated, recover the full executable name from
/// argv[0] provided it extends what `comm` shows.
fn process_name(dir: &Path) -> io::Result<String> {
    let comm = fs::read_to_string(dir.join("comm"))?;
    let comm = comm.trim_end_matches('\n').to_string();

    if comm.len() < TRUNCATED_COMM_LEN {
        return Ok(comm);
    }

    let full = fs::read(dir.join("cmdline")).ok().and_then(|cmdline| {
        let argv0 = cmdline.split(|b| *b == 0).next()?;
        let argv0 = String::from_utf8_lossy(argv0);
        let base = Path::new(argv0.as_ref()).file_name()?.to_str()?.to_string();
        base.starts_with(&comm).then_some(base)
    });

    Ok(full.unwrap_or(comm))
}
