//! Temp-file bookkeeping and host resource checks for a running job.

use crate::error::{Result, TranscribeError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Prefix of every per-job temp directory.
const TEMP_PREFIX: &str = "vid2text_";

/// Registry of the temp files one job owns.
///
/// Files live in a private directory under the configured temp root. Each
/// registered file is removed exactly once, either through [`release`] when
/// the pipeline is done with it or by [`release_all`], which also runs on
/// drop so panics and early returns leave nothing behind.
///
/// [`release`]: TempResources::release
/// [`release_all`]: TempResources::release_all
pub struct TempResources {
    path: PathBuf,
    dir: Option<TempDir>,
    files: Mutex<BTreeSet<PathBuf>>,
}

impl TempResources {
    /// Create a fresh job directory under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(root)
            .map_err(|e| {
                TranscribeError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create temp directory in {}: {e}", root.display()),
                ))
            })?;
        let path = dir.path().to_path_buf();
        debug!("Using temp directory: {:?}", path);

        Ok(Self {
            path,
            dir: Some(dir),
            files: Mutex::new(BTreeSet::new()),
        })
    }

    /// Directory holding this job's files.
    pub fn dir(&self) -> &Path {
        &self.path
    }

    /// Reserve a path in the job directory and register it for cleanup.
    pub fn allocate(&self, file_name: &str) -> PathBuf {
        let path = self.path.join(file_name);
        self.register(path.clone());
        path
    }

    pub fn register(&self, path: PathBuf) {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(path);
    }

    /// Delete a registered file. Returns `false` if it was not registered,
    /// which makes a second release of the same path a no-op.
    pub fn release(&self, path: &Path) -> bool {
        let registered = {
            let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
            files.remove(path)
        };
        if registered {
            remove_file(path);
        }
        registered
    }

    /// Number of files still waiting for release.
    pub fn tracked(&self) -> usize {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Delete every remaining file and the job directory.
    pub fn release_all(&mut self) {
        let files = std::mem::take(&mut *self.files.lock().unwrap_or_else(|e| e.into_inner()));
        if !files.is_empty() {
            debug!("Releasing {} leftover temp files", files.len());
        }
        for path in &files {
            remove_file(path);
        }

        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!("Failed to remove temp directory {:?}: {}", self.path, e);
            }
        }
    }
}

impl Drop for TempResources {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn remove_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed temp file {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp file {:?}: {}", path, e),
    }
}

/// Temp space needed for a source of `source_size` bytes.
pub fn required_space(source_size: u64, factor: f64) -> u64 {
    (source_size as f64 * factor).ceil() as u64
}

/// Free bytes on the filesystem holding `path`, if it can be determined.
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Fail with `InsufficientSpace` when `available` is known and too small.
pub fn check_disk_space(required: u64, available: Option<u64>) -> Result<()> {
    match available {
        Some(available) if available < required => {
            Err(TranscribeError::InsufficientSpace { required, available })
        }
        Some(available) => {
            debug!("Disk space ok: {} required, {} available", required, available);
            Ok(())
        }
        None => {
            warn!("Could not determine free disk space, assuming enough is available");
            Ok(())
        }
    }
}

/// Estimate the temp space a job needs and verify the temp root has it.
pub fn precheck_disk_space(source: &Path, temp_root: &Path, factor: f64) -> Result<()> {
    let source_size = std::fs::metadata(source)?.len();
    let required = required_space(source_size, factor);
    check_disk_space(required, available_space(temp_root))
}

/// Samples this process's resident memory and warns above a threshold.
pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
    threshold: u64,
}

impl MemoryMonitor {
    pub fn new(threshold: u64) -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!("Memory monitoring unavailable: {}", e))
            .ok();
        Self {
            system: System::new(),
            pid,
            threshold,
        }
    }

    /// Current resident set size in bytes.
    pub fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system.process(pid).map(|p| p.memory())
    }

    /// Sample memory, logging a warning when over the threshold.
    /// Returns `true` if the threshold was exceeded.
    pub fn check(&mut self, context: &str) -> bool {
        let Some(bytes) = self.resident_bytes() else {
            return false;
        };
        let mb = bytes as f64 / (1024.0 * 1024.0);
        if bytes > self.threshold {
            warn!("High memory usage {}: {:.1} MB", context, mb);
            true
        } else {
            debug!("Memory usage {}: {:.1} MB", context, mb);
            false
        }
    }
}
