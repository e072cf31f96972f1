use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance (pid {pid}) may be running; delete {path} if it is not")]
    Held { pid: String, path: PathBuf },
    #[error("failed to create lock file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Exclusive lock file holding our pid; removed again on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let pid = std::process::id();
                file.write_all(pid.to_string().as_bytes())
                    .map_err(|source| LockError::Io {
                        path: path.clone(),
                        source,
                    })?;
                info!("Lock acquired, pid {pid}");
                Ok(InstanceLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(LockError::Held { pid, path })
            }
            Err(source) => Err(LockError::Io { path, source }),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Lock released"),
            Err(e) => warn!("Failed to release lock {}: {e}", self.path.display()),
        }
    }
}
