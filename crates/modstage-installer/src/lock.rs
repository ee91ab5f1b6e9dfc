use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::warn;

use crate::error::InstallError;

/// Marker file that keeps two installer runs from sharing an application.
///
/// Holds the owner's pid. Released when dropped; a marker left by a process
/// that no longer runs is reclaimed by the next `acquire`.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    pub fn acquire(path: &Path) -> Result<Self, InstallError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))
                .map_err(InstallError::Configuration)?;
        }

        match claim(path)? {
            Some(lock) => Ok(lock),
            None if Self::break_stale(path)? => claim(path)?.ok_or_else(|| locked(path)),
            None => Err(locked(path)),
        }
    }

    /// Removes the lock file when its recorded owner is no longer running.
    ///
    /// Returns `false` when the owner is alive or cannot be identified.
    pub fn break_stale(path: &Path) -> Result<bool, InstallError> {
        let Some(pid) = read_lock_holder(path).and_then(|holder| holder.parse().ok()) else {
            return Ok(false);
        };
        let alive = match holder_process_alive(pid) {
            Ok(alive) => alive,
            Err(err) => {
                warn!(pid, error = %format!("{err:#}"), "cannot tell whether lock holder runs");
                true
            }
        };
        if alive {
            return Ok(false);
        }

        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(InstallError::Configuration(anyhow::Error::new(err).context(
                    format!("failed to remove stale install lock: {}", path.display()),
                )));
            }
        }
        warn!(path = %path.display(), pid, "reclaimed install lock left by a dead process");
        Ok(true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to release install lock");
            }
        }
    }
}

fn claim(path: &Path) -> Result<Option<InstallLock>, InstallError> {
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
        Err(err) => {
            return Err(InstallError::Configuration(anyhow::Error::new(err).context(
                format!("failed to claim install lock: {}", path.display()),
            )));
        }
    };

    let lock = InstallLock {
        path: path.to_path_buf(),
    };
    file.write_all(format!("{}\n", std::process::id()).as_bytes())
        .and_then(|_| file.flush())
        .with_context(|| format!("failed to write install lock: {}", path.display()))
        .map_err(InstallError::Configuration)?;
    Ok(Some(lock))
}

fn locked(path: &Path) -> InstallError {
    InstallError::Locked {
        path: path.to_path_buf(),
        holder: read_lock_holder(path),
    }
}

fn read_lock_holder(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let holder = raw.trim();
    (!holder.is_empty()).then(|| holder.to_string())
}

fn holder_process_alive(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        if Path::new("/proc/self").exists() {
            return Ok(Path::new("/proc").join(pid.to_string()).exists());
        }
        let status = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed executing lock holder liveness check for pid={pid}"))?;
        Ok(status.success())
    }

    #[cfg(windows)]
    {
        let output = Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed executing lock holder liveness check for pid={pid}"))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!(
                "lock holder liveness check failed for pid={pid}: status={} stderr='{}'",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains(&format!(",\"{pid}\"")))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        Ok(true)
    }
}
