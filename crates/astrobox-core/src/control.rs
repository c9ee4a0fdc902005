//! Stopping extractor processes: SIGTERM first, SIGKILL after a grace period.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;

/// Ask the process to exit. On Unix this is SIGTERM; elsewhere an immediate kill.
pub fn request_stop(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let r = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if r == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            // already gone
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            tracing::debug!(pid, error = %err, "SIGTERM failed, killing");
        } else {
            return Ok(());
        }
    }
    child.start_kill()
}

/// Stop `child` and reap it. Escalates to a hard kill if it outlives `grace`.
pub async fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    request_stop(child)?;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::debug!(pid = ?child.id(), "process ignored SIGTERM, sending SIGKILL");
            child.start_kill()?;
            child.wait().await
        }
    }
}
