//! Child-process supervision shared by the shell tool and subprocess backends.
//!
//! Children are started as leaders of their own process group so that a
//! timeout or cancellation can signal the whole tree, not just the shell.

use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::debug;

/// Make `cmd` lead its own process group and die with its handle.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.kill_on_drop(true);
}

/// Ask the child's process group to stop, wait up to `grace`, then force-kill.
///
/// The child is always reaped before this returns.
pub async fn terminate(child: &mut Child, grace: Duration) {
    let pid = child.id();

    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            // Leader is gone; sweep anything left in its group.
            signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            return;
        }
        debug!(pid, grace_ms = grace.as_millis() as u64, "Terminate timed out, killing");
    }

    #[cfg(not(unix))]
    let _ = grace;

    kill_tree(child, pid).await;
}

/// Kill the child's whole process group immediately and reap it.
pub async fn kill(child: &mut Child) {
    let pid = child.id();
    kill_tree(child, pid).await;
}

/// Like [`kill`], for a group whose leader may already have been reaped.
///
/// `pgid` is the leader's pid captured at spawn time.
pub async fn kill_tree(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        signal_group(pgid, nix::sys::signal::Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;

    // Already dead is fine; kill() also waits.
    let _ = child.kill().await;
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Err(err) = killpg(Pid::from_raw(pid as i32), signal) {
        // ESRCH: group already empty
        debug!(pid, ?signal, error = %err, "killpg failed");
    }
}
