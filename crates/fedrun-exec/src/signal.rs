use tokio::process::Child;
use tracing::{debug, warn};

/// Termination request forwarded to a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Polite request; the child may clean up.
    Terminate,
    /// Forced kill after the grace period.
    Kill,
}

/// Process group a child leads; spawned with `process_group(0)` its id is the child's pid.
///
/// The group outlives its leader, so helpers the child forked can still be
/// signalled after the leader has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcessGroup {
    leader: u32,
}

impl ProcessGroup {
    /// `None` for pid 0: `kill(0, …)` would hit the orchestrator's own group.
    pub(crate) fn led_by(leader: u32) -> Option<Self> {
        (leader != 0).then_some(Self { leader })
    }

    /// Send `signal` to every member. Returns `false` when nothing was signalled.
    pub(crate) fn signal(self, signal: Signal) -> bool {
        let leader = self.leader;
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                let signo = match signal {
                    Signal::Terminate => libc::SIGTERM,
                    Signal::Kill => libc::SIGKILL,
                };
                let Ok(pgid) = libc::pid_t::try_from(leader) else {
                    warn!(leader, "pid out of range for signal delivery");
                    return false;
                };
                // SAFETY: kill(2) has no memory-safety preconditions.
                if unsafe { libc::kill(-pgid, signo) } == 0 {
                    debug!(leader, ?signal, "signal delivered to process group");
                    return true;
                }
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ESRCH) {
                    debug!(leader, ?signal, "process group already empty");
                } else {
                    warn!(leader, ?signal, error = %err, "process group signal failed");
                }
                false
            } else {
                debug!(leader, ?signal, "process groups unavailable on this platform");
                false
            }
        }
    }
}

/// Deliver `signal` to a child that has not been reaped yet.
///
/// The group gets it first so helpers the child forked receive it too. A kill
/// that cannot reach the group falls back to the child alone; elsewhere than
/// Unix both requests kill.
pub(crate) fn deliver(child: &mut Child, group: Option<ProcessGroup>, signal: Signal) {
    if group.is_some_and(|g| g.signal(signal)) {
        return;
    }
    if cfg!(unix) && signal == Signal::Terminate {
        return;
    }
    if let Err(e) = child.start_kill() {
        warn!(pid = ?child.id(), ?signal, error = %e, "direct kill failed");
    }
}

/// Exit code of a finished child. Death by signal `n` is reported as `-n`.
pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return -signo;
        }
    }
    -1
}
