//! The Handle tracks a launched child from fork until it is reaped.

use log::{debug, warn};
use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, kill},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};

/// The outcome of checking on the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The child has not terminated.
    Running,

    /// The child terminated and has been reaped. Death by signal `s` is
    /// reported as `128 + s`.
    Exited(i32),

    /// The child can no longer be waited on, such as when something else
    /// in the process reaped it first.
    Lost,
}

/// A handle to a child created by `launch`.
///
/// The child is reaped at most once, through `status`. If the handle is
/// dropped while the child still runs, the child is killed and reaped so
/// that no zombie outlives the exchange.
pub struct Handle {
    /// The name of the executable, for logging.
    name: String,

    /// The child PID. Once reaped, it is set to None
    child: Option<Pid>,
}
impl Handle {
    /// Construct a new `Handle` from a Child PID.
    pub fn new(name: String, pid: Pid) -> Self {
        Self {
            name,
            child: Some(pid),
        }
    }

    /// Get the name of the handle.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pid of the child, if it has not been reaped.
    pub fn pid(&self) -> Option<Pid> {
        self.child
    }

    /// Check whether the child has terminated, without blocking.
    /// A terminated child is reaped by this call.
    pub fn status(&mut self) -> Status {
        let Some(pid) = self.child else {
            return Status::Lost;
        };

        loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.child = None;
                    debug!("{} ({pid}) exited with {code}", self.name);
                    break Status::Exited(code);
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    self.child = None;
                    debug!("{} ({pid}) killed by {signal}", self.name);
                    break Status::Exited(128 + signal as i32);
                }
                Ok(WaitStatus::StillAlive) => break Status::Running,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    warn!("Could not wait on {} ({pid}): {e}", self.name);
                    self.child = None;
                    break Status::Lost;
                }
            }
        }
    }
}
impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(pid) = self.child.take() {
            warn!("{} ({pid}) outlived the exchange, killing", self.name);
            match kill(pid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {
                    let _ = waitpid(pid, None);
                }
                Err(e) => warn!("Failed to terminate process {pid}: {e}"),
            }
        }
    }
}
