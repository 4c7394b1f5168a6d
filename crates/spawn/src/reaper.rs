//! Termination notification as a pollable descriptor.
//!
//! The Reaper blocks SIGCHLD and SIGPIPE on the calling thread and binds
//! them to a signal descriptor, so that child termination (and broken
//! pipes on the input channel) are observed through the exchange's
//! readiness query rather than as asynchronous interrupts. It must exist
//! before the child is forked: a child that exits immediately has its
//! notification queued on the descriptor rather than lost.
//!
//! The mask is a scoped acquisition. Dropping the Reaper discards whatever
//! notifications are still pending, then restores the thread's original
//! mask, on every exit path.
//!
//! SIGCHLD is process-directed: in a multi-threaded process a thread that
//! does not block it may consume it first. Where the kernel supports it,
//! the Reaper also holds a process descriptor for the child, which becomes
//! readable on termination regardless of which thread took the signal.

use crate::spawn::Error;
use log::{debug, trace, warn};
use nix::{
    errno::Errno,
    libc,
    sys::{
        signal::{SigSet, SigmaskHow, Signal},
        signalfd::{SfdFlags, SignalFd},
    },
    unistd::Pid,
};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// The signals routed to the descriptor.
const WATCHED: [Signal; 2] = [Signal::SIGCHLD, Signal::SIGPIPE];

/// The watched set as a mask.
fn watched() -> SigSet {
    let mut mask = SigSet::empty();
    for signal in WATCHED {
        mask.add(signal);
    }
    mask
}

/// Open a process descriptor for `pid`.
fn pidfd_open(pid: Pid) -> Result<OwnedFd, Errno> {
    let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid.as_raw(), 0) };
    Errno::result(fd).map(|fd| unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
}

/// Watches for child termination.
pub struct Reaper {
    /// The signal descriptor bound to `WATCHED`.
    signals: SignalFd,

    /// A process descriptor for the watched child, if supported.
    process: Option<OwnedFd>,

    /// The thread's mask before the Reaper blocked `WATCHED`.
    original: SigSet,
}
impl Reaper {
    /// Create the signal descriptor and block the watched signals.
    pub fn new() -> Result<Self, Error> {
        let mask = watched();
        let signals = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(|e| Error::Signal("create", e))?;
        let original = mask
            .thread_swap_mask(SigmaskHow::SIG_BLOCK)
            .map_err(|e| Error::Signal("mask", e))?;

        Ok(Self {
            signals,
            process: None,
            original,
        })
    }

    /// Additionally watch the child through a process descriptor.
    /// Kernels without support fall back to the signal descriptor alone.
    pub fn watch(&mut self, pid: Pid) {
        match pidfd_open(pid) {
            Ok(fd) => self.process = Some(fd),
            Err(e) => debug!("No process descriptor for {pid}: {e}"),
        }
    }

    /// The signal descriptor, for the readiness query.
    pub fn signals(&self) -> BorrowedFd<'_> {
        self.signals.as_fd()
    }

    /// The process descriptor, for the readiness query.
    pub fn process(&self) -> Option<BorrowedFd<'_>> {
        self.process.as_ref().map(AsFd::as_fd)
    }

    /// Read a single notification. Returns None if nothing is pending.
    pub fn notification(&mut self) -> Result<Option<Signal>, Errno> {
        let Some(info) = self.signals.read_signal()? else {
            return Ok(None);
        };
        trace!(
            "Notification: signal {} from {} (code {}, status {})",
            info.ssi_signo, info.ssi_pid, info.ssi_code, info.ssi_status
        );
        Ok(Signal::try_from(info.ssi_signo as i32).ok())
    }

    /// Restore the thread's original mask.
    ///
    /// The forked child calls this before exec, so the executed program
    /// starts with the mask the caller had.
    pub fn restore(&self) -> Result<(), Errno> {
        self.original.thread_set_mask()
    }
}
impl Drop for Reaper {
    fn drop(&mut self) {
        while let Ok(Some(info)) = self.signals.read_signal() {
            trace!("Discarding signal {}", info.ssi_signo);
        }
        if let Err(e) = self.restore() {
            warn!("Failed to restore signal mask: {e}");
        }
    }
}
