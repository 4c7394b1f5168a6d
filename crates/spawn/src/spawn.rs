//! Launch the child: resolve the invocation, fork, rewire the standard
//! streams onto the exchange's pipes, and exec.

use crate::{handle::Handle, pipe::Pipe, reaper::Reaper};
use log::trace;
use nix::{
    errno::Errno,
    libc,
    sys::signal::{SigHandler, Signal, signal},
    unistd::{ForkResult, dup2_stdin, dup2_stdout, fork},
};
use std::{
    ffi::{CStr, CString, NulError, c_char},
    os::fd::OwnedFd,
    ptr,
};
use thiserror::Error;

/// The exit status of a child that could not be executed, and the result
/// of an exchange that ended without observing termination.
pub const EXEC_FAILURE: i32 = 127;

/// Errors related to launching a child.
#[derive(Debug, Error)]
pub enum Error {
    /// Errors when the path or arguments contain Null values.
    #[error("Provided string contains null values: {0}")]
    Null(#[from] NulError),

    /// Errors creating or configuring a pipe.
    #[error("Failed to {0} pipe: {1}")]
    Pipe(&'static str, Errno),

    /// Errors setting up the termination signal descriptor.
    #[error("Failed to {0} signal descriptor: {1}")]
    Signal(&'static str, Errno),

    /// An error when trying to fork.
    #[error("Failed to fork: {0}")]
    Fork(Errno),
}

/// A resolved invocation: the absolute path to execute, and the argument
/// vector `[name, param, prefix...]`.
#[derive(Debug)]
pub struct Invocation {
    /// The executable name, as passed.
    name: String,

    /// `directory/name`
    path: CString,

    /// The argument vector, without the terminator.
    argv: Vec<CString>,
}
impl Invocation {
    /// Resolve an invocation.
    /// Fails if any component contains a NULL byte.
    pub fn new<S: AsRef<str>>(
        directory: &str,
        name: &str,
        param: &str,
        prefix: &[S],
    ) -> Result<Self, Error> {
        let path = CString::new(format!("{directory}/{name}"))?;

        let mut argv = Vec::with_capacity(prefix.len() + 2);
        argv.push(CString::new(name)?);
        argv.push(CString::new(param)?);
        for arg in prefix {
            argv.push(CString::new(arg.as_ref())?);
        }

        Ok(Self {
            name: name.to_owned(),
            path,
            argv,
        })
    }

    /// The executable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The path that will be executed.
    pub fn path(&self) -> &CStr {
        &self.path
    }

    /// The argument vector passed to the child.
    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    /// The argument vector as a null-terminated array of pointers into self.
    fn pointers(&self) -> Vec<*const c_char> {
        self.argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain([ptr::null()])
            .collect()
    }
}

/// The parent's side of a launched child.
pub struct Launched {
    /// The child.
    pub handle: Handle,

    /// The write end of the child's standard input, if piped.
    pub feed: Option<OwnedFd>,

    /// The read end of the child's standard output, if piped.
    pub drain: Option<OwnedFd>,
}

/// Fork and exec the invocation.
///
/// The Reaper must already exist so that the child's termination cannot be
/// missed. If `stdin` or `stdout` are provided, the child's standard stream
/// is replaced by the relevant end of the pipe, and the parent keeps the
/// other; otherwise the child inherits the parent's stream.
///
/// If the executable cannot be run, the child exits with `EXEC_FAILURE`.
/// The only error is failing to fork, in which case every pipe is closed.
pub fn launch(
    invocation: &Invocation,
    reaper: &Reaper,
    stdin: Option<Pipe>,
    stdout: Option<Pipe>,
) -> Result<Launched, Error> {
    if log::max_level() == log::Level::Trace {
        let formatted = invocation
            .argv
            .iter()
            .filter_map(|s| s.to_str().ok())
            .collect::<Vec<&str>>()
            .join(" ");
        trace!("{}: {formatted:?}", invocation.path.to_string_lossy());
    }

    // Built before forking; the child must not allocate.
    let argv = invocation.pointers();

    match unsafe { fork() }.map_err(Error::Fork)? {
        ForkResult::Parent { child } => {
            // Close the child's ends.
            let feed = stdin.map(|Pipe { read, write }| {
                drop(read);
                write
            });
            let drain = stdout.map(|Pipe { read, write }| {
                drop(write);
                read
            });

            Ok(Launched {
                handle: Handle::new(invocation.name.clone(), child),
                feed,
                drain,
            })
        }

        ForkResult::Child => exec(invocation, &argv, reaper, stdin, stdout),
    }
}

/// The child's half of `launch`. Never returns.
///
/// Every descriptor the parent holds for the exchange (its pipe ends and
/// the signal descriptor) is close-on-exec, so only the duplicated standard
/// streams survive into the new program.
fn exec(
    invocation: &Invocation,
    argv: &[*const c_char],
    reaper: &Reaper,
    stdin: Option<Pipe>,
    stdout: Option<Pipe>,
) -> ! {
    let prepared = (move || -> Result<(), Errno> {
        reaper.restore()?;
        let _ = unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }?;

        if let Some(Pipe { read, write }) = stdin {
            drop(write);
            dup2_stdin(&read)?;
        }
        if let Some(Pipe { read, write }) = stdout {
            drop(read);
            dup2_stdout(&write)?;
        }
        Ok(())
    })();

    if prepared.is_ok() {
        let _ = unsafe { libc::execv(invocation.path.as_ptr(), argv.as_ptr()) };
    }
    unsafe { libc::_exit(EXEC_FAILURE) }
}
