//! Pipe allocation for the child's standard input and output.

use crate::spawn::Error;
use nix::{
    fcntl::{FcntlArg, OFlag, fcntl},
    unistd::pipe2,
};
use std::os::fd::OwnedFd;

/// A connected pipe. Which end belongs to the child depends on the
/// direction of the channel it backs.
pub struct Pipe {
    /// The read end.
    pub read: OwnedFd,

    /// The write end.
    pub write: OwnedFd,
}
impl Pipe {
    /// Create a new pipe. Both ends are close-on-exec; the child's end is
    /// duplicated onto a standard stream, which clears the flag there.
    pub fn new() -> Result<Self, Error> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| Error::Pipe("create", e))?;
        Ok(Self { read, write })
    }
}

/// Conditionally create a pipe.
/// Returns either `None`, or the result of `Pipe::new()`
pub fn cond_pipe(cond: bool) -> Result<Option<Pipe>, Error> {
    if cond { Pipe::new().map(Some) } else { Ok(None) }
}

/// Put a descriptor into non-blocking mode, preserving its other status flags.
pub fn set_nonblocking(fd: &OwnedFd) -> Result<(), Error> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::Pipe("get flags", e))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    let _ = fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::Pipe("set flags", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::{
        fs::File,
        io::{ErrorKind, Read, Write},
    };

    #[test]
    fn connected() -> Result<()> {
        let pipe = Pipe::new()?;
        let mut write = File::from(pipe.write);
        let mut read = File::from(pipe.read);

        write.write_all(b"through")?;
        drop(write);

        let mut out = String::new();
        let _ = read.read_to_string(&mut out)?;
        assert!(out == "through");
        Ok(())
    }

    #[test]
    fn conditional() -> Result<()> {
        assert!(cond_pipe(false)?.is_none());
        assert!(cond_pipe(true)?.is_some());
        Ok(())
    }

    #[test]
    fn nonblocking() -> Result<()> {
        let pipe = Pipe::new()?;
        set_nonblocking(&pipe.read)?;
        let mut read = File::from(pipe.read);
        let mut buf = [0u8; 8];
        let err = read.read(&mut buf).expect_err("empty pipe should not block");
        assert!(err.kind() == ErrorKind::WouldBlock);
        drop(pipe.write);
        Ok(())
    }
}
