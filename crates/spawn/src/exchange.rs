//! The readiness-driven loop between the parent and a launched child.
//!
//! Each iteration waits, without a timeout, on the termination descriptors,
//! the child's output (if drained) and the child's input (if fed). Output is
//! serviced first: while the child has output available it is drained, and
//! neither input nor termination is looked at in that iteration, so output
//! written just before exit is never lost to the exit notification. Input is
//! only fed in iterations without output activity.
//!
//! Because the loop never blocks anywhere but the readiness query, and the
//! input descriptor is non-blocking, neither side can end up waiting on the
//! other with both pipes full.

use crate::{
    handle::{Handle, Status},
    reaper::Reaper,
    spawn::EXEC_FAILURE,
    stream::{Consumer, Producer},
};
use log::{debug, trace, warn};
use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
    sys::signal::Signal,
};
use std::{
    fs::File,
    io::{ErrorKind, Read, Write},
    os::fd::{AsFd, OwnedFd},
};

/// The default size of the exchange buffers.
pub const BUFFER_SIZE: usize = 65536;

/// What happened when a channel was serviced.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    /// Bytes moved; the channel stays open.
    Moved,

    /// Nothing moved, but the condition is transient.
    Retry,

    /// The channel is finished.
    Closed,
}

/// The child's standard input, fed from a Producer.
pub struct Feed<'a> {
    /// The write end of the pipe, non-blocking.
    file: File,

    /// The source of input.
    producer: &'a mut dyn Producer,

    /// Bytes taken from the producer.
    buffer: Vec<u8>,

    /// The part of `buffer` that has yet to be written: `start..end`.
    start: usize,

    /// See `start`.
    end: usize,
}
impl<'a> Feed<'a> {
    /// Construct a Feed over the parent's end of the input pipe.
    pub fn new(fd: OwnedFd, producer: &'a mut dyn Producer, size: usize) -> Self {
        Self {
            file: File::from(fd),
            producer,
            buffer: vec![0; size.max(1)],
            start: 0,
            end: 0,
        }
    }

    /// Write to the child. Fresh input is only requested from the producer
    /// once everything it gave previously has been written.
    fn step(&mut self) -> Flow {
        if self.start == self.end {
            match self.producer.produce(&mut self.buffer) {
                Ok(0) => {
                    debug!("Input exhausted");
                    return Flow::Closed;
                }
                Ok(n) => {
                    self.start = 0;
                    self.end = n.min(self.buffer.len());
                }
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                    return Flow::Retry;
                }
                Err(e) => {
                    debug!("Input failed: {e}");
                    return Flow::Closed;
                }
            }
        }

        match self.file.write(&self.buffer[self.start..self.end]) {
            Ok(0) => Flow::Closed,
            Ok(n) => {
                self.start += n;
                Flow::Moved
            }
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                Flow::Retry
            }
            Err(e) => {
                debug!("Failed to write to child: {e}");
                Flow::Closed
            }
        }
    }
}

/// The child's standard output, drained into a Consumer.
pub struct Drain<'a> {
    /// The read end of the pipe.
    file: File,

    /// The sink for output.
    consumer: &'a mut dyn Consumer,

    /// Bytes read from the child.
    buffer: Vec<u8>,
}
impl<'a> Drain<'a> {
    /// Construct a Drain over the parent's end of the output pipe.
    pub fn new(fd: OwnedFd, consumer: &'a mut dyn Consumer, size: usize) -> Self {
        Self {
            file: File::from(fd),
            consumer,
            buffer: vec![0; size.max(1)],
        }
    }

    /// Read what the child has written, and hand it to the consumer.
    fn step(&mut self) -> Flow {
        match self.file.read(&mut self.buffer) {
            Ok(0) => {
                debug!("Output closed");
                Flow::Closed
            }
            Ok(n) => {
                let accepted = self.consumer.consume(&self.buffer[..n]);
                if accepted < n {
                    debug!("Consumer accepted {accepted} of {n} bytes, closing output");
                    Flow::Closed
                } else {
                    Flow::Moved
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                Flow::Retry
            }
            Err(e) => {
                debug!("Failed to read from child: {e}");
                Flow::Closed
            }
        }
    }
}

/// The readiness of each subject after a query.
struct Ready {
    /// The signal descriptor.
    signals: PollFlags,

    /// The process descriptor.
    process: PollFlags,

    /// The child's output.
    drain: PollFlags,

    /// The child's input.
    feed: PollFlags,
}

/// The exchange between parent and child. Consumed by `run`.
///
/// Channels are closed by dropping them, so a closed channel's descriptor
/// can never be used again. Fields drop in order: the pipes first, then the
/// handle (which kills a child that was never observed to terminate), and
/// the Reaper last, restoring the signal mask.
pub struct Exchange<'a> {
    /// The child's input, while open.
    feed: Option<Feed<'a>>,

    /// The child's output, while open.
    drain: Option<Drain<'a>>,

    /// The child.
    handle: Handle,

    /// Termination notification.
    reaper: Reaper,
}
impl<'a> Exchange<'a> {
    /// Construct a new Exchange.
    pub fn new(
        reaper: Reaper,
        handle: Handle,
        feed: Option<Feed<'a>>,
        drain: Option<Drain<'a>>,
    ) -> Self {
        Self {
            feed,
            drain,
            handle,
            reaper,
        }
    }

    /// Block until any subject is ready.
    fn wait(&self) -> Result<Ready, Errno> {
        let mut fds = Vec::with_capacity(4);
        fds.push(PollFd::new(self.reaper.signals(), PollFlags::POLLIN));

        let mut register = |fd, flags| {
            let index = fds.len();
            fds.push(PollFd::new(fd, flags));
            index
        };
        let process = self.reaper.process().map(|fd| register(fd, PollFlags::POLLIN));
        let drain = self
            .drain
            .as_ref()
            .map(|drain| register(drain.file.as_fd(), PollFlags::POLLIN));
        let feed = self
            .feed
            .as_ref()
            .map(|feed| register(feed.file.as_fd(), PollFlags::POLLOUT));

        let _ = poll(&mut fds, PollTimeout::NONE)?;

        let revents = |index: Option<usize>| {
            index
                .and_then(|i| fds.get(i))
                .and_then(PollFd::revents)
                .unwrap_or_else(PollFlags::empty)
        };
        Ok(Ready {
            signals: revents(Some(0)),
            process: revents(process),
            drain: revents(drain),
            feed: revents(feed),
        })
    }

    /// Check whether a termination notification concerns our child.
    /// Other notifications are read and discarded.
    fn reap(&mut self, ready: &Ready) -> Status {
        let mut check = ready.process.contains(PollFlags::POLLIN);
        if ready.signals.contains(PollFlags::POLLIN) {
            match self.reaper.notification() {
                Ok(Some(Signal::SIGCHLD)) => check = true,
                Ok(_) => {}
                Err(e) => warn!("Failed to read notification: {e}"),
            }
        }

        if check {
            self.handle.status()
        } else {
            Status::Running
        }
    }

    /// Run the exchange until the child terminates, returning its exit code.
    /// If the loop ends without observing termination, `EXEC_FAILURE` is
    /// returned instead.
    pub fn run(mut self) -> i32 {
        let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;

        loop {
            let ready = match self.wait() {
                Ok(ready) => ready,
                Err(Errno::EINTR | Errno::EAGAIN) => continue,
                Err(e) => {
                    warn!("Readiness query failed for {}: {e}", self.handle.name());
                    break EXEC_FAILURE;
                }
            };

            if ready.drain.intersects(readable)
                && let Some(drain) = self.drain.as_mut()
            {
                match drain.step() {
                    Flow::Moved | Flow::Retry => continue,
                    Flow::Closed => self.drain = None,
                }
            }

            if let Some(feed) = self.feed.as_mut() {
                if ready.feed.contains(PollFlags::POLLOUT) {
                    if feed.step() == Flow::Closed {
                        self.feed = None;
                    }
                } else if ready.feed.intersects(PollFlags::POLLERR | PollFlags::POLLHUP) {
                    debug!("Child closed its input");
                    self.feed = None;
                }
            }

            match self.reap(&ready) {
                Status::Running => trace!("{} still running", self.handle.name()),
                Status::Exited(code) => break code,
                Status::Lost => break EXEC_FAILURE,
            }
        }
    }
}
