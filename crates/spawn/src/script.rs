//! Run an executable from a directory, exchanging its standard input and
//! output with the caller through a Producer and a Consumer.

use crate::{
    exchange::{BUFFER_SIZE, Drain, Exchange, Feed},
    pipe::{cond_pipe, set_nonblocking},
    reaper::Reaper,
    spawn::{Error, Invocation, launch},
    stream::{Consumer, Producer},
};

/// Run a script.
///
/// The child is executed as `directory/name`, with the argument vector
/// `[name, param, prefix...]`. If an input Producer is set, the child's
/// standard input is fed from it; otherwise the child inherits the caller's.
/// Likewise, an output Consumer receives the child's standard output.
///
/// `run` blocks until the child terminates and returns its exit code.
/// A child that cannot be executed exits with 127.
///
/// ## Examples
/// Feed cat, collecting its output:
/// ```rust
/// use spawn::{Reader, Script};
/// let mut input = Reader(&b"Hello, World!"[..]);
/// let mut output = Vec::new();
/// let code = Script::new("/bin", "cat", "-")
///     .input(&mut input)
///     .output(&mut output)
///     .run()
///     .unwrap();
/// assert!(code == 0);
/// assert!(output == b"Hello, World!");
/// ```
///
/// Propagate an exit code:
/// ```rust
/// let code = spawn::Script::new("/bin", "sh", "-c")
///     .prefix(["exit 3"])
///     .run()
///     .unwrap();
/// assert!(code == 3);
/// ```
pub struct Script<'a> {
    /// The directory containing the executable.
    directory: String,

    /// The executable, relative to `directory`.
    name: String,

    /// The first argument.
    param: String,

    /// Arguments following `param`.
    prefix: Vec<String>,

    /// Feeds the child's standard input.
    input: Option<&'a mut dyn Producer>,

    /// Receives the child's standard output.
    output: Option<&'a mut dyn Consumer>,

    /// The size of each exchange buffer.
    buffer: usize,
}
impl<'a> Script<'a> {
    /// Construct a `Script` to run `directory/name param`.
    pub fn new(
        directory: impl Into<String>,
        name: impl Into<String>,
        param: impl Into<String>,
    ) -> Self {
        Self {
            directory: directory.into(),
            name: name.into(),
            param: param.into(),
            prefix: Vec::new(),
            input: None,
            output: None,
            buffer: BUFFER_SIZE,
        }
    }

    /// Append arguments after the parameter.
    /// Order is preserved, across calls as well.
    pub fn prefix<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed the child's standard input from `producer`.
    pub fn input(mut self, producer: &'a mut dyn Producer) -> Self {
        self.input = Some(producer);
        self
    }

    /// Deliver the child's standard output to `consumer`.
    pub fn output(mut self, consumer: &'a mut dyn Consumer) -> Self {
        self.output = Some(consumer);
        self
    }

    /// Set the size of the input and output buffers. The producer is asked
    /// for, and the consumer handed, at most this many bytes at a time.
    pub fn buffer(mut self, size: usize) -> Self {
        self.buffer = size.max(1);
        self
    }

    /// The path that will be executed.
    pub fn path(&self) -> String {
        format!("{}/{}", self.directory, self.name)
    }

    /// Launch the child and run the exchange until it terminates.
    ///
    /// ## Errors
    /// * An argument or the path contains a NULL byte.
    /// * A pipe or the signal descriptor cannot be created.
    /// * The `fork` fails.
    ///
    /// Everything past a successful fork, including failing to execute,
    /// is reflected in the returned exit code instead.
    pub fn run(self) -> Result<i32, Error> {
        let invocation = Invocation::new(&self.directory, &self.name, &self.param, &self.prefix)?;

        let stdin = cond_pipe(self.input.is_some())?;
        if let Some(pipe) = &stdin {
            set_nonblocking(&pipe.write)?;
        }
        let stdout = cond_pipe(self.output.is_some())?;

        let mut reaper = Reaper::new()?;
        let launched = launch(&invocation, &reaper, stdin, stdout)?;
        if let Some(pid) = launched.handle.pid() {
            reaper.watch(pid);
        }

        let feed = launched
            .feed
            .zip(self.input)
            .map(|(fd, producer)| Feed::new(fd, producer, self.buffer));
        let drain = launched
            .drain
            .zip(self.output)
            .map(|(fd, consumer)| Drain::new(fd, consumer, self.buffer));

        Ok(Exchange::new(reaper, launched.handle, feed, drain).run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Reader, Writer, spawn::EXEC_FAILURE};
    use anyhow::Result;
    use nix::sys::signal::{SigSet, Signal};
    use std::io;

    /// A deterministic, non-repeating-ish payload.
    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn echo() -> Result<()> {
        let data = payload(1000);
        let mut input = Reader(data.as_slice());
        let mut output = Vec::new();
        let code = Script::new("/bin", "cat", "-")
            .input(&mut input)
            .output(&mut output)
            .run()?;
        assert!(code == 0);
        assert!(output == data);
        Ok(())
    }

    #[test]
    fn exit_codes() -> Result<()> {
        for k in [0, 1, 2, 42, 127, 128, 255] {
            let code = Script::new("/bin", "sh", "-c")
                .prefix([format!("exit {k}")])
                .run()?;
            assert!(code == k);
        }
        Ok(())
    }

    #[test]
    fn argument_order() -> Result<()> {
        let mut output = Vec::new();
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["printf '%s|' \"$0\" \"$1\" \"$2\"", "zero"])
            .prefix(["one", "two"])
            .output(&mut output)
            .run()?;
        assert!(code == 0);
        assert!(output == b"zero|one|two|");
        Ok(())
    }

    #[test]
    fn missing() -> Result<()> {
        let code = Script::new("/nonexistent", "nothing", "").run()?;
        assert!(code == EXEC_FAILURE);
        Ok(())
    }

    #[test]
    fn not_executable() -> Result<()> {
        let mut output = Vec::new();
        let code = Script::new("/etc", "passwd", "")
            .output(&mut output)
            .run()?;
        assert!(code == EXEC_FAILURE);
        assert!(output.is_empty());
        Ok(())
    }

    #[test]
    fn no_deadlock() -> Result<()> {
        // Several times the capacity of a pipe in each direction, with a
        // child that writes as it reads.
        let data = payload(4 * 1024 * 1024);
        let mut input = Reader(data.as_slice());
        let mut output = Vec::with_capacity(data.len());
        let code = Script::new("/bin", "cat", "-")
            .input(&mut input)
            .output(&mut output)
            .run()?;
        assert!(code == 0);
        assert!(output.len() == data.len());
        assert!(output == data);
        Ok(())
    }

    #[test]
    fn small_buffer() -> Result<()> {
        let data = payload(10_000);
        let mut input = Reader(data.as_slice());
        let mut largest = 0;
        let mut output = Vec::new();
        let mut consumer = |bytes: &[u8]| -> usize {
            largest = largest.max(bytes.len());
            output.extend_from_slice(bytes);
            bytes.len()
        };
        let code = Script::new("/bin", "cat", "-")
            .input(&mut input)
            .output(&mut consumer)
            .buffer(7)
            .run()?;
        assert!(code == 0);
        assert!(largest <= 7);
        assert!(output == data);
        Ok(())
    }

    #[test]
    fn back_pressure() -> Result<()> {
        let mut calls = 0;
        let mut received = 0;
        let mut consumer = |bytes: &[u8]| -> usize {
            calls += 1;
            received += bytes.len();
            0
        };
        // The child keeps writing well past what the consumer refused.
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done; exit 0"])
            .output(&mut consumer)
            .run()?;

        assert!(calls == 1);
        assert!(received > 0);

        // Writing to the closed pipe either kills the shell with SIGPIPE, or
        // fails the echo; either way the exchange reaches termination.
        assert!(code == 0 || code == 128 + nix::sys::signal::Signal::SIGPIPE as i32 || code == 1);
        Ok(())
    }

    #[test]
    fn producer_exhaustion() -> Result<()> {
        let mut chunks = vec![b"third\n".to_vec(), b"second\n".to_vec(), b"first\n".to_vec()];
        let mut producer = |buf: &mut [u8]| -> io::Result<usize> {
            match chunks.pop() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        };
        let mut output = Vec::new();
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["wc -l"])
            .input(&mut producer)
            .output(&mut output)
            .run()?;
        assert!(code == 0);
        assert!(String::from_utf8(output)?.trim() == "3");
        Ok(())
    }

    #[test]
    fn producer_failure() -> Result<()> {
        let mut producer = |_: &mut [u8]| -> io::Result<usize> {
            Err(io::Error::other("no input"))
        };
        let mut output = Vec::new();
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["cat; exit 4"])
            .input(&mut producer)
            .output(&mut output)
            .run()?;

        // The input is closed, cat sees end of file, the exchange continues.
        assert!(code == 4);
        assert!(output.is_empty());
        Ok(())
    }

    #[test]
    fn child_ignores_input() -> Result<()> {
        // The child exits without reading; the remaining input is dropped.
        let data = payload(1024 * 1024);
        let mut input = Reader(data.as_slice());
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["exit 5"])
            .input(&mut input)
            .run()?;
        assert!(code == 5);
        Ok(())
    }

    #[test]
    fn output_before_exit() -> Result<()> {
        let mut output = Vec::new();
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["echo last words; exit 9"])
            .output(&mut output)
            .run()?;
        assert!(code == 9);
        assert!(output == b"last words\n");
        Ok(())
    }

    #[test]
    fn passthrough() -> Result<()> {
        // Neither stream is redirected; the child writes to our stdout.
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["true; exit 6"])
            .run()?;
        assert!(code == 6);
        Ok(())
    }

    #[test]
    fn killed() -> Result<()> {
        let code = Script::new("/bin", "sh", "-c")
            .prefix(["kill -TERM $$"])
            .run()?;
        assert!(code == 128 + nix::sys::signal::Signal::SIGTERM as i32);
        Ok(())
    }

    #[test]
    fn writer() -> Result<()> {
        let mut sink = Vec::new();
        {
            let mut output = Writer(&mut sink);
            let code = Script::new("/bin", "sh", "-c")
                .prefix(["echo written"])
                .output(&mut output)
                .run()?;
            assert!(code == 0);
        }
        assert!(sink == b"written\n");
        Ok(())
    }

    #[test]
    fn concurrent() -> Result<()> {
        let threads = (0..8)
            .map(|k| {
                std::thread::spawn(move || -> Result<(i32, Vec<u8>)> {
                    let mut output = Vec::new();
                    let code = Script::new("/bin", "sh", "-c")
                        .prefix([format!("echo {k}; exit {k}")])
                        .output(&mut output)
                        .run()?;
                    Ok((code, output))
                })
            })
            .collect::<Vec<_>>();

        for (k, thread) in threads.into_iter().enumerate() {
            let (code, output) = thread.join().expect("thread")?;
            assert!(code == k as i32);
            assert!(output == format!("{k}\n").into_bytes());
        }
        Ok(())
    }

    #[test]
    fn retrying_producer() -> Result<()> {
        let mut attempts = 0;
        let mut sent = false;
        let mut producer = |buf: &mut [u8]| -> io::Result<usize> {
            attempts += 1;
            if attempts < 3 {
                Err(io::ErrorKind::WouldBlock.into())
            } else if sent {
                Ok(0)
            } else {
                sent = true;
                buf[..6].copy_from_slice(b"ready\n");
                Ok(6)
            }
        };
        let mut output = Vec::new();
        let code = Script::new("/bin", "cat", "-")
            .input(&mut producer)
            .output(&mut output)
            .run()?;
        assert!(code == 0);
        assert!(output == b"ready\n");
        Ok(())
    }

    /// The number of descriptors open in this process.
    fn descriptors() -> Result<usize> {
        Ok(std::fs::read_dir("/proc/self/fd")?.count())
    }

    /// Whether `signal` is blocked on this thread.
    fn blocked(signal: Signal) -> Result<bool> {
        Ok(SigSet::thread_get_mask()?.contains(signal))
    }

    #[test]
    fn released() -> Result<()> {
        std::thread::spawn(|| -> Result<()> {
            let before = descriptors()?;
            let data = payload(200 * 1024);

            for _ in 0..20 {
                let mut input = Reader(data.as_slice());
                let mut output = Vec::new();
                let code = Script::new("/bin", "cat", "-")
                    .input(&mut input)
                    .output(&mut output)
                    .run()?;
                assert!(code == 0);
                assert!(output == data);

                let mut input = Reader(data.as_slice());
                let mut output = Vec::new();
                let code = Script::new("/nonexistent", "nothing", "")
                    .input(&mut input)
                    .output(&mut output)
                    .run()?;
                assert!(code == EXEC_FAILURE);

                let mut input = Reader(data.as_slice());
                let mut output = Vec::new();
                let result = Script::new("/bin", "ca\0t", "-")
                    .input(&mut input)
                    .output(&mut output)
                    .run();
                assert!(matches!(result, Err(Error::Null(_))));

                assert!(!blocked(Signal::SIGCHLD)?);
                assert!(!blocked(Signal::SIGPIPE)?);
            }

            // The grandchild outlives the child, holding its output open.
            let mut output = Vec::new();
            let code = Script::new("/bin", "sh", "-c")
                .prefix(["(sleep 1; echo late) & echo early; exit 3"])
                .output(&mut output)
                .run()?;
            assert!(code == 3);
            assert!(!blocked(Signal::SIGCHLD)?);
            assert!(!blocked(Signal::SIGPIPE)?);

            // Other tests open descriptors of their own concurrently, so
            // give them a moment to settle before comparing.
            let mut after = descriptors()?;
            for _ in 0..100 {
                if after <= before {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(50));
                after = descriptors()?;
            }
            assert!(after <= before, "{before} descriptors before, {after} after");
            Ok(())
        })
        .join()
        .expect("thread")
    }

    #[test]
    fn path() {
        let script = Script::new("/opt/scripts", "build.sh", "release");
        assert!(script.path() == "/opt/scripts/build.sh");
    }

    #[test]
    fn null_argument() {
        let result = Script::new("/bin", "sh", "-c").prefix(["exit\0"]).run();
        assert!(matches!(result, Err(Error::Null(_))));
    }
}
