//! The two capabilities a caller hands to an exchange: something that
//! produces bytes for the child's standard input, and something that
//! accepts bytes from its standard output.
//!
//! Closures implement both directly:
//! ```rust
//! use spawn::{Consumer, Producer};
//! let mut count = 0;
//! let mut consumer = |bytes: &[u8]| -> usize {
//!     count += bytes.len();
//!     bytes.len()
//! };
//! assert!(consumer.consume(b"abc") == 3);
//!
//! let mut producer = |_buf: &mut [u8]| -> std::io::Result<usize> { Ok(0) };
//! assert!(producer.produce(&mut [0u8; 4]).unwrap() == 0);
//! ```

use log::warn;
use std::io::{self, Read, Write};

/// A source of bytes for the child's standard input.
pub trait Producer {
    /// Fill `buf` with up to `buf.len()` bytes.
    ///
    /// Return `Ok(0)` once there is nothing more to send. An error closes the
    /// input channel, except for `Interrupted` and `WouldBlock`, which ask to be
    /// called again the next time the child can accept input.
    ///
    /// The child's input is usually writable, so a producer that keeps
    /// returning `Interrupted` or `WouldBlock` is called again at once, and
    /// the exchange spins until it yields data. These are for transient
    /// conditions only. A producer with nothing ready should block inside
    /// `produce` instead.
    fn produce(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}
impl<F> Producer for F
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    fn produce(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self(buf)
    }
}

/// A sink for the child's standard output.
pub trait Consumer {
    /// Take `bytes`, returning how many were accepted. Accepting fewer than
    /// `bytes.len()` closes the output channel; no further output is delivered.
    fn consume(&mut self, bytes: &[u8]) -> usize;
}
impl<F> Consumer for F
where
    F: FnMut(&[u8]) -> usize,
{
    fn consume(&mut self, bytes: &[u8]) -> usize {
        self(bytes)
    }
}

/// Collect everything.
impl Consumer for Vec<u8> {
    fn consume(&mut self, bytes: &[u8]) -> usize {
        self.extend_from_slice(bytes);
        bytes.len()
    }
}

/// Feed the child from any `Read`.
///
/// ```rust
/// use spawn::{Producer, Reader};
/// let mut reader = Reader(&b"input"[..]);
/// let mut buf = [0u8; 16];
/// assert!(reader.produce(&mut buf).unwrap() == 5);
/// ```
pub struct Reader<R>(pub R);
impl<R: Read> Producer for Reader<R> {
    fn produce(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Send the child's output to any `Write`. A failed write declines the
/// chunk, which closes the output channel.
pub struct Writer<W>(pub W);
impl<W: Write> Consumer for Writer<W> {
    fn consume(&mut self, bytes: &[u8]) -> usize {
        match self.0.write_all(bytes) {
            Ok(()) => bytes.len(),
            Err(e) => {
                warn!("Failed to forward child output: {e}");
                0
            }
        }
    }
}
