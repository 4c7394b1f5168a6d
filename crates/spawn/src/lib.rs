//! Run a child process, streaming its standard input and output through
//! caller-supplied callbacks, and collect its exit code, all from a single
//! readiness-driven loop on the calling thread.

mod exchange;
mod handle;
mod pipe;
mod reaper;
mod script;
mod spawn;
mod stream;

pub use exchange::BUFFER_SIZE;
pub use script::Script;
pub use spawn::EXEC_FAILURE;
pub use spawn::Error;
pub use spawn::Invocation;
pub use stream::{Consumer, Producer, Reader, Writer};

/// Run `directory/name` with the argument vector `[name, param, prefix...]`.
///
/// See `Script` for the details; this is the same operation with positional
/// arguments.
///
/// ```rust
/// let mut output = Vec::new();
/// let code = spawn::run("/bin", "sh", ["echo hi"], "-c", None, Some(&mut output)).unwrap();
/// assert!(code == 0);
/// assert!(output == b"hi\n");
/// ```
pub fn run<'a, I, S>(
    directory: &str,
    name: &str,
    prefix: I,
    param: &str,
    input: Option<&'a mut dyn Producer>,
    output: Option<&'a mut dyn Consumer>,
) -> Result<i32, Error>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut script = Script::new(directory, name, param).prefix(prefix);
    if let Some(producer) = input {
        script = script.input(producer);
    }
    if let Some(consumer) = output {
        script = script.output(consumer);
    }
    script.run()
}
