//! Run a script.
use crate::config::CONFIG_FILE;
use anyhow::{Context, Result};
use log::debug;
use spawn::{Reader, Script, Writer};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
};

/// Arguments for `scriptrun run`.
#[derive(clap::Args, Debug, Default)]
pub struct Args {
    /// The script, relative to the directory.
    pub name: String,

    /// The first argument passed to the script.
    #[arg(allow_hyphen_values = true)]
    pub param: String,

    /// Arguments following the parameter.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub prefix: Vec<String>,

    /// The directory containing the script. Defaults to the configuration,
    /// or the current directory.
    #[arg(short, long)]
    pub directory: Option<String>,

    /// Feed the script's standard input from a file, rather than inheriting it.
    #[arg(short, long)]
    pub input: Option<String>,

    /// Write the script's standard output to a file, rather than inheriting it.
    #[arg(short, long)]
    pub output: Option<String>,

    /// The size of the exchange buffers.
    #[arg(short, long)]
    pub buffer_size: Option<usize>,
}
impl super::Run for Args {
    fn run(self) -> Result<i32> {
        let directory = self
            .directory
            .unwrap_or_else(|| CONFIG_FILE.directory().to_owned());
        let buffer = self.buffer_size.unwrap_or_else(|| CONFIG_FILE.buffer_size());

        let mut input = match &self.input {
            Some(path) => Some(Reader(BufReader::new(
                File::open(path).with_context(|| format!("Failed to open input {path}"))?,
            ))),
            None => None,
        };
        let mut output = match &self.output {
            Some(path) => Some(Writer(BufWriter::new(
                File::create(path).with_context(|| format!("Failed to create output {path}"))?,
            ))),
            None => None,
        };

        let mut script = Script::new(&directory, self.name, self.param)
            .prefix(self.prefix)
            .buffer(buffer);
        debug!("Running {}", script.path());

        if let Some(input) = input.as_mut() {
            script = script.input(input);
        }
        if let Some(output) = output.as_mut() {
            script = script.output(output);
        }
        let code = script.run()?;

        if let Some(Writer(mut file)) = output {
            file.flush().context("Failed to flush output")?;
        }
        debug!("Script exited with {code}");
        Ok(code)
    }
}
