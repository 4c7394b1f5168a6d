//! Scriptrun's CLI.

pub mod config;
pub mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};
use enum_dispatch::enum_dispatch;

/// The command line.
#[derive(Parser)]
#[command(name = "Scriptrun")]
#[command(version)]
#[command(about = "Run a script, streaming its input and output")]
pub struct Cli {
    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Scriptrun's subcommands.
#[derive(Subcommand)]
#[enum_dispatch(Run)]
pub enum Command {
    /// Run a script
    Run(run::Args),

    /// Show the effective configuration.
    Config(config::Args),
}

/// A subcommand. Returns the exit code for the process.
#[enum_dispatch]
pub trait Run {
    /// Run the subcommand.
    fn run(self) -> Result<i32>;
}
