//! The main Scriptrun executable.

use anyhow::Result;
use clap::Parser;
use scriptrun::cli::{Cli, Run};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let code = cli.command.run()?;
    std::process::exit(code)
}
