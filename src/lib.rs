//! Run a script from a directory, feeding its standard input from a file and
//! writing its standard output to another, and exit with its exit code.

pub mod cli;
pub mod config;
