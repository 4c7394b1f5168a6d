//! Show the effective configuration.
use crate::config::{CONFIG_FILE, ConfigFile};
use anyhow::Result;

/// Arguments for `scriptrun config`.
#[derive(clap::Args, Debug, Default)]
pub struct Args {
    /// Print where the configuration file is read from, instead of its contents.
    #[arg(short, long, default_value_t = false)]
    pub path: bool,
}
impl super::Run for Args {
    fn run(self) -> Result<i32> {
        if self.path {
            match ConfigFile::path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No configuration path"),
            }
        } else {
            print!("{}", CONFIG_FILE.display()?);
        }
        Ok(0)
    }
}
