//! The configuration file.
//!
//! Looked up at `$SCRIPTRUN_CONFIG`, then
//! `$XDG_CONFIG_HOME/scriptrun/config.toml`, then
//! `$HOME/.config/scriptrun/config.toml`. A missing or malformed file is
//! treated as empty. `SCRIPTRUN_DIRECTORY` and `SCRIPTRUN_BUFFER_SIZE`
//! override the file.

use serde::{Deserialize, Serialize};
use std::{env, fs::read_to_string, path::PathBuf, sync::LazyLock};

/// The configuration, read once.
pub static CONFIG_FILE: LazyLock<ConfigFile> = LazyLock::new(ConfigFile::default);

/// Scriptrun's configuration file.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// The directory scripts are run from.
    directory: Option<String>,

    /// The size of the exchange buffers.
    buffer_size: Option<usize>,
}
impl ConfigFile {
    /// The default directory, if not given on the command line.
    pub fn directory(&self) -> &str {
        self.directory.as_deref().unwrap_or(".")
    }

    /// The exchange buffer size, if not given on the command line.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(spawn::BUFFER_SIZE)
    }

    /// Where the file is read from.
    pub fn path() -> Option<PathBuf> {
        if let Ok(path) = env::var("SCRIPTRUN_CONFIG") {
            Some(PathBuf::from(path))
        } else if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
            Some(PathBuf::from(xdg).join("scriptrun").join("config.toml"))
        } else {
            env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".config/scriptrun/config.toml"))
        }
    }

    /// Parse a file's contents, then apply the environment.
    pub fn parse(content: &str) -> Self {
        let mut config = toml::from_str(content).unwrap_or(Self {
            directory: None,
            buffer_size: None,
        });

        if let Ok(env) = env::var("SCRIPTRUN_DIRECTORY") {
            config.directory = Some(env);
        }
        if let Ok(env) = env::var("SCRIPTRUN_BUFFER_SIZE")
            && let Ok(size) = env.parse()
        {
            config.buffer_size = Some(size);
        }
        config
    }

    /// The effective configuration, as TOML.
    pub fn display(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(&Self {
            directory: Some(self.directory().to_owned()),
            buffer_size: Some(self.buffer_size()),
        })
    }
}
impl Default for ConfigFile {
    fn default() -> Self {
        let content = Self::path()
            .and_then(|path| read_to_string(path).ok())
            .unwrap_or_default();
        Self::parse(&content)
    }
}
