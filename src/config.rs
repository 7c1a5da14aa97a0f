//! Per-environment settings read from `env.config.json`.
//!
//! The file is a JSON object keyed by environment name:
//!
//! ```json
//! {
//!     "dev": {
//!         "files": [".env.base", ".env.dev"],
//!         "dir": "envs",
//!         "required": ["API_KEY"],
//!         "execute": "cargo run"
//!     }
//! }
//! ```
//!
//! Only `files` is mandatory. Other environments in the same file are not
//! validated.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::loader::EnvLoader;

/// Name of the configuration file looked up in the config directory.
pub const CONFIG_FILE_NAME: &str = "env.config.json";

/// Settings of one environment in `env.config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvConfig {
    /// Env files to load, later files taking precedence.
    pub files: Vec<PathBuf>,
    /// Directory the files are resolved against.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Turn on loader diagnostics.
    #[serde(default)]
    pub debug: bool,
    #[serde(default, rename = "override")]
    pub override_existing: bool,
    /// Keys that must be defined with a non-empty value.
    #[serde(default)]
    pub required: Vec<String>,
    /// Command line to run once the variables are loaded.
    #[serde(default)]
    pub execute: Option<String>,
}

impl EnvConfig {
    /// Read `env.config.json` from `config_dir` and select `environment`.
    pub fn load(config_dir: impl AsRef<Path>, environment: &str) -> Result<Self, Error> {
        let path = config_dir.as_ref().join(CONFIG_FILE_NAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::ConfigNotFound { path });
            }
            Err(err) => return Err(Error::Io(err)),
        };

        let config = Self::select(&content, environment, Some(&path))?;

        tracing::debug!(
            path = %path.display(),
            environment,
            files = config.files.len(),
            "loaded environment config"
        );
        Ok(config)
    }

    /// Select `environment` from the text of an `env.config.json` file.
    pub fn from_json(content: &str, environment: &str) -> Result<Self, Error> {
        Self::select(content, environment, None)
    }

    fn select(content: &str, environment: &str, path: Option<&Path>) -> Result<Self, Error> {
        let invalid = |source| Error::InvalidConfig {
            path: path.map(Path::to_path_buf),
            source,
        };

        let mut environments: Map<String, Value> =
            serde_json::from_str(content).map_err(invalid)?;
        let Some(selected) = environments.remove(environment) else {
            return Err(Error::UnknownEnvironment {
                environment: environment.to_owned(),
                path: path.map(Path::to_path_buf),
            });
        };

        serde_json::from_value(selected).map_err(invalid)
    }

    /// The `execute` command split on whitespace.
    pub fn command(&self) -> Vec<String> {
        self.execute
            .as_deref()
            .map(|command| command.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// A loader preconfigured with this environment's files, directory,
    /// required keys and override flag.
    pub fn loader(&self) -> EnvLoader {
        let loader = EnvLoader::new()
            .paths(&self.files)
            .required_keys(self.required.iter().cloned())
            .override_existing(self.override_existing);

        match &self.dir {
            Some(dir) => loader.dir(dir),
            None => loader,
        }
    }
}
