//! Layered configuration loading.
//!
//! Built-in defaults come first, then the user, project and local files
//! that exist, then `CACHEMESH_*` environment variables. Nested keys use a
//! double underscore: `CACHEMESH_POOL__SIZE=4`.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::{CacheMeshConfig, Paths};

pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Loader for the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "CACHEMESH".to_string(),
            user_config: true,
        }
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skips `~/.config/cachemesh/config.toml`.
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    pub fn paths(&self) -> Paths {
        let paths = Paths::for_project(&self.project_dir);
        if self.user_config {
            paths
        } else {
            paths.without_user_config()
        }
    }

    /// Merges every layer. The result is not validated.
    pub fn load(&self) -> Result<CacheMeshConfig> {
        let defaults = config::Config::try_from(&CacheMeshConfig::default())
            .context("Failed to encode built-in defaults")?;
        let mut builder = config::Config::builder().add_source(defaults);

        for (_, path) in self.paths().existing_files() {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("Failed to merge configuration layers")?
            .try_deserialize()
            .with_context(|| {
                format!(
                    "Failed to deserialize configuration for {}",
                    self.project_dir.display()
                )
            })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
