//! Where configuration files are looked up.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Project configuration, checked into the repository.
pub const PROJECT_CONFIG_FILE: &str = "cachemesh.toml";

/// Local overrides of the project configuration, not checked in.
pub const LOCAL_CONFIG_FILE: &str = "cachemesh.local.toml";

/// A configuration file layer. Later layers override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// `config.toml` in the user's configuration directory.
    User,
    Project,
    Local,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::User, Layer::Project, Layer::Local];
}

/// Configuration file locations for one project directory.
#[derive(Debug, Clone)]
pub struct Paths {
    user_config: Option<PathBuf>,
    project_dir: PathBuf,
}

impl Paths {
    pub fn for_project(project_dir: impl Into<PathBuf>) -> Self {
        let user_config = ProjectDirs::from("io", "cachemesh", "cachemesh")
            .map(|dirs| dirs.config_dir().join("config.toml"));
        Self {
            user_config,
            project_dir: project_dir.into(),
        }
    }

    /// Ignores the per-user file.
    pub fn without_user_config(mut self) -> Self {
        self.user_config = None;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Location of `layer`; `None` when the user directory is unknown or
    /// ignored.
    pub fn file(&self, layer: Layer) -> Option<PathBuf> {
        match layer {
            Layer::User => self.user_config.clone(),
            Layer::Project => Some(self.project_dir.join(PROJECT_CONFIG_FILE)),
            Layer::Local => Some(self.project_dir.join(LOCAL_CONFIG_FILE)),
        }
    }

    /// Layers whose file exists, lowest precedence first.
    pub fn existing_files(&self) -> Vec<(Layer, PathBuf)> {
        Layer::ALL
            .into_iter()
            .filter_map(|layer| {
                self.file(layer)
                    .filter(|path| path.is_file())
                    .map(|path| (layer, path))
            })
            .collect()
    }
}
