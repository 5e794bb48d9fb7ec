use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::diagnostics::TRACE_CAPACITY;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "pylauncher.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Seal the import system after start-up so only built-in and frozen
    /// modules can be imported.
    #[serde(default = "default_true")]
    pub frozen_modules_only: bool,

    /// Imported before sealing; the traceback formatter needs `traceback`.
    #[serde(default = "default_preload")]
    pub preload_modules: Vec<String>,

    /// Install the shadow-stack trace hook in `create`.
    #[serde(default = "default_trace_calls")]
    pub trace_calls: bool,

    #[serde(default = "default_trace_capacity")]
    pub trace_capacity: usize,

    #[serde(default)]
    pub script_root: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            frozen_modules_only: true,
            preload_modules: default_preload(),
            trace_calls: default_trace_calls(),
            trace_capacity: TRACE_CAPACITY,
            script_root: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_trace_calls() -> bool { cfg!(debug_assertions) }
fn default_trace_capacity() -> usize { TRACE_CAPACITY }
fn default_preload() -> Vec<String> { vec!["traceback".to_string()] }

impl LauncherConfig {
    pub fn with_frozen_modules_only(mut self, enabled: bool) -> Self {
        self.frozen_modules_only = enabled;
        self
    }

    pub fn with_trace_calls(mut self, enabled: bool) -> Self {
        self.trace_calls = enabled;
        self
    }

    pub fn with_script_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.script_root = Some(root.into());
        self
    }

    pub fn with_preload(mut self, module: impl Into<String>) -> Self {
        self.preload_modules.push(module.into());
        self
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::new(format!("Failed to read config: {}", e)).with_path(path))?;

        Self::parse(&content).map_err(|e| e.with_path(path))
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))
    }

    /// Walk from the current directory up to the filesystem root looking for
    /// `pylauncher.toml`; falls back to defaults.
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();

        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                match Self::load(&candidate) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!(error = %e, "Ignoring unreadable config"),
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }

        Self::default()
    }
}
