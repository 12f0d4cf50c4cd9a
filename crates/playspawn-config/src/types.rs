//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [spawner]                 # playbooks, inventory, variables
//! [spawner.playbook_vars]   # caller-supplied variables
//! [spawner.environment]     # environment snapshot passed to playbooks
//! [engine]                  # automation engine executable and workspaces
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use playspawn_types::FactMap;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default name of the reserved output-fact key.
pub const DEFAULT_FACT_KEY: &str = "playspawn_out";

/// Default automation engine executable.
pub const DEFAULT_ENGINE_PROGRAM: &str = "ansible-runner";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayspawnConfig {
    /// Lifecycle controller configuration.
    pub spawner: Option<SpawnerConfig>,

    /// Automation engine configuration.
    pub engine: Option<EngineConfig>,
}

impl PlayspawnConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale, not merged field by field.
    pub fn merge(&mut self, other: PlayspawnConfig) {
        if other.spawner.is_some() {
            self.spawner = other.spawner;
        }

        if other.engine.is_some() {
            self.engine = other.engine;
        }
    }

    /// The spawner section, or an error naming the missing section.
    pub fn spawner(&self) -> Result<&SpawnerConfig> {
        self.spawner
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "spawner".to_string(),
                context: "config".to_string(),
            })
    }

    /// The engine section, falling back to defaults when absent.
    pub fn engine(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spawner
// ─────────────────────────────────────────────────────────────────────────────

/// How output-fact blocks from several successful tasks are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactMerge {
    /// Shallow-merge every occurrence in emission order; later keys win.
    #[default]
    Merge,
    /// Keep only the most recent occurrence.
    Last,
}

/// Lifecycle controller configuration (`[spawner]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnerConfig {
    /// Inventory template. The `.j2` suffix is dropped from the written
    /// file name. When absent the engine's default targeting is used.
    pub inventory: Option<PathBuf>,

    /// Playbook that creates the server. Required.
    pub create_playbook: Option<PathBuf>,

    /// Playbook that configures the server after creation.
    pub update_playbook: Option<PathBuf>,

    /// Playbook that reports whether the server is running. Required.
    pub poll_playbook: Option<PathBuf>,

    /// Playbook that destroys the server. Required.
    pub destroy_playbook: Option<PathBuf>,

    /// Variables merged into every run's variables at the top level.
    pub playbook_vars: FactMap,

    /// Environment snapshot passed to playbooks as `spawner_environment`.
    pub environment: BTreeMap<String, String>,

    /// Command that launches the single-user process.
    pub command: Vec<String>,

    /// Extra arguments appended to `command`.
    pub args: Vec<String>,

    /// Keep per-run workspaces for manual inspection instead of deleting them.
    pub keep_workspaces: bool,

    /// Reserved fact name playbooks use to hand results back.
    pub fact_key: String,

    /// How repeated output-fact blocks within one run are combined.
    pub fact_merge: FactMerge,

    /// Run the engine verbosely.
    pub debug: bool,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            inventory: None,
            create_playbook: None,
            update_playbook: None,
            poll_playbook: None,
            destroy_playbook: None,
            playbook_vars: FactMap::new(),
            environment: BTreeMap::new(),
            command: Vec::new(),
            args: Vec::new(),
            keep_workspaces: false,
            fact_key: DEFAULT_FACT_KEY.to_string(),
            fact_merge: FactMerge::default(),
            debug: false,
        }
    }
}

/// Absolute playbook paths produced by [`SpawnerConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybookSet {
    pub create: PathBuf,
    pub update: Option<PathBuf>,
    pub poll: PathBuf,
    pub destroy: PathBuf,
}

impl SpawnerConfig {
    /// Check required fields and resolve playbook paths against `base_dir`.
    ///
    /// Relative paths are joined onto `base_dir`; absolute paths are kept.
    pub fn validate(&self, base_dir: &Path) -> Result<PlaybookSet> {
        if self.fact_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "spawner.fact_key".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let create = required(&self.create_playbook, "create_playbook", base_dir)?;
        let poll = required(&self.poll_playbook, "poll_playbook", base_dir)?;
        let destroy = required(&self.destroy_playbook, "destroy_playbook", base_dir)?;
        let update = match &self.update_playbook {
            Some(path) if path.as_os_str().is_empty() => None,
            Some(path) => Some(absolutize(path, base_dir)),
            None => None,
        };

        Ok(PlaybookSet {
            create,
            update,
            poll,
            destroy,
        })
    }

    /// The inventory template path resolved against `base_dir`.
    pub fn inventory_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.inventory
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| absolutize(p, base_dir))
    }

    /// Launch command followed by its arguments.
    pub fn full_command(&self) -> Vec<String> {
        self.command.iter().chain(&self.args).cloned().collect()
    }
}

fn required(path: &Option<PathBuf>, field: &str, base_dir: &Path) -> Result<PathBuf> {
    match path {
        Some(p) if !p.as_os_str().is_empty() => Ok(absolutize(p, base_dir)),
        _ => Err(ConfigError::MissingField {
            field: field.to_string(),
            context: "[spawner]".to_string(),
        }),
    }
}

fn absolutize(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Automation engine configuration (`[engine]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable, looked up on `PATH` when not absolute.
    pub program: String,

    /// Parent directory for per-run workspaces. Defaults to the system
    /// temp directory.
    pub workspace_root: Option<PathBuf>,

    /// Fixed working directory used for every run instead of a fresh one.
    /// Nothing is deleted when this is set.
    pub private_data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_ENGINE_PROGRAM.to_string(),
            workspace_root: None,
            private_data_dir: None,
        }
    }
}
