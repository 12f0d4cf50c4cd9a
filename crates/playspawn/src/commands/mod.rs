//! CLI command handlers.

pub mod config;
pub mod poll;
pub mod start;
pub mod state;
pub mod stop;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use playspawn_config::LoadedConfig;
use playspawn_runner::Principal;
use playspawn_spawner::PlaybookSpawner;
use playspawn_types::FactMap;
use serde_json::Value;
use tracing::{debug, warn};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit config file; discovery is used when absent.
    pub config_path: Option<PathBuf>,
    /// User the server belongs to.
    pub user: Option<String>,
    /// Explicit state file.
    pub state_file: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Load the explicit config file, or discover the layered config.
    pub fn load_config(&self) -> Result<LoadedConfig> {
        let loaded = match &self.config_path {
            Some(path) => LoadedConfig::from_file(path)?,
            None => playspawn_config::load_config(None)?,
        };
        for warning in &loaded.warnings {
            warn!("{warning}");
        }
        Ok(loaded)
    }

    /// The user named on the command line or in the environment.
    pub fn principal(&self) -> Result<Principal> {
        let name = self
            .user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .filter(|name| !name.trim().is_empty())
            .context("no user given; pass --user or set PLAYSPAWN_USER")?;
        Ok(Principal::new(name))
    }

    /// Where the state blob for `principal` lives.
    ///
    /// Defaults to `<data dir>/state/<escaped user>.json`.
    pub fn state_path(&self, principal: &Principal) -> Result<PathBuf> {
        if let Some(path) = &self.state_file {
            return Ok(path.clone());
        }
        let dir = playspawn_config::xdg_data_dir()
            .context("cannot determine data directory; pass --state-file")?;
        Ok(dir
            .join("state")
            .join(format!("{}.json", principal.escaped_name)))
    }

    /// Build a controller from the config and restore its persisted state.
    pub fn build_spawner(&self) -> Result<(PlaybookSpawner, PathBuf)> {
        let loaded = self.load_config()?;
        let principal = self.principal()?;
        let state_path = self.state_path(&principal)?;

        let spawner_config = loaded.config.spawner()?.clone();
        let mut spawner = PlaybookSpawner::builder(spawner_config)
            .base_dir(loaded.base_dir())
            .engine_config(loaded.config.engine())
            .principal(principal)
            .build()?;

        let blob = read_state(&state_path)?;
        if !blob.is_empty() {
            debug!(path = %state_path.display(), "Restoring server state");
        }
        spawner.load_state(&blob);

        Ok((spawner, state_path))
    }
}

/// Read a persisted state blob. A missing file is an empty blob.
pub fn read_state(path: &Path) -> Result<FactMap> {
    if !path.exists() {
        return Ok(FactMap::new());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(FactMap::new());
    }
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("state file {} is not valid JSON", path.display()))?;
    match value {
        Value::Object(blob) => Ok(blob),
        other => bail!(
            "state file {} must hold a JSON object, found {}",
            path.display(),
            other
        ),
    }
}

/// Persist a state blob. An empty blob removes the file.
pub fn write_state(path: &Path, blob: &FactMap) -> Result<()> {
    if blob.is_empty() {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove state file {}", path.display()))?;
        }
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(blob)?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write state file {}", path.display()))?;
    Ok(())
}

/// Collapse an engine output block onto one line.
pub fn one_line(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}
