//! Configuration system for the playspawn lifecycle controller.
//!
//! Provides TOML-based configuration with:
//! - A `[spawner]` section naming the create/update/poll/destroy playbooks,
//!   the inventory template and the variables handed to every run
//! - An `[engine]` section selecting the automation engine executable and
//!   where per-run workspaces live
//! - Config file layering (XDG user config + project-local overrides)
//!
//! Validation happens once, when a controller is built from the config, via
//! [`SpawnerConfig::validate`].

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    xdg_config_dir, xdg_config_path, xdg_data_dir,
};
pub use error::{ConfigError, Result};
pub use types::*;
