//! Inventory materialization.
//!
//! An inventory can be configured three ways:
//!
//! - a static mapping, passed to the engine as-is;
//! - a Jinja template file, rendered against the context variables into a file
//!   named after the template with any `.j2` suffix dropped;
//! - a function of the context variables returning an inventory.
//!
//! With nothing configured the engine falls back to its own default targeting.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::Environment;
use playspawn_types::FactMap;
use tracing::debug;

use crate::context::InvocationContext;
use crate::error::InventoryError;

/// Suffix stripped from template file names.
const TEMPLATE_SUFFIX: &str = ".j2";

/// A materialized inventory for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum Inventory {
    /// Structured inventory handed to the engine directly.
    Mapping(FactMap),
    /// Rendered text to be written into the run workspace.
    File { filename: String, content: String },
    /// Let the engine decide.
    EngineDefault,
}

/// Function computing an inventory from the context variables.
pub type InventoryFn = Arc<dyn Fn(&FactMap) -> anyhow::Result<Inventory> + Send + Sync>;

/// Where inventories come from.
#[derive(Clone)]
pub enum InventorySource {
    Static(FactMap),
    Template(PathBuf),
    Function(InventoryFn),
}

impl fmt::Debug for InventorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventorySource::Static(map) => f.debug_tuple("Static").field(map).finish(),
            InventorySource::Template(path) => f.debug_tuple("Template").field(path).finish(),
            InventorySource::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Produce the inventory for a run from the configured source.
pub fn resolve(
    source: Option<&InventorySource>,
    ctx: &InvocationContext,
) -> Result<Inventory, InventoryError> {
    match source {
        None => Ok(Inventory::EngineDefault),
        Some(InventorySource::Static(map)) => Ok(Inventory::Mapping(map.clone())),
        Some(InventorySource::Template(path)) => render_template(path, &ctx.to_vars()),
        Some(InventorySource::Function(f)) => f(&ctx.to_vars()).map_err(InventoryError::Function),
    }
}

/// Render a template file against `vars`.
pub fn render_template(path: &Path, vars: &FactMap) -> Result<Inventory, InventoryError> {
    let filename = template_output_name(path)?;
    let source = std::fs::read_to_string(path).map_err(|e| InventoryError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let env = Environment::new();
    let content = env
        .render_str(&source, vars)
        .map_err(|e| InventoryError::Render {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(template = %path.display(), %filename, "Rendered inventory");

    Ok(Inventory::File { filename, content })
}

/// Basename of the template with a trailing `.j2` removed.
fn template_output_name(path: &Path) -> Result<String, InventoryError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| InventoryError::NoFileName(path.to_path_buf()))?;
    Ok(match name.strip_suffix(TEMPLATE_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    })
}
