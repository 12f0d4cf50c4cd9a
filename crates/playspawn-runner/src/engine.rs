//! The automation-engine seam.
//!
//! An [`AutomationEngine`] runs one playbook to completion on the calling
//! thread. Engines are blocking: [`crate::bridge::run_on_worker`] moves them
//! onto a dedicated worker thread so async callers never block.

use std::path::PathBuf;
use std::sync::Arc;

use playspawn_types::{Event, FactMap, Stats};

use crate::error::EngineError;

/// Status label of a run that exited cleanly.
pub const STATUS_SUCCESSFUL: &str = "successful";
/// Status label of a run that exited with an error.
pub const STATUS_FAILED: &str = "failed";
/// Status reported before the engine process is launched.
pub const STATUS_STARTING: &str = "starting";
/// Status reported while the playbook is executing.
pub const STATUS_RUNNING: &str = "running";

/// Map an exit code to the final status label.
pub fn status_for_rc(rc: i32) -> &'static str {
    if rc == 0 { STATUS_SUCCESSFUL } else { STATUS_FAILED }
}

/// How the engine should find its targets.
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryTarget {
    /// Structured inventory the engine serializes itself.
    Mapping(FactMap),
    /// Inventory file already written into the workspace.
    File(PathBuf),
    /// The engine's own default targeting.
    EngineDefault,
}

/// Everything the engine needs to run one playbook.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Workspace directory for generated artifacts.
    pub private_data_dir: PathBuf,
    pub inventory: InventoryTarget,
    /// Absolute playbook path.
    pub playbook: PathBuf,
    /// Variables exposed to the playbook.
    pub extravars: FactMap,
    /// Suppress verbose engine output.
    pub quiet: bool,
}

/// Called for every event as it is emitted. Returning `false` discards it.
pub type EventHandler = Box<dyn FnMut(&Event) -> bool + Send>;

/// Called for every engine status transition.
pub type StatusHandler = Box<dyn FnMut(&str) + Send>;

/// Callbacks invoked by the engine on its own thread.
pub struct EngineHooks {
    pub on_event: EventHandler,
    pub on_status: StatusHandler,
}

impl EngineHooks {
    pub fn new(on_event: EventHandler, on_status: StatusHandler) -> Self {
        Self {
            on_event,
            on_status,
        }
    }

    /// Hand an event to the event handler; returns whether to retain it.
    pub fn event(&mut self, event: &Event) -> bool {
        (self.on_event)(event)
    }

    pub fn status(&mut self, status: &str) {
        (self.on_status)(status)
    }
}

impl Default for EngineHooks {
    fn default() -> Self {
        Self {
            on_event: Box::new(|_: &Event| true),
            on_status: Box::new(|_: &str| {}),
        }
    }
}

/// Result of a run the engine completed, successful or not.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    /// Exit code.
    pub rc: i32,
    /// Terminal status label.
    pub status: String,
    /// Counters from the final stats event, if one was emitted.
    pub stats: Option<Stats>,
    /// Retained events in emission order.
    pub events: Vec<Event>,
    /// Raw output lines that were not events.
    pub stdout: String,
}

/// A blocking automation engine.
pub trait AutomationEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Run a playbook to completion, reporting events and status through `hooks`.
    ///
    /// A run that finishes with a non-zero exit code is still `Ok`; errors are
    /// reserved for runs that could not happen at all.
    fn run(&self, request: EngineRequest, hooks: EngineHooks) -> Result<EngineOutcome, EngineError>;
}

/// Shared reference to an engine.
pub type SharedEngine = Arc<dyn AutomationEngine>;
