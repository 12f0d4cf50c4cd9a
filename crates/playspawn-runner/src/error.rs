//! Error types for playbook runs.

use std::fmt;
use std::path::PathBuf;

use playspawn_types::{Event, Stats};
use thiserror::Error;

use crate::engine::EngineOutcome;

/// A run that the engine completed but that did not succeed.
///
/// Carries the whole run outcome so callers can inspect what happened.
#[derive(Debug, Clone)]
pub struct AutomationFailure {
    /// Short reason, e.g. `Non-zero exit code`.
    pub message: String,
    /// Engine exit code.
    pub rc: i32,
    /// Engine status label.
    pub status: String,
    /// Aggregate counters, absent when the engine never reported any.
    pub stats: Option<Stats>,
    /// Every event retained during the run.
    pub events: Vec<Event>,
}

impl AutomationFailure {
    /// Build a failure from a finished engine run.
    pub fn new(message: impl Into<String>, outcome: EngineOutcome) -> Self {
        Self {
            message: message.into(),
            rc: outcome.rc,
            status: outcome.status,
            stats: outcome.stats,
            events: outcome.events,
        }
    }

    /// Events reporting failed tasks.
    pub fn failed_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.is_task_failed())
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl fmt::Display for AutomationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rc:{} status:{} stats:", self.message, self.rc, self.status)?;
        match &self.stats {
            Some(stats) => write!(f, "{stats}")?,
            None => f.write_str("none")?,
        }
        write!(
            f,
            " events:[failed:{} ok:{} other:{}]",
            self.count(Event::is_task_failed),
            self.count(Event::is_task_ok),
            self.count(|e| !e.is_task_failed() && !e.is_task_ok()),
        )
    }
}

impl std::error::Error for AutomationFailure {}

/// Errors raised by the automation engine itself, before any outcome exists.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine program could not be launched.
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine violated its own protocol.
    #[error("Engine protocol error: {0}")]
    Protocol(String),

    /// The worker running the engine died without reporting an outcome.
    #[error("Engine worker crashed: {0}")]
    Crashed(String),

    /// IO error while preparing or reading a run.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while resolving an inventory for a run.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The template file could not be read.
    #[error("Failed to read inventory template '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template failed to render.
    #[error("Failed to render inventory template '{path}': {source}")]
    Render {
        path: PathBuf,
        #[source]
        source: minijinja::Error,
    },

    /// The template path has no file name to reuse for the rendered file.
    #[error("Inventory template path has no file name: {0}")]
    NoFileName(PathBuf),

    /// A caller-supplied inventory function failed.
    #[error("Inventory function failed: {0}")]
    Function(anyhow::Error),
}

/// Errors returned by [`PlaybookRunner::run`](crate::PlaybookRunner::run).
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The engine finished but the run is classified as failed.
    #[error("{0}")]
    Automation(Box<AutomationFailure>),

    /// The run workspace could not be created.
    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    /// A file-style inventory could not be written into the workspace.
    #[error("Failed to write inventory '{path}': {source}")]
    InventoryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine could not run at all.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<AutomationFailure> for RunnerError {
    fn from(failure: AutomationFailure) -> Self {
        RunnerError::Automation(Box::new(failure))
    }
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
