//! Playbook runs for playspawn.
//!
//! This crate turns "run this playbook against this inventory with these
//! variables" into a classified result:
//!
//! - [`WorkspaceManager`] hands out per-run scratch directories;
//! - [`inventory`] materializes static, templated or computed inventories;
//! - [`AutomationEngine`] is the seam to the blocking engine, with
//!   [`AnsibleRunnerEngine`] for production and [`MockEngine`] for tests;
//! - [`bridge`] runs the engine on a worker thread so async callers never block;
//! - [`relay`] turns playbook-level events into progress messages;
//! - [`PlaybookRunner`] ties the pieces together and classifies outcomes.

pub mod ansible;
pub mod bridge;
pub mod context;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod mock;
pub mod relay;
pub mod runner;
pub mod workspace;

pub use ansible::AnsibleRunnerEngine;
pub use context::{InvocationContext, PlaybookVars, Principal, VarsFn, escape_name};
pub use engine::{
    AutomationEngine, EngineHooks, EngineOutcome, EngineRequest, InventoryTarget, SharedEngine,
};
pub use error::{AutomationFailure, EngineError, InventoryError, Result, RunnerError};
pub use inventory::{Inventory, InventoryFn, InventorySource};
pub use mock::{MockEngine, RecordedRun, ScriptedRun};
pub use relay::{clean_output, progress_relay};
pub use runner::{EventHook, PlaybookRunner, RunRequest, RunResult, extract_facts};
pub use workspace::{Workspace, WorkspaceManager};
