//! Single playbook invocations.
//!
//! [`PlaybookRunner::run`] takes one playbook from workspace to classified
//! result:
//!
//! 1. acquire a workspace and write a file inventory into it;
//! 2. run the engine on a worker thread, logging every event and forwarding
//!    it to the caller's hook;
//! 3. classify the outcome: a non-zero exit code or a run with no successful
//!    task is an [`AutomationFailure`];
//! 4. extract the output facts from successful task events.
//!
//! On failure the workspace is released before the error is returned. On
//! success the caller releases it with [`PlaybookRunner::release`] once it is
//! done with the result.

use std::fmt;
use std::path::PathBuf;

use playspawn_config::{DEFAULT_FACT_KEY, FactMerge};
use playspawn_types::{Event, FactMap, Stats};
use tracing::{Instrument, Span, debug, error, info, info_span};
use uuid::Uuid;

use crate::bridge;
use crate::engine::{EngineHooks, EngineRequest, EventHandler, InventoryTarget, SharedEngine};
use crate::error::{AutomationFailure, Result, RunnerError};
use crate::inventory::Inventory;
use crate::relay::clean_output;
use crate::workspace::{Workspace, WorkspaceManager};

/// Caller hook observing every engine event. Runs on the engine worker thread.
pub type EventHook = Box<dyn FnMut(&Event) + Send>;

/// One playbook invocation.
pub struct RunRequest {
    pub playbook: PathBuf,
    pub inventory: Inventory,
    /// Variables exposed to the playbook.
    pub variables: FactMap,
    /// Run the engine without verbose output.
    pub quiet: bool,
    pub event_hook: Option<EventHook>,
}

impl RunRequest {
    pub fn new(playbook: impl Into<PathBuf>, inventory: Inventory) -> Self {
        Self {
            playbook: playbook.into(),
            inventory,
            variables: FactMap::new(),
            quiet: true,
            event_hook: None,
        }
    }

    pub fn with_variables(mut self, variables: FactMap) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_event_hook(mut self, hook: EventHook) -> Self {
        self.event_hook = Some(hook);
        self
    }
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("playbook", &self.playbook)
            .field("inventory", &self.inventory)
            .field("variables", &self.variables)
            .field("quiet", &self.quiet)
            .field("event_hook", &self.event_hook.is_some())
            .finish()
    }
}

/// A successful run.
#[derive(Debug)]
pub struct RunResult {
    /// Output facts, absent if no task set them.
    pub output_facts: Option<FactMap>,
    pub rc: i32,
    pub status: String,
    pub stats: Option<Stats>,
    pub events: Vec<Event>,
    /// Plain engine output.
    pub stdout: String,
    /// Workspace the run used; hand back with [`PlaybookRunner::release`].
    pub workspace: Workspace,
}

impl RunResult {
    /// Take the output facts, leaving `None` behind.
    pub fn take_facts(&mut self) -> Option<FactMap> {
        self.output_facts.take()
    }
}

/// Runs playbooks through an engine.
pub struct PlaybookRunner {
    engine: SharedEngine,
    workspaces: WorkspaceManager,
    fact_key: String,
    fact_merge: FactMerge,
    span: Span,
}

impl PlaybookRunner {
    pub fn new(engine: SharedEngine) -> Self {
        Self {
            engine,
            workspaces: WorkspaceManager::new(),
            fact_key: DEFAULT_FACT_KEY.to_string(),
            fact_merge: FactMerge::default(),
            span: Span::current(),
        }
    }

    pub fn with_workspaces(mut self, workspaces: WorkspaceManager) -> Self {
        self.workspaces = workspaces;
        self
    }

    /// Fact name playbooks use to report output.
    pub fn with_fact_key(mut self, key: impl Into<String>) -> Self {
        self.fact_key = key.into();
        self
    }

    pub fn with_fact_merge(mut self, merge: FactMerge) -> Self {
        self.fact_merge = merge;
        self
    }

    /// Parent span for every run's logs.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn fact_key(&self) -> &str {
        &self.fact_key
    }

    /// Run one playbook and classify the outcome.
    pub async fn run(&self, request: RunRequest) -> Result<RunResult> {
        let run_id = Uuid::now_v7();
        let span = info_span!(
            parent: &self.span,
            "playbook_run",
            %run_id,
            playbook = %request.playbook.display(),
        );
        self.run_in(request, span.clone()).instrument(span).await
    }

    /// Release the workspace of a finished run.
    ///
    /// Returns the path when the workspace was retained.
    pub fn release(&self, result: RunResult) -> Option<PathBuf> {
        self.workspaces.release(result.workspace)
    }

    async fn run_in(&self, request: RunRequest, span: Span) -> Result<RunResult> {
        let RunRequest {
            playbook,
            inventory,
            variables,
            quiet,
            event_hook,
        } = request;

        let workspace = self.workspaces.acquire().map_err(RunnerError::Workspace)?;
        let target = match materialize(&workspace, inventory) {
            Ok(target) => target,
            Err(e) => return Err(self.abandon(workspace, e)),
        };

        info!(
            engine = self.engine.name(),
            workspace = %workspace.path().display(),
            "Running playbook"
        );
        let engine_request = EngineRequest {
            private_data_dir: workspace.path().to_path_buf(),
            inventory: target,
            playbook,
            extravars: variables,
            quiet,
        };
        let hooks = EngineHooks::new(
            log_and_forward(event_hook),
            Box::new(|status: &str| info!(status, "Engine status")),
        );

        let outcome =
            match bridge::run_on_worker(self.engine.clone(), engine_request, hooks, span).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.abandon(workspace, e.into())),
            };

        if outcome.rc != 0 {
            for event in outcome.events.iter().filter(|e| e.is_task_failed()) {
                error!(
                    counter = ?event.counter,
                    action = event.task_action().unwrap_or("unknown"),
                    output = %event.output().map(clean_output).unwrap_or_default(),
                    "Task failed"
                );
            }
            let failure = AutomationFailure::new("Non-zero exit code", outcome);
            return Err(self.abandon(workspace, failure.into()));
        }

        if outcome
            .stats
            .as_ref()
            .is_none_or(Stats::no_successful_tasks)
        {
            let failure = AutomationFailure::new("No successful tasks", outcome);
            return Err(self.abandon(workspace, failure.into()));
        }

        let output_facts = extract_facts(&outcome.events, &self.fact_key, self.fact_merge);
        info!(
            rc = outcome.rc,
            status = %outcome.status,
            stats = %outcome.stats.as_ref().map(Stats::to_string).unwrap_or_default(),
            facts = output_facts.is_some(),
            "Playbook finished"
        );

        Ok(RunResult {
            output_facts,
            rc: outcome.rc,
            status: outcome.status,
            stats: outcome.stats,
            events: outcome.events,
            stdout: outcome.stdout,
            workspace,
        })
    }

    fn abandon(&self, workspace: Workspace, err: RunnerError) -> RunnerError {
        self.workspaces.release(workspace);
        err
    }
}

/// Turn an inventory into what the engine consumes, writing files into the workspace.
fn materialize(workspace: &Workspace, inventory: Inventory) -> Result<InventoryTarget> {
    Ok(match inventory {
        Inventory::Mapping(map) => InventoryTarget::Mapping(map),
        Inventory::File { filename, content } => {
            let path = workspace.path().join(&filename);
            std::fs::write(&path, content).map_err(|source| RunnerError::InventoryWrite {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "Wrote inventory");
            InventoryTarget::File(path)
        }
        Inventory::EngineDefault => InventoryTarget::EngineDefault,
    })
}

/// Engine handler that logs each event, then hands it to the caller's hook.
///
/// Every event is retained whatever the caller does.
fn log_and_forward(mut hook: Option<EventHook>) -> EventHandler {
    Box::new(move |event: &Event| {
        let output = event.output().map(clean_output).unwrap_or_default();
        debug!(counter = ?event.counter, "{}\n{}", event.kind, output);
        if let Some(hook) = hook.as_mut() {
            hook(event);
        }
        true
    })
}

/// Collect the output-fact block from successful task events.
///
/// With [`FactMerge::Merge`] every occurrence is shallow-merged in emission
/// order; with [`FactMerge::Last`] only the last occurrence counts.
pub fn extract_facts(events: &[Event], fact_key: &str, merge: FactMerge) -> Option<FactMap> {
    let blocks = events
        .iter()
        .filter(|e| e.is_task_ok())
        .filter_map(|e| e.fact_block(fact_key));

    match merge {
        FactMerge::Last => blocks.last().cloned(),
        FactMerge::Merge => blocks.fold(None, |acc: Option<FactMap>, block| {
            let mut acc = acc.unwrap_or_default();
            acc.extend(block.clone());
            Some(acc)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playspawn_types::TASK_OK_EVENT;
    use serde_json::json;

    fn ok_with(facts: serde_json::Value) -> Event {
        Event::new(TASK_OK_EVENT).with_event_data(json!({"res": {"ansible_facts": facts}}))
    }

    #[test]
    fn test_extract_merges_occurrences() {
        let events = vec![
            ok_with(json!({"out": {"ip": "10.0.0.1", "port": 1}})),
            Event::new("playbook_on_task_start"),
            ok_with(json!({"other": {"ignored": true}})),
            ok_with(json!({"out": {"port": 2}})),
        ];
        let facts = extract_facts(&events, "out", FactMerge::Merge).unwrap();
        assert_eq!(facts["ip"], json!("10.0.0.1"));
        assert_eq!(facts["port"], json!(2));
    }

    #[test]
    fn test_extract_last_occurrence() {
        let events = vec![
            ok_with(json!({"out": {"ip": "10.0.0.1", "port": 1}})),
            ok_with(json!({"out": {"port": 2}})),
        ];
        let facts = extract_facts(&events, "out", FactMerge::Last).unwrap();
        assert!(!facts.contains_key("ip"));
        assert_eq!(facts["port"], json!(2));
    }

    #[test]
    fn test_extract_without_facts_is_none() {
        let events = vec![Event::new("playbook_on_start"), ok_with(json!({}))];
        assert!(extract_facts(&events, "out", FactMerge::Merge).is_none());
        assert!(extract_facts(&events, "out", FactMerge::Last).is_none());
    }

    #[test]
    fn test_extract_ignores_failed_events() {
        let failed = Event::new("runner_on_failed")
            .with_event_data(json!({"res": {"ansible_facts": {"out": {"x": 1}}}}));
        assert!(extract_facts(&[failed], "out", FactMerge::Merge).is_none());
    }

    #[test]
    fn test_log_and_forward_always_retains() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut handler = log_and_forward(Some(Box::new(move |e: &Event| {
            sink.lock().push(e.kind.clone());
        })));
        assert!(handler(&Event::new("playbook_on_start")));
        assert!(handler(&Event::new("runner_on_ok")));
        assert_eq!(*seen.lock(), vec!["playbook_on_start", "runner_on_ok"]);

        let mut bare = log_and_forward(None);
        assert!(bare(&Event::new("verbose")));
    }
}
