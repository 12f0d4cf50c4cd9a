//! The lifecycle controller.
//!
//! [`PlaybookSpawner`] drives one server through its lifecycle by running
//! playbooks:
//!
//! - `start`: create, then optionally update, then report the endpoint;
//! - `poll`: ask whether the server is still running;
//! - `stop`: destroy the server.
//!
//! Every run gets a freshly built [`InvocationContext`] carrying the current
//! server state, so templates and playbooks always see what earlier runs
//! reported. Operations take `&mut self`: runs against one server never
//! overlap.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use playspawn_config::{EngineConfig, PlaybookSet, SpawnerConfig};
use playspawn_runner::inventory::{self, Inventory};
use playspawn_runner::{
    AnsibleRunnerEngine, InventoryFn, InventorySource, InvocationContext, PlaybookRunner,
    PlaybookVars, Principal, RunRequest, SharedEngine, VarsFn, WorkspaceManager, progress_relay,
};
use playspawn_types::{FactMap, ProgressSignal};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::error::{Result, SpawnerError};
use crate::progress::{ProgressQueue, ProgressStream};
use crate::state::{Endpoint, ServerState};

/// Fact the poll playbook sets to report liveness.
pub const RUNNING_FIELD: &str = "running";

/// Variable telling the destroy playbook whether to shut down gracefully.
pub const GRACEFUL_VAR: &str = "graceful";

/// Where the server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing known; the initial phase and the phase after a failed start.
    Unknown,
    Creating,
    Updating,
    Running,
    Destroying,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Unknown => "unknown",
            Phase::Creating => "creating",
            Phase::Updating => "updating",
            Phase::Running => "running",
            Phase::Destroying => "destroying",
            Phase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Result of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    /// Not running; carries the exit status to report.
    Exited(i32),
}

/// Builder for [`PlaybookSpawner`].
pub struct SpawnerBuilder {
    config: SpawnerConfig,
    engine_config: EngineConfig,
    base_dir: Option<PathBuf>,
    engine: Option<SharedEngine>,
    principal: Option<Principal>,
    inventory: Option<InventorySource>,
    playbook_vars: Option<PlaybookVars>,
    span: Option<Span>,
}

impl SpawnerBuilder {
    /// Directory relative playbook and inventory paths are resolved against.
    /// Defaults to the working directory.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Use this engine instead of the configured `ansible-runner` program.
    pub fn engine(mut self, engine: SharedEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// The user the server belongs to. Required.
    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Override the configured inventory template.
    pub fn inventory(mut self, source: InventorySource) -> Self {
        self.inventory = Some(source);
        self
    }

    /// Compute inventories with a function of the context variables.
    pub fn inventory_fn(self, f: InventoryFn) -> Self {
        self.inventory(InventorySource::Function(f))
    }

    /// Override the configured playbook variables.
    pub fn playbook_vars(mut self, vars: PlaybookVars) -> Self {
        self.playbook_vars = Some(vars);
        self
    }

    /// Compute playbook variables afresh for every run.
    pub fn playbook_vars_fn(self, f: VarsFn) -> Self {
        self.playbook_vars(PlaybookVars::Function(f))
    }

    /// Parent span for all lifecycle logs.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate the configuration and build the controller.
    pub fn build(self) -> Result<PlaybookSpawner> {
        let base_dir = match self.base_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|e| {
                SpawnerError::Configuration(format!("cannot determine working directory: {e}"))
            })?,
        };
        let playbooks = self.config.validate(&base_dir)?;
        let principal = self.principal.ok_or_else(|| {
            SpawnerError::Configuration("a principal (user) is required".to_string())
        })?;

        let span = self.span.unwrap_or_else(|| {
            info_span!("spawner", user = %principal.name)
        });

        let engine: SharedEngine = match self.engine {
            Some(engine) => engine,
            None => Arc::new(AnsibleRunnerEngine::new(self.engine_config.program.clone())),
        };
        let workspaces = WorkspaceManager::new()
            .with_root(self.engine_config.workspace_root.clone())
            .with_fixed_dir(self.engine_config.private_data_dir.clone())
            .with_keep(self.config.keep_workspaces);
        let runner = PlaybookRunner::new(engine)
            .with_workspaces(workspaces)
            .with_fact_key(self.config.fact_key.clone())
            .with_fact_merge(self.config.fact_merge)
            .with_span(span.clone());

        let inventory = self.inventory.or_else(|| {
            self.config
                .inventory_path(&base_dir)
                .map(InventorySource::Template)
        });
        let playbook_vars = self
            .playbook_vars
            .unwrap_or_else(|| PlaybookVars::Static(self.config.playbook_vars.clone()));

        debug!(parent: &span, ?playbooks, ?inventory, "Spawner configured");

        Ok(PlaybookSpawner {
            runner,
            playbooks,
            inventory,
            playbook_vars,
            command: self.config.full_command(),
            environment: self.config.environment.clone(),
            principal,
            debug: self.config.debug,
            state: ServerState::new(),
            phase: Phase::Unknown,
            progress: ProgressQueue::new(),
            span,
        })
    }
}

/// Drives one server's lifecycle through playbooks.
pub struct PlaybookSpawner {
    runner: PlaybookRunner,
    playbooks: PlaybookSet,
    inventory: Option<InventorySource>,
    playbook_vars: PlaybookVars,
    command: Vec<String>,
    environment: BTreeMap<String, String>,
    principal: Principal,
    debug: bool,
    state: ServerState,
    phase: Phase,
    progress: ProgressQueue,
    span: Span,
}

impl PlaybookSpawner {
    pub fn builder(config: SpawnerConfig) -> SpawnerBuilder {
        SpawnerBuilder {
            config,
            engine_config: EngineConfig::default(),
            base_dir: None,
            engine: None,
            principal: None,
            inventory: None,
            playbook_vars: None,
            span: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn playbooks(&self) -> &PlaybookSet {
        &self.playbooks
    }

    /// Restore state persisted by the host.
    pub fn load_state(&mut self, blob: &FactMap) {
        self.state = ServerState::from_blob(blob);
        debug!(parent: &self.span, empty = self.state.is_empty(), "Loaded state");
    }

    /// State for the host to persist. Empty when there is nothing to keep.
    pub fn get_state(&self) -> FactMap {
        self.state.to_blob()
    }

    /// Forget the server, e.g. after the host has completed a stop.
    pub fn clear_state(&mut self) {
        self.state = ServerState::new();
        self.phase = Phase::Unknown;
    }

    /// Stream of progress messages for the start in progress, or for the
    /// next start when none is running.
    ///
    /// The stream ends when that start finishes, successfully or not.
    pub fn progress(&self) -> ProgressStream {
        self.progress.stream()
    }

    /// Create (and update) the server and return where it listens.
    pub async fn start(&mut self) -> Result<Endpoint> {
        let progress = self.progress.begin();
        let span = info_span!(parent: &self.span, "start");
        let result = self.run_start(&progress).instrument(span).await;
        self.progress.finish();

        match &result {
            Ok(endpoint) => info!(parent: &self.span, %endpoint, "Server started"),
            Err(e) => {
                warn!(parent: &self.span, error = %e, phase = %self.phase, "Start failed");
                self.phase = Phase::Unknown;
            }
        }
        result
    }

    async fn run_start(&mut self, progress: &UnboundedSender<ProgressSignal>) -> Result<Endpoint> {
        self.phase = Phase::Creating;
        let context = self.context();
        let inventory = self.inventory_for(&context)?;
        debug!(vars = ?context.to_vars(), "Create variables");

        let mut created = self
            .runner
            .run(self.request(self.playbooks.create.clone(), inventory, &context).with_event_hook(
                progress_relay(progress.clone()),
            ))
            .await?;
        let facts = created.take_facts().unwrap_or_default();
        self.runner.release(created);
        debug!(?facts, "Create output");
        self.state = ServerState::from_facts(facts);

        if let Some(update) = self.playbooks.update.clone() {
            self.phase = Phase::Updating;
            // Rebuilt so the update sees what create reported.
            let context = self.context();
            let inventory = self.inventory_for(&context)?;
            let mut updated = self
                .runner
                .run(
                    self.request(update, inventory, &context)
                        .with_event_hook(progress_relay(progress.clone())),
                )
                .await?;
            let facts = updated.take_facts().unwrap_or_default();
            self.runner.release(updated);
            debug!(?facts, "Update output");
            self.state.merge(facts);
        }

        let endpoint = self.state.endpoint()?;
        self.phase = Phase::Running;
        Ok(endpoint)
    }

    /// Destroy the server. The state is left for the host to clear.
    pub async fn stop(&mut self, graceful: bool) -> Result<()> {
        let previous = self.phase;
        self.phase = Phase::Destroying;
        let span = info_span!(parent: &self.span, "stop", graceful);
        let result = self.run_stop(graceful).instrument(span).await;

        match &result {
            Ok(()) => {
                self.phase = Phase::Stopped;
                info!(parent: &self.span, "Server stopped");
            }
            Err(e) => {
                warn!(parent: &self.span, error = %e, "Stop failed");
                self.phase = previous;
            }
        }
        result
    }

    async fn run_stop(&mut self, graceful: bool) -> Result<()> {
        let context = self
            .context()
            .with_variable(GRACEFUL_VAR, Value::Bool(graceful));
        let inventory = self.inventory_for(&context)?;
        let mut destroyed = self
            .runner
            .run(self.request(self.playbooks.destroy.clone(), inventory, &context))
            .await?;
        debug!(facts = ?destroyed.take_facts(), "Destroy output");
        self.runner.release(destroyed);
        Ok(())
    }

    /// Ask the poll playbook whether the server is running.
    pub async fn poll(&mut self) -> Result<PollStatus> {
        let span = info_span!(parent: &self.span, "poll");
        self.run_poll().instrument(span).await
    }

    async fn run_poll(&mut self) -> Result<PollStatus> {
        let context = self.context();
        let inventory = self.inventory_for(&context)?;
        let mut polled = self
            .runner
            .run(self.request(self.playbooks.poll.clone(), inventory, &context))
            .await?;
        let facts = polled.take_facts().unwrap_or_default();
        self.runner.release(polled);
        debug!(?facts, "Poll output");

        match facts.get(RUNNING_FIELD) {
            Some(Value::Bool(true)) => Ok(PollStatus::Running),
            Some(Value::Bool(false)) => Ok(PollStatus::Exited(0)),
            Some(other) => Err(SpawnerError::InvalidPollOutput(other.to_string())),
            None => Err(SpawnerError::InvalidPollOutput("nothing".to_string())),
        }
    }

    /// Build a fresh context from the current state.
    fn context(&self) -> InvocationContext {
        InvocationContext::new(self.principal.clone())
            .with_command(self.command.clone())
            .with_variables(self.playbook_vars.evaluate())
            .with_server_info(self.state.facts().clone())
            .with_environment(self.environment.clone())
    }

    fn inventory_for(&self, context: &InvocationContext) -> Result<Inventory> {
        Ok(inventory::resolve(self.inventory.as_ref(), context)?)
    }

    fn request(
        &self,
        playbook: PathBuf,
        inventory: Inventory,
        context: &InvocationContext,
    ) -> RunRequest {
        RunRequest::new(playbook, inventory)
            .with_variables(context.to_vars())
            .with_quiet(!self.debug)
    }
}
