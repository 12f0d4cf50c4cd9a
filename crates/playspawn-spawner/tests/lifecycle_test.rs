//! Lifecycle integration tests for PlaybookSpawner against the mock engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use playspawn_config::{EngineConfig, SpawnerConfig};
use playspawn_runner::{Inventory, InventoryFn, MockEngine, PlaybookVars, Principal, ScriptedRun};
use playspawn_spawner::{Endpoint, Phase, PlaybookSpawner, PollStatus, SpawnerError};
use playspawn_types::FactMap;
use serde_json::{Value, json};
use tempfile::TempDir;

const FACT_KEY: &str = "playspawn_out";

fn facts(value: Value) -> FactMap {
    value.as_object().cloned().unwrap()
}

fn ok(value: Value) -> ScriptedRun {
    ScriptedRun::with_facts(FACT_KEY, facts(value))
}

fn config(update: bool) -> SpawnerConfig {
    SpawnerConfig {
        create_playbook: Some("create.yml".into()),
        update_playbook: update.then(|| "update.yml".into()),
        poll_playbook: Some("poll.yml".into()),
        destroy_playbook: Some("destroy.yml".into()),
        ..Default::default()
    }
}

struct Fixture {
    dir: TempDir,
    engine: Arc<MockEngine>,
    spawner: PlaybookSpawner,
}

impl Fixture {
    fn new(config: SpawnerConfig, runs: Vec<ScriptedRun>) -> Self {
        Self::with(config, runs, |b| b)
    }

    fn with(
        config: SpawnerConfig,
        runs: Vec<ScriptedRun>,
        customize: impl FnOnce(playspawn_spawner::SpawnerBuilder) -> playspawn_spawner::SpawnerBuilder,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MockEngine::new(runs));
        let builder = PlaybookSpawner::builder(config)
            .base_dir(dir.path())
            .engine_config(EngineConfig {
                workspace_root: Some(dir.path().join("workspaces")),
                ..Default::default()
            })
            .principal(Principal::new("user"))
            .engine(engine.clone());
        let spawner = customize(builder).build().unwrap();
        Self {
            dir,
            engine,
            spawner,
        }
    }

    fn playbook(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn workspace_count(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("workspaces"))
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Start
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_merges_create_and_update_facts() {
    let mut fx = Fixture::new(
        config(true),
        vec![
            ok(json!({"ip": "10.0.0.1", "port": 8000, "id": "vm-1"})),
            ok(json!({"port": "8888", "ready": true})),
        ],
    );

    let endpoint = fx.spawner.start().await.unwrap();
    assert_eq!(
        endpoint,
        Endpoint {
            ip: "10.0.0.1".to_string(),
            port: 8888
        }
    );
    assert_eq!(fx.spawner.phase(), Phase::Running);
    assert_eq!(
        Value::Object(fx.spawner.get_state()),
        json!({"server_info": {"ip": "10.0.0.1", "port": "8888", "id": "vm-1", "ready": true}})
    );

    let runs = fx.engine.requests();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].request.playbook, fx.playbook("create.yml"));
    assert_eq!(runs[1].request.playbook, fx.playbook("update.yml"));
    // Update sees what create reported
    assert_eq!(runs[0].request.extravars["server_info"], json!({}));
    assert_eq!(
        runs[1].request.extravars["server_info"]["id"],
        json!("vm-1")
    );
}

#[tokio::test]
async fn test_start_without_update_playbook() {
    let mut fx = Fixture::new(
        config(false),
        vec![ok(json!({"ip": "10.0.0.2", "port": 9000}))],
    );

    let endpoint = fx.spawner.start().await.unwrap();
    assert_eq!(endpoint.to_string(), "10.0.0.2:9000");
    assert_eq!(fx.engine.request_count(), 1);
}

#[tokio::test]
async fn test_start_replaces_previous_state() {
    let mut fx = Fixture::new(
        config(false),
        vec![ok(json!({"ip": "10.0.0.3", "port": 1}))],
    );
    fx.spawner
        .load_state(&facts(json!({"server_info": {"stale": true}})));

    fx.spawner.start().await.unwrap();
    assert_eq!(
        Value::Object(fx.spawner.get_state()),
        json!({"server_info": {"ip": "10.0.0.3", "port": 1}})
    );
}

#[tokio::test]
async fn test_start_missing_endpoint_fails() {
    let mut fx = Fixture::new(config(false), vec![ok(json!({"ip": "10.0.0.1"}))]);
    let progress = fx.spawner.progress();

    let (result, messages) = tokio::join!(fx.spawner.start(), progress.collect::<Vec<_>>());
    let err = result.unwrap_err();
    assert!(matches!(err, SpawnerError::MissingEndpoint { ref field } if field == "port"));
    assert!(!messages.is_empty());
    assert_eq!(fx.spawner.phase(), Phase::Unknown);
}

#[tokio::test]
async fn test_start_invalid_port_fails() {
    let mut fx = Fixture::new(
        config(false),
        vec![ok(json!({"ip": "10.0.0.1", "port": "http"}))],
    );
    let err = fx.spawner.start().await.unwrap_err();
    assert!(matches!(err, SpawnerError::InvalidPort(_)));
}

#[tokio::test]
async fn test_start_nonzero_exit_keeps_state() {
    let mut fx = Fixture::new(config(true), vec![ScriptedRun::failed(2, "quota exceeded")]);
    let previous = facts(json!({"server_info": {"ip": "old", "port": 1}}));
    fx.spawner.load_state(&previous);
    let progress = fx.spawner.progress();

    let (result, _) = tokio::join!(fx.spawner.start(), progress.collect::<Vec<_>>());
    match result.unwrap_err() {
        SpawnerError::Automation(failure) => {
            assert_eq!(failure.rc, 2);
            assert_eq!(failure.message, "Non-zero exit code");
            assert!(!failure.events.is_empty());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(fx.spawner.get_state(), previous);
    // Update never ran
    assert_eq!(fx.engine.request_count(), 1);
}

#[tokio::test]
async fn test_start_with_no_successful_tasks_fails() {
    let mut fx = Fixture::new(config(false), vec![ScriptedRun::no_tasks()]);
    let err = fx.spawner.start().await.unwrap_err();
    let failure = err.automation_failure().unwrap();
    assert_eq!(failure.message, "No successful tasks");
    assert_eq!(failure.rc, 0);
    assert!(fx.spawner.get_state().is_empty());
}

#[tokio::test]
async fn test_update_failure_aborts_start() {
    let mut fx = Fixture::new(
        config(true),
        vec![
            ok(json!({"ip": "10.0.0.1", "port": 1})),
            ScriptedRun::failed(4, "unreachable"),
        ],
    );
    let err = fx.spawner.start().await.unwrap_err();
    assert_eq!(err.automation_failure().unwrap().rc, 4);
    assert_eq!(fx.spawner.phase(), Phase::Unknown);
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_progress_relays_playbook_events_in_order() {
    let mut fx = Fixture::new(
        config(true),
        vec![
            ok(json!({"ip": "10.0.0.1", "port": 1})),
            ok(json!({})),
        ],
    );
    let progress = fx.spawner.progress();

    let (result, messages) = tokio::join!(
        fx.spawner.start(),
        progress.map(|e| e.message).collect::<Vec<_>>()
    );
    result.unwrap();

    let kinds: Vec<&str> = messages
        .iter()
        .map(|m| m.split(':').next().unwrap())
        .collect();
    let one_run = [
        "playbook_on_start",
        "playbook_on_play_start",
        "playbook_on_task_start",
        "playbook_on_stats",
    ];
    let expected: Vec<&str> = one_run.iter().chain(one_run.iter()).copied().collect();
    assert_eq!(kinds, expected);
    assert_eq!(messages[0], "playbook_on_start");
    assert!(messages[2].starts_with("playbook_on_task_start: "));
    assert!(messages.iter().all(|m| !m.contains('\x1b')));
}

#[tokio::test]
async fn test_progress_of_failed_start_terminates() {
    let mut fx = Fixture::new(config(false), vec![ScriptedRun::failed(1, "boom")]);
    let progress = fx.spawner.progress();
    fx.spawner.start().await.unwrap_err();

    let messages: Vec<String> = progress.map(|e| e.message).collect().await;
    assert_eq!(
        messages,
        vec!["playbook_on_start", "playbook_on_task_start: \nTASK [fail] ***", "playbook_on_stats: \nPLAY RECAP ***"]
    );
}

#[tokio::test]
async fn test_each_start_gets_a_fresh_queue() {
    let mut fx = Fixture::new(
        config(false),
        vec![
            ScriptedRun::failed(1, "first"),
            ok(json!({"ip": "10.0.0.1", "port": 1})),
        ],
    );
    // Nobody reads the first start's progress
    fx.spawner.start().await.unwrap_err();

    let progress = fx.spawner.progress();
    let (result, messages) = tokio::join!(
        fx.spawner.start(),
        progress.map(|e| e.message).collect::<Vec<_>>()
    );
    result.unwrap();
    assert!(messages.iter().any(|m| m.starts_with("playbook_on_play_start")));
    assert!(!messages.iter().any(|m| m.contains("TASK [fail]")));
}

#[tokio::test]
async fn test_reader_waiting_before_start_sees_only_that_start() {
    let mut fx = Fixture::new(
        config(false),
        vec![
            ScriptedRun::failed(1, "first"),
            ok(json!({"ip": "10.0.0.1", "port": 1})),
        ],
    );
    // Nobody reads the first start's progress
    fx.spawner.start().await.unwrap_err();

    let reader = tokio::spawn(fx.spawner.progress().map(|e| e.message).collect::<Vec<_>>());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!reader.is_finished());

    fx.spawner.start().await.unwrap();
    let messages = reader.await.unwrap();
    assert!(messages.iter().any(|m| m.starts_with("playbook_on_play_start")));
    assert!(!messages.iter().any(|m| m.contains("TASK [fail]")));
}

// ─────────────────────────────────────────────────────────────────────────────
// Poll
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_poll_running_and_exited() {
    let mut fx = Fixture::new(
        config(false),
        vec![ok(json!({"running": true})), ok(json!({"running": false}))],
    );
    assert_eq!(fx.spawner.poll().await.unwrap(), PollStatus::Running);
    assert_eq!(fx.spawner.poll().await.unwrap(), PollStatus::Exited(0));
    // Poll never changes the phase
    assert_eq!(fx.spawner.phase(), Phase::Unknown);
    assert_eq!(fx.engine.requests()[0].request.playbook, fx.playbook("poll.yml"));
}

#[tokio::test]
async fn test_poll_requires_boolean_running() {
    let mut fx = Fixture::new(
        config(false),
        vec![ok(json!({"running": "yes"})), ok(json!({"other": 1}))],
    );
    assert!(matches!(
        fx.spawner.poll().await.unwrap_err(),
        SpawnerError::InvalidPollOutput(_)
    ));
    assert!(matches!(
        fx.spawner.poll().await.unwrap_err(),
        SpawnerError::InvalidPollOutput(_)
    ));
}

#[tokio::test]
async fn test_poll_sees_loaded_state() {
    let mut fx = Fixture::new(config(false), vec![ok(json!({"running": true}))]);
    fx.spawner
        .load_state(&facts(json!({"server_info": {"id": "vm-9"}})));
    fx.spawner.poll().await.unwrap();
    assert_eq!(
        fx.engine.requests()[0].request.extravars["server_info"],
        json!({"id": "vm-9"})
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Stop
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_before_start() {
    let mut fx = Fixture::new(config(false), vec![ok(json!({}))]);
    fx.spawner.stop(false).await.unwrap();

    assert_eq!(fx.spawner.phase(), Phase::Stopped);
    assert!(fx.spawner.get_state().is_empty());
    let run = &fx.engine.requests()[0];
    assert_eq!(run.request.playbook, fx.playbook("destroy.yml"));
    assert_eq!(run.request.extravars["graceful"], json!(false));
}

#[tokio::test]
async fn test_stop_leaves_state_for_host() {
    let mut fx = Fixture::new(
        config(false),
        vec![ok(json!({"ip": "10.0.0.1", "port": 1})), ok(json!({}))],
    );
    fx.spawner.start().await.unwrap();
    let state = fx.spawner.get_state();

    fx.spawner.stop(true).await.unwrap();
    assert_eq!(fx.spawner.get_state(), state);
    assert_eq!(fx.engine.requests()[1].request.extravars["graceful"], json!(true));

    fx.spawner.clear_state();
    assert!(fx.spawner.get_state().is_empty());
    assert_eq!(fx.spawner.phase(), Phase::Unknown);
}

#[tokio::test]
async fn test_stop_failure_restores_phase() {
    let mut fx = Fixture::new(
        config(false),
        vec![
            ok(json!({"ip": "10.0.0.1", "port": 1})),
            ScriptedRun::failed(2, "still attached"),
        ],
    );
    fx.spawner.start().await.unwrap();
    let err = fx.spawner.stop(true).await.unwrap_err();
    assert!(matches!(err, SpawnerError::Automation(_)));
    assert_eq!(fx.spawner.phase(), Phase::Running);
    assert!(!fx.spawner.get_state().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Inventory and variables
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inventory_template_is_rendered_per_run() {
    let mut config = config(true);
    config.inventory = Some("inventory.yml.j2".into());
    let mut fx = Fixture::new(
        config,
        vec![
            ok(json!({"ip": "10.0.0.7", "port": 1})),
            ok(json!({})),
        ],
    );
    std::fs::write(
        fx.dir.path().join("inventory.yml.j2"),
        "x: {{ user.name }} ip={{ server_info.ip | default('none') }}",
    )
    .unwrap();

    fx.spawner.start().await.unwrap();
    let runs = fx.engine.requests();
    assert_eq!(runs[0].inventory_file.as_deref(), Some("x: user ip=none"));
    assert_eq!(runs[1].inventory_file.as_deref(), Some("x: user ip=10.0.0.7"));
}

#[tokio::test]
async fn test_user_name_template() {
    let mut config = config(false);
    config.inventory = Some("inventory.yml.j2".into());
    let mut fx = Fixture::new(config, vec![ok(json!({"running": true}))]);
    std::fs::write(fx.dir.path().join("inventory.yml.j2"), "x: {{ user.name }}\n").unwrap();

    fx.spawner.poll().await.unwrap();
    assert_eq!(
        fx.engine.requests()[0].inventory_file.as_deref(),
        Some("x: user")
    );
}

#[tokio::test]
async fn test_missing_template_is_configuration_error() {
    let mut config = config(false);
    config.inventory = Some("missing.j2".into());
    let mut fx = Fixture::new(config, vec![ok(json!({"running": true}))]);

    let err = fx.spawner.poll().await.unwrap_err();
    assert!(matches!(err, SpawnerError::Configuration(_)));
    assert_eq!(fx.engine.request_count(), 0);
}

#[tokio::test]
async fn test_inventory_fn_receives_state() {
    let f: InventoryFn = Arc::new(|vars: &FactMap| -> anyhow::Result<Inventory> {
        let host = vars["server_info"]["ip"].as_str().unwrap_or("localhost").to_string();
        Ok(Inventory::Mapping(facts(json!({"all": {"hosts": {host: {}}}}))))
    });
    let mut fx = Fixture::with(
        config(false),
        vec![ok(json!({"running": true}))],
        |b| b.inventory_fn(f),
    );
    fx.spawner
        .load_state(&facts(json!({"server_info": {"ip": "10.0.0.4"}})));
    fx.spawner.poll().await.unwrap();

    assert_eq!(
        fx.engine.requests()[0].request.inventory,
        playspawn_runner::InventoryTarget::Mapping(facts(
            json!({"all": {"hosts": {"10.0.0.4": {}}}})
        ))
    );
}

#[tokio::test]
async fn test_inventory_fn_error_is_configuration_error() {
    let f: InventoryFn =
        Arc::new(|_: &FactMap| -> anyhow::Result<Inventory> { Err(anyhow::anyhow!("no capacity")) });
    let mut fx = Fixture::with(config(false), vec![], |b| b.inventory_fn(f));
    let err = fx.spawner.stop(true).await.unwrap_err();
    assert!(matches!(err, SpawnerError::Configuration(_)));
    assert!(err.to_string().contains("no capacity"));
}

#[tokio::test]
async fn test_variable_layout_and_caller_precedence() {
    let mut config = config(false);
    config.command = vec!["jupyterhub-singleuser".to_string()];
    config.args = vec!["--debug".to_string()];
    config.environment.insert("API".to_string(), "http://hub".to_string());
    config.playbook_vars = facts(json!({"image": "base", "command": ["override"]}));
    let mut fx = Fixture::new(config, vec![ok(json!({"running": true}))]);

    fx.spawner.poll().await.unwrap();
    let vars = &fx.engine.requests()[0].request.extravars;
    assert_eq!(vars["image"], json!("base"));
    assert_eq!(vars["command"], json!(["override"]));
    assert_eq!(vars["user"], json!({"name": "user", "escaped_name": "user"}));
    assert_eq!(vars["spawner_environment"], json!({"API": "http://hub"}));
}

#[tokio::test]
async fn test_playbook_vars_fn_is_evaluated_per_run() {
    let calls = Arc::new(AtomicU64::new(0));
    let counter = calls.clone();
    let vars_fn = PlaybookVars::Function(Arc::new(move || {
        facts(json!({"call": counter.fetch_add(1, Ordering::SeqCst)}))
    }));
    let mut fx = Fixture::with(
        config(false),
        vec![ok(json!({"running": true})), ok(json!({"running": true}))],
        |b| b.playbook_vars(vars_fn),
    );

    fx.spawner.poll().await.unwrap();
    fx.spawner.poll().await.unwrap();
    let runs = fx.engine.requests();
    assert_eq!(runs[0].request.extravars["call"], json!(0));
    assert_eq!(runs[1].request.extravars["call"], json!(1));
}

#[tokio::test]
async fn test_debug_disables_quiet() {
    let mut config = config(false);
    config.debug = true;
    let mut fx = Fixture::new(config, vec![ok(json!({"running": true}))]);
    fx.spawner.poll().await.unwrap();
    assert!(!fx.engine.requests()[0].request.quiet);
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspaces
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_workspaces_are_removed() {
    let mut fx = Fixture::new(
        config(true),
        vec![ok(json!({"ip": "10.0.0.1", "port": 1})), ok(json!({}))],
    );
    fx.spawner.start().await.unwrap();
    assert_eq!(fx.workspace_count(), 0);
}

#[tokio::test]
async fn test_workspaces_are_kept_when_configured() {
    let mut config = config(true);
    config.keep_workspaces = true;
    let mut fx = Fixture::new(
        config,
        vec![ok(json!({"ip": "10.0.0.1", "port": 1})), ok(json!({}))],
    );
    fx.spawner.start().await.unwrap();
    assert_eq!(fx.workspace_count(), 2);
}
