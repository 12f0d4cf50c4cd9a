//! Scripted in-memory engine for tests.
//!
//! [`MockEngine`] replays [`ScriptedRun`]s in order, calling the hooks the same
//! way a real engine would, and records every request it receives.

use parking_lot::Mutex;
use playspawn_types::{Event, FactMap, STATS_EVENT, Stats, TASK_FAILED_EVENT, TASK_OK_EVENT};
use serde_json::json;

use crate::engine::{
    AutomationEngine, EngineHooks, EngineOutcome, EngineRequest, InventoryTarget, STATUS_RUNNING,
    STATUS_STARTING, status_for_rc,
};
use crate::error::EngineError;

/// Host name used in scripted events.
const MOCK_HOST: &str = "localhost";

/// One scripted engine run.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub rc: i32,
    pub events: Vec<Event>,
    /// Panic inside the engine instead of returning.
    pub crash: bool,
}

impl ScriptedRun {
    /// A run emitting `events` and exiting with `rc`.
    pub fn new(rc: i32, events: Vec<Event>) -> Self {
        Self {
            rc,
            events,
            crash: false,
        }
    }

    /// A successful run whose single task sets `fact_key` to `facts`.
    pub fn with_facts(fact_key: &str, facts: FactMap) -> Self {
        Self::with_fact_blocks(fact_key, vec![facts])
    }

    /// A successful run with one `set_fact` task per block.
    pub fn with_fact_blocks(fact_key: &str, blocks: Vec<FactMap>) -> Self {
        let ok = blocks.len().max(1) as u64;
        let mut events = vec![
            Event::new("playbook_on_start"),
            Event::new("playbook_on_play_start").with_stdout("\nPLAY [localhost] ***"),
        ];
        for block in blocks {
            events.push(
                Event::new("playbook_on_task_start").with_stdout("\nTASK [set_fact] ***"),
            );
            events.push(Event::new("runner_on_start"));
            events.push(task_ok(json!({ fact_key: block })));
        }
        events.push(stats_event(ok, 0));
        Self::new(0, events)
    }

    /// A clean exit where no task succeeded.
    pub fn no_tasks() -> Self {
        Self::new(
            0,
            vec![
                Event::new("playbook_on_start"),
                Event::new("playbook_on_play_start").with_stdout("\nPLAY [localhost] ***"),
                stats_event(0, 0),
            ],
        )
    }

    /// A run where one task fails and the engine exits with `rc`.
    pub fn failed(rc: i32, message: &str) -> Self {
        Self::new(
            rc,
            vec![
                Event::new("playbook_on_start"),
                Event::new("playbook_on_task_start").with_stdout("\nTASK [fail] ***"),
                Event::new(TASK_FAILED_EVENT)
                    .with_stdout(format!("\x1b[0;31mfatal: [localhost]: FAILED! => {message}\x1b[0m"))
                    .with_event_data(json!({"task_action": "fail", "res": {"msg": message}})),
                stats_event(0, 1),
            ],
        )
    }

    /// A run where the engine dies before reporting anything.
    pub fn crash() -> Self {
        Self {
            rc: -1,
            events: Vec::new(),
            crash: true,
        }
    }
}

fn task_ok(facts: serde_json::Value) -> Event {
    Event::new(TASK_OK_EVENT)
        .with_stdout("\x1b[0;32mok: [localhost]\x1b[0m")
        .with_event_data(json!({
            "host": MOCK_HOST,
            "task_action": "set_fact",
            "res": {"ansible_facts": facts, "changed": false},
        }))
}

fn stats_event(ok: u64, failures: u64) -> Event {
    let count = |n: u64| if n > 0 { json!({ MOCK_HOST: n }) } else { json!({}) };
    Event::new(STATS_EVENT)
        .with_stdout("\nPLAY RECAP ***")
        .with_event_data(json!({
            "ok": count(ok),
            "failures": count(failures),
            "changed": {},
            "dark": {},
            "skipped": {},
            "processed": { MOCK_HOST: 1 },
        }))
}

/// A request as seen by the mock engine.
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub request: EngineRequest,
    /// Contents of a file inventory at the time of the run.
    pub inventory_file: Option<String>,
}

/// Engine that replays scripted runs.
pub struct MockEngine {
    name: String,
    runs: Mutex<Vec<ScriptedRun>>,
    request_log: Mutex<Vec<RecordedRun>>,
}

impl MockEngine {
    /// Create a mock engine replaying `runs` in order.
    ///
    /// Once the script is exhausted further runs fail with a protocol error.
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            name: "mock".to_string(),
            runs: Mutex::new(runs),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Append a run to the script.
    pub fn push(&self, run: ScriptedRun) {
        self.runs.lock().push(run);
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<RecordedRun> {
        self.request_log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }
}

impl AutomationEngine for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(
        &self,
        request: EngineRequest,
        mut hooks: EngineHooks,
    ) -> Result<EngineOutcome, EngineError> {
        let inventory_file = match &request.inventory {
            InventoryTarget::File(path) => std::fs::read_to_string(path).ok(),
            _ => None,
        };
        self.request_log.lock().push(RecordedRun {
            request,
            inventory_file,
        });

        let run = {
            let mut runs = self.runs.lock();
            if runs.is_empty() {
                return Err(EngineError::Protocol(
                    "MockEngine: no more scripted runs".to_string(),
                ));
            }
            runs.remove(0)
        };

        hooks.status(STATUS_STARTING);
        if run.crash {
            panic!("MockEngine: scripted crash");
        }
        hooks.status(STATUS_RUNNING);

        let mut outcome = EngineOutcome {
            rc: run.rc,
            status: status_for_rc(run.rc).to_string(),
            ..Default::default()
        };
        for (counter, event) in run.events.into_iter().enumerate() {
            let event = match event.counter {
                Some(_) => event,
                None => event.with_counter(counter as u64 + 1),
            };
            if event.kind == STATS_EVENT {
                outcome.stats = Stats::from_event(&event);
            }
            if let Some(text) = event.output() {
                outcome.stdout.push_str(text);
                outcome.stdout.push('\n');
            }
            if hooks.event(&event) {
                outcome.events.push(event);
            }
        }
        hooks.status(&outcome.status);

        Ok(outcome)
    }
}
