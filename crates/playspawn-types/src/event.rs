//! Automation-engine events and aggregate run counters.
//!
//! Events mirror the JSON job events emitted by `ansible-runner`:
//!
//! ```json
//! {"event": "runner_on_ok", "counter": 5, "stdout": "ok: [localhost]",
//!  "event_data": {"task_action": "set_fact", "res": {"ansible_facts": {...}}}}
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An open-ended mapping of fact fields.
pub type FactMap = Map<String, Value>;

/// Prefix shared by all playbook-level event kinds.
pub const PLAYBOOK_EVENT_PREFIX: &str = "playbook_on_";

/// Event kind emitted when a task completes successfully on a host.
pub const TASK_OK_EVENT: &str = "runner_on_ok";

/// Event kind emitted when a task fails on a host.
pub const TASK_FAILED_EVENT: &str = "runner_on_failed";

/// Event kind carrying the final per-host counters of a run.
pub const STATS_EVENT: &str = "playbook_on_stats";

/// A single structured event emitted by the automation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind label, e.g. `playbook_on_task_start` or `runner_on_ok`.
    #[serde(rename = "event")]
    pub kind: String,

    /// Emission counter assigned by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<u64>,

    /// Human-readable output, possibly containing ANSI styling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Structured payload (task result, stats, play metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
}

impl Event {
    /// Create an event with only a kind label.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            counter: None,
            stdout: None,
            event_data: None,
        }
    }

    /// Attach output text.
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = Some(stdout.into());
        self
    }

    /// Attach a structured payload.
    pub fn with_event_data(mut self, data: Value) -> Self {
        self.event_data = Some(data);
        self
    }

    /// Set the emission counter.
    pub fn with_counter(mut self, counter: u64) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Output text, treating an empty string as absent.
    pub fn output(&self) -> Option<&str> {
        self.stdout.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether this is a playbook-level event (play/task start, stats, ...).
    pub fn is_playbook_level(&self) -> bool {
        self.kind.starts_with(PLAYBOOK_EVENT_PREFIX)
    }

    /// Whether this event reports a successful task outcome.
    pub fn is_task_ok(&self) -> bool {
        self.kind == TASK_OK_EVENT
    }

    /// Whether this event reports a failed task outcome.
    pub fn is_task_failed(&self) -> bool {
        self.kind == TASK_FAILED_EVENT
    }

    /// The module name of the task that produced this event, if any.
    pub fn task_action(&self) -> Option<&str> {
        self.event_data.as_ref()?.get("task_action")?.as_str()
    }

    /// Facts set by the task (`event_data.res.ansible_facts`).
    pub fn facts(&self) -> Option<&FactMap> {
        self.event_data
            .as_ref()?
            .get("res")?
            .get("ansible_facts")?
            .as_object()
    }

    /// The mapping stored under the given fact name, if the task set one.
    ///
    /// Non-mapping values are ignored.
    pub fn fact_block(&self, key: &str) -> Option<&FactMap> {
        self.facts()?.get(key)?.as_object()
    }
}

/// Aggregate per-host counters for a run, keyed by outcome kind.
///
/// Each map goes from host name to the number of tasks with that outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub ok: BTreeMap<String, u64>,
    #[serde(default)]
    pub changed: BTreeMap<String, u64>,
    #[serde(default)]
    pub failures: BTreeMap<String, u64>,
    #[serde(default)]
    pub skipped: BTreeMap<String, u64>,
    /// Hosts that could not be reached (`dark` in engine output).
    #[serde(default, rename = "dark", alias = "unreachable")]
    pub unreachable: BTreeMap<String, u64>,
    #[serde(default)]
    pub processed: BTreeMap<String, u64>,
}

impl Stats {
    /// Parse the counters out of a `playbook_on_stats` event.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != STATS_EVENT {
            return None;
        }
        serde_json::from_value(event.event_data.clone()?).ok()
    }

    /// Whether no successful task outcome was recorded for any host.
    pub fn no_successful_tasks(&self) -> bool {
        self.ok.values().all(|n| *n == 0)
    }
}

fn total(counts: &BTreeMap<String, u64>) -> u64 {
    counts.values().sum()
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} changed={} failures={} skipped={} unreachable={} processed={}",
            total(&self.ok),
            total(&self.changed),
            total(&self.failures),
            total(&self.skipped),
            total(&self.unreachable),
            total(&self.processed),
        )
    }
}
