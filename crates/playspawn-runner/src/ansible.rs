//! `ansible-runner` process engine.
//!
//! Launches `ansible-runner run <workspace> -p <playbook> --json` and reads
//! the job events it prints on stdout, one JSON object per line. Variables
//! are written to `<workspace>/env/extravars`; mapping inventories to
//! `<workspace>/inventory/hosts.json`.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

use playspawn_types::{Event, STATS_EVENT, Stats};
use tracing::{debug, warn};

use crate::engine::{
    AutomationEngine, EngineHooks, EngineOutcome, EngineRequest, InventoryTarget, STATUS_RUNNING,
    STATUS_STARTING, status_for_rc,
};
use crate::error::EngineError;

/// Exit code reported when the process was killed by a signal.
const SIGNALLED_RC: i32 = -1;

/// Engine backed by the `ansible-runner` executable.
#[derive(Debug, Clone)]
pub struct AnsibleRunnerEngine {
    program: String,
}

impl AnsibleRunnerEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Write variables and inventory into the workspace, returning the
    /// inventory path to pass on the command line.
    fn prepare(&self, request: &EngineRequest) -> Result<Option<std::path::PathBuf>, EngineError> {
        let pdd = &request.private_data_dir;

        let env_dir = pdd.join("env");
        std::fs::create_dir_all(&env_dir)?;
        std::fs::write(
            env_dir.join("extravars"),
            serde_json::to_vec_pretty(&request.extravars)
                .map_err(|e| EngineError::Protocol(format!("Unserializable variables: {e}")))?,
        )?;

        Ok(match &request.inventory {
            InventoryTarget::Mapping(map) => {
                let inv_dir = pdd.join("inventory");
                std::fs::create_dir_all(&inv_dir)?;
                let path = inv_dir.join("hosts.json");
                std::fs::write(
                    &path,
                    serde_json::to_vec_pretty(map).map_err(|e| {
                        EngineError::Protocol(format!("Unserializable inventory: {e}"))
                    })?,
                )?;
                Some(path)
            }
            InventoryTarget::File(path) => Some(path.clone()),
            InventoryTarget::EngineDefault => None,
        })
    }

    fn command(&self, request: &EngineRequest, inventory: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("run")
            .arg(&request.private_data_dir)
            .arg("-p")
            .arg(&request.playbook)
            .arg("--json");
        if let Some(path) = inventory {
            cmd.arg("--inventory").arg(path);
        }
        if !request.quiet {
            cmd.arg("-v");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl AutomationEngine for AnsibleRunnerEngine {
    fn name(&self) -> &str {
        "ansible-runner"
    }

    fn run(
        &self,
        request: EngineRequest,
        mut hooks: EngineHooks,
    ) -> Result<EngineOutcome, EngineError> {
        let inventory = self.prepare(&request)?;

        hooks.status(STATUS_STARTING);
        let mut child = self
            .command(&request, inventory.as_deref())
            .spawn()
            .map_err(|e| EngineError::Launch {
                program: self.program.clone(),
                source: e,
            })?;
        hooks.status(STATUS_RUNNING);

        // Drain stderr on its own thread so a chatty engine cannot fill the
        // pipe and stall while we read stdout.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut outcome = EngineOutcome::default();
        let read = match child.stdout.take() {
            Some(stdout) => read_events(stdout, &mut outcome, &mut hooks),
            None => Ok(()),
        };
        if let Err(e) = &read {
            warn!(error = %e, "Lost engine output, killing engine");
            let _ = child.kill();
        }

        let status = child.wait()?;
        let stderr = match stderr_reader.map(|handle| handle.join()) {
            Some(Ok(stderr)) => stderr,
            Some(Err(_)) => {
                warn!("Engine stderr reader panicked");
                String::new()
            }
            None => String::new(),
        };
        read?;

        outcome.rc = status.code().unwrap_or(SIGNALLED_RC);
        outcome.status = status_for_rc(outcome.rc).to_string();
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim_end(), "Engine stderr");
            outcome.stdout.push_str(&stderr);
        }

        hooks.status(&outcome.status);
        Ok(outcome)
    }
}

/// Read stdout to the end, collecting events and plain output.
///
/// Lines are decoded lossily; a stray non-UTF-8 byte only affects its line.
fn read_events(
    stdout: impl Read,
    outcome: &mut EngineOutcome,
    hooks: &mut EngineHooks,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        match parse_event(line) {
            Some(event) => {
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
            None => {
                outcome.stdout.push_str(line);
                outcome.stdout.push('\n');
            }
        }
    }
}

/// Parse one stdout line as a job event. Anything else is plain output.
fn parse_event(line: &str) -> Option<Event> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
