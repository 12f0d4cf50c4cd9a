//! Poll command - asks the poll playbook whether the server is up.

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Args;
use playspawn_spawner::PollStatus;

use super::Context;

/// Exit status when the server is not running (LSB "program is not running").
const NOT_RUNNING_EXIT: u8 = 3;

/// Arguments for the poll command.
#[derive(Args, Debug)]
pub struct PollArgs {}

/// Run the poll command.
///
/// Exits 0 while the server runs and 3 once it has exited.
pub async fn run(_args: PollArgs, ctx: &Context) -> Result<ExitCode> {
    let (mut spawner, _) = ctx.build_spawner()?;
    let status = spawner.poll().await.context("poll failed")?;

    if ctx.json_output {
        let output = match status {
            PollStatus::Running => serde_json::json!({ "running": true }),
            PollStatus::Exited(code) => serde_json::json!({ "running": false, "exit_code": code }),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match status {
            PollStatus::Running => println!("running"),
            PollStatus::Exited(code) => println!("exited {code}"),
        }
    }

    Ok(match status {
        PollStatus::Running => ExitCode::SUCCESS,
        PollStatus::Exited(_) => ExitCode::from(NOT_RUNNING_EXIT),
    })
}
