//! State command - prints the persisted server state.

use anyhow::Result;
use clap::Args;

use super::{Context, read_state};

/// Arguments for the state command.
#[derive(Args, Debug)]
pub struct StateArgs {}

/// Run the state command.
///
/// Only reads the state file; the config is not needed.
pub async fn run(_args: StateArgs, ctx: &Context) -> Result<()> {
    let path = match &ctx.state_file {
        Some(path) => path.clone(),
        None => ctx.state_path(&ctx.principal()?)?,
    };
    let blob = read_state(&path)?;
    println!("{}", serde_json::to_string_pretty(&blob)?);
    Ok(())
}
