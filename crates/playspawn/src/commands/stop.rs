//! Stop command - destroys the server and forgets its state.

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;

use super::{Context, write_state};

/// Arguments for the stop command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Tell the destroy playbook not to shut down gracefully
    #[arg(long)]
    pub now: bool,
}

/// Run the stop command.
pub async fn run(args: StopArgs, ctx: &Context) -> Result<()> {
    let (mut spawner, state_path) = ctx.build_spawner()?;
    let dim = Style::new().dim();

    if spawner.state().is_empty() && !ctx.json_output {
        println!(
            "{}",
            dim.apply_to("No saved state; running the destroy playbook anyway")
        );
    }

    spawner.stop(!args.now).await.context("stop failed")?;
    spawner.clear_state();
    write_state(&state_path, &spawner.get_state())?;

    if ctx.json_output {
        let output = serde_json::json!({ "stopped": true, "graceful": !args.now });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green();
        println!("{}", green.apply_to("Server stopped"));
    }

    Ok(())
}
