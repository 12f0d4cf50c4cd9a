//! Start command - creates the server and streams progress while it comes up.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use console::Style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};

use super::{Context, one_line, write_state};

/// Arguments for the start command.
#[derive(Args, Debug)]
pub struct StartArgs {}

/// Run the start command.
pub async fn run(_args: StartArgs, ctx: &Context) -> Result<()> {
    let (mut spawner, state_path) = ctx.build_spawner()?;

    let bar = if ctx.json_output {
        None
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
        bar.set_message(format!("Starting server for {}", spawner.principal().name));
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(bar)
    };

    let mut progress = spawner.progress();
    let show = async {
        while let Some(event) = progress.next().await {
            let line = one_line(&event.message);
            if let Some(bar) = &bar {
                if ctx.verbose {
                    bar.println(&line);
                }
                bar.set_message(line);
            }
        }
    };
    let (result, ()) = tokio::join!(spawner.start(), show);

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    // Whatever the playbooks reported is kept, so a failed start can be stopped.
    write_state(&state_path, &spawner.get_state())?;
    let endpoint = result.context("start failed")?;

    if ctx.json_output {
        let output = serde_json::json!({
            "ip": endpoint.ip,
            "port": endpoint.port,
            "state": spawner.get_state(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let green = Style::new().green().bold();
        let dim = Style::new().dim();
        println!("{} {}", green.apply_to("Server running at"), endpoint);
        println!("  {} {}", dim.apply_to("State:"), state_path.display());
    }

    Ok(())
}
