//! Config command - configuration inspection.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::Style;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration and where it came from
    Show,

    /// Show configuration file paths and their precedence
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx).await,
        ConfigCommand::Path => cmd_path(ctx).await,
    }
}

async fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;

    if ctx.json_output {
        let output = serde_json::json!({
            "sources": loaded.loaded_from(),
            "base_dir": loaded.base_dir(),
            "config": loaded.config,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# playspawn configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }
    println!("Relative paths resolve against {}\n", loaded.base_dir().display());

    if loaded.config.spawner.is_none() {
        let yellow = Style::new().yellow();
        println!(
            "{}\n",
            yellow.apply_to("No [spawner] section: start, stop and poll need one")
        );
    }

    print!("{}", loaded.config.to_toml()?);
    Ok(())
}

async fn cmd_path(ctx: &Context) -> Result<()> {
    let dim = Style::new().dim();

    if let Some(path) = &ctx.config_path {
        println!("{}", path.display());
        println!("  {}", dim.apply_to("(explicit --config, discovery disabled)"));
        return Ok(());
    }

    let loaded = playspawn_config::load_config(None)?;
    for source in &loaded.sources {
        let marker = if source.loaded { "loaded" } else { "not found" };
        println!("{}  {}", source.path.display(), dim.apply_to(marker));
    }
    Ok(())
}
