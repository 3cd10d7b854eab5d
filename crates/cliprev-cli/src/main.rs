//! cliprev - clip revisions and optimize patches from the command line
//!
//! Subcommands:
//! - `cliprev optimize <clip>` - Run one optimize pass
//! - `cliprev undo <clip>` - Roll back the last revision
//! - `cliprev clips` - List clips in display order
//! - `cliprev revisions <clip>` - List a clip's revisions
//! - `cliprev switch <clip> <revision>` - Make a stored revision active
//! - `cliprev checkpoint <clip>` - Start a new, empty revision
//! - `cliprev normalize` - Repair revision chains in the project file
//! - `cliprev check` - Verify revision integrity
//! - `cliprev seconds <clip>` - Show a clip in seconds
//! - `cliprev config` - Print the effective configuration
//!
//! Results go to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipconf::ClipConfig;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "cliprev")]
#[command(about = "Clip revision history and deterministic optimize patches")]
#[command(version)]
struct Cli {
    /// Config file to use instead of ./cliprev.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project file (overrides paths.project_file)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one optimize pass on a clip
    Optimize {
        /// Clip id
        clip: String,

        /// Preset id (dynamics_accent, dynamics_level, duration_gentle, noop)
        #[arg(long)]
        preset: Option<String>,

        /// Free-text request; only its length is recorded
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Roll a clip back to its parent revision
    Undo {
        /// Clip id
        clip: String,
    },

    /// List clips in display order
    Clips,

    /// List a clip's revisions
    Revisions {
        /// Clip id
        clip: String,
    },

    /// Make a stored revision the active head
    Switch {
        /// Clip id
        clip: String,

        /// Revision id
        revision: String,
    },

    /// Start a new revision from the current head
    Checkpoint {
        /// Clip id
        clip: String,

        /// Label for the new revision
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Repair revision chains and rewrite the project file
    Normalize,

    /// Verify revision integrity for every clip
    Check,

    /// Print a clip's score in seconds
    Seconds {
        /// Clip id
        clip: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ClipConfig::load_from(cli.config.as_deref()).context("Failed to load config")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.logging.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let ctx = commands::Ctx::new(config, cli.project);
    let output = match cli.command {
        Commands::Config => {
            print!("{}", ctx.config.to_toml());
            return Ok(());
        }
        Commands::Optimize {
            clip,
            preset,
            prompt,
        } => commands::optimize(&ctx, &clip, preset, prompt)?,
        Commands::Undo { clip } => commands::undo(&ctx, &clip)?,
        Commands::Clips => commands::clips(&ctx)?,
        Commands::Revisions { clip } => commands::revisions(&ctx, &clip)?,
        Commands::Switch { clip, revision } => commands::switch(&ctx, &clip, &revision)?,
        Commands::Checkpoint { clip, name } => commands::checkpoint(&ctx, &clip, name)?,
        Commands::Normalize => commands::normalize(&ctx)?,
        Commands::Check => commands::check(&ctx)?,
        Commands::Seconds { clip } => commands::seconds(&ctx, &clip)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    if output.get("ok") == Some(&serde_json::Value::Bool(false)) {
        std::process::exit(1);
    }
    Ok(())
}
