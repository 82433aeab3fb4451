mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use taleweaver::config::TaleConfig;

#[derive(Parser)]
#[command(
    name = "taleweaver",
    version,
    about = "Narrative state engine for AI-narrated interactive stories"
)]
struct Cli {
    /// Config file to use instead of ~/.taleweaver/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List characters, favorites first
    Characters {
        #[arg(long)]
        json: bool,
    },
    /// Toggle a character's favorite flag
    Favorite {
        /// Character id or name
        character: String,
    },
    /// Show the most recent interactions
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Undo the last N interactions
    Undo {
        #[arg(default_value_t = 1)]
        count: usize,
    },
    /// Erase the story
    Reset {
        /// Keep favorite characters (without their history)
        #[arg(long)]
        keep_favorites: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Load a story proposal from a JSON file
    Seed { file: PathBuf },
    /// Play one turn
    Say {
        /// Character id or name; the narrator when omitted
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        json: bool,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Move the story to a new scene
    Scene {
        place: String,
        /// Bring everyone present along
        #[arg(long)]
        carry_over: bool,
    },
    /// Print the context the next turn would see
    Context {
        /// Character id or name; the narrator when omitted
        #[arg(long)]
        to: Option<String>,
        /// Print the rendered prompt instead of JSON
        #[arg(long)]
        prompt: bool,
    },
    /// Show story statistics and database health
    Stats,
    /// Apply the configured relationship decay once
    Decay,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TaleConfig::load_from(path)?,
        None => TaleConfig::load()?,
    };

    // stdout carries command output; logs go to stderr.
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Characters { json } => cli::characters::list(config, json)?,
        Command::Favorite { character } => cli::characters::favorite(config, &character)?,
        Command::History { limit } => cli::history::show(config, limit)?,
        Command::Undo { count } => cli::history::undo(config, count)?,
        Command::Reset {
            keep_favorites,
            yes,
        } => cli::reset::reset(config, keep_favorites, yes)?,
        Command::Seed { file } => cli::seed::seed(config, &file)?,
        Command::Say { to, json, text } => {
            cli::play::say(config, to.as_deref(), &text.join(" "), json).await?
        }
        Command::Scene { place, carry_over } => cli::play::scene(config, &place, carry_over)?,
        Command::Context { to, prompt } => cli::play::context(config, to.as_deref(), prompt)?,
        Command::Stats => cli::stats::stats(config)?,
        Command::Decay => cli::stats::decay(config)?,
    }

    Ok(())
}
