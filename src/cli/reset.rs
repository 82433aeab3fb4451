//! CLI `reset` command: erase the story after confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use taleweaver::config::TaleConfig;

pub fn reset(config: TaleConfig, keep_favorites: bool, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "WARNING: This will permanently delete the story: \
             memories, places, scenes and relationships."
        );
        if keep_favorites {
            println!("Favorite characters will be kept.");
        }
        println!("Database: {}", config.resolved_db_path().display());
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            bail!("reset cancelled");
        }
    }

    let mut session = super::open_session(config)?;
    let result = session.reset(keep_favorites)?;
    println!(
        "Story reset: {} character(s) and {} interaction(s) deleted, {} kept.",
        result.characters_deleted, result.memories_deleted, result.characters_kept
    );
    Ok(())
}
