use anyhow::Result;

use taleweaver::config::TaleConfig;
use taleweaver::db::check_database_health;

/// Display story statistics and database health in the terminal.
pub fn stats(config: TaleConfig) -> Result<()> {
    let session = super::open_session(config)?;
    let stats = session.stats()?;
    let health = check_database_health(session.connection())?;

    println!("Story Statistics");
    println!("{}", "=".repeat(40));
    println!("  Characters:          {}", stats.characters);
    println!("  Favorites:           {}", stats.favorites);
    println!("  Unnamed:             {}", stats.provisional);
    println!("  Places:              {}", stats.places);
    println!("  Interactions:        {}", stats.memories);
    println!("  Relationship edges:  {}", stats.edges);
    println!();

    println!("By Role:");
    for (role, count) in &stats.by_role {
        println!("  {:<22} {}", role, count);
    }
    println!();

    if !stats.by_emotion.is_empty() {
        println!("By Emotion:");
        for (emotion, count) in &stats.by_emotion {
            println!("  {:<12} {}", emotion, count);
        }
        println!();
    }

    println!(
        "Summary:               {} turn(s) behind{}",
        stats.summary_turns_since,
        if stats.summary_stale { ", stale" } else { "" }
    );
    if let Some(ref scene) = stats.live_scene {
        println!("Live scene:            {scene}");
    }
    if let Some(ref oldest) = stats.oldest_memory {
        println!("Oldest interaction:    {oldest}");
    }
    if let Some(ref newest) = stats.newest_memory {
        println!("Newest interaction:    {newest}");
    }
    println!("Database size:         {}", format_bytes(stats.db_size_bytes));
    println!("Schema version:        {}", health.schema_version);
    println!(
        "Integrity check:       {}",
        if health.integrity_ok { "PASSED" } else { "FAILED" }
    );

    Ok(())
}

pub fn decay(config: TaleConfig) -> Result<()> {
    let mut session = super::open_session(config)?;
    let changed = session.decay()?;
    println!("Decayed {changed} relationship edge(s).");
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
