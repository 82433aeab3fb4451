use anyhow::Result;
use taleweaver::config::TaleConfig;
use taleweaver::story::registry::get_character;

/// Print the newest interactions across all characters.
pub fn show(config: TaleConfig, limit: usize) -> Result<()> {
    let session = super::open_session(config)?;
    let entries = session.list_recent(limit)?;
    if entries.is_empty() {
        println!("No interactions yet.");
        return Ok(());
    }
    for entry in &entries {
        let owner = get_character(session.connection(), &entry.character_id)
            .map(|c| c.name)
            .unwrap_or_else(|_| entry.character_id.clone());
        println!("{}  {} [{}]", entry.created_at, owner, entry.emotion.as_str());
        println!("  > {}", super::preview(&entry.user_text, 100));
        println!("  < {}", super::preview(&entry.response_text, 100));
    }
    Ok(())
}

/// Undo the last `count` interactions.
pub fn undo(config: TaleConfig, count: usize) -> Result<()> {
    let mut session = super::open_session(config)?;
    let result = session.delete_last(count)?;
    if let Some(note) = result.inconsistency() {
        println!("Note: {note}");
    }
    println!("Removed {} interaction(s).", result.reverted);
    if result.edges_removed > 0 {
        println!("Dropped {} relationship edge(s).", result.edges_removed);
    }
    if result.summary_marked_stale {
        println!("Story summary will be rebuilt on the next turn.");
    }
    Ok(())
}
