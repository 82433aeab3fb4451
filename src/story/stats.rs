use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::memory::get_summary;
use super::scene::current_scene;
use crate::error::EngineResult;

/// Response from `story_stats`.
#[derive(Debug, Serialize)]
pub struct StoryStats {
    pub characters: u64,
    pub favorites: u64,
    /// Characters still known only by a description.
    pub provisional: u64,
    pub places: u64,
    pub memories: u64,
    pub edges: u64,
    pub by_role: BTreeMap<String, u64>,
    pub by_emotion: BTreeMap<String, u64>,
    pub summary_turns_since: u32,
    pub summary_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_scene: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_memory: Option<String>,
    pub db_size_bytes: u64,
}

fn count(conn: &Connection, sql: &str) -> EngineResult<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n as u64)
}

fn grouped(conn: &Connection, sql: &str) -> EngineResult<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(rows)
}

/// Compute story statistics. `db_path` is used for the file size; pass `None`
/// for in-memory databases.
pub fn story_stats(conn: &Connection, db_path: Option<&Path>) -> EngineResult<StoryStats> {
    let summary = get_summary(conn)?;
    let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM memories",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StoryStats {
        characters: count(conn, "SELECT COUNT(*) FROM characters")?,
        favorites: count(conn, "SELECT COUNT(*) FROM characters WHERE favorite = 1")?,
        provisional: count(conn, "SELECT COUNT(*) FROM characters WHERE pending_identity = 1")?,
        places: count(conn, "SELECT COUNT(*) FROM places")?,
        memories: count(conn, "SELECT COUNT(*) FROM memories")?,
        edges: count(conn, "SELECT COUNT(*) FROM relationship_edges")?,
        by_role: grouped(conn, "SELECT role, COUNT(*) FROM characters GROUP BY role")?,
        by_emotion: grouped(conn, "SELECT emotion, COUNT(*) FROM memories GROUP BY emotion")?,
        summary_turns_since: summary.turns_since,
        summary_stale: summary.stale,
        live_scene: current_scene(conn)?.map(|s| s.id),
        oldest_memory: oldest,
        newest_memory: newest,
        db_size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::story::registry::{create_character, NewCharacter};
    use crate::story::types::Role;

    #[test]
    fn stats_on_fresh_story() {
        let conn = open_memory_database().unwrap();
        let stats = story_stats(&conn, None).unwrap();
        assert_eq!(stats.characters, 0);
        assert_eq!(stats.memories, 0);
        assert!(stats.oldest_memory.is_none());
        assert!(stats.live_scene.is_none());
    }

    #[test]
    fn stats_group_by_role() {
        let conn = open_memory_database().unwrap();
        create_character(&conn, &NewCharacter::new("Narrator", Role::NarratorDescriptive, "n"))
            .unwrap();
        let mut hooded = NewCharacter::new("hooded man", Role::Character, "v");
        hooded.pending_identity = true;
        create_character(&conn, &hooded).unwrap();

        let stats = story_stats(&conn, None).unwrap();
        assert_eq!(stats.characters, 2);
        assert_eq!(stats.provisional, 1);
        assert_eq!(stats.by_role.get("character"), Some(&1));
        assert_eq!(stats.by_role.get("narrator-descriptive"), Some(&1));
    }
}
