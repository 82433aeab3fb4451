//! Per-character memory log, last-seen bookkeeping and the story summary.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde_json::json;
use tracing::debug;

use super::types::{MemoryEntry, StorySummary};
use super::{conversion_error, new_id, timestamp, write_story_log};
use crate::config::MemoryConfig;
use crate::error::EngineResult;

const MEMORY_COLUMNS: &str =
    "id, character_id, created_at, emotion, user_text, response_text, scene_id";

pub(crate) fn memory_from_row(row: &Row) -> rusqlite::Result<MemoryEntry> {
    let emotion: String = row.get(3)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        character_id: row.get(1)?,
        created_at: row.get(2)?,
        emotion: emotion.parse().map_err(|e: String| conversion_error(3, e))?,
        user_text: row.get(4)?,
        response_text: row.get(5)?,
        scene_id: row.get(6)?,
    })
}

/// Input for [`append_memory`].
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub character_id: String,
    pub emotion: super::types::Emotion,
    pub user_text: String,
    pub response_text: String,
    pub scene_id: Option<String>,
}

/// Append one interaction to a character's log.
pub fn append_memory(conn: &Connection, new: &NewMemory) -> EngineResult<MemoryEntry> {
    let entry = MemoryEntry {
        id: new_id(),
        character_id: new.character_id.clone(),
        created_at: timestamp(),
        emotion: new.emotion,
        user_text: new.user_text.clone(),
        response_text: new.response_text.clone(),
        scene_id: new.scene_id.clone(),
    };
    conn.execute(
        &format!("INSERT INTO memories ({MEMORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            entry.id,
            entry.character_id,
            entry.created_at,
            entry.emotion.as_str(),
            entry.user_text,
            entry.response_text,
            entry.scene_id,
        ],
    )?;
    debug!(id = %entry.id, character = %entry.character_id, "memory appended");
    Ok(entry)
}

/// Record the characters an interaction involved, besides its owner.
pub fn add_mentions(
    conn: &Connection,
    memory_id: &str,
    character_ids: &[String],
) -> EngineResult<()> {
    for character_id in character_ids {
        conn.execute(
            "INSERT OR IGNORE INTO memory_mentions (memory_id, character_id) VALUES (?1, ?2)",
            params![memory_id, character_id],
        )?;
    }
    Ok(())
}

pub fn mentions_of(conn: &Connection, memory_id: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT character_id FROM memory_mentions WHERE memory_id = ?1 ORDER BY character_id",
    )?;
    let ids = stmt
        .query_map(params![memory_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Newest-first memories of one character, at most `min(limit, window)`.
pub fn get_recent_memories(
    conn: &Connection,
    character_id: &str,
    limit: usize,
    config: &MemoryConfig,
) -> EngineResult<Vec<MemoryEntry>> {
    let limit = limit.min(config.window);
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories WHERE character_id = ?1 \
         ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    ))?;
    let entries = stmt
        .query_map(params![character_id, limit as i64], memory_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Newest-first memories across every character.
pub fn list_recent(conn: &Connection, limit: usize) -> EngineResult<Vec<MemoryEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories ORDER BY created_at DESC, rowid DESC LIMIT ?1"
    ))?;
    let entries = stmt
        .query_map(params![limit as i64], memory_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn memory_count(conn: &Connection) -> EngineResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
    Ok(count as usize)
}

/// Memories with `created_at` strictly after `since` (all of them for `None`),
/// oldest first.
pub fn memories_since(conn: &Connection, since: Option<&str>) -> EngineResult<Vec<MemoryEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories WHERE ?1 IS NULL OR created_at > ?1 \
         ORDER BY created_at, rowid"
    ))?;
    let entries = stmt
        .query_map(params![since], memory_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn touch_last_seen(conn: &Connection, character_id: &str, scene_id: &str) -> EngineResult<()> {
    conn.execute(
        "UPDATE characters SET last_seen_scene = ?1 WHERE id = ?2",
        params![scene_id, character_id],
    )?;
    Ok(())
}

/// Recompute `last_seen_scene` from the newest surviving memory each
/// character owns or is mentioned in; `NULL` when none remain.
pub fn refresh_last_seen(conn: &Connection, character_ids: &[String]) -> EngineResult<()> {
    for id in character_ids {
        conn.execute(
            "UPDATE characters SET last_seen_scene = (\
                 SELECT m.scene_id FROM memories m \
                 WHERE m.scene_id IS NOT NULL AND (m.character_id = ?1 OR EXISTS(\
                     SELECT 1 FROM memory_mentions mm \
                     WHERE mm.memory_id = m.id AND mm.character_id = ?1)) \
                 ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1) \
             WHERE id = ?1",
            params![id],
        )?;
    }
    Ok(())
}

pub fn get_summary(conn: &Connection) -> EngineResult<StorySummary> {
    Ok(conn.query_row(
        "SELECT content, covered_until, turns_since, generated_at, stale \
         FROM story_summary WHERE slot = 1",
        [],
        |row| {
            Ok(StorySummary {
                content: row.get(0)?,
                covered_until: row.get(1)?,
                turns_since: row.get(2)?,
                generated_at: row.get(3)?,
                stale: row.get(4)?,
            })
        },
    )?)
}

/// Replace the summary content. Resets the turn counter and the stale flag
/// to match the memories not yet covered.
pub fn write_summary(
    conn: &Connection,
    content: &str,
    covered_until: Option<&str>,
) -> EngineResult<StorySummary> {
    let uncovered = memories_since(conn, covered_until)?.len() as u32;
    conn.execute(
        "UPDATE story_summary SET content = ?1, covered_until = ?2, turns_since = ?3, \
         generated_at = ?4, stale = 0 WHERE slot = 1",
        params![content, covered_until, uncovered, timestamp()],
    )?;
    write_story_log(
        conn,
        "summary",
        "story_summary",
        Some(&json!({"covered_until": covered_until, "chars": content.chars().count()})),
    )?;
    get_summary(conn)
}

pub fn increment_turns(conn: &Connection) -> EngineResult<()> {
    conn.execute(
        "UPDATE story_summary SET turns_since = turns_since + 1 WHERE slot = 1",
        [],
    )?;
    Ok(())
}

pub fn mark_summary_stale(conn: &Connection) -> EngineResult<()> {
    conn.execute("UPDATE story_summary SET stale = 1 WHERE slot = 1", [])?;
    Ok(())
}

/// Set `turns_since` to the number of memories the summary does not cover.
pub fn recount_uncovered(conn: &Connection) -> EngineResult<()> {
    let summary = get_summary(conn)?;
    let uncovered = memories_since(conn, summary.covered_until.as_deref())?.len() as u32;
    conn.execute(
        "UPDATE story_summary SET turns_since = ?1 WHERE slot = 1",
        params![uncovered],
    )?;
    Ok(())
}

/// Whether the summary should be regenerated now.
pub fn summary_due(summary: &StorySummary, config: &MemoryConfig, now: DateTime<Utc>) -> bool {
    if summary.stale {
        return true;
    }
    if summary.turns_since == 0 {
        return false;
    }
    if summary.turns_since >= config.summary_every_turns {
        return true;
    }
    match summary
        .generated_at
        .as_deref()
        .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
    {
        Some(generated) => {
            let age = now.signed_duration_since(generated.with_timezone(&Utc));
            age.num_seconds() >= config.summary_max_age_secs as i64
        }
        None => false,
    }
}
