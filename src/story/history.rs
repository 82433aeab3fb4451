//! History editing: undo the most recent interactions.
//!
//! [`delete_last`] removes the newest memories across all characters and
//! re-derives everything that was computed from them, all in one transaction:
//! edge strengths, play-created edges, scene moves, scene presence, scene
//! state, last-seen scenes and the summary's turn counter and staleness.

use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::memory::{get_summary, mark_summary_stale, recount_uncovered, refresh_last_seen};
use super::relations::{refresh_last_interaction, revert_contributions};
use super::scene::{recompute_presence, rederive_scene, revert_scene_moves};
use super::write_story_log;
use crate::error::{EngineError, EngineResult};

pub use super::memory::list_recent;

/// What a rollback actually did.
#[derive(Debug, Serialize)]
pub struct RevertResult {
    pub requested: usize,
    pub reverted: usize,
    /// Set when fewer entries existed than were requested.
    pub clamped: bool,
    pub deleted_ids: Vec<String>,
    /// Owners and mentioned characters whose derived state was recomputed.
    pub affected_characters: Vec<String>,
    pub edges_removed: usize,
    /// Scenes entered by the deleted interactions, now gone.
    pub scenes_removed: Vec<String>,
    pub summary_marked_stale: bool,
}

impl RevertResult {
    /// The clamping condition as an error value, for callers that report it.
    pub fn inconsistency(&self) -> Option<EngineError> {
        self.clamped.then(|| EngineError::RollbackInconsistency {
            requested: self.requested,
            available: self.reverted,
        })
    }
}

struct Doomed {
    id: String,
    owner: String,
    scene_id: Option<String>,
    created_at: String,
}

/// Delete the last `n` interactions (global recency) and re-derive state.
pub fn delete_last(conn: &mut Connection, n: usize) -> EngineResult<RevertResult> {
    let tx = conn.transaction()?;

    let available: i64 = tx.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
    let available = available as usize;
    let clamped = n > available;
    if clamped {
        warn!(requested = n, available, "rollback clamped to available entries");
    }

    let doomed: Vec<Doomed> = {
        let mut stmt = tx.prepare(
            "SELECT id, character_id, scene_id, created_at FROM memories \
             ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![n as i64], |row| {
                Ok(Doomed {
                    id: row.get(0)?,
                    owner: row.get(1)?,
                    scene_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    if doomed.is_empty() {
        tx.commit()?;
        return Ok(RevertResult {
            requested: n,
            reverted: 0,
            clamped,
            deleted_ids: Vec::new(),
            affected_characters: Vec::new(),
            edges_removed: 0,
            scenes_removed: Vec::new(),
            summary_marked_stale: false,
        });
    }

    let ids: Vec<String> = doomed.iter().map(|d| d.id.clone()).collect();

    let mut affected: BTreeSet<String> = doomed.iter().map(|d| d.owner.clone()).collect();
    {
        let mut stmt = tx.prepare("SELECT character_id FROM memory_mentions WHERE memory_id = ?1")?;
        for id in &ids {
            let mentioned = stmt
                .query_map(params![id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            affected.extend(mentioned);
        }
    }
    let scenes: BTreeSet<String> = doomed.iter().filter_map(|d| d.scene_id.clone()).collect();

    let summary = get_summary(&tx)?;
    let summary_marked_stale = match summary.covered_until.as_deref() {
        Some(covered) => doomed.iter().any(|d| d.created_at.as_str() <= covered),
        None => false,
    };

    // Contribution rows cascade with the memories, so subtract them first.
    let edges = revert_contributions(&tx, &ids)?;

    for id in &ids {
        tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    }

    refresh_last_interaction(&tx, &edges.weakened)?;
    let scenes_removed = revert_scene_moves(&tx, &ids)?;
    for scene_id in scenes.iter().filter(|s| !scenes_removed.contains(s)) {
        recompute_presence(&tx, scene_id)?;
        rederive_scene(&tx, scene_id)?;
    }
    {
        let mut stmt = tx.prepare("SELECT id FROM characters WHERE last_seen_scene = ?1")?;
        for scene_id in &scenes_removed {
            let stranded = stmt
                .query_map(params![scene_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            affected.extend(stranded);
        }
    }
    let affected: Vec<String> = affected.into_iter().collect();
    refresh_last_seen(&tx, &affected)?;

    if summary_marked_stale {
        mark_summary_stale(&tx)?;
    }
    recount_uncovered(&tx)?;

    write_story_log(
        &tx,
        "rollback",
        "memories",
        Some(&json!({
            "requested": n,
            "reverted": ids.len(),
            "deleted": ids,
            "edges_removed": edges.removed,
            "scenes_removed": scenes_removed,
        })),
    )?;
    tx.commit()?;

    info!(
        requested = n,
        reverted = ids.len(),
        edges_removed = edges.removed,
        summary_marked_stale,
        "rolled back recent interactions"
    );

    Ok(RevertResult {
        requested: n,
        reverted: ids.len(),
        clamped,
        deleted_ids: ids,
        affected_characters: affected,
        edges_removed: edges.removed,
        scenes_removed,
        summary_marked_stale,
    })
}
