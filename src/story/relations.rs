//! Relationship graph between characters.
//!
//! Edges are upserted, never duplicated, on `(char_a, char_b, kind)`.
//! Symmetric kinds (`knows`, `present-with`) store the pair in canonical
//! order; `spoke-with` is directed speaker → addressee. Every strength
//! increase made on behalf of a memory is recorded in `edge_contributions`
//! so that rollback can subtract exactly what a deleted turn added.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::debug;

use super::registry::character_from_row;
use super::types::{Character, RelationKind, RelationshipEdge};
use super::{conversion_error, new_id, timestamp};
use crate::error::EngineResult;

const EDGE_COLUMNS: &str = "id, char_a, char_b, kind, strength, baseline, interaction_count, \
     last_interaction_at, created_at";

fn edge_from_row(row: &Row) -> rusqlite::Result<RelationshipEdge> {
    let kind: String = row.get(3)?;
    Ok(RelationshipEdge {
        id: row.get(0)?,
        char_a: row.get(1)?,
        char_b: row.get(2)?,
        kind: kind.parse().map_err(|e: String| conversion_error(3, e))?,
        strength: row.get(4)?,
        baseline: row.get(5)?,
        interaction_count: row.get(6)?,
        last_interaction_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Storage order of an endpoint pair.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str, kind: RelationKind) -> (&'a str, &'a str) {
    if kind.is_symmetric() && b < a {
        (b, a)
    } else {
        (a, b)
    }
}

fn find_edge(
    conn: &Connection,
    a: &str,
    b: &str,
    kind: RelationKind,
) -> EngineResult<Option<RelationshipEdge>> {
    let (a, b) = canonical_pair(a, b, kind);
    Ok(conn
        .query_row(
            &format!(
                "SELECT {EDGE_COLUMNS} FROM relationship_edges \
                 WHERE char_a = ?1 AND char_b = ?2 AND kind = ?3"
            ),
            params![a, b, kind.as_str()],
            edge_from_row,
        )
        .optional()?)
}

pub fn get_edge(conn: &Connection, id: &str) -> EngineResult<Option<RelationshipEdge>> {
    Ok(conn
        .query_row(
            &format!("SELECT {EDGE_COLUMNS} FROM relationship_edges WHERE id = ?1"),
            params![id],
            edge_from_row,
        )
        .optional()?)
}

/// Upsert an edge and strengthen it by `step`.
///
/// When `memory_id` is given the increase is attributed to that memory, and a
/// second call for the same memory and edge is a no-op. Self-edges are
/// ignored and yield `None`.
pub fn record_interaction(
    conn: &Connection,
    a: &str,
    b: &str,
    kind: RelationKind,
    at: &str,
    memory_id: Option<&str>,
    step: f64,
) -> EngineResult<Option<RelationshipEdge>> {
    if a == b {
        return Ok(None);
    }
    let (char_a, char_b) = canonical_pair(a, b, kind);

    let edge_id = match find_edge(conn, char_a, char_b, kind)? {
        Some(existing) => {
            if let Some(memory_id) = memory_id {
                let already: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM edge_contributions \
                     WHERE memory_id = ?1 AND edge_id = ?2)",
                    params![memory_id, existing.id],
                    |r| r.get(0),
                )?;
                if already {
                    return Ok(Some(existing));
                }
            }
            conn.execute(
                "UPDATE relationship_edges SET strength = strength + ?1, \
                 interaction_count = interaction_count + 1, last_interaction_at = ?2 \
                 WHERE id = ?3",
                params![step, at, existing.id],
            )?;
            existing.id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO relationship_edges (id, char_a, char_b, kind, strength, baseline, \
                 interaction_count, last_interaction_at, created_at, origin) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 0.0, 1, ?6, ?6, 'play')",
                params![id, char_a, char_b, kind.as_str(), step, at],
            )?;
            id
        }
    };

    if let Some(memory_id) = memory_id {
        conn.execute(
            "INSERT INTO edge_contributions (memory_id, edge_id, amount) VALUES (?1, ?2, ?3)",
            params![memory_id, edge_id, step],
        )?;
    }
    debug!(char_a, char_b, kind = %kind, "interaction recorded");

    get_edge(conn, &edge_id)
}

/// Create an edge from story setup. Its strength doubles as its baseline and
/// rollback never removes it. Existing edges are left as they are.
pub fn seed_relationship(
    conn: &Connection,
    a: &str,
    b: &str,
    kind: RelationKind,
    strength: f64,
) -> EngineResult<Option<RelationshipEdge>> {
    if a == b {
        return Ok(None);
    }
    if let Some(existing) = find_edge(conn, a, b, kind)? {
        return Ok(Some(existing));
    }
    let (char_a, char_b) = canonical_pair(a, b, kind);
    let id = new_id();
    let now = timestamp();
    let strength = strength.max(0.0);
    conn.execute(
        "INSERT INTO relationship_edges (id, char_a, char_b, kind, strength, baseline, \
         interaction_count, last_interaction_at, created_at, origin) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, ?6, ?6, 'setup')",
        params![id, char_a, char_b, kind.as_str(), strength, now],
    )?;
    get_edge(conn, &id)
}

/// Every edge touching `character_id`, strongest first, then most recent.
pub fn get_relationships(
    conn: &Connection,
    character_id: &str,
) -> EngineResult<Vec<RelationshipEdge>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EDGE_COLUMNS} FROM relationship_edges \
         WHERE char_a = ?1 OR char_b = ?1 \
         ORDER BY strength DESC, last_interaction_at DESC, id"
    ))?;
    let edges = stmt
        .query_map(params![character_id], edge_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(edges)
}

/// Edges touching any of `character_ids`, each edge once, strongest first.
pub fn edges_for(
    conn: &Connection,
    character_ids: &[String],
) -> EngineResult<Vec<RelationshipEdge>> {
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for id in character_ids {
        for edge in get_relationships(conn, id)? {
            if seen.insert(edge.id.clone()) {
                edges.push(edge);
            }
        }
    }
    edges.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then_with(|| b.last_interaction_at.cmp(&a.last_interaction_at))
    });
    Ok(edges)
}

/// Characters present in a scene, by name.
pub fn who_present(conn: &Connection, scene_id: &str) -> EngineResult<Vec<Character>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.role, c.attributes, c.aliases, c.voice, c.favorite, \
         c.pending_identity, c.last_seen_scene, c.created_at, c.updated_at \
         FROM scene_presence sp JOIN characters c ON c.id = sp.character_id \
         WHERE sp.scene_id = ?1 ORDER BY c.name COLLATE NOCASE",
    )?;
    let present = stmt
        .query_map(params![scene_id], character_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(present)
}

/// Multiply every strength above baseline by `factor`, never dropping below
/// the baseline. Returns the number of edges touched.
pub fn apply_decay(conn: &Connection, factor: f64) -> EngineResult<usize> {
    if factor >= 1.0 {
        return Ok(0);
    }
    let changed = conn.execute(
        "UPDATE relationship_edges SET strength = MAX(baseline, strength * ?1) \
         WHERE strength > baseline",
        params![factor.max(0.0)],
    )?;
    debug!(factor, changed, "relationship decay applied");
    Ok(changed)
}

/// Outcome of [`revert_contributions`].
#[derive(Debug, Default)]
pub struct EdgeRevert {
    /// Edges that lost strength and still exist.
    pub weakened: Vec<String>,
    /// Play-created edges deleted because no interaction backs them anymore.
    pub removed: usize,
}

/// Subtract everything the given memories added to the graph. Must run before
/// the memories are deleted, since their contribution rows cascade with them.
pub fn revert_contributions(conn: &Connection, memory_ids: &[String]) -> EngineResult<EdgeRevert> {
    let mut touched: Vec<String> = Vec::new();
    {
        let mut stmt =
            conn.prepare("SELECT edge_id, amount FROM edge_contributions WHERE memory_id = ?1")?;
        for memory_id in memory_ids {
            let rows = stmt
                .query_map(params![memory_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (edge_id, amount) in rows {
                conn.execute(
                    "UPDATE relationship_edges SET strength = MAX(baseline, strength - ?1), \
                     interaction_count = MAX(0, interaction_count - 1) WHERE id = ?2",
                    params![amount, edge_id],
                )?;
                if !touched.contains(&edge_id) {
                    touched.push(edge_id);
                }
            }
        }
    }

    let mut result = EdgeRevert::default();
    for edge_id in touched {
        let removed = conn.execute(
            "DELETE FROM relationship_edges \
             WHERE id = ?1 AND origin = 'play' AND interaction_count = 0",
            params![edge_id],
        )?;
        if removed > 0 {
            result.removed += removed;
        } else {
            result.weakened.push(edge_id);
        }
    }
    Ok(result)
}

/// Reset `last_interaction_at` to the newest surviving contribution, or to
/// the edge's creation time when none survive.
pub fn refresh_last_interaction(conn: &Connection, edge_ids: &[String]) -> EngineResult<()> {
    for edge_id in edge_ids {
        conn.execute(
            "UPDATE relationship_edges SET last_interaction_at = COALESCE(\
                 (SELECT MAX(m.created_at) FROM edge_contributions ec \
                  JOIN memories m ON m.id = ec.memory_id WHERE ec.edge_id = ?1), \
                 created_at) \
             WHERE id = ?1",
            params![edge_id],
        )?;
    }
    Ok(())
}
