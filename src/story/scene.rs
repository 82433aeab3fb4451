//! The live scene and who is present in it.
//!
//! Exactly one `scenes` row is live. Entering a new scene retires the old
//! row, which stays behind as the snapshot older memories reference. Narration
//! nudges the live scene's time of day, atmosphere and summary; rollback
//! replays the surviving memories over the scene's initial values.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::{debug, info};

use super::types::SceneContext;
use super::{new_id, timestamp};
use crate::error::{EngineError, EngineResult};

pub const UNSPECIFIED_TIME: &str = "unspecified";
pub const NEUTRAL_ATMOSPHERE: &str = "neutral";

const SUMMARY_MAX_CHARS: usize = 240;

const TIME_CUES: &[(&str, &[&str])] = &[
    ("night", &["night", "midnight", "moon", "moonlight", "stars", "dark sky", "noite", "lua"]),
    ("dawn", &["dawn", "sunrise", "daybreak", "first light", "amanhecer", "aurora"]),
    ("morning", &["morning", "breakfast", "manhã"]),
    ("evening", &["evening", "dusk", "sunset", "twilight", "supper", "entardecer", "pôr do sol"]),
    ("afternoon", &["afternoon", "noon", "midday", "lunch", "tarde", "almoço"]),
];

const ATMOSPHERE_CUES: &[(&str, &[&str])] = &[
    ("tense", &["tense", "danger", "threat", "nervous", "fear", "uneasy", "tenso", "medo"]),
    ("mysterious", &["mysterious", "secret", "enigma", "hidden", "strange", "misterioso"]),
    ("gloomy", &["gloomy", "grim", "sinister", "ominous", "bleak", "sombrio"]),
    ("cheerful", &["cheerful", "festive", "lively", "laughter", "joyful", "alegre"]),
    ("calm", &["calm", "quiet", "peaceful", "serene", "tranquil", "calmo", "tranquilo"]),
    ("melancholic", &["melancholy", "melancholic", "lonely", "sorrow", "triste"]),
];

fn scene_from_row(row: &Row) -> rusqlite::Result<SceneContext> {
    Ok(SceneContext {
        id: row.get(0)?,
        place_id: row.get(1)?,
        time_of_day: row.get(2)?,
        atmosphere: row.get(3)?,
        summary: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const SCENE_COLUMNS: &str = "id, place_id, time_of_day, atmosphere, summary, created_at";

/// The live scene, if the story has one yet.
pub fn current_scene(conn: &Connection) -> EngineResult<Option<SceneContext>> {
    Ok(conn
        .query_row(
            &format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE is_live = 1"),
            [],
            scene_from_row,
        )
        .optional()?)
}

pub fn get_scene(conn: &Connection, id: &str) -> EngineResult<SceneContext> {
    conn.query_row(
        &format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE id = ?1"),
        params![id],
        scene_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("scene", id))
}

/// Input for [`enter_scene`].
#[derive(Debug, Clone, Default)]
pub struct NewScene {
    pub place_id: Option<String>,
    pub time_of_day: Option<String>,
    pub atmosphere: Option<String>,
    pub summary: String,
}

/// Replace the live scene. Presence does not follow unless listed in
/// `carry_over`; those characters are re-inserted into the new scene.
pub fn enter_scene(
    conn: &Connection,
    scene: &NewScene,
    carry_over: &[String],
) -> EngineResult<SceneContext> {
    let previous = current_scene(conn)?;
    conn.execute("UPDATE scenes SET is_live = 0 WHERE is_live = 1", [])?;

    let time_of_day = scene
        .time_of_day
        .clone()
        .or_else(|| previous.as_ref().map(|p| p.time_of_day.clone()))
        .unwrap_or_else(|| UNSPECIFIED_TIME.to_string());
    let atmosphere = scene
        .atmosphere
        .clone()
        .unwrap_or_else(|| NEUTRAL_ATMOSPHERE.to_string());

    let id = new_id();
    conn.execute(
        "INSERT INTO scenes (id, place_id, time_of_day, atmosphere, summary, \
         initial_time_of_day, initial_atmosphere, initial_summary, is_live, created_at, \
         previous_scene_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?3, ?4, ?5, 1, ?6, ?7)",
        params![
            id,
            scene.place_id,
            time_of_day,
            atmosphere,
            scene.summary,
            timestamp(),
            previous.as_ref().map(|p| p.id.as_str()),
        ],
    )?;
    for character_id in carry_over {
        mark_present(conn, &id, character_id, None)?;
    }
    info!(
        scene = %id,
        place = ?scene.place_id,
        carried = carry_over.len(),
        "entered new scene"
    );
    get_scene(conn, &id)
}

/// Tie a scene to the interaction whose narration moved the story there.
pub fn set_scene_origin(conn: &Connection, scene_id: &str, memory_id: &str) -> EngineResult<()> {
    conn.execute(
        "UPDATE scenes SET entered_by_memory = ?1 WHERE id = ?2",
        params![memory_id, scene_id],
    )?;
    Ok(())
}

/// Undo the scene moves made by `memory_ids`: those scenes are deleted with
/// their presence and the scene each one replaced becomes live again.
/// Returns the deleted scene ids.
pub fn revert_scene_moves(conn: &Connection, memory_ids: &[String]) -> EngineResult<Vec<String>> {
    let mut moves = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, previous_scene_id, is_live FROM scenes WHERE entered_by_memory = ?1",
        )?;
        for memory_id in memory_ids {
            let rows = stmt
                .query_map(params![memory_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            moves.extend(rows);
        }
    }

    // Walk back from the live scene until a surviving one is reached.
    let removed: HashSet<String> = moves.iter().map(|(id, _, _)| id.clone()).collect();
    let mut revive = moves.iter().find(|(_, _, live)| *live).and_then(|(_, prev, _)| prev.clone());
    while let Some(candidate) = revive.clone() {
        if !removed.contains(&candidate) {
            break;
        }
        revive = moves
            .iter()
            .find(|(id, _, _)| *id == candidate)
            .and_then(|(_, prev, _)| prev.clone());
    }

    let mut deleted = Vec::new();
    for (id, _, _) in &moves {
        conn.execute("DELETE FROM scenes WHERE id = ?1", params![id])?;
        deleted.push(id.clone());
    }
    if let Some(previous) = &revive {
        conn.execute("UPDATE scenes SET is_live = 1 WHERE id = ?1", params![previous])?;
        info!(scene = %previous, undone = deleted.len(), "returned to earlier scene");
    }
    Ok(deleted)
}

/// Add a character to a scene. `source_memory_id` ties the presence to the
/// interaction that established it; `None` marks setup or carry-over.
pub fn mark_present(
    conn: &Connection,
    scene_id: &str,
    character_id: &str,
    source_memory_id: Option<&str>,
) -> EngineResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO scene_presence (scene_id, character_id, source_memory_id) \
         VALUES (?1, ?2, ?3)",
        params![scene_id, character_id, source_memory_id],
    )?;
    Ok(inserted > 0)
}

/// Ids of the characters present in a scene.
pub fn present_ids(conn: &Connection, scene_id: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT character_id FROM scene_presence WHERE scene_id = ?1 ORDER BY character_id",
    )?;
    let ids = stmt
        .query_map(params![scene_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Rebuild play-derived presence for a scene from its surviving memories.
/// Setup and carry-over rows are kept as they are.
pub fn recompute_presence(conn: &Connection, scene_id: &str) -> EngineResult<()> {
    conn.execute(
        "DELETE FROM scene_presence WHERE scene_id = ?1 AND source_memory_id IS NOT NULL",
        params![scene_id],
    )?;
    let mut stmt = conn.prepare(
        "SELECT m.id, m.character_id, c.role IN ('narrator-descriptive', 'narrator-sassy') \
         FROM memories m JOIN characters c ON c.id = m.character_id \
         WHERE m.scene_id = ?1 ORDER BY m.created_at, m.rowid",
    )?;
    let owners = stmt
        .query_map(params![scene_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut mentions =
        conn.prepare("SELECT character_id FROM memory_mentions WHERE memory_id = ?1")?;
    for (memory_id, owner, narrated) in owners {
        // the narrator is never on stage
        if !narrated {
            mark_present(conn, scene_id, &owner, Some(&memory_id))?;
        }
        let mentioned = mentions
            .query_map(params![memory_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for character_id in mentioned {
            mark_present(conn, scene_id, &character_id, Some(&memory_id))?;
        }
    }
    Ok(())
}

fn strongest_cue(text: &str, cues: &[(&'static str, &[&str])]) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let mut best: Option<(&'static str, usize)> = None;
    for (label, words) in cues {
        let hits = words.iter().filter(|w| lower.contains(*w)).count();
        if hits > 0 && best.map_or(true, |(_, n)| hits > n) {
            best = Some((*label, hits));
        }
    }
    best.map(|(label, _)| label)
}

pub fn detect_time_of_day(text: &str) -> Option<&'static str> {
    strongest_cue(text, TIME_CUES)
}

pub fn detect_atmosphere(text: &str) -> Option<&'static str> {
    strongest_cue(text, ATMOSPHERE_CUES)
}

/// First sentence of a narration, bounded in length.
fn summary_line(text: &str) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(trimmed.len());
    trimmed[..end].chars().take(SUMMARY_MAX_CHARS).collect()
}

#[derive(Debug, Clone, PartialEq)]
struct SceneState {
    time_of_day: String,
    atmosphere: String,
    summary: String,
}

impl SceneState {
    fn absorb(&mut self, text: &str, narrated: bool) {
        if let Some(time) = detect_time_of_day(text) {
            self.time_of_day = time.to_string();
        }
        if let Some(mood) = detect_atmosphere(text) {
            self.atmosphere = mood.to_string();
        }
        if narrated {
            let line = summary_line(text);
            if !line.is_empty() {
                self.summary = line;
            }
        }
    }
}

fn load_state(conn: &Connection, scene_id: &str, initial: bool) -> EngineResult<SceneState> {
    let sql = if initial {
        "SELECT initial_time_of_day, initial_atmosphere, initial_summary FROM scenes WHERE id = ?1"
    } else {
        "SELECT time_of_day, atmosphere, summary FROM scenes WHERE id = ?1"
    };
    conn.query_row(sql, params![scene_id], |row| {
        Ok(SceneState {
            time_of_day: row.get(0)?,
            atmosphere: row.get(1)?,
            summary: row.get(2)?,
        })
    })
    .optional()?
    .ok_or_else(|| EngineError::not_found("scene", scene_id))
}

fn store_state(conn: &Connection, scene_id: &str, state: &SceneState) -> EngineResult<()> {
    conn.execute(
        "UPDATE scenes SET time_of_day = ?1, atmosphere = ?2, summary = ?3 WHERE id = ?4",
        params![state.time_of_day, state.atmosphere, state.summary, scene_id],
    )?;
    Ok(())
}

/// Fold one turn's response into the scene. `narrated` is set when the
/// narrator owned the turn, which also refreshes the scene summary.
pub fn apply_turn(
    conn: &Connection,
    scene_id: &str,
    response_text: &str,
    narrated: bool,
) -> EngineResult<()> {
    let mut state = load_state(conn, scene_id, false)?;
    let before = state.clone();
    state.absorb(response_text, narrated);
    if state != before {
        debug!(
            scene = %scene_id,
            time_of_day = %state.time_of_day,
            atmosphere = %state.atmosphere,
            "scene updated from narration"
        );
        store_state(conn, scene_id, &state)?;
    }
    Ok(())
}

/// Replay every surviving memory of the scene over its initial values.
pub fn rederive_scene(conn: &Connection, scene_id: &str) -> EngineResult<()> {
    let mut state = load_state(conn, scene_id, true)?;
    let mut stmt = conn.prepare(
        "SELECT m.response_text, c.role IN ('narrator-descriptive', 'narrator-sassy') \
         FROM memories m JOIN characters c ON c.id = m.character_id \
         WHERE m.scene_id = ?1 ORDER BY m.created_at, m.rowid",
    )?;
    let turns = stmt
        .query_map(params![scene_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (text, narrated) in &turns {
        state.absorb(text, *narrated);
    }
    store_state(conn, scene_id, &state)
}
