//! Story setup and full reset.
//!
//! [`seed_story`] bulk-loads a story proposal (characters, places, opening
//! scene, initial acquaintances) in one transaction. [`reset`] wipes the
//! story, optionally keeping favorite characters.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::memory::write_summary;
use super::names::normalize;
use super::registry::{
    character_count, create_character, create_place, ensure_narrator, ensure_player, find_by_name,
    rename_character, NewCharacter,
};
use super::relations::seed_relationship;
use super::scene::{enter_scene, mark_present, NewScene};
use super::types::{Attributes, RelationKind, Role};
use super::write_story_log;
use crate::config::TaleConfig;
use crate::error::{EngineError, EngineResult};

/// Display name of the player character when a proposal does not name one.
pub const DEFAULT_PLAYER_NAME: &str = "You";

/// A story proposal, as produced by the model or written by hand.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoryProposal {
    pub title: String,
    pub summary: String,
    /// `descriptive` or `sassy`.
    pub narrator: Option<String>,
    pub player: Option<ProposedCharacter>,
    pub characters: Vec<ProposedCharacter>,
    #[serde(alias = "locations")]
    pub places: Vec<ProposedPlace>,
    pub opening_scene: Option<ProposedScene>,
    pub relationships: Vec<ProposedRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposedCharacter {
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub favorite: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposedPlace {
    pub name: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProposedScene {
    /// Name of one of the proposed places.
    pub place: Option<String>,
    pub time_of_day: Option<String>,
    pub atmosphere: Option<String>,
    pub summary: String,
    /// Names of the characters on stage when the story opens.
    pub present: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProposedRelationship {
    pub a: String,
    pub b: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
}

fn default_strength() -> f64 {
    1.0
}

impl StoryProposal {
    pub fn from_json(text: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

fn narrator_role(style: Option<&str>) -> EngineResult<Role> {
    match style.map(|s| s.trim().to_lowercase()) {
        None => Ok(Role::NarratorDescriptive),
        Some(s) if s == "descriptive" || s == "narrator-descriptive" => {
            Ok(Role::NarratorDescriptive)
        }
        Some(s) if s == "sassy" || s == "narrator-sassy" => Ok(Role::NarratorSassy),
        Some(other) => Err(EngineError::InvalidAttributes(format!(
            "unknown narrator style: {other}"
        ))),
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SeedResult {
    pub characters_created: usize,
    pub characters_reused: usize,
    pub places_created: usize,
    pub relationships: usize,
    pub scene_id: Option<String>,
}

/// Load a story proposal. Characters whose names already exist (kept
/// favorites, for instance) are reused rather than duplicated.
pub fn seed_story(
    conn: &mut Connection,
    proposal: &StoryProposal,
    config: &TaleConfig,
) -> EngineResult<SeedResult> {
    let tx = conn.transaction()?;
    let mut result = SeedResult::default();

    ensure_narrator(&tx, narrator_role(proposal.narrator.as_deref())?, &config.voices.narrator)?;
    let player = match &proposal.player {
        Some(p) => {
            let mut player =
                ensure_player(&tx, &p.name, p.voice.as_deref().unwrap_or(&config.voices.player))?;
            if normalize(&player.name) != normalize(&p.name) {
                player = rename_character(&tx, &player.id, &p.name)?;
            }
            let attributes = Attributes::from_json(&p.attributes)?;
            if !attributes.is_empty() {
                super::registry::update_attributes(&tx, &player.id, &attributes)?;
            }
            player
        }
        None => ensure_player(&tx, DEFAULT_PLAYER_NAME, &config.voices.player)?,
    };

    for proposed in &proposal.characters {
        if find_by_name(&tx, &proposed.name)?.is_some() {
            result.characters_reused += 1;
            continue;
        }
        if character_count(&tx)? >= config.registry.max_characters {
            return Err(EngineError::EntityCapacityExceeded {
                limit: config.registry.max_characters,
                mention: proposed.name.clone(),
            });
        }
        let pool = &config.registry.voice_pool;
        let voice = proposed.voice.clone().unwrap_or_else(|| {
            pool.get(character_count(&tx).unwrap_or(0) % pool.len().max(1))
                .cloned()
                .unwrap_or_else(|| "default".to_string())
        });
        let mut new = NewCharacter::new(proposed.name.trim(), Role::Character, voice);
        new.attributes = Attributes::from_json(&proposed.attributes)?;
        new.favorite = proposed.favorite;
        create_character(&tx, &new)?;
        result.characters_created += 1;
    }

    let mut place_ids = Vec::new();
    for proposed in &proposal.places {
        let attributes = Attributes::from_json(&proposed.attributes)?;
        let place = create_place(&tx, proposed.name.trim(), &attributes)?;
        place_ids.push((proposed.name.trim().to_lowercase(), place.id));
        result.places_created += 1;
    }

    for rel in &proposal.relationships {
        let a = find_by_name(&tx, &rel.a)?
            .ok_or_else(|| EngineError::not_found("character", &rel.a))?;
        let b = find_by_name(&tx, &rel.b)?
            .ok_or_else(|| EngineError::not_found("character", &rel.b))?;
        if seed_relationship(&tx, &a.id, &b.id, RelationKind::Knows, rel.strength)?.is_some() {
            result.relationships += 1;
        }
    }

    if let Some(opening) = &proposal.opening_scene {
        let place_id = match &opening.place {
            Some(name) => Some(
                place_ids
                    .iter()
                    .find(|(n, _)| *n == name.trim().to_lowercase())
                    .map(|(_, id)| id.clone())
                    .ok_or_else(|| EngineError::not_found("place", name))?,
            ),
            None => None,
        };
        let scene = enter_scene(
            &tx,
            &NewScene {
                place_id,
                time_of_day: opening.time_of_day.clone(),
                atmosphere: opening.atmosphere.clone(),
                summary: opening.summary.clone(),
            },
            &[player.id.clone()],
        )?;
        for name in &opening.present {
            let character =
                find_by_name(&tx, name)?.ok_or_else(|| EngineError::not_found("character", name))?;
            mark_present(&tx, &scene.id, &character.id, None)?;
        }
        result.scene_id = Some(scene.id);
    }

    if !proposal.summary.trim().is_empty() {
        write_summary(&tx, proposal.summary.trim(), None)?;
    }

    write_story_log(
        &tx,
        "create",
        "story",
        Some(&json!({
            "title": proposal.title,
            "characters": result.characters_created,
            "places": result.places_created,
        })),
    )?;
    tx.commit()?;

    info!(
        title = %proposal.title,
        characters = result.characters_created,
        places = result.places_created,
        relationships = result.relationships,
        "story seeded"
    );
    Ok(result)
}

#[derive(Debug, Default, Serialize)]
pub struct ResetResult {
    pub characters_deleted: usize,
    pub characters_kept: usize,
    pub memories_deleted: usize,
    pub places_deleted: usize,
}

/// Erase the story. With `keep_favorites`, favorite characters (the narrator
/// included) survive with their attributes but without history; everyone
/// else goes.
pub fn reset(conn: &mut Connection, keep_favorites: bool) -> EngineResult<ResetResult> {
    let tx = conn.transaction()?;

    let memories_deleted = tx.execute("DELETE FROM memories", [])?;
    tx.execute("DELETE FROM relationship_edges", [])?;
    tx.execute("DELETE FROM scene_presence", [])?;
    tx.execute("DELETE FROM scenes", [])?;
    let places_deleted = tx.execute("DELETE FROM places", [])?;

    let characters_deleted = if keep_favorites {
        tx.execute("DELETE FROM characters WHERE favorite = 0", [])?
    } else {
        tx.execute("DELETE FROM characters", [])?
    };
    tx.execute("UPDATE characters SET last_seen_scene = NULL", [])?;
    let characters_kept: i64 = tx.query_row("SELECT COUNT(*) FROM characters", [], |r| r.get(0))?;

    tx.execute(
        "UPDATE story_summary SET content = '', covered_until = NULL, turns_since = 0, \
         generated_at = NULL, stale = 0 WHERE slot = 1",
        [],
    )?;
    write_story_log(
        &tx,
        "reset",
        "story",
        Some(&json!({
            "keep_favorites": keep_favorites,
            "characters_deleted": characters_deleted,
            "memories_deleted": memories_deleted,
        })),
    )?;
    tx.commit()?;

    info!(keep_favorites, characters_deleted, memories_deleted, "story reset");
    Ok(ResetResult {
        characters_deleted,
        characters_kept: characters_kept as usize,
        memories_deleted,
        places_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::story::registry::{get_character_list, list_places, narrator, player};
    use crate::story::relations::get_relationships;
    use crate::story::scene::{current_scene, present_ids};

    const PROPOSAL: &str = r#"{
        "title": "Salt and Smoke",
        "summary": "A storm traps strangers in a harbor tavern.",
        "narrator": "sassy",
        "player": {"name": "Ada"},
        "characters": [
            {"name": "Stella", "attributes": {"personality": "warm, curious"}, "favorite": true},
            {"name": "Marcus", "attributes": {"appearance": "scarred", "age": 52}}
        ],
        "locations": [{"name": "Rusty Anchor Tavern", "attributes": {"mood": "smoky"}}],
        "opening_scene": {
            "place": "Rusty Anchor Tavern",
            "time_of_day": "night",
            "atmosphere": "tense",
            "summary": "Rain hammers the shutters.",
            "present": ["Stella"]
        },
        "relationships": [{"a": "Stella", "b": "Marcus", "strength": 2.0}]
    }"#;

    #[test]
    fn seeds_a_complete_story() {
        let mut conn = open_memory_database().unwrap();
        let proposal = StoryProposal::from_json(PROPOSAL).unwrap();
        let result = seed_story(&mut conn, &proposal, &TaleConfig::default()).unwrap();
        assert_eq!(result.characters_created, 2);
        assert_eq!(result.places_created, 1);
        assert_eq!(result.relationships, 1);

        assert_eq!(narrator(&conn).unwrap().unwrap().role, Role::NarratorSassy);
        assert_eq!(player(&conn).unwrap().unwrap().name, "Ada");

        let scene = current_scene(&conn).unwrap().unwrap();
        assert_eq!(scene.time_of_day, "night");
        assert_eq!(present_ids(&conn, &scene.id).unwrap().len(), 2);

        let stella = find_by_name(&conn, "stella").unwrap().unwrap();
        assert!(stella.favorite);
        assert_eq!(get_relationships(&conn, &stella.id).unwrap()[0].baseline, 2.0);
        assert_eq!(list_places(&conn).unwrap()[0].characters.len(), 2);
    }

    #[test]
    fn rejects_unknown_references() {
        let mut conn = open_memory_database().unwrap();
        let proposal = StoryProposal::from_json(
            r#"{"characters": [{"name": "Stella"}],
                "relationships": [{"a": "Stella", "b": "Nobody"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            seed_story(&mut conn, &proposal, &TaleConfig::default()),
            Err(EngineError::NotFound { .. })
        ));
        // the transaction rolled back
        assert!(find_by_name(&conn, "Stella").unwrap().is_none());
    }

    #[test]
    fn reset_keeps_only_favorites() {
        let mut conn = open_memory_database().unwrap();
        let proposal = StoryProposal::from_json(PROPOSAL).unwrap();
        seed_story(&mut conn, &proposal, &TaleConfig::default()).unwrap();

        let result = reset(&mut conn, true).unwrap();
        assert_eq!(result.characters_kept, 1);
        assert_eq!(result.places_deleted, 1);
        let names: Vec<String> = get_character_list(&conn)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"Stella".to_string()));
        assert!(!names.contains(&"Narrator".to_string()));
        assert!(!names.contains(&"Marcus".to_string()));
        assert!(current_scene(&conn).unwrap().is_none());

        // seeding again reuses the kept favorite
        let again = seed_story(&mut conn, &proposal, &TaleConfig::default()).unwrap();
        assert_eq!(again.characters_reused, 1);
        assert_eq!(again.characters_created, 1);

        let wiped = reset(&mut conn, false).unwrap();
        assert_eq!(wiped.characters_kept, 0);
        assert!(get_character_list(&conn).unwrap().is_empty());
    }

    #[test]
    fn favorite_narrator_survives_reset() {
        let mut conn = open_memory_database().unwrap();
        seed_story(&mut conn, &StoryProposal::from_json(PROPOSAL).unwrap(), &TaleConfig::default())
            .unwrap();
        let kept = narrator(&conn).unwrap().unwrap();
        crate::story::registry::toggle_favorite(&conn, &kept.id).unwrap();

        reset(&mut conn, true).unwrap();
        assert_eq!(narrator(&conn).unwrap().unwrap().id, kept.id);
    }
}
