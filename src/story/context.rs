//! Prompt context assembly.
//!
//! [`build_prompt_context`] gathers everything a narration call needs about
//! one target (a character or the narrator) into a [`ContextBundle`]. It only
//! reads, so calling it twice without an intervening write yields the same
//! bundle.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use super::memory::{get_recent_memories, get_summary};
use super::registry::{get_character, get_place};
use super::relations::{edges_for, who_present};
use super::scene::current_scene;
use super::types::{Attributes, MemoryEntry, RelationshipEdge, Role, SceneContext, StorySummary};
use crate::config::MemoryConfig;
use crate::error::EngineResult;

/// Who the context is built for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProfile {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub voice: String,
    pub attributes: Attributes,
}

/// The live scene together with its place name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneView {
    pub scene: SceneContext,
    pub place_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBundle {
    pub target: TargetProfile,
    pub summary: StorySummary,
    pub scene: Option<SceneView>,
    /// Newest first, never more than `memory.window`.
    pub memories: Vec<MemoryEntry>,
    /// Edges touching the target or anyone present, each once.
    pub relationships: Vec<RelationshipEdge>,
    /// Display names of characters present in the live scene.
    pub present: Vec<String>,
    /// Display name of every edge endpoint, by id.
    pub names: BTreeMap<String, String>,
}

pub fn build_prompt_context(
    conn: &Connection,
    target_id: &str,
    config: &MemoryConfig,
) -> EngineResult<ContextBundle> {
    let character = get_character(conn, target_id)?;
    let target = TargetProfile {
        id: character.id.clone(),
        name: character.name,
        role: character.role,
        voice: character.voice,
        attributes: character.attributes,
    };

    let summary = get_summary(conn)?;
    let memories = get_recent_memories(conn, target_id, config.window, config)?;

    let (scene, present_chars) = match current_scene(conn)? {
        Some(scene) => {
            let place_name = match &scene.place_id {
                Some(place_id) => Some(get_place(conn, place_id)?.name),
                None => None,
            };
            let present = who_present(conn, &scene.id)?;
            (Some(SceneView { scene, place_name }), present)
        }
        None => (None, Vec::new()),
    };

    let mut ids: Vec<String> = vec![target.id.clone()];
    ids.extend(present_chars.iter().map(|c| c.id.clone()));
    let relationships = edges_for(conn, &ids)?;

    let mut names = BTreeMap::new();
    names.insert(target.id.clone(), target.name.clone());
    for c in &present_chars {
        names.insert(c.id.clone(), c.name.clone());
    }
    for edge in &relationships {
        for id in [&edge.char_a, &edge.char_b] {
            if !names.contains_key(id) {
                names.insert(id.clone(), get_character(conn, id)?.name);
            }
        }
    }

    Ok(ContextBundle {
        target,
        summary,
        scene,
        memories,
        relationships,
        present: present_chars.into_iter().map(|c| c.name).collect(),
        names,
    })
}
