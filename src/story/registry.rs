//! Entity registry: canonical characters and places.
//!
//! [`resolve_or_create`] is the entry point used during play. It maps a
//! [`Mention`] found in model output onto an existing entity (exact name or
//! alias, then fuzzy similarity), or creates one: provisional for indefinite
//! descriptions ("a hooded man"), named for proper nouns. [`update_identity`]
//! upgrades a provisional character to its real name without changing its id.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::names::{normalize, similarity, IdentityClaim, KnownName, Mention, MentionForm};
use super::types::{Attributes, Character, EntityKind, Place, Role};
use super::{conversion_error, new_id, timestamp, write_story_log};
use crate::config::RegistryConfig;
use crate::error::{EngineError, EngineResult};

const CHARACTER_COLUMNS: &str = "id, name, role, attributes, aliases, voice, favorite, \
     pending_identity, last_seen_scene, created_at, updated_at";

/// Display name given to a narrator created without one.
pub const NARRATOR_NAME: &str = "Narrator";

/// A registry entity of either kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Character(Character),
    Place(Place),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Self::Character(c) => &c.id,
            Self::Place(p) => &p.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Character(c) => &c.name,
            Self::Place(p) => &p.name,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Character(_) => EntityKind::Character,
            Self::Place(_) => EntityKind::Place,
        }
    }
}

/// Outcome of resolving one mention.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Exact name or alias match.
    Matched(Entity),
    /// Fuzzy match or identity assertion folded into an existing entity.
    Merged(Entity),
    /// No match; a new entity was created.
    Created(Entity),
    /// A definite description with nothing to refer back to.
    Unresolved,
}

impl Resolution {
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::Matched(e) | Self::Merged(e) | Self::Created(e) => Some(e),
            Self::Unresolved => None,
        }
    }

    /// The character id this resolution points at, if it is a character.
    pub fn character_id(&self) -> Option<&str> {
        match self.entity() {
            Some(Entity::Character(c)) => Some(&c.id),
            _ => None,
        }
    }
}

/// Input for [`create_character`].
#[derive(Debug, Clone)]
pub struct NewCharacter {
    pub name: String,
    pub role: Role,
    pub attributes: Attributes,
    pub voice: String,
    pub pending_identity: bool,
    pub favorite: bool,
}

impl NewCharacter {
    pub fn new(name: impl Into<String>, role: Role, voice: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            attributes: Attributes::new(),
            voice: voice.into(),
            pending_identity: false,
            favorite: false,
        }
    }
}

fn parse_aliases(column: usize, raw: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| conversion_error(column, e))
}

fn parse_attributes(column: usize, raw: &str) -> rusqlite::Result<Attributes> {
    serde_json::from_str(raw).map_err(|e| conversion_error(column, e))
}

/// Map a row selected with [`CHARACTER_COLUMNS`].
pub(crate) fn character_from_row(row: &Row) -> rusqlite::Result<Character> {
    let role: String = row.get(2)?;
    let attributes: String = row.get(3)?;
    let aliases: String = row.get(4)?;
    Ok(Character {
        id: row.get(0)?,
        name: row.get(1)?,
        role: role.parse().map_err(|e: String| conversion_error(2, e))?,
        attributes: parse_attributes(3, &attributes)?,
        aliases: parse_aliases(4, &aliases)?,
        voice: row.get(5)?,
        favorite: row.get(6)?,
        pending_identity: row.get(7)?,
        last_seen_scene: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Insert a character. Narrator roles go through [`ensure_narrator`] so that
/// a session never holds two narrators.
pub fn create_character(conn: &Connection, new: &NewCharacter) -> EngineResult<Character> {
    if new.role.is_narrator() {
        if let Some(existing) = narrator(conn)? {
            return Err(EngineError::NarratorConflict {
                existing: existing.role.to_string(),
            });
        }
    }

    let id = new_id();
    let now = timestamp();
    conn.execute(
        "INSERT INTO characters (id, name, role, attributes, aliases, voice, favorite, \
         pending_identity, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, '[]', ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            new.name,
            new.role.as_str(),
            serde_json::to_string(&new.attributes)?,
            new.voice,
            new.favorite,
            new.pending_identity,
            now,
        ],
    )?;
    write_story_log(
        conn,
        "create",
        &id,
        Some(&json!({"name": new.name, "role": new.role.as_str()})),
    )?;
    debug!(id = %id, name = %new.name, role = %new.role, "character created");

    get_character(conn, &id)
}

pub fn get_character(conn: &Connection, id: &str) -> EngineResult<Character> {
    conn.query_row(
        &format!("SELECT {CHARACTER_COLUMNS} FROM characters WHERE id = ?1"),
        params![id],
        character_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("character", id))
}

/// Case-insensitive lookup by display name or alias.
pub fn find_by_name(conn: &Connection, name: &str) -> EngineResult<Option<Character>> {
    let wanted = normalize(name);
    if wanted.is_empty() {
        return Ok(None);
    }
    Ok(all_characters(conn)?.into_iter().find(|c| {
        normalize(&c.name) == wanted || c.aliases.iter().any(|a| normalize(a) == wanted)
    }))
}

fn all_characters(conn: &Connection) -> EngineResult<Vec<Character>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHARACTER_COLUMNS} FROM characters ORDER BY created_at, rowid"
    ))?;
    let rows = stmt
        .query_map([], character_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every character, favorites first, then alphabetically.
pub fn get_character_list(conn: &Connection) -> EngineResult<Vec<Character>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHARACTER_COLUMNS} FROM characters \
         ORDER BY favorite DESC, name COLLATE NOCASE, created_at"
    ))?;
    let rows = stmt
        .query_map([], character_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Flip the favorite flag; returns the new value.
pub fn toggle_favorite(conn: &Connection, id: &str) -> EngineResult<bool> {
    let character = get_character(conn, id)?;
    let favorite = !character.favorite;
    conn.execute(
        "UPDATE characters SET favorite = ?1, updated_at = ?2 WHERE id = ?3",
        params![favorite, timestamp(), id],
    )?;
    write_story_log(conn, "favorite", id, Some(&json!({"favorite": favorite})))?;
    info!(id = %id, name = %character.name, favorite, "favorite toggled");
    Ok(favorite)
}

/// Number of entities counted against `registry.max_characters`.
pub fn character_count(conn: &Connection) -> EngineResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM characters WHERE role = 'character'",
        [],
        |r| r.get(0),
    )?;
    Ok(count as usize)
}

/// The session's narrator, if one exists.
pub fn narrator(conn: &Connection) -> EngineResult<Option<Character>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CHARACTER_COLUMNS} FROM characters \
                 WHERE role IN ('narrator-descriptive', 'narrator-sassy') \
                 ORDER BY created_at LIMIT 1"
            ),
            [],
            character_from_row,
        )
        .optional()?)
}

pub fn player(conn: &Connection) -> EngineResult<Option<Character>> {
    Ok(conn
        .query_row(
            &format!("SELECT {CHARACTER_COLUMNS} FROM characters WHERE role = 'player'"),
            [],
            character_from_row,
        )
        .optional()?)
}

/// Return the narrator, creating it on first use. A narrator of a different
/// style is a conflict, never silently replaced.
pub fn ensure_narrator(conn: &Connection, role: Role, voice: &str) -> EngineResult<Character> {
    if !role.is_narrator() {
        return Err(EngineError::InvalidAttributes(format!(
            "{role} is not a narrator role"
        )));
    }
    match narrator(conn)? {
        Some(existing) if existing.role == role => Ok(existing),
        Some(existing) => Err(EngineError::NarratorConflict {
            existing: existing.role.to_string(),
        }),
        None => create_character(conn, &NewCharacter::new(NARRATOR_NAME, role, voice)),
    }
}

/// Return the player character, creating it with `name` on first use.
pub fn ensure_player(conn: &Connection, name: &str, voice: &str) -> EngineResult<Character> {
    match player(conn)? {
        Some(existing) => Ok(existing),
        None => create_character(conn, &NewCharacter::new(name, Role::Player, voice)),
    }
}

fn place_from_row(row: &Row) -> rusqlite::Result<Place> {
    let attributes: String = row.get(2)?;
    let aliases: String = row.get(3)?;
    Ok(Place {
        id: row.get(0)?,
        name: row.get(1)?,
        attributes: parse_attributes(2, &attributes)?,
        aliases: parse_aliases(3, &aliases)?,
        first_mentioned_at: row.get(4)?,
        characters: Vec::new(),
    })
}

/// Names of characters present in any scene located at `place_id`.
fn place_characters(conn: &Connection, place_id: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT c.name FROM scene_presence sp \
         JOIN scenes s ON s.id = sp.scene_id \
         JOIN characters c ON c.id = sp.character_id \
         WHERE s.place_id = ?1 ORDER BY c.name COLLATE NOCASE",
    )?;
    let names = stmt
        .query_map(params![place_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

pub fn create_place(conn: &Connection, name: &str, attributes: &Attributes) -> EngineResult<Place> {
    let id = new_id();
    let now = timestamp();
    conn.execute(
        "INSERT INTO places (id, name, attributes, aliases, first_mentioned_at, updated_at) \
         VALUES (?1, ?2, ?3, '[]', ?4, ?4)",
        params![id, name, serde_json::to_string(attributes)?, now],
    )?;
    write_story_log(conn, "create", &id, Some(&json!({"name": name, "kind": "place"})))?;
    debug!(id = %id, name, "place created");
    get_place(conn, &id)
}

pub fn get_place(conn: &Connection, id: &str) -> EngineResult<Place> {
    let mut place = conn
        .query_row(
            "SELECT id, name, attributes, aliases, first_mentioned_at FROM places WHERE id = ?1",
            params![id],
            place_from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("place", id))?;
    place.characters = place_characters(conn, id)?;
    Ok(place)
}

/// Places in order of first mention.
/// Find a place by name or alias, case-insensitively.
pub fn find_place(conn: &Connection, name: &str) -> EngineResult<Option<Place>> {
    let wanted = normalize(name);
    if wanted.is_empty() {
        return Ok(None);
    }
    Ok(list_places(conn)?.into_iter().find(|p| {
        normalize(&p.name) == wanted || p.aliases.iter().any(|a| normalize(a) == wanted)
    }))
}

pub fn list_places(conn: &Connection) -> EngineResult<Vec<Place>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, attributes, aliases, first_mentioned_at FROM places \
         ORDER BY first_mentioned_at, rowid",
    )?;
    let mut places = stmt
        .query_map([], place_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for place in &mut places {
        place.characters = place_characters(conn, &place.id)?;
    }
    Ok(places)
}

/// Names and aliases of every resolvable entity. Narrators are never matched
/// against mentions.
pub fn known_names(conn: &Connection) -> EngineResult<Vec<KnownName>> {
    Ok(load_candidates(conn)?
        .into_iter()
        .flat_map(|c| {
            let kind = c.kind;
            c.names
                .into_iter()
                .map(move |name| KnownName { name, kind })
        })
        .collect())
}

struct Candidate {
    kind: EntityKind,
    id: String,
    /// Display name first, then aliases.
    names: Vec<String>,
    pending: bool,
}

fn load_candidates(conn: &Connection) -> EngineResult<Vec<Candidate>> {
    let mut candidates = Vec::new();

    let mut stmt = conn.prepare(
        "SELECT id, name, aliases, pending_identity FROM characters \
         WHERE role IN ('character', 'player') ORDER BY created_at, rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        let aliases: String = row.get(2)?;
        let mut names = vec![row.get::<_, String>(1)?];
        names.extend(parse_aliases(2, &aliases)?);
        Ok(Candidate {
            kind: EntityKind::Character,
            id: row.get(0)?,
            names,
            pending: row.get(3)?,
        })
    })?;
    for row in rows {
        candidates.push(row?);
    }

    let mut stmt =
        conn.prepare("SELECT id, name, aliases FROM places ORDER BY first_mentioned_at, rowid")?;
    let rows = stmt.query_map([], |row| {
        let aliases: String = row.get(2)?;
        let mut names = vec![row.get::<_, String>(1)?];
        names.extend(parse_aliases(2, &aliases)?);
        Ok(Candidate {
            kind: EntityKind::Place,
            id: row.get(0)?,
            names,
            pending: false,
        })
    })?;
    for row in rows {
        candidates.push(row?);
    }

    Ok(candidates)
}

fn load_entity(conn: &Connection, kind: EntityKind, id: &str) -> EngineResult<Entity> {
    Ok(match kind {
        EntityKind::Character => Entity::Character(get_character(conn, id)?),
        EntityKind::Place => Entity::Place(get_place(conn, id)?),
    })
}

/// Append `alias` unless the entity already answers to it. Returns whether
/// anything was written.
pub fn add_alias(conn: &Connection, kind: EntityKind, id: &str, alias: &str) -> EngineResult<bool> {
    let table = match kind {
        EntityKind::Character => "characters",
        EntityKind::Place => "places",
    };
    let (name, raw): (String, String) = conn
        .query_row(
            &format!("SELECT name, aliases FROM {table} WHERE id = ?1"),
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found(table, id))?;
    let mut aliases = parse_aliases(1, &raw)?;

    let key = normalize(alias);
    if key.is_empty()
        || normalize(&name) == key
        || aliases.iter().any(|a| normalize(a) == key)
    {
        return Ok(false);
    }
    aliases.push(alias.trim().to_string());
    conn.execute(
        &format!("UPDATE {table} SET aliases = ?1, updated_at = ?2 WHERE id = ?3"),
        params![serde_json::to_string(&aliases)?, timestamp(), id],
    )?;
    write_story_log(conn, "alias", id, Some(&json!({"alias": alias})))?;
    Ok(true)
}

fn next_voice(conn: &Connection, config: &RegistryConfig) -> EngineResult<String> {
    let count = character_count(conn)?;
    Ok(config
        .voice_pool
        .get(count % config.voice_pool.len().max(1))
        .cloned()
        .unwrap_or_else(|| "default".to_string()))
}

fn check_capacity(conn: &Connection, mention: &str, config: &RegistryConfig) -> EngineResult<()> {
    if character_count(conn)? < config.max_characters {
        return Ok(());
    }
    warn!(
        mention,
        limit = config.max_characters,
        "character capacity reached, mention dropped"
    );
    write_story_log(
        conn,
        "mention_dropped",
        mention,
        Some(&json!({"limit": config.max_characters})),
    )?;
    Err(EngineError::EntityCapacityExceeded {
        limit: config.max_characters,
        mention: mention.to_string(),
    })
}

fn create_from_mention(
    conn: &Connection,
    mention: &Mention,
    pending_identity: bool,
    config: &RegistryConfig,
) -> EngineResult<Entity> {
    let name = mention.text.trim();
    match mention.kind {
        EntityKind::Character => {
            check_capacity(conn, name, config)?;
            let mut new = NewCharacter::new(name, Role::Character, next_voice(conn, config)?);
            new.pending_identity = pending_identity;
            let character = create_character(conn, &new)?;
            info!(
                id = %character.id,
                name = %character.name,
                pending_identity,
                "new character from narration"
            );
            Ok(Entity::Character(character))
        }
        EntityKind::Place => {
            let place = create_place(conn, name, &Attributes::new())?;
            info!(id = %place.id, name = %place.name, "new place from narration");
            Ok(Entity::Place(place))
        }
    }
}

/// Map a mention onto an existing entity or create one.
///
/// Exact name/alias matches win across kinds. Fuzzy matches only consider
/// entities of the mention's kind and record the mention as an alias.
/// Indefinite character descriptions create provisional characters; a
/// definite description with no match resolves to nothing.
pub fn resolve_or_create(
    conn: &Connection,
    mention: &Mention,
    config: &RegistryConfig,
) -> EngineResult<Resolution> {
    let key = normalize(&mention.text);
    if key.is_empty() {
        return Ok(Resolution::Unresolved);
    }
    let candidates = load_candidates(conn)?;

    // A named character outranks a provisional one answering to the same words.
    if let Some(exact) = candidates
        .iter()
        .filter(|c| c.names.iter().any(|n| normalize(n) == key))
        .min_by_key(|c| c.pending)
    {
        return Ok(Resolution::Matched(load_entity(conn, exact.kind, &exact.id)?));
    }

    let best = candidates
        .iter()
        .filter(|c| c.kind == mention.kind)
        .map(|c| {
            let score = c
                .names
                .iter()
                .map(|n| similarity(n, &mention.text))
                .fold(0.0, f64::max);
            (c, score)
        })
        .filter(|(_, score)| *score >= config.similarity_threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1));

    if let Some((candidate, score)) = best {
        debug!(
            mention = %mention.text,
            matched = %candidate.names[0],
            score,
            "fuzzy entity match"
        );
        if mention.form == MentionForm::ProperName {
            add_alias(conn, candidate.kind, &candidate.id, &mention.text)?;
        }
        return Ok(Resolution::Merged(load_entity(conn, candidate.kind, &candidate.id)?));
    }

    match mention.form {
        MentionForm::Definite => Ok(Resolution::Unresolved),
        MentionForm::Indefinite if mention.kind == EntityKind::Character => Ok(
            Resolution::Created(create_from_mention(conn, mention, true, config)?),
        ),
        MentionForm::Indefinite => Ok(Resolution::Unresolved),
        MentionForm::ProperName => Ok(Resolution::Created(create_from_mention(
            conn, mention, false, config,
        )?)),
    }
}

/// Apply an identity assertion ("the hooded man is Viktor"). A matching
/// provisional character takes the new name, unless the name already belongs
/// to another character, which then gains the placeholder as an alias.
/// Without a provisional match the name resolves as an ordinary proper noun.
pub fn resolve_identity_claim(
    conn: &Connection,
    claim: &IdentityClaim,
    config: &RegistryConfig,
) -> EngineResult<Resolution> {
    let provisional = load_candidates(conn)?
        .into_iter()
        .filter(|c| c.kind == EntityKind::Character && c.pending)
        .map(|c| {
            let score = c
                .names
                .iter()
                .map(|n| similarity(n, &claim.placeholder))
                .fold(0.0, f64::max);
            (c, score)
        })
        .filter(|(_, score)| *score >= config.similarity_threshold)
        .max_by(|a, b| a.1.total_cmp(&b.1));

    let Some((candidate, _)) = provisional else {
        return resolve_or_create(
            conn,
            &Mention::proper(claim.name.clone(), EntityKind::Character),
            config,
        );
    };

    // The claimed name already belongs to someone else: the placeholder was
    // that character all along.
    if let Some(existing) = find_by_name(conn, &claim.name)?
        .filter(|c| c.id != candidate.id && !c.role.is_narrator())
    {
        add_alias(conn, EntityKind::Character, &existing.id, &candidate.names[0])?;
        info!(
            placeholder = %candidate.names[0],
            character = %existing.name,
            "identity claim names an existing character"
        );
        return Ok(Resolution::Merged(Entity::Character(get_character(
            conn,
            &existing.id,
        )?)));
    }

    let character = update_identity(conn, &candidate.id, &claim.name, &Attributes::new())?;
    Ok(Resolution::Merged(Entity::Character(character)))
}

/// Give a character its real name. The id, memories and edges are untouched;
/// the previous name is kept as an alias and `attributes` are merged over the
/// existing ones.
pub fn update_identity(
    conn: &Connection,
    id: &str,
    new_name: &str,
    attributes: &Attributes,
) -> EngineResult<Character> {
    let mut character = get_character(conn, id)?;
    let old_name = character.name.clone();
    let new_name = new_name.trim();
    if new_name.is_empty() {
        return Err(EngineError::InvalidAttributes("identity name is empty".into()));
    }

    if normalize(&old_name) != normalize(new_name)
        && !character.aliases.iter().any(|a| normalize(a) == normalize(&old_name))
    {
        character.aliases.push(old_name.clone());
    }
    character
        .aliases
        .retain(|a| normalize(a) != normalize(new_name));
    character.attributes.merge(attributes);

    conn.execute(
        "UPDATE characters SET name = ?1, aliases = ?2, attributes = ?3, \
         pending_identity = 0, updated_at = ?4 WHERE id = ?5",
        params![
            new_name,
            serde_json::to_string(&character.aliases)?,
            serde_json::to_string(&character.attributes)?,
            timestamp(),
            id,
        ],
    )?;
    write_story_log(
        conn,
        "identity",
        id,
        Some(&json!({"from": old_name, "to": new_name})),
    )?;
    info!(id = %id, from = %old_name, to = %new_name, "identity revealed");

    get_character(conn, id)
}

/// Change a display name without keeping the old one as an alias.
pub fn rename_character(conn: &Connection, id: &str, name: &str) -> EngineResult<Character> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidAttributes("character name is empty".into()));
    }
    let changed = conn.execute(
        "UPDATE characters SET name = ?1, updated_at = ?2 WHERE id = ?3",
        params![name, timestamp(), id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("character", id));
    }
    write_story_log(conn, "update", id, Some(&json!({"name": name})))?;
    get_character(conn, id)
}

/// Replace a character's attributes wholesale.
pub fn update_attributes(conn: &Connection, id: &str, attributes: &Attributes) -> EngineResult<()> {
    let changed = conn.execute(
        "UPDATE characters SET attributes = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(attributes)?, timestamp(), id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found("character", id));
    }
    write_story_log(conn, "update", id, None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use serde_json::json;

    fn config() -> RegistryConfig {
        RegistryConfig::default()
    }

    fn created_id(resolution: Resolution) -> String {
        match resolution {
            Resolution::Created(e) => e.id().to_string(),
            other => panic!("expected creation, got {other:?}"),
        }
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let conn = open_memory_database().unwrap();
        let id = created_id(
            resolve_or_create(&conn, &Mention::proper("Stella", EntityKind::Character), &config())
                .unwrap(),
        );

        let again =
            resolve_or_create(&conn, &Mention::proper("stella", EntityKind::Character), &config())
                .unwrap();
        assert!(matches!(again, Resolution::Matched(_)));
        assert_eq!(again.character_id(), Some(id.as_str()));
        assert_eq!(character_count(&conn).unwrap(), 1);
    }

    #[test]
    fn fuzzy_match_records_alias() {
        let conn = open_memory_database().unwrap();
        let id = created_id(
            resolve_or_create(&conn, &Mention::proper("Viktor", EntityKind::Character), &config())
                .unwrap(),
        );

        let merged =
            resolve_or_create(&conn, &Mention::proper("Victor", EntityKind::Character), &config())
                .unwrap();
        assert!(matches!(merged, Resolution::Merged(_)));
        assert_eq!(merged.character_id(), Some(id.as_str()));

        let character = get_character(&conn, &id).unwrap();
        assert_eq!(character.aliases, vec!["Victor".to_string()]);
        assert_eq!(find_by_name(&conn, "victor").unwrap().unwrap().id, id);
    }

    #[test]
    fn fuzzy_match_stays_within_kind() {
        let conn = open_memory_database().unwrap();
        let place = Mention::proper("Blackwood", EntityKind::Place);
        resolve_or_create(&conn, &place, &config()).unwrap();
        let res = resolve_or_create(
            &conn,
            &Mention::proper("Blackwoods", EntityKind::Character),
            &config(),
        )
        .unwrap();
        assert!(matches!(res, Resolution::Created(Entity::Character(_))));
    }

    #[test]
    fn indefinite_creates_provisional_and_definite_refers_back() {
        let conn = open_memory_database().unwrap();
        let res = resolve_or_create(&conn, &Mention::indefinite("hooded man"), &config()).unwrap();
        let id = res.character_id().unwrap().to_string();
        assert!(get_character(&conn, &id).unwrap().pending_identity);

        let definite = Mention {
            text: "hooded man".into(),
            kind: EntityKind::Character,
            form: MentionForm::Definite,
        };
        let back = resolve_or_create(&conn, &definite, &config()).unwrap();
        assert_eq!(back.character_id(), Some(id.as_str()));

        let orphan = Mention {
            text: "old woman".into(),
            kind: EntityKind::Character,
            form: MentionForm::Definite,
        };
        assert!(matches!(
            resolve_or_create(&conn, &orphan, &config()).unwrap(),
            Resolution::Unresolved
        ));
    }

    #[test]
    fn identity_claim_preserves_id() {
        let conn = open_memory_database().unwrap();
        let id = resolve_or_create(&conn, &Mention::indefinite("hooded man"), &config())
            .unwrap()
            .character_id()
            .unwrap()
            .to_string();

        let claim = IdentityClaim {
            placeholder: "hooded man".into(),
            name: "Viktor".into(),
        };
        let res = resolve_identity_claim(&conn, &claim, &config()).unwrap();
        assert!(matches!(res, Resolution::Merged(_)));
        assert_eq!(res.character_id(), Some(id.as_str()));

        let viktor = get_character(&conn, &id).unwrap();
        assert_eq!(viktor.name, "Viktor");
        assert!(!viktor.pending_identity);
        assert_eq!(viktor.aliases, vec!["hooded man".to_string()]);

        // Both names now resolve to the same entity.
        let by_alias =
            resolve_or_create(&conn, &Mention::indefinite("hooded man"), &config()).unwrap();
        assert_eq!(by_alias.character_id(), Some(id.as_str()));
    }

    #[test]
    fn identity_claim_without_provisional_creates_named() {
        let conn = open_memory_database().unwrap();
        let claim = IdentityClaim {
            placeholder: "tall stranger".into(),
            name: "Marcus".into(),
        };
        let res = resolve_identity_claim(&conn, &claim, &config()).unwrap();
        assert!(matches!(res, Resolution::Created(_)));
        assert!(!find_by_name(&conn, "Marcus").unwrap().unwrap().pending_identity);
    }

    #[test]
    fn update_identity_merges_attributes() {
        let conn = open_memory_database().unwrap();
        let mut new = NewCharacter::new("hooded man", Role::Character, "v1");
        new.pending_identity = true;
        new.attributes =
            Attributes::from_json(&json!({"appearance": "hooded", "mood": "wary"})).unwrap();
        let created = create_character(&conn, &new).unwrap();

        let update = Attributes::from_json(&json!({"appearance": "scarred face"})).unwrap();
        let updated = update_identity(&conn, &created.id, "Viktor", &update).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.attributes.text("appearance"), Some("scarred face"));
        assert_eq!(updated.attributes.text("mood"), Some("wary"));

        let logged: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM story_log WHERE operation = 'identity' AND subject_id = ?1",
                params![created.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(logged, 1);
    }

    #[test]
    fn capacity_limit_drops_mention() {
        let conn = open_memory_database().unwrap();
        let config = RegistryConfig {
            max_characters: 1,
            ..RegistryConfig::default()
        };
        let stella = Mention::proper("Stella", EntityKind::Character);
        let marcus = Mention::proper("Marcus", EntityKind::Character);
        resolve_or_create(&conn, &stella, &config).unwrap();
        let err = resolve_or_create(&conn, &marcus, &config).unwrap_err();
        assert!(matches!(err, EngineError::EntityCapacityExceeded { limit: 1, .. }));
        assert!(find_by_name(&conn, "Marcus").unwrap().is_none());

        let dropped: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM story_log WHERE operation = 'mention_dropped'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(dropped, 1);

        // Existing names still resolve, and places are not capped.
        let blackwood = Mention::proper("Blackwood", EntityKind::Place);
        assert!(resolve_or_create(&conn, &stella, &config).is_ok());
        assert!(resolve_or_create(&conn, &blackwood, &config).is_ok());
    }

    #[test]
    fn narrator_is_singular_and_never_matched() {
        let conn = open_memory_database().unwrap();
        let narrator = ensure_narrator(&conn, Role::NarratorSassy, "nar").unwrap();
        assert_eq!(
            ensure_narrator(&conn, Role::NarratorSassy, "nar").unwrap().id,
            narrator.id
        );
        assert!(matches!(
            ensure_narrator(&conn, Role::NarratorDescriptive, "nar"),
            Err(EngineError::NarratorConflict { .. })
        ));

        let mention = Mention::proper("Narrator", EntityKind::Character);
        let res = resolve_or_create(&conn, &mention, &config()).unwrap();
        assert!(matches!(res, Resolution::Created(_)));
        assert_ne!(res.character_id(), Some(narrator.id.as_str()));
    }

    #[test]
    fn character_list_puts_favorites_first() {
        let conn = open_memory_database().unwrap();
        let zed = create_character(&conn, &NewCharacter::new("Zed", Role::Character, "v")).unwrap();
        create_character(&conn, &NewCharacter::new("Anna", Role::Character, "v")).unwrap();
        assert!(toggle_favorite(&conn, &zed.id).unwrap());

        let names: Vec<String> = get_character_list(&conn)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Zed", "Anna"]);

        assert!(!toggle_favorite(&conn, &zed.id).unwrap());
        assert!(matches!(
            toggle_favorite(&conn, "missing"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn voices_rotate_through_pool() {
        let conn = open_memory_database().unwrap();
        let config = RegistryConfig {
            voice_pool: vec!["alto".into(), "bass".into()],
            ..RegistryConfig::default()
        };
        let stella = Mention::proper("Stella", EntityKind::Character);
        let marcus = Mention::proper("Marcus", EntityKind::Character);
        let a = resolve_or_create(&conn, &stella, &config).unwrap();
        let b = resolve_or_create(&conn, &marcus, &config).unwrap();
        let voice = |r: &Resolution| match r.entity() {
            Some(Entity::Character(c)) => c.voice.clone(),
            _ => panic!("not a character"),
        };
        assert_eq!(voice(&a), "alto");
        assert_eq!(voice(&b), "bass");
    }
}
