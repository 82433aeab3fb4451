//! Core story type definitions.
//!
//! Defines the entity records ([`Character`], [`Place`]), the validated
//! [`Attributes`] mapping, graph edges ([`RelationshipEdge`]), the interaction
//! log ([`MemoryEntry`]), and the session-wide [`SceneContext`] and
//! [`StorySummary`] singletons.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::EngineError;

/// Role a character plays in the session. Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Third-person narrator with a neutral, descriptive voice.
    NarratorDescriptive,
    /// Third-person narrator that comments on the action.
    NarratorSassy,
    /// An AI-controlled character the player can address.
    Character,
    /// The player's own character.
    Player,
}

impl Role {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NarratorDescriptive => "narrator-descriptive",
            Self::NarratorSassy => "narrator-sassy",
            Self::Character => "character",
            Self::Player => "player",
        }
    }

    pub fn is_narrator(&self) -> bool {
        matches!(self, Self::NarratorDescriptive | Self::NarratorSassy)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "narrator-descriptive" => Ok(Self::NarratorDescriptive),
            "narrator-sassy" => Ok(Self::NarratorSassy),
            "character" => Ok(Self::Character),
            "player" => Ok(Self::Player),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// What kind of entity a mention refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Character,
    Place,
}

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl AttrValue {
    fn render(&self) -> String {
        match self {
            Self::Flag(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
            Self::List(items) => items.join(", "),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Open mapping of trait names (appearance, personality, goals, ...) to typed
/// values. Keys are validated on every construction path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, AttrValue>")]
pub struct Attributes(BTreeMap<String, AttrValue>);

const MAX_KEY_LEN: usize = 64;

fn validate_key(key: &str) -> Result<(), EngineError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(EngineError::InvalidAttributes(format!(
            "key length must be 1..={MAX_KEY_LEN}: {key:?}"
        )));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(EngineError::InvalidAttributes(format!(
            "key must be lowercase ascii, digits or '_': {key:?}"
        )));
    }
    Ok(())
}

impl TryFrom<BTreeMap<String, AttrValue>> for Attributes {
    type Error = EngineError;

    fn try_from(map: BTreeMap<String, AttrValue>) -> Result<Self, Self::Error> {
        for key in map.keys() {
            validate_key(key)?;
        }
        Ok(Self(map))
    }
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an untyped JSON value coming from the model or a story proposal.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EngineError> {
        match value {
            serde_json::Value::Null => Ok(Self::default()),
            serde_json::Value::Object(_) => {
                let map: BTreeMap<String, AttrValue> = serde_json::from_value(value.clone())
                    .map_err(|e| EngineError::InvalidAttributes(e.to_string()))?;
                Self::try_from(map)
            }
            other => Err(EngineError::InvalidAttributes(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    pub fn insert(
        &mut self,
        key: &str,
        value: impl Into<AttrValue>,
    ) -> Result<(), EngineError> {
        validate_key(key)?;
        self.0.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(AttrValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Overlay `other` onto `self`; keys in `other` win.
    pub fn merge(&mut self, other: &Attributes) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// One `key: value` line per attribute, for prompt assembly.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}: {}", k.replace('_', " "), v.render()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A character record, matching the `characters` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    /// UUID v7. Never changes, even when the display name does.
    pub id: String,
    /// Display name; a provisional placeholder while `pending_identity` is set.
    pub name: String,
    pub role: Role,
    pub attributes: Attributes,
    /// Other names this character has been mentioned by.
    pub aliases: Vec<String>,
    pub voice: String,
    pub favorite: bool,
    pub pending_identity: bool,
    pub last_seen_scene: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A place record, matching the `places` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub attributes: Attributes,
    pub aliases: Vec<String>,
    pub first_mentioned_at: String,
    /// Characters present in any scene located here.
    pub characters: Vec<String>,
}

/// Relationship kind between two characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    Knows,
    SpokeWith,
    PresentWith,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knows => "knows",
            Self::SpokeWith => "spoke-with",
            Self::PresentWith => "present-with",
        }
    }

    /// Symmetric kinds are stored once with the pair in canonical order.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Knows | Self::PresentWith)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "knows" => Ok(Self::Knows),
            "spoke-with" => Ok(Self::SpokeWith),
            "present-with" => Ok(Self::PresentWith),
            _ => Err(format!("unknown relation kind: {s}")),
        }
    }
}

/// An edge in the relationship graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub id: String,
    pub char_a: String,
    pub char_b: String,
    pub kind: RelationKind,
    pub strength: f64,
    /// Strength at creation; rollback never goes below it.
    pub baseline: f64,
    pub interaction_count: u32,
    pub last_interaction_at: String,
    pub created_at: String,
}

impl RelationshipEdge {
    /// The endpoint opposite `id`, or `None` if `id` is not on this edge.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.char_a == id {
            Some(&self.char_b)
        } else if self.char_b == id {
            Some(&self.char_a)
        } else {
            None
        }
    }
}

/// Emotion detected in a character response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Worried,
    Excited,
    Thoughtful,
    Playful,
    Neutral,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Worried => "worried",
            Self::Excited => "excited",
            Self::Thoughtful => "thoughtful",
            Self::Playful => "playful",
            Self::Neutral => "neutral",
        }
    }
}

impl std::str::FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "happy" => Ok(Self::Happy),
            "sad" => Ok(Self::Sad),
            "angry" => Ok(Self::Angry),
            "worried" => Ok(Self::Worried),
            "excited" => Ok(Self::Excited),
            "thoughtful" => Ok(Self::Thoughtful),
            "playful" => Ok(Self::Playful),
            "neutral" => Ok(Self::Neutral),
            _ => Err(format!("unknown emotion: {s}")),
        }
    }
}

/// One completed interaction, from the owning character's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub character_id: String,
    pub created_at: String,
    pub emotion: Emotion,
    pub user_text: String,
    pub response_text: String,
    pub scene_id: Option<String>,
}

/// The live scene. Replaced, never appended, as the story moves on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneContext {
    pub id: String,
    pub place_id: Option<String>,
    pub time_of_day: String,
    pub atmosphere: String,
    pub summary: String,
    pub created_at: String,
}

/// Rolling synopsis of everything older than the memory window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorySummary {
    pub content: String,
    /// Timestamp of the newest memory folded into `content`.
    pub covered_until: Option<String>,
    pub turns_since: u32,
    pub generated_at: Option<String>,
    pub stale: bool,
}
