#![allow(dead_code)]

use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use taleweaver::config::TaleConfig;
use taleweaver::db;
use taleweaver::story::lifecycle::StoryProposal;
use taleweaver::story::registry::{create_character, NewCharacter};
use taleweaver::story::types::{Character, Role};
use taleweaver::turn::narration::{NarrationModel, Prompt};
use taleweaver::turn::speech::SilentSynthesizer;
use taleweaver::Session;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

pub fn add_character(conn: &Connection, name: &str) -> Character {
    create_character(conn, &NewCharacter::new(name, Role::Character, "default")).unwrap()
}

/// Config with a single generation attempt, a short timeout and summary
/// regeneration pushed out of reach.
pub fn test_config() -> TaleConfig {
    let mut config = TaleConfig::default();
    config.generation.attempts = 1;
    config.generation.timeout_secs = 2;
    config.memory.summary_every_turns = 1000;
    config
}

/// Replies from a fixed script, in order, and records every prompt it saw.
/// Once the script runs out it fails.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    replies: Arc<Mutex<VecDeque<String>>>,
    pub prompts: Arc<Mutex<Vec<Prompt>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().map(Into::into).collect())),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(reply.into());
    }

    pub fn last_prompt(&self) -> Prompt {
        self.prompts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl NarrationModel for ScriptedModel {
    async fn generate(&self, prompt: &Prompt) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

/// Always fails, like an unreachable model server.
pub struct FailingModel;

#[async_trait]
impl NarrationModel for FailingModel {
    async fn generate(&self, _prompt: &Prompt) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }
}

pub const TAVERN_STORY: &str = r#"{
    "title": "Salt and Smoke",
    "summary": "A storm traps strangers in a harbor tavern.",
    "narrator": "descriptive",
    "player": {"name": "Ada"},
    "characters": [
        {"name": "Stella", "attributes": {"occupation": "barmaid"}},
        {"name": "Marco", "attributes": {"occupation": "sailor"}}
    ],
    "places": [{"name": "Rusty Anchor Tavern"}],
    "opening_scene": {
        "place": "Rusty Anchor Tavern",
        "time_of_day": "night",
        "atmosphere": "tense",
        "summary": "Rain hammers the shutters.",
        "present": ["Stella"]
    },
    "relationships": [{"a": "Stella", "b": "Marco", "strength": 2.0}]
}"#;

/// An in-memory session seeded with [`TAVERN_STORY`].
pub fn tavern_session(model: impl NarrationModel + 'static) -> Session {
    tavern_session_with(test_config(), model)
}

pub fn tavern_session_with(config: TaleConfig, model: impl NarrationModel + 'static) -> Session {
    let mut session =
        Session::in_memory(config, Box::new(model), Box::new(SilentSynthesizer)).unwrap();
    session
        .seed(&StoryProposal::from_json(TAVERN_STORY).unwrap())
        .unwrap();
    session
}

pub fn stella_reply(n: usize) -> String {
    format!("Narrator: Stella pours another drink.\nStella: Round {n}, on the house.")
}
