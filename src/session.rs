//! The story session: one connection, one configuration, one model.
//!
//! Every engine operation goes through `&mut Session`, so at most one turn is
//! in flight and nothing lives in global state.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::TaleConfig;
use crate::db::{open_database, open_memory_database};
use crate::error::{EngineError, EngineResult};
use crate::story::context::{build_prompt_context, ContextBundle};
use crate::story::history::{delete_last, list_recent, RevertResult};
use crate::story::lifecycle::{
    reset, seed_story, ResetResult, SeedResult, StoryProposal, DEFAULT_PLAYER_NAME,
};
use crate::story::registry::{
    create_place, ensure_narrator, ensure_player, find_by_name, find_place, get_character,
    get_character_list, narrator, toggle_favorite,
};
use crate::story::relations::apply_decay;
use crate::story::scene::{current_scene, enter_scene, present_ids, NewScene};
use crate::story::stats::{story_stats, StoryStats};
use crate::story::types::{Attributes, Character, MemoryEntry, Role, SceneContext, StorySummary};
use crate::turn::narration::{NarrationModel, OpenAiCompatModel};
use crate::turn::speech::{SilentSynthesizer, SpeechSynthesizer};
use crate::turn::summary::regenerate_summary_if_due;
use crate::turn::{execute_turn, Addressee, TurnOutcome, TurnServices};

pub struct Session {
    conn: Connection,
    config: TaleConfig,
    db_path: Option<PathBuf>,
    model: Box<dyn NarrationModel>,
    speech: Box<dyn SpeechSynthesizer>,
}

impl Session {
    /// Open the configured database with the OpenAI-compatible model and no
    /// speech output.
    pub fn open(config: TaleConfig) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let conn = open_database(&db_path)?;
        let model = Box::new(OpenAiCompatModel::new(&config.generation));
        let mut session = Self::with_parts(conn, config, model, Box::new(SilentSynthesizer))
            .context("failed to prepare story session")?;
        session.db_path = Some(db_path);
        Ok(session)
    }

    /// A throwaway session over an in-memory database.
    pub fn in_memory(
        config: TaleConfig,
        model: Box<dyn NarrationModel>,
        speech: Box<dyn SpeechSynthesizer>,
    ) -> Result<Self> {
        let conn = open_memory_database()?;
        Ok(Self::with_parts(conn, config, model, speech)?)
    }

    /// Assemble a session and make sure the player character exists.
    pub fn with_parts(
        conn: Connection,
        config: TaleConfig,
        model: Box<dyn NarrationModel>,
        speech: Box<dyn SpeechSynthesizer>,
    ) -> EngineResult<Self> {
        ensure_player(&conn, DEFAULT_PLAYER_NAME, &config.voices.player)?;
        Ok(Self {
            conn,
            config,
            db_path: None,
            model,
            speech,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &TaleConfig {
        &self.config
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Play one turn. Addressing the narrator before one exists creates a
    /// descriptive narrator. The story summary is left alone; call
    /// [`Session::refresh_summary`] once the outcome has been handled.
    pub async fn run_turn(
        &mut self,
        addressee: &Addressee,
        user_text: &str,
    ) -> EngineResult<TurnOutcome> {
        if *addressee == Addressee::Narrator && narrator(&self.conn)?.is_none() {
            ensure_narrator(
                &self.conn,
                Role::NarratorDescriptive,
                &self.config.voices.narrator,
            )?;
        }
        let services = TurnServices {
            model: self.model.as_ref(),
            speech: self.speech.as_ref(),
            config: &self.config,
        };
        execute_turn(&mut self.conn, &services, addressee, user_text).await
    }

    /// Regenerate the story summary if it is due. Returns the new summary,
    /// or `None` when nothing was due or the model failed.
    pub async fn refresh_summary(&mut self) -> Option<StorySummary> {
        regenerate_summary_if_due(&self.conn, self.model.as_ref(), &self.config).await
    }

    /// Move the story to `place`, creating the place if it is new. With
    /// `carry_over` everyone present comes along; otherwise the new scene
    /// starts empty.
    pub fn enter_scene(&mut self, place: &str, carry_over: bool) -> EngineResult<SceneContext> {
        let place = place.trim();
        if place.is_empty() {
            return Err(EngineError::InvalidAttributes("place name is empty".into()));
        }
        let tx = self.conn.transaction()?;
        let place_id = match find_place(&tx, place)? {
            Some(existing) => existing.id,
            None => create_place(&tx, place, &Attributes::new())?.id,
        };
        let carry = match (carry_over, current_scene(&tx)?) {
            (true, Some(scene)) => present_ids(&tx, &scene.id)?,
            _ => Vec::new(),
        };
        let scene = enter_scene(
            &tx,
            &NewScene {
                place_id: Some(place_id),
                ..NewScene::default()
            },
            &carry,
        )?;
        tx.commit()?;
        Ok(scene)
    }

    pub fn delete_last(&mut self, n: usize) -> EngineResult<RevertResult> {
        delete_last(&mut self.conn, n)
    }

    pub fn list_recent(&self, limit: usize) -> EngineResult<Vec<MemoryEntry>> {
        list_recent(&self.conn, limit)
    }

    pub fn toggle_favorite(&mut self, character_id: &str) -> EngineResult<bool> {
        toggle_favorite(&self.conn, character_id)
    }

    /// Wipe the story and recreate the player character.
    pub fn reset(&mut self, keep_favorites: bool) -> EngineResult<ResetResult> {
        let result = reset(&mut self.conn, keep_favorites)?;
        ensure_player(&self.conn, DEFAULT_PLAYER_NAME, &self.config.voices.player)?;
        Ok(result)
    }

    pub fn get_character_list(&self) -> EngineResult<Vec<Character>> {
        get_character_list(&self.conn)
    }

    /// Look a character up by id, then by name or alias.
    pub fn find_character(&self, id_or_name: &str) -> EngineResult<Character> {
        match get_character(&self.conn, id_or_name) {
            Err(EngineError::NotFound { .. }) => find_by_name(&self.conn, id_or_name)?
                .ok_or_else(|| EngineError::not_found("character", id_or_name)),
            other => other,
        }
    }

    /// The context the next turn to `addressee` would see.
    pub fn context(&self, addressee: &Addressee) -> EngineResult<ContextBundle> {
        let target_id = match addressee {
            Addressee::Narrator => narrator(&self.conn)?
                .ok_or_else(|| EngineError::UnknownAddressee("narrator".into()))?
                .id,
            Addressee::Character(id) => id.clone(),
        };
        build_prompt_context(&self.conn, &target_id, &self.config.memory)
    }

    pub fn seed(&mut self, proposal: &StoryProposal) -> EngineResult<SeedResult> {
        seed_story(&mut self.conn, proposal, &self.config)
    }

    /// Apply the configured decay factor to every edge.
    pub fn decay(&mut self) -> EngineResult<usize> {
        let factor = self.config.relations.decay_factor;
        let changed = apply_decay(&self.conn, factor)?;
        info!(changed, factor, "relationship decay applied");
        Ok(changed)
    }

    pub fn stats(&self) -> EngineResult<StoryStats> {
        story_stats(&self.conn, self.db_path.as_deref())
    }
}
