//! Background refresh of the rolling story summary.
//!
//! Runs separately from the turn, once its outcome has been delivered.
//! Failures are logged and absorbed: a stale summary is never a reason to
//! fail a turn.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::narration::{generate_with_retry, NarrationModel};
use super::prompt::build_summary_prompt;
use crate::config::TaleConfig;
use crate::error::{EngineError, EngineResult};
use crate::story::memory::{get_summary, memories_since, summary_due, write_summary};
use crate::story::types::StorySummary;

/// Regenerate the summary if it is due. Returns the new summary when one was
/// written, `None` when nothing was due or regeneration failed.
pub async fn regenerate_summary_if_due(
    conn: &Connection,
    model: &dyn NarrationModel,
    config: &TaleConfig,
) -> Option<StorySummary> {
    match try_regenerate(conn, model, config).await {
        Ok(summary) => summary,
        Err(e) => {
            let e = EngineError::StaleSummaryRegenerationFailed(e.to_string());
            warn!(error = %e, "keeping previous story summary");
            None
        }
    }
}

async fn try_regenerate(
    conn: &Connection,
    model: &dyn NarrationModel,
    config: &TaleConfig,
) -> EngineResult<Option<StorySummary>> {
    let current = get_summary(conn)?;
    if !summary_due(&current, &config.memory, Utc::now()) {
        return Ok(None);
    }

    // A stale summary may describe deleted turns, so rebuild it from scratch.
    let (previous, since) = if current.stale {
        (String::new(), None)
    } else {
        (current.content.clone(), current.covered_until.clone())
    };
    let entries = memories_since(conn, since.as_deref())?;

    let Some(newest) = entries.last().map(|m| m.created_at.clone()) else {
        debug!("no memories to summarize");
        return Ok(Some(write_summary(conn, &previous, since.as_deref())?));
    };

    let prompt = build_summary_prompt(&previous, &entries);
    let content = generate_with_retry(model, &prompt, &config.generation).await?;
    let summary = write_summary(conn, content.trim(), Some(&newest))?;
    info!(
        covered = entries.len(),
        covered_until = %newest,
        "story summary regenerated"
    );
    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::story::memory::{append_memory, increment_turns, mark_summary_stale, NewMemory};
    use crate::story::registry::{create_character, NewCharacter};
    use crate::story::types::{Emotion, Role};
    use crate::turn::narration::Prompt;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<Prompt>>,
        fail: bool,
    }

    #[async_trait]
    impl NarrationModel for Recorder {
        async fn generate(&self, prompt: &Prompt) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(prompt.clone());
            if self.fail {
                anyhow::bail!("model offline");
            }
            Ok("Stella welcomed the traveller.".into())
        }
    }

    fn setup(turns: usize) -> Connection {
        let conn = open_memory_database().unwrap();
        let stella = create_character(&conn, &NewCharacter::new("Stella", Role::Character, "v"))
            .unwrap();
        for i in 0..turns {
            append_memory(
                &conn,
                &NewMemory {
                    character_id: stella.id.clone(),
                    emotion: Emotion::Neutral,
                    user_text: format!("line {i}"),
                    response_text: format!("reply {i}"),
                    scene_id: None,
                },
            )
            .unwrap();
            increment_turns(&conn).unwrap();
        }
        conn
    }

    fn config() -> TaleConfig {
        let mut config = TaleConfig::default();
        config.memory.summary_every_turns = 3;
        config.generation.attempts = 1;
        config
    }

    #[tokio::test]
    async fn regenerates_when_turn_threshold_reached() {
        let conn = setup(3);
        let model = Recorder {
            seen: Mutex::new(Vec::new()),
            fail: false,
        };
        let summary = regenerate_summary_if_due(&conn, &model, &config()).await.unwrap();
        assert_eq!(summary.content, "Stella welcomed the traveller.");
        assert_eq!(summary.turns_since, 0);
        let newest = memories_since(&conn, None).unwrap().pop().unwrap();
        assert_eq!(summary.covered_until.as_deref(), Some(newest.created_at.as_str()));

        let prompt = &model.seen.lock().unwrap()[0];
        let first = prompt.user.find("line 0").unwrap();
        let last = prompt.user.find("line 2").unwrap();
        assert!(first < last);
    }

    #[tokio::test]
    async fn not_due_is_a_no_op() {
        let conn = setup(1);
        let model = Recorder {
            seen: Mutex::new(Vec::new()),
            fail: false,
        };
        assert!(regenerate_summary_if_due(&conn, &model, &config()).await.is_none());
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_previous_summary() {
        let conn = setup(1);
        mark_summary_stale(&conn).unwrap();
        let model = Recorder {
            seen: Mutex::new(Vec::new()),
            fail: true,
        };
        assert!(regenerate_summary_if_due(&conn, &model, &config()).await.is_none());
        let summary = get_summary(&conn).unwrap();
        assert!(summary.stale);
        assert_eq!(summary.turns_since, 1);
    }
}
