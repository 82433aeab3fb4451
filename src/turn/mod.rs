//! The turn protocol.
//!
//! A turn moves through [`TurnPhase`]s: the addressee is validated, the
//! model generates, the output is split into voiced segments, and finally
//! every state change (entities, memory, presence, edges, scene) is written
//! in one transaction. Nothing is written before Resolving, so a failed or
//! dropped turn leaves the story untouched.

pub mod narration;
pub mod prompt;
pub mod segment;
pub mod speech;
pub mod summary;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use self::narration::{generate_with_retry, NarrationModel};
use self::prompt::build_turn_prompt;
use self::segment::{narrator_only, parse_segments, RawSegment, SegmentSpeaker, SpeakerNames};
use self::speech::{AudioHandle, SpeechSynthesizer};
use crate::config::TaleConfig;
use crate::error::{EngineError, EngineResult};
use crate::story::context::build_prompt_context;
use crate::story::emotion::detect_emotion;
use crate::story::memory::{
    add_mentions, append_memory, increment_turns, touch_last_seen, NewMemory,
};
use crate::story::names::{scan, Mention, MentionForm};
use crate::story::registry::{
    find_place, get_character, known_names, narrator, player, resolve_identity_claim,
    resolve_or_create, Resolution, NARRATOR_NAME,
};
use crate::story::relations::record_interaction;
use crate::story::scene::{
    apply_turn, current_scene, enter_scene, mark_present, present_ids, set_scene_origin,
    NewScene,
};
use crate::story::types::{Character, EntityKind, MemoryEntry, RelationKind, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingAddressee,
    Generating,
    Segmenting,
    Resolving,
    Completed,
    Failed,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingAddressee => "awaiting_addressee",
            Self::Generating => "generating",
            Self::Segmenting => "segmenting",
            Self::Resolving => "resolving",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn allows(self, next: TurnPhase) -> bool {
        use TurnPhase::*;
        matches!(
            (self, next),
            (AwaitingAddressee, Generating)
                | (Generating, Segmenting)
                | (Segmenting, Resolving)
                | (Resolving, Completed)
                | (AwaitingAddressee | Generating | Segmenting | Resolving, Failed)
        )
    }
}

/// Phase tracker for a single turn.
#[derive(Debug)]
pub struct TurnState {
    phase: TurnPhase,
}

impl Default for TurnState {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnState {
    pub fn new() -> Self {
        Self {
            phase: TurnPhase::AwaitingAddressee,
        }
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn advance(&mut self, next: TurnPhase) -> EngineResult<()> {
        if !self.phase.allows(next) {
            return Err(EngineError::InvalidTransition {
                from: self.phase.as_str(),
                to: next.as_str(),
            });
        }
        debug!(from = self.phase.as_str(), to = next.as_str(), "turn phase");
        self.phase = next;
        Ok(())
    }
}

/// Who the player is talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressee {
    Narrator,
    Character(String),
}

/// One voiced piece of a turn's output.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub speaker: SegmentSpeaker,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    pub name: String,
    pub voice: String,
    pub text: String,
    /// Position in the playback order; every segment has its own slot.
    pub audio_slot: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioHandle>,
}

/// An entity reference found in the output and what it resolved to.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedMention {
    pub text: String,
    pub entity_id: String,
    pub name: String,
    pub kind: EntityKind,
    /// `matched`, `merged` or `created`.
    pub outcome: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub addressee: String,
    pub memory: MemoryEntry,
    pub segments: Vec<Segment>,
    pub resolved: Vec<ResolvedMention>,
    /// Definite descriptions with nothing to refer back to.
    pub unresolved: Vec<String>,
    /// Mentions dropped because the character limit was reached.
    pub dropped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    pub edges_touched: usize,
    /// The place a narrated move took the story to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed(TurnReport),
    Failed { reason: String },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// The external collaborators a turn calls out to.
pub struct TurnServices<'a> {
    pub model: &'a dyn NarrationModel,
    pub speech: &'a dyn SpeechSynthesizer,
    pub config: &'a TaleConfig,
}

fn resolve_addressee(conn: &Connection, addressee: &Addressee) -> EngineResult<Character> {
    match addressee {
        Addressee::Narrator => {
            narrator(conn)?.ok_or_else(|| EngineError::UnknownAddressee("narrator".into()))
        }
        Addressee::Character(id) => match get_character(conn, id) {
            Ok(c) if c.role == Role::Player => Err(EngineError::UnknownAddressee(c.name)),
            Ok(c) => Ok(c),
            Err(EngineError::NotFound { .. }) => Err(EngineError::UnknownAddressee(id.clone())),
            Err(e) => Err(e),
        },
    }
}

/// Run one turn: generate, segment, synthesize, then commit every state
/// change at once. Generation failure yields [`TurnOutcome::Failed`] with the
/// store untouched. The story summary is not touched here; see
/// [`summary::regenerate_summary_if_due`].
pub async fn execute_turn(
    conn: &mut Connection,
    services: &TurnServices<'_>,
    addressee: &Addressee,
    user_text: &str,
) -> EngineResult<TurnOutcome> {
    let mut state = TurnState::new();
    let target = resolve_addressee(conn, addressee)?;
    let narrated = target.role.is_narrator();

    let bundle = build_prompt_context(conn, &target.id, &services.config.memory)?;
    let prompt = build_turn_prompt(&bundle, user_text);

    state.advance(TurnPhase::Generating)?;
    let raw = match generate_with_retry(services.model, &prompt, &services.config.generation).await
    {
        Ok(raw) => raw,
        Err(e) => {
            state.advance(TurnPhase::Failed)?;
            warn!(addressee = %target.name, error = %e, "turn failed, story unchanged");
            return Ok(TurnOutcome::Failed {
                reason: e.to_string(),
            });
        }
    };

    state.advance(TurnPhase::Segmenting)?;
    let (raw_segments, degraded) = if narrated {
        (narrator_only(&raw), None)
    } else {
        let parsed = parse_segments(
            &raw,
            &SpeakerNames {
                name: target.name.clone(),
                aliases: target.aliases.clone(),
                threshold: services.config.registry.similarity_threshold,
            },
        );
        (parsed.segments, parsed.degraded)
    };
    if let Some(e) = &degraded {
        warn!(addressee = %target.name, error = %e, "segmentation degraded to plain speech");
    }
    let voice_of_narration = narrator(conn)?;
    let mut segments =
        attach_speakers(raw_segments, &target, voice_of_narration.as_ref(), services.config);
    synthesize_all(services.speech, &mut segments).await;

    state.advance(TurnPhase::Resolving)?;
    let report = resolve_turn(
        conn,
        services.config,
        &target,
        user_text,
        &raw,
        segments,
        degraded.map(|e| e.to_string()),
    )?;
    state.advance(TurnPhase::Completed)?;
    info!(
        addressee = %target.name,
        memory = %report.memory.id,
        segments = report.segments.len(),
        resolved = report.resolved.len(),
        "turn completed"
    );
    Ok(TurnOutcome::Completed(report))
}

fn attach_speakers(
    raw: Vec<RawSegment>,
    target: &Character,
    narrator: Option<&Character>,
    config: &TaleConfig,
) -> Vec<Segment> {
    raw.into_iter()
        .enumerate()
        .map(|(slot, seg)| {
            let (speaker_id, name, voice) = match seg.speaker {
                SegmentSpeaker::Character => {
                    (Some(target.id.clone()), target.name.clone(), target.voice.clone())
                }
                SegmentSpeaker::Narrator => match narrator {
                    Some(n) => (Some(n.id.clone()), n.name.clone(), n.voice.clone()),
                    None => (None, NARRATOR_NAME.to_string(), config.voices.narrator.clone()),
                },
            };
            Segment {
                speaker: seg.speaker,
                speaker_id,
                name,
                voice,
                text: seg.text,
                audio_slot: slot,
                audio: None,
            }
        })
        .collect()
}

async fn synthesize_all(speech: &dyn SpeechSynthesizer, segments: &mut [Segment]) {
    for segment in segments.iter_mut() {
        match speech
            .synthesize(segment.audio_slot, &segment.text, &segment.voice)
            .await
        {
            Ok(handle) => segment.audio = Some(handle),
            Err(e) => warn!(
                slot = segment.audio_slot,
                voice = %segment.voice,
                error = %format!("{e:#}"),
                "speech synthesis failed, segment left silent"
            ),
        }
    }
}

#[derive(Default)]
struct Resolutions {
    resolved: Vec<ResolvedMention>,
    unresolved: Vec<String>,
    dropped: Vec<String>,
    characters: Vec<String>,
}

impl Resolutions {
    fn absorb(&mut self, text: &str, outcome: EngineResult<Resolution>) -> EngineResult<()> {
        let resolution = match outcome {
            Ok(r) => r,
            Err(EngineError::EntityCapacityExceeded { mention, .. }) => {
                self.dropped.push(mention);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let label = match &resolution {
            Resolution::Matched(_) => "matched",
            Resolution::Merged(_) => "merged",
            Resolution::Created(_) => "created",
            Resolution::Unresolved => {
                self.unresolved.push(text.to_string());
                return Ok(());
            }
        };
        if let Some(id) = resolution.character_id() {
            if !self.characters.iter().any(|c| c == id) {
                self.characters.push(id.to_string());
            }
        }
        if let Some(entity) = resolution.entity() {
            self.resolved.push(ResolvedMention {
                text: text.to_string(),
                entity_id: entity.id().to_string(),
                name: entity.name().to_string(),
                kind: entity.kind(),
                outcome: label,
            });
        }
        Ok(())
    }
}

fn resolve_turn(
    conn: &mut Connection,
    config: &TaleConfig,
    target: &Character,
    user_text: &str,
    raw: &str,
    segments: Vec<Segment>,
    degraded: Option<String>,
) -> EngineResult<TurnReport> {
    let tx = conn.transaction()?;
    let narrated = target.role.is_narrator();

    let mut found = Resolutions::default();
    let mut destination = None;
    for segment in &segments {
        let scanned = scan(&segment.text, &known_names(&tx)?);
        // Introductions, then claims, then everything else: "A hooded man
        // enters. The hooded man is Viktor." must name the man it just
        // introduced, and later references must see the new name.
        let (introduced, referenced): (Vec<&Mention>, Vec<&Mention>) = scanned
            .mentions
            .iter()
            .partition(|m| m.form == MentionForm::Indefinite);
        for mention in introduced {
            found.absorb(&mention.text, resolve_or_create(&tx, mention, &config.registry))?;
        }
        for claim in &scanned.claims {
            found.absorb(&claim.name, resolve_identity_claim(&tx, claim, &config.registry))?;
        }
        for mention in referenced {
            found.absorb(&mention.text, resolve_or_create(&tx, mention, &config.registry))?;
        }
        if narrated && scanned.destination.is_some() {
            destination = scanned.destination;
        }
    }

    let response_text = if segments.is_empty() {
        raw.trim().to_string()
    } else {
        segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };
    let spoken: Vec<&str> = segments
        .iter()
        .filter(|s| s.speaker == SegmentSpeaker::Character)
        .map(|s| s.text.as_str())
        .collect();
    let emotion = if spoken.is_empty() {
        detect_emotion(&response_text)
    } else {
        detect_emotion(&spoken.join(" "))
    };

    let you = player(&tx)?;
    let mut scene = current_scene(&tx)?;
    let mut moved_to = None;
    if let Some(place) = destination
        .as_deref()
        .map(|name| find_place(&tx, name))
        .transpose()?
        .flatten()
    {
        let here = scene.as_ref().and_then(|s| s.place_id.as_deref());
        if here != Some(place.id.as_str()) {
            // The player travels; everyone else is left behind.
            let carry: Vec<String> = you.iter().map(|p| p.id.clone()).collect();
            let entered = enter_scene(
                &tx,
                &NewScene {
                    place_id: Some(place.id.clone()),
                    ..NewScene::default()
                },
                &carry,
            )?;
            scene = Some(entered);
            moved_to = Some(place.name);
        }
    }

    let memory = append_memory(
        &tx,
        &NewMemory {
            character_id: target.id.clone(),
            emotion,
            user_text: user_text.trim().to_string(),
            response_text,
            scene_id: scene.as_ref().map(|s| s.id.clone()),
        },
    )?;

    let mut involved: Vec<String> = found
        .characters
        .iter()
        .filter(|id| **id != target.id)
        .cloned()
        .collect();
    if let Some(p) = &you {
        if p.id != target.id && !involved.contains(&p.id) {
            involved.push(p.id.clone());
        }
    }
    add_mentions(&tx, &memory.id, &involved)?;
    if let (Some(scene), Some(_)) = (&scene, &moved_to) {
        set_scene_origin(&tx, &scene.id, &memory.id)?;
    }

    let step = config.relations.strength_step;
    let at = memory.created_at.clone();
    let mut edges_touched = 0;

    if !narrated {
        if let Some(p) = &you {
            let touched = record_interaction(
                &tx,
                &p.id,
                &target.id,
                RelationKind::SpokeWith,
                &at,
                Some(&memory.id),
                step,
            )?;
            if touched.is_some() {
                edges_touched += 1;
            }
        }
    }

    if let Some(scene) = &scene {
        let mut participants = involved.clone();
        if !narrated {
            participants.insert(0, target.id.clone());
        }
        for id in &participants {
            mark_present(&tx, &scene.id, id, Some(&memory.id))?;
            touch_last_seen(&tx, id, &scene.id)?;
        }

        let anchor = if narrated {
            you.as_ref().map(|p| p.id.clone())
        } else {
            Some(target.id.clone())
        };
        if let Some(anchor) = anchor {
            for other in present_ids(&tx, &scene.id)? {
                let touched = record_interaction(
                    &tx,
                    &anchor,
                    &other,
                    RelationKind::PresentWith,
                    &at,
                    Some(&memory.id),
                    step,
                )?;
                if touched.is_some() {
                    edges_touched += 1;
                }
            }
        }

        apply_turn(&tx, &scene.id, &memory.response_text, narrated)?;
    }

    increment_turns(&tx)?;
    tx.commit()?;

    Ok(TurnReport {
        addressee: target.name.clone(),
        memory,
        segments,
        resolved: found.resolved,
        unresolved: found.unresolved,
        dropped: found.dropped,
        degraded,
        edges_touched,
        moved_to,
    })
}
