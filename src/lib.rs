//! Taleweaver: the narrative state engine behind an AI-narrated interactive
//! story.
//!
//! The engine keeps one story's world consistent across turns. Characters and
//! places mentioned by the model are resolved into a registry, every exchange
//! is logged as a memory, and a relationship graph tracks who spoke with whom
//! and who shared a scene. Recent turns can be undone with every derived
//! value re-computed.
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML and environment variables
//! - [`db`]: SQLite schema, migrations and health checks
//! - [`story`]: the entity registry, relationship graph, memory log, scene
//!   state, context builder and history editor
//! - [`turn`]: the turn protocol, model and speech seams, and the output
//!   segmenter
//! - [`session`]: the single-story session that owns the connection

pub mod config;
pub mod db;
pub mod error;
pub mod session;
pub mod story;
pub mod turn;

pub use error::{EngineError, EngineResult};
pub use session::Session;
