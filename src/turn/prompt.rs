//! Rendering [`ContextBundle`]s into model prompts.

use std::fmt::Write as _;

use super::narration::Prompt;
use crate::story::context::ContextBundle;
use crate::story::types::{MemoryEntry, Role};

const DESCRIPTIVE_NARRATOR: &str = "You are the narrator of an interactive story. \
Describe scenes, actions and consequences in the third person with vivid but \
economical prose. Never speak for the player and never break the fiction.";

const SASSY_NARRATOR: &str = "You are the narrator of an interactive story, and you \
have opinions. Describe scenes and consequences in the third person, with dry wit \
and the occasional aside about the player's choices. Never speak for the player \
and never break the fiction.";

fn character_instruction(name: &str) -> String {
    format!(
        "You are {name}, a character in an interactive story. Answer the player in \
         character. Put actions and descriptions on lines starting with `Narrator:`, \
         written in the third person. Put {name}'s spoken words on lines starting \
         with `{name}:`, written in the first person. Never speak for the player."
    )
}

fn role_instruction(bundle: &ContextBundle) -> String {
    match bundle.target.role {
        Role::NarratorSassy => SASSY_NARRATOR.to_string(),
        Role::NarratorDescriptive => DESCRIPTIVE_NARRATOR.to_string(),
        Role::Character | Role::Player => character_instruction(&bundle.target.name),
    }
}

fn display_name<'a>(bundle: &'a ContextBundle, id: &'a str) -> &'a str {
    bundle.names.get(id).map(String::as_str).unwrap_or(id)
}

/// Context sections shared by every turn prompt.
pub fn render_context(bundle: &ContextBundle) -> String {
    let mut out = String::new();

    if !bundle.target.attributes.is_empty() {
        let about = bundle.target.attributes.render();
        let _ = writeln!(out, "About {}: {}", bundle.target.name, about);
    }

    if !bundle.summary.content.trim().is_empty() {
        let _ = writeln!(out, "\nStory so far:\n{}", bundle.summary.content.trim());
    }

    if let Some(view) = &bundle.scene {
        let place = view.place_name.as_deref().unwrap_or("somewhere unnamed");
        let _ = writeln!(
            out,
            "\nScene: {place}, {} ({})",
            view.scene.time_of_day, view.scene.atmosphere
        );
        if !view.scene.summary.is_empty() {
            let _ = writeln!(out, "{}", view.scene.summary);
        }
    }

    if !bundle.present.is_empty() {
        let _ = writeln!(out, "\nPresent: {}", bundle.present.join(", "));
    }

    if !bundle.relationships.is_empty() {
        out.push_str("\nRelationships:\n");
        for edge in &bundle.relationships {
            let _ = writeln!(
                out,
                "- {} {} {} (strength {:.1})",
                display_name(bundle, &edge.char_a),
                edge.kind,
                display_name(bundle, &edge.char_b),
                edge.strength
            );
        }
    }

    if !bundle.memories.is_empty() {
        out.push_str("\nRecent exchanges (oldest first):\n");
        for memory in bundle.memories.iter().rev() {
            let _ = writeln!(out, "Player: {}", memory.user_text.trim());
            let reply = memory.response_text.trim();
            let _ = writeln!(out, "Reply ({}): {}", memory.emotion.as_str(), reply);
        }
    }

    out
}

/// Prompt for one turn addressed to the bundle's target.
pub fn build_turn_prompt(bundle: &ContextBundle, user_text: &str) -> Prompt {
    let context = render_context(bundle);
    let system = if context.trim().is_empty() {
        role_instruction(bundle)
    } else {
        format!("{}\n\n{}", role_instruction(bundle), context.trim_end())
    };
    Prompt {
        system,
        user: user_text.trim().to_string(),
    }
}

/// Prompt that folds `entries` (oldest first) into the running summary.
pub fn build_summary_prompt(previous: &str, entries: &[MemoryEntry]) -> Prompt {
    let mut user = String::new();
    if !previous.trim().is_empty() {
        let _ = writeln!(user, "Summary so far:\n{}\n", previous.trim());
    }
    user.push_str("New exchanges:\n");
    for entry in entries {
        let _ = writeln!(user, "Player: {}", entry.user_text.trim());
        let _ = writeln!(user, "Reply: {}", entry.response_text.trim());
    }
    Prompt {
        system: "You keep the running summary of an interactive story. Rewrite the \
                 summary so it includes the new exchanges. Keep names, places and \
                 open threads. Answer with the summary only, in at most two short \
                 paragraphs."
            .to_string(),
        user,
    }
}
