use anyhow::{Context, Result};
use std::path::Path;

use taleweaver::config::TaleConfig;
use taleweaver::story::lifecycle::StoryProposal;

/// Load a story proposal from a JSON file.
pub fn seed(config: TaleConfig, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let proposal = StoryProposal::from_json(&text)
        .with_context(|| format!("invalid story proposal in {}", file.display()))?;

    let mut session = super::open_session(config)?;
    let result = session.seed(&proposal)?;
    if !proposal.title.is_empty() {
        println!("{}", proposal.title);
    }
    println!(
        "Seeded {} character(s) ({} reused), {} place(s), {} relationship(s).",
        result.characters_created,
        result.characters_reused,
        result.places_created,
        result.relationships
    );
    Ok(())
}
