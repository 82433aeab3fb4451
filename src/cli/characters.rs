use anyhow::Result;
use taleweaver::config::TaleConfig;

/// Print the character list, favorites first.
pub fn list(config: TaleConfig, json: bool) -> Result<()> {
    let session = super::open_session(config)?;
    let characters = session.get_character_list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&characters)?);
        return Ok(());
    }

    if characters.is_empty() {
        println!("No characters yet.");
        return Ok(());
    }
    for c in &characters {
        let star = if c.favorite { "*" } else { " " };
        let provisional = if c.pending_identity { " (unnamed)" } else { "" };
        println!("{star} {:<24} {:<22} {}{provisional}", c.name, c.role.as_str(), c.id);
        if !c.aliases.is_empty() {
            println!("    aka {}", c.aliases.join(", "));
        }
    }
    Ok(())
}

pub fn favorite(config: TaleConfig, character: &str) -> Result<()> {
    let mut session = super::open_session(config)?;
    let target = session.find_character(character)?;
    let now = session.toggle_favorite(&target.id)?;
    println!(
        "{} is {} a favorite",
        target.name,
        if now { "now" } else { "no longer" }
    );
    Ok(())
}
