//! Subcommand implementations for the `taleweaver` binary.

pub mod characters;
pub mod history;
pub mod play;
pub mod reset;
pub mod seed;
pub mod stats;

use anyhow::Result;
use taleweaver::config::TaleConfig;
use taleweaver::turn::Addressee;
use taleweaver::Session;

fn open_session(config: TaleConfig) -> Result<Session> {
    Session::open(config)
}

/// `None` addresses the narrator; anything else is looked up by id or name.
fn addressee(session: &Session, to: Option<&str>) -> Result<Addressee> {
    Ok(match to {
        None => Addressee::Narrator,
        Some(name) if name.eq_ignore_ascii_case("narrator") => Addressee::Narrator,
        Some(name) => Addressee::Character(session.find_character(name)?.id),
    })
}

fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
