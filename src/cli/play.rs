use anyhow::Result;

use taleweaver::config::TaleConfig;
use taleweaver::turn::prompt::build_turn_prompt;
use taleweaver::turn::TurnOutcome;

/// Play one turn and print the voiced segments.
pub async fn say(config: TaleConfig, to: Option<&str>, text: &str, json: bool) -> Result<()> {
    let mut session = super::open_session(config)?;
    let addressee = super::addressee(&session, to)?;
    let outcome = session.run_turn(&addressee, text).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(outcome);
    }

    if session.refresh_summary().await.is_some() {
        tracing::debug!("story summary refreshed");
    }
    Ok(())
}

fn print_outcome(outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Completed(report) => {
            for segment in &report.segments {
                println!("{}: {}", segment.name, segment.text);
            }
            for r in report.resolved.iter().filter(|r| r.outcome == "created") {
                println!("  (new: {})", r.name);
            }
            for dropped in &report.dropped {
                println!("  (too many characters, ignored: {dropped})");
            }
            if let Some(place) = &report.moved_to {
                println!("  (the scene moves to {place})");
            }
        }
        TurnOutcome::Failed { reason } => {
            println!("The story did not advance: {reason}");
        }
    }
}

/// Start a new scene at `place`.
pub fn scene(config: TaleConfig, place: &str, carry_over: bool) -> Result<()> {
    let mut session = super::open_session(config)?;
    let scene = session.enter_scene(place, carry_over)?;
    println!("Now at {} ({}, {}).", place.trim(), scene.time_of_day, scene.atmosphere);
    Ok(())
}

/// Print the context bundle, or the rendered prompt, for the next turn.
pub fn context(config: TaleConfig, to: Option<&str>, prompt: bool) -> Result<()> {
    let session = super::open_session(config)?;
    let addressee = super::addressee(&session, to)?;
    let bundle = session.context(&addressee)?;
    if prompt {
        println!("{}", build_turn_prompt(&bundle, "").system);
    } else {
        println!("{}", serde_json::to_string_pretty(&bundle)?);
    }
    Ok(())
}
