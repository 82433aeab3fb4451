//! Splitting model output into narrator and character segments.
//!
//! Parsing is best effort, in order: a structured JSON reply, then
//! speaker-label lines (`Narrator:`, `[Narrator]`, `Stella:`, `[Stella]`),
//! then a single character-speech segment as the safe fallback.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::story::names::{normalize, similarity};

/// Labels that mark narration.
const NARRATOR_LABELS: &[&str] = &["narrator", "narrador", "narration", "narração", "narracao"];

/// Longest prefix, in characters, that can still be a `Name:` label.
const MAX_LABEL_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentSpeaker {
    Narrator,
    Character,
}

/// A parsed segment before speaker ids and voices are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    pub speaker: SegmentSpeaker,
    pub text: String,
}

/// The names the addressed character answers to.
#[derive(Debug, Clone)]
pub struct SpeakerNames {
    pub name: String,
    pub aliases: Vec<String>,
    /// Minimum similarity for a misspelled label to count, as in
    /// `registry.similarity_threshold`.
    pub threshold: f64,
}

impl SpeakerNames {
    fn matches(&self, label: &str) -> bool {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .any(|n| normalize(n) == normalize(label) || similarity(n, label) >= self.threshold)
    }
}

#[derive(Debug)]
pub struct ParsedSegments {
    pub segments: Vec<RawSegment>,
    /// Set when the output had to be degraded to a single character segment.
    pub degraded: Option<EngineError>,
}

fn is_narrator_label(label: &str) -> bool {
    NARRATOR_LABELS.contains(&normalize(label).as_str())
}

fn clean(text: &str) -> String {
    text.replace('*', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop empty segments and merge neighbours spoken by the same voice.
fn tidy(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    let mut out: Vec<RawSegment> = Vec::new();
    for seg in segments {
        let text = clean(&seg.text);
        if text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.speaker == seg.speaker => {
                last.text.push(' ');
                last.text.push_str(&text);
            }
            _ => out.push(RawSegment {
                speaker: seg.speaker,
                text,
            }),
        }
    }
    out
}

/// Whole output as narration, for turns addressed to the narrator.
pub fn narrator_only(raw: &str) -> Vec<RawSegment> {
    let text = raw
        .lines()
        .map(|line| match split_label(line) {
            Some((label, rest)) if is_narrator_label(label) => rest,
            _ => line,
        })
        .collect::<Vec<_>>()
        .join("\n");
    tidy(vec![RawSegment {
        speaker: SegmentSpeaker::Narrator,
        text,
    }])
}

/// Split a character turn's output into narrator and character segments.
pub fn parse_segments(raw: &str, addressee: &SpeakerNames) -> ParsedSegments {
    if let Some(segments) = parse_json(raw, addressee) {
        let segments = tidy(segments);
        if segments.iter().any(|s| s.speaker == SegmentSpeaker::Character) {
            return ParsedSegments {
                segments,
                degraded: None,
            };
        }
    }

    if let Some(segments) = parse_labelled(raw, addressee) {
        let segments = tidy(segments);
        if segments.iter().any(|s| s.speaker == SegmentSpeaker::Character) {
            return ParsedSegments {
                segments,
                degraded: None,
            };
        }
    }

    let reason = if raw.trim().is_empty() {
        "empty output".to_string()
    } else {
        "no speaker labels or structured segments found".to_string()
    };
    ParsedSegments {
        segments: tidy(vec![RawSegment {
            speaker: SegmentSpeaker::Character,
            text: strip_labels(raw, addressee),
        }]),
        degraded: Some(EngineError::MalformedSegmentation(reason)),
    }
}

#[derive(Deserialize)]
struct JsonSegment {
    speaker: String,
    text: String,
}

#[derive(Deserialize)]
struct JsonEnvelope {
    segments: Vec<JsonSegment>,
}

/// Cut the outermost JSON value out of surrounding prose or a code fence.
fn json_slice(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let closing = if raw[start..].starts_with('{') { '}' } else { ']' };
    let end = raw.rfind(closing)?;
    (end > start).then(|| &raw[start..=end])
}

fn parse_json(raw: &str, addressee: &SpeakerNames) -> Option<Vec<RawSegment>> {
    let slice = json_slice(raw)?;
    let items: Vec<JsonSegment> = serde_json::from_str::<JsonEnvelope>(slice)
        .map(|e| e.segments)
        .or_else(|_| serde_json::from_str::<Vec<JsonSegment>>(slice))
        .ok()?;
    Some(
        items
            .into_iter()
            .map(|item| RawSegment {
                speaker: if !is_narrator_label(&item.speaker) && addressee.matches(&item.speaker) {
                    SegmentSpeaker::Character
                } else {
                    SegmentSpeaker::Narrator
                },
                text: item.text,
            })
            .collect(),
    )
}

/// `[Label] rest`, `[Label]: rest` or `Label: rest`.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let line = line.trim().trim_start_matches('*').trim_start();
    if let Some(inner) = line.strip_prefix('[') {
        let close = inner.find(']')?;
        let label = inner[..close].trim();
        let rest = inner[close + 1..].trim_start();
        let rest = rest.strip_prefix(':').unwrap_or(rest);
        return Some((label, rest.trim_start_matches('*').trim()));
    }
    let colon = line.find(':')?;
    let label = line[..colon].trim_end_matches('*').trim();
    if label.is_empty()
        || label.chars().count() > MAX_LABEL_CHARS
        || label.split_whitespace().count() > 4
        || label.contains(['.', '!', '?', ','])
    {
        return None;
    }
    Some((label, line[colon + 1..].trim_start_matches('*').trim()))
}

fn classify_label(label: &str, addressee: &SpeakerNames) -> Option<SegmentSpeaker> {
    if is_narrator_label(label) {
        Some(SegmentSpeaker::Narrator)
    } else if addressee.matches(label) {
        Some(SegmentSpeaker::Character)
    } else {
        None
    }
}

fn parse_labelled(raw: &str, addressee: &SpeakerNames) -> Option<Vec<RawSegment>> {
    let mut segments: Vec<RawSegment> = Vec::new();
    let mut preamble = String::new();
    let mut saw_label = false;

    for line in raw.lines() {
        let labelled = split_label(line)
            .and_then(|(label, rest)| classify_label(label, addressee).map(|s| (s, rest)));
        match labelled {
            Some((speaker, rest)) => {
                saw_label = true;
                segments.push(RawSegment {
                    speaker,
                    text: rest.to_string(),
                });
            }
            None => match segments.last_mut() {
                Some(current) => {
                    current.text.push(' ');
                    current.text.push_str(line);
                }
                None => {
                    preamble.push(' ');
                    preamble.push_str(line);
                }
            },
        }
    }

    if !saw_label {
        return None;
    }
    if !preamble.trim().is_empty() {
        segments.insert(
            0,
            RawSegment {
                speaker: SegmentSpeaker::Narrator,
                text: preamble,
            },
        );
    }
    Some(segments)
}

/// Fallback text: drop any recognised labels but keep every word.
fn strip_labels(raw: &str, addressee: &SpeakerNames) -> String {
    raw.lines()
        .map(|line| match split_label(line) {
            Some((label, rest)) if classify_label(label, addressee).is_some() => rest,
            _ => line,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stella() -> SpeakerNames {
        SpeakerNames {
            name: "Stella".into(),
            aliases: vec!["the barmaid".into()],
            threshold: 0.8,
        }
    }

    fn speakers(parsed: &ParsedSegments) -> Vec<SegmentSpeaker> {
        parsed.segments.iter().map(|s| s.speaker).collect()
    }

    #[test]
    fn parses_speaker_labels() {
        let raw = "Narrator: *She sets down the mug and leans closer.*\n\
                   Stella: You shouldn't be here.\n\
                   Narrator: Thunder rolls outside.";
        let parsed = parse_segments(raw, &stella());
        assert!(parsed.degraded.is_none());
        assert_eq!(
            speakers(&parsed),
            vec![
                SegmentSpeaker::Narrator,
                SegmentSpeaker::Character,
                SegmentSpeaker::Narrator
            ]
        );
        assert_eq!(parsed.segments[0].text, "She sets down the mug and leans closer.");
    }

    #[test]
    fn bracket_labels_and_portuguese_narrator() {
        let raw = "[Narrador] Ela sorri.\n[Stella]: Bem-vindo!";
        let parsed = parse_segments(raw, &stella());
        assert_eq!(
            speakers(&parsed),
            vec![SegmentSpeaker::Narrator, SegmentSpeaker::Character]
        );
        assert_eq!(parsed.segments[1].text, "Bem-vindo!");
    }

    #[test]
    fn merges_consecutive_and_drops_empty() {
        let raw = "Stella: Hello.\nStella: Again.\nNarrator: **\nNarrator:   ";
        let parsed = parse_segments(raw, &stella());
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].text, "Hello. Again.");
    }

    #[test]
    fn unlabelled_lines_continue_current_speaker() {
        let raw = "Rain on the window.\nStella: Stay a while.\nThe fire is warm here.";
        let parsed = parse_segments(raw, &stella());
        assert_eq!(
            speakers(&parsed),
            vec![SegmentSpeaker::Narrator, SegmentSpeaker::Character]
        );
        assert_eq!(parsed.segments[1].text, "Stay a while. The fire is warm here.");
    }

    #[test]
    fn parses_json_reply() {
        let raw = r#"```json
{"segments": [{"speaker": "narrator", "text": "She nods."}, {"speaker": "Stella", "text": "Fine."}]}
```"#;
        let parsed = parse_segments(raw, &stella());
        assert!(parsed.degraded.is_none());
        assert_eq!(
            speakers(&parsed),
            vec![SegmentSpeaker::Narrator, SegmentSpeaker::Character]
        );

        let bare = r#"[{"speaker": "the barmaid", "text": "Closing time."}]"#;
        let parsed = parse_segments(bare, &stella());
        assert_eq!(speakers(&parsed), vec![SegmentSpeaker::Character]);
    }

    #[test]
    fn degrades_to_single_character_segment() {
        let parsed = parse_segments("Well, hello there. Fancy a drink?", &stella());
        assert!(matches!(
            parsed.degraded,
            Some(EngineError::MalformedSegmentation(_))
        ));
        assert_eq!(speakers(&parsed), vec![SegmentSpeaker::Character]);

        // labels present but nothing attributed to the character
        let parsed = parse_segments("Narrator: The room is silent.", &stella());
        assert!(parsed.degraded.is_some());
        assert_eq!(parsed.segments[0].text, "The room is silent.");
    }

    #[test]
    fn sentence_colons_are_not_labels() {
        assert!(split_label("Well, then: go.").is_none());
        let (label, _) = split_label("She says this: come back tomorrow").unwrap();
        assert!(classify_label(label, &stella()).is_none());
        assert_eq!(split_label("Stella: hi"), Some(("Stella", "hi")));
    }

    #[test]
    fn misspelled_labels_follow_the_threshold() {
        let raw = "Narrator: She shrugs.\nStela: Suit yourself.";
        let parsed = parse_segments(raw, &stella());
        assert!(parsed.degraded.is_none());

        let strict = SpeakerNames {
            threshold: 0.95,
            ..stella()
        };
        let parsed = parse_segments(raw, &strict);
        assert!(parsed.degraded.is_some());
    }

    #[test]
    fn narrator_turn_is_one_segment() {
        let segs = narrator_only("Narrator: The door creaks.\n*Footsteps approach.*");
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].text, "The door creaks. Footsteps approach.");
    }
}
