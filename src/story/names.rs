//! Name similarity and mention scanning over model-produced text.
//!
//! Scanning is heuristic: it finds capitalized proper-noun spans, known names
//! and aliases in any casing, indefinite and definite descriptive phrases
//! ("a hooded man", "the hooded man"), and explicit identity assertions
//! ("the hooded man is Viktor"). Resolution against the registry happens in
//! [`super::registry`].

use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use super::types::EntityKind;

/// Nouns that make a descriptive phrase refer to a person.
const PERSON_NOUNS: &[&str] = &[
    "man", "woman", "stranger", "figure", "girl", "boy", "child", "guard", "merchant",
    "traveler", "traveller", "soldier", "knight", "priest", "priestess", "lady", "gentleman",
    "innkeeper", "bartender", "servant", "thief", "hunter", "warrior", "wizard", "witch",
    "monk", "sailor", "beggar", "officer", "detective", "doctor", "nurse", "elf", "dwarf",
    "old-timer", "youth", "visitor", "rider", "cloaked", "newcomer",
];

/// Capitalized words that open sentences but never name anything.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "he", "she", "it", "they", "i", "we", "you", "his", "her", "their",
    "its", "our", "my", "your", "this", "that", "these", "those", "but", "and", "or", "then",
    "when", "while", "as", "if", "so", "yet", "in", "at", "on", "to", "from", "with", "by",
    "after", "before", "suddenly", "finally", "meanwhile", "there", "here", "what", "who",
    "why", "how", "where", "yes", "no", "oh", "ah", "well", "perhaps", "maybe", "now",
    "narrator", "narrador", "mr", "mrs", "ms", "sir", "madam", "not", "all", "one", "every",
];

/// Words that, inside a capitalized span, mark it as a place name.
const PLACE_WORDS: &[&str] = &[
    "tavern", "inn", "forest", "woods", "castle", "keep", "city", "town", "village", "street",
    "road", "river", "lake", "mountain", "mountains", "hills", "tower", "temple", "church",
    "hall", "harbor", "harbour", "port", "bridge", "market", "square", "manor", "palace",
    "valley", "cave", "sea", "bay", "gate", "academy", "library", "station", "cafe", "bar",
    "hotel", "park", "district", "isle", "island", "citadel", "abbey",
];

/// Lowercase words that, right before a capitalized span, suggest a place.
const PLACE_PREPOSITIONS: &[&str] = &[
    "in", "at", "to", "into", "from", "near", "inside", "toward", "towards", "through",
    "reach", "reached", "enter", "entered", "leave", "left", "visit", "visited", "across",
];

/// Words that put the following place name at the end of a journey.
const ARRIVAL_WORDS: &[&str] = &[
    "into", "enter", "enters", "entered", "reach", "reaches", "reached",
];

/// Verbs of motion that turn a following "to", "at" or "in" into an arrival.
const MOTION_VERBS: &[&str] = &[
    "arrive", "arrives", "arrived", "head", "heads", "headed", "walk", "walks", "walked",
    "return", "returns", "returned", "travel", "travels", "traveled", "travelled", "go", "goes",
    "went", "ride", "rides", "rode", "come", "comes", "came", "step", "steps", "stepped", "move",
    "moves", "moved", "sail", "sails", "sailed", "back",
];

/// Lowercase connectors allowed inside a multi-word proper name.
const NAME_CONNECTORS: &[&str] = &["of", "de", "da", "do", "von", "van", "del", "la"];

/// How a mention refers to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionForm {
    /// A proper name or a known alias.
    ProperName,
    /// "a hooded man": a newly introduced, unnamed entity.
    Indefinite,
    /// "the hooded man": refers back to something already introduced.
    Definite,
}

/// A candidate entity reference found in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub text: String,
    pub kind: EntityKind,
    pub form: MentionForm,
}

impl Mention {
    pub fn proper(text: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            text: text.into(),
            kind,
            form: MentionForm::ProperName,
        }
    }

    pub fn indefinite(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: EntityKind::Character,
            form: MentionForm::Indefinite,
        }
    }
}

/// "the hooded man is Viktor": `placeholder` now has a real `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    pub placeholder: String,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub claims: Vec<IdentityClaim>,
    pub mentions: Vec<Mention>,
    /// The last place the text moves someone to ("they walk into Blackwood").
    pub destination: Option<String>,
}

/// A name (or alias) already in the registry, used for case-insensitive scanning.
#[derive(Debug, Clone)]
pub struct KnownName {
    pub name: String,
    pub kind: EntityKind,
}

fn person_noun_alternation() -> String {
    PERSON_NOUNS.join("|")
}

/// Phrases joining a description to the name it turns out to carry.
const IDENTITY_VERBS: &[&str] = &[
    "is actually",
    "is really",
    "is",
    "was",
    "turns out to be",
    "turned out to be",
    "calls himself",
    "calls herself",
    "introduces himself as",
    "introduces herself as",
    "is named",
    "is called",
    "named",
    "called",
];

fn identity_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"\b[Tt]he\s+((?:[a-z-]+\s+){{0,2}}?(?:{nouns}))\s*,?\s+(?:{verbs})\s+{name}",
            nouns = person_noun_alternation(),
            verbs = IDENTITY_VERBS.join("|"),
            name = r"([A-ZÀ-Þ][^\s,.;:!?]*(?:\s+[A-ZÀ-Þ][^\s,.;:!?]*)*)",
        );
        Regex::new(&pattern).expect("identity pattern is valid")
    })
}

fn indefinite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"\b[Aa]n?\s+((?:[a-z-]+\s+){{0,2}}?(?:{nouns}))\b",
            nouns = person_noun_alternation()
        );
        Regex::new(&pattern).expect("indefinite pattern is valid")
    })
}

fn definite_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(
            r"\b[Tt]he\s+((?:[a-z-]+\s+){{0,2}}?(?:{nouns}))\b",
            nouns = person_noun_alternation()
        );
        Regex::new(&pattern).expect("definite pattern is valid")
    })
}

/// Lowercase, strip a leading article and punctuation, collapse whitespace.
pub fn normalize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' || c == '-' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.len() > 1 && matches!(words[0], "the" | "a" | "an") {
        words.remove(0);
    }
    words.join(" ")
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized similarity in `[0, 1]`: the larger of the edit-distance ratio
/// and token containment. Containment only counts when every token of the
/// shorter name is a specific word (not a generic person noun), so "Stella"
/// matches "Stella Moreau" but "man" does not match "hooded man".
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let max_len = ac.len().max(bc.len()) as f64;
    let edit_ratio = 1.0 - levenshtein(&ac, &bc) as f64 / max_len;

    let ta: HashSet<&str> = a.split_whitespace().collect();
    let tb: HashSet<&str> = b.split_whitespace().collect();
    let (short, long) = if ta.len() <= tb.len() { (&ta, &tb) } else { (&tb, &ta) };
    let specific = short.iter().all(|t| !PERSON_NOUNS.contains(t) && t.len() > 2);
    let containment = if specific && short.iter().all(|t| long.contains(t)) {
        1.0
    } else {
        0.0
    };

    edit_ratio.max(containment)
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

fn trim_word(raw: &str) -> &str {
    raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '-')
        .trim_end_matches("'s")
        .trim_end_matches("’s")
}

struct Token<'a> {
    word: &'a str,
    sentence_start: bool,
    /// Punctuation after the word closes any running name span.
    breaks_after: bool,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut sentence_start = true;
    for raw in text.split_whitespace() {
        let word = trim_word(raw);
        let trailing = raw.chars().last().unwrap_or(' ');
        let ends_sentence = matches!(trailing, '.' | '!' | '?' | ':' | '"' | '”' | '…');
        let breaks_after = ends_sentence || matches!(trailing, ',' | ';' | ')' | '—');
        if !word.is_empty() {
            tokens.push(Token {
                word,
                sentence_start,
                breaks_after,
            });
        }
        sentence_start = ends_sentence || (word.is_empty() && sentence_start);
    }
    tokens
}

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

fn classify_span(words: &[&str], preceding: Option<&str>) -> EntityKind {
    let has_place_word = words
        .iter()
        .any(|w| PLACE_WORDS.contains(&w.to_lowercase().as_str()));
    let after_preposition =
        preceding.is_some_and(|p| PLACE_PREPOSITIONS.contains(&p.to_lowercase().as_str()));
    if has_place_word || after_preposition {
        EntityKind::Place
    } else {
        EntityKind::Character
    }
}

/// Whether the words before a span describe arriving somewhere. `before` is
/// nearest first.
fn is_arrival(before: &[&str]) -> bool {
    let mut words = before
        .iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !matches!(w.as_str(), "the" | "a" | "an"));
    match words.next() {
        Some(first) if ARRIVAL_WORDS.contains(&first.as_str()) => true,
        Some(first) if matches!(first.as_str(), "to" | "at" | "in") => {
            words.next().is_some_and(|verb| MOTION_VERBS.contains(&verb.as_str()))
        }
        _ => false,
    }
}

/// A proper-noun span and whether the text arrives there.
struct Span {
    mention: Mention,
    arrival: bool,
}

/// Capitalized proper-noun spans. A single capitalized word opening a sentence
/// is only accepted when it also appears capitalized mid-sentence or is a
/// known name, since sentence-initial capitals carry no signal.
fn proper_noun_spans(text: &str, known: &HashSet<String>) -> Vec<Span> {
    let tokens = tokenize(text);
    let mid_sentence_caps: HashSet<String> = tokens
        .iter()
        .filter(|t| !t.sentence_start && is_capitalized(t.word))
        .map(|t| t.word.to_lowercase())
        .collect();

    let mut spans = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if !is_capitalized(tokens[i].word) {
            i += 1;
            continue;
        }
        let start = i;
        let mut words = vec![tokens[i].word];
        while !tokens[i].breaks_after && i + 1 < tokens.len() {
            let next = &tokens[i + 1];
            if is_capitalized(next.word) {
                words.push(next.word);
                i += 1;
            } else if NAME_CONNECTORS.contains(&next.word)
                && !next.breaks_after
                && i + 2 < tokens.len()
                && is_capitalized(tokens[i + 2].word)
            {
                words.push(next.word);
                words.push(tokens[i + 2].word);
                i += 2;
            } else {
                break;
            }
        }
        i += 1;

        // Drop leading stopwords ("The Rusty Anchor" keeps "Rusty Anchor").
        let mut lead = 0;
        while lead < words.len() && is_stopword(words[lead]) {
            lead += 1;
        }
        let words = &words[lead..];
        if words.is_empty() || words.iter().all(|w| is_stopword(w)) {
            continue;
        }

        let sentence_initial = lead == 0 && tokens[start].sentence_start;
        if sentence_initial && words.len() == 1 {
            let lower = words[0].to_lowercase();
            if !mid_sentence_caps.contains(&lower) && !known.contains(&lower) {
                continue;
            }
        }

        let before: Vec<&str> = tokens[start.saturating_sub(3)..start]
            .iter()
            .rev()
            .map(|t| t.word)
            .collect();
        let arrival = is_arrival(&before);
        let kind = if arrival {
            EntityKind::Place
        } else {
            classify_span(words, before.first().copied())
        };
        spans.push(Span {
            mention: Mention::proper(words.join(" "), kind),
            arrival,
        });
    }
    spans
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = start + needle.len().max(1);
        while !haystack.is_char_boundary(from) {
            from += 1;
        }
    }
    false
}

/// Scan one segment of model output for entity references.
pub fn scan(text: &str, known: &[KnownName]) -> ScanResult {
    let mut result = ScanResult::default();
    let mut seen: HashSet<String> = HashSet::new();
    let known_lower: HashSet<String> = known.iter().map(|k| k.name.to_lowercase()).collect();

    for caps in identity_regex().captures_iter(text) {
        let placeholder = caps[1].trim().to_string();
        let name = caps[2].trim().to_string();
        if is_stopword(&name) {
            continue;
        }
        result.claims.push(IdentityClaim { placeholder, name });
    }

    let mut push = |mention: Mention, result: &mut ScanResult| {
        let key = normalize(&mention.text);
        if !key.is_empty() && seen.insert(key) {
            result.mentions.push(mention);
        }
    };

    let lower_text = text.to_lowercase();
    for k in known {
        let lower = k.name.to_lowercase();
        if contains_word(&lower_text, &lower) {
            push(Mention::proper(k.name.clone(), k.kind), &mut result);
        }
    }

    for span in proper_noun_spans(text, &known_lower) {
        if span.arrival {
            result.destination = Some(span.mention.text.clone());
        }
        push(span.mention, &mut result);
    }

    for caps in indefinite_regex().captures_iter(text) {
        push(Mention::indefinite(caps[1].trim()), &mut result);
    }

    for caps in definite_regex().captures_iter(text) {
        push(
            Mention {
                text: caps[1].trim().to_string(),
                kind: EntityKind::Character,
                form: MentionForm::Definite,
            },
            &mut result,
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(result: &ScanResult) -> Vec<&str> {
        result.mentions.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn similarity_is_case_insensitive() {
        assert_eq!(similarity("Stella", "stella"), 1.0);
        assert_eq!(similarity("the hooded man", "hooded man"), 1.0);
    }

    #[test]
    fn similarity_tolerates_small_typos() {
        assert!(similarity("Stella", "Stela") >= 0.8);
        assert!(similarity("Viktor", "Victor") >= 0.8);
        assert!(similarity("Viktor", "Viktoria") < 0.8);
        assert!(similarity("Stella", "Marcus") < 0.5);
    }

    #[test]
    fn similarity_token_containment() {
        assert_eq!(similarity("Stella", "Stella Moreau"), 1.0);
        assert!(similarity("man", "hooded man") < 0.8);
        assert!(similarity("old man", "hooded man") < 0.8);
    }

    #[test]
    fn scans_proper_names_mid_sentence() {
        let result = scan("You meet Stella near the fountain, and Marcus waves.", &[]);
        let found = texts(&result);
        assert!(found.contains(&"Stella"));
        assert!(found.contains(&"Marcus"));
    }

    #[test]
    fn ignores_unknown_sentence_initial_words() {
        let result = scan("Suddenly the lights go out. Nobody moves.", &[]);
        assert!(result.mentions.iter().all(|m| m.form != MentionForm::ProperName));
    }

    #[test]
    fn accepts_known_sentence_initial_names_in_any_case() {
        let known = vec![KnownName {
            name: "Stella".into(),
            kind: EntityKind::Character,
        }];
        let result = scan("stella laughs quietly.", &known);
        assert_eq!(texts(&result), vec!["Stella"]);
    }

    #[test]
    fn classifies_places() {
        let result = scan("We walk into Blackwood and rest at the Rusty Anchor Tavern.", &[]);
        let places: Vec<&str> = result
            .mentions
            .iter()
            .filter(|m| m.kind == EntityKind::Place)
            .map(|m| m.text.as_str())
            .collect();
        assert!(places.contains(&"Blackwood"));
        assert!(places.contains(&"Rusty Anchor Tavern"));
        assert_eq!(result.destination.as_deref(), Some("Blackwood"));
    }

    #[test]
    fn destination_needs_movement() {
        let result = scan("They rest at the Rusty Anchor Tavern tonight.", &[]);
        assert!(result.destination.is_none());

        let result = scan("Ada rides back to Port Salis before dawn.", &[]);
        assert_eq!(result.destination.as_deref(), Some("Port Salis"));
        assert!(result
            .mentions
            .iter()
            .any(|m| m.text == "Port Salis" && m.kind == EntityKind::Place));
    }

    #[test]
    fn finds_indefinite_and_definite_descriptions() {
        let result = scan("A hooded man enters. Later the hooded man sits down.", &[]);
        assert!(result
            .mentions
            .iter()
            .any(|m| m.text == "hooded man" && m.form == MentionForm::Indefinite));
        // deduplicated: the definite form normalizes to the same key
        assert_eq!(
            result
                .mentions
                .iter()
                .filter(|m| normalize(&m.text) == "hooded man")
                .count(),
            1
        );
    }

    #[test]
    fn finds_identity_claims() {
        let result = scan("At last, the hooded man is Viktor, the smuggler.", &[]);
        assert_eq!(
            result.claims,
            vec![IdentityClaim {
                placeholder: "hooded man".into(),
                name: "Viktor".into()
            }]
        );
        assert!(texts(&result).contains(&"Viktor"));
    }

    #[test]
    fn multiword_names_with_connectors() {
        let result = scan("They speak of Isabel de Castro often.", &[]);
        assert!(texts(&result).contains(&"Isabel de Castro"));
    }
}
