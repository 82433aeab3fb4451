//! Keyword-scored emotion detection for character responses.

use super::types::Emotion;

const PATTERNS: &[(Emotion, &[&str])] = &[
    (
        Emotion::Happy,
        &[
            "happy", "glad", "delighted", "smile", "smiles", "laugh", "laughs", "love", "haha",
            "feliz", "alegre",
        ],
    ),
    (
        Emotion::Sad,
        &[
            "sad", "sorrow", "tears", "cry", "cries", "alone", "miss", "lost", "grief", "triste",
            "saudade",
        ],
    ),
    (
        Emotion::Angry,
        &[
            "angry", "furious", "rage", "hate", "damn", "snarl", "snarls", "shout", "shouts",
            "raiva", "bravo",
        ],
    ),
    (
        Emotion::Worried,
        &[
            "worried", "afraid", "fear", "nervous", "anxious", "maybe", "perhaps", "careful",
            "preocupado", "medo",
        ],
    ),
    (
        Emotion::Excited,
        &[
            "amazing", "incredible", "wonderful", "wow", "fantastic", "thrilled", "incrível",
            "uau",
        ],
    ),
    (
        Emotion::Thoughtful,
        &[
            "think", "thinks", "wonder", "ponder", "ponders", "interesting", "hmm", "considers",
            "pensativo",
        ],
    ),
    (
        Emotion::Playful,
        &[
            "tease", "teases", "wink", "winks", "grin", "grins", "joke", "jokes", "hehe",
            "brincalhão",
        ],
    ),
];

/// Pick the emotion with the most keyword hits; `!!` counts toward excited.
/// Ties resolve in declaration order; no hits yields [`Emotion::Neutral`].
pub fn detect_emotion(text: &str) -> Emotion {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut best = (Emotion::Neutral, 0usize);
    for (emotion, keywords) in PATTERNS {
        let mut score = words.iter().filter(|w| keywords.contains(*w)).count();
        if *emotion == Emotion::Excited {
            score += lower.matches("!!").count();
        }
        if score > best.1 {
            best = (*emotion, score);
        }
    }
    best.0
}
