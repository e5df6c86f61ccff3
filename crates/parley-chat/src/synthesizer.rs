//! Local response synthesis.
//!
//! Produces personality-consistent agent text and per-turn feedback without
//! the remote reasoning service. Template choice and the suggestion and
//! encouragement picks are random; scores and classification are not.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use parley_core::types::{last_agent_text, Feedback, Turn};

use crate::classifier::classify;
use crate::error::ChatError;
use crate::personality::{Personality, ResponseCategory};

/// Words longer than this count as "long" for the vocabulary score.
pub const LONG_WORD_CHARS: usize = 6;

const SUGGESTION_POOL: &[&str] = &[
    "Try adding a connecting word like \"because\" or \"although\".",
    "Use a more specific verb instead of \"do\" or \"get\".",
    "Add a detail about when or where it happened.",
    "Try combining two short sentences into one.",
    "Experiment with a new adjective to describe your idea.",
    "Ask a follow-up question to keep the conversation going.",
    "Watch your verb tenses when you talk about the past.",
];

const ENCOURAGEMENT_POOL: &[&str] = &[
    "Great job! Keep it up.",
    "You're making real progress.",
    "Nice work, that was clear.",
    "Well said!",
    "Excellent effort, keep practising.",
];

/// Output of one local synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub category: ResponseCategory,
    pub text: String,
    pub feedback: Feedback,
}

/// Seedable local response generator.
#[derive(Debug)]
pub struct ResponseSynthesizer {
    rng: Mutex<StdRng>,
}

impl Default for ResponseSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSynthesizer {
    /// Synthesizer seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Synthesizer with a fixed seed, for reproducible output.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Either a fixed seed or OS entropy.
    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(seed),
            None => Self::new(),
        }
    }

    /// Produce a response and feedback for `utterance`.
    ///
    /// `history` is the session's turn log before this utterance. The only
    /// error is a personality with no templates for the category or `default`.
    pub fn synthesize(
        &self,
        utterance: &str,
        history: &[Turn],
        personality: &Personality,
    ) -> Result<Synthesis, ChatError> {
        let category = classify(utterance, personality);
        let candidates = personality
            .templates(category)
            .or_else(|| personality.templates(ResponseCategory::Default))
            .ok_or_else(|| {
                ChatError::InternalSynthesis(format!(
                    "{} has no templates for {} or default",
                    personality.id, category
                ))
            })?;

        let previous = last_agent_text(history);
        let fresh: Vec<&String> = candidates
            .iter()
            .filter(|c| Some(c.as_str()) != previous)
            .collect();

        let mut rng = self
            .rng
            .lock()
            .map_err(|e| ChatError::InternalSynthesis(format!("rng lock poisoned: {}", e)))?;

        let text = if fresh.is_empty() {
            candidates.choose(&mut *rng).cloned()
        } else {
            fresh.choose(&mut *rng).map(|t| (*t).clone())
        }
        .ok_or_else(|| ChatError::InternalSynthesis("no candidate templates".to_string()))?;

        let feedback = feedback_with(&mut *rng, utterance);
        debug!(
            agent = %personality.id,
            category = %category,
            grammar = feedback.grammar_score,
            "Synthesized local response"
        );

        Ok(Synthesis {
            category,
            text,
            feedback,
        })
    }

    /// Feedback alone, for replies that arrive without it.
    pub fn feedback(&self, utterance: &str) -> Result<Feedback, ChatError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| ChatError::InternalSynthesis(format!("rng lock poisoned: {}", e)))?;
        Ok(feedback_with(&mut *rng, utterance))
    }
}

// =============================================================================
// Feedback
// =============================================================================

/// Deterministic scores for an utterance: `(grammar, fluency, vocabulary)`.
///
/// Each score starts from a fixed floor and rises with word count or long
/// words, capped at 100.
pub fn score_utterance(utterance: &str) -> (u8, u8, u8) {
    let words: Vec<&str> = utterance.split_whitespace().collect();
    let word_count = words.len() as u32;
    let long_words = words
        .iter()
        .filter(|w| {
            w.chars().filter(|c| c.is_alphanumeric()).count() > LONG_WORD_CHARS
        })
        .count() as u32;
    let punctuated = utterance
        .trim_end()
        .ends_with(|c: char| matches!(c, '.' | '!' | '?'));

    let grammar = 70 + word_count.min(10) * 2 + if punctuated { 5 } else { 0 };
    let fluency = 65 + word_count.min(15) * 2;
    let vocabulary = 60 + long_words.min(8) * 5;

    let clamp = |score: u32| score.min(u32::from(Feedback::MAX_SCORE)) as u8;
    (clamp(grammar), clamp(fluency), clamp(vocabulary))
}

fn feedback_with<R: Rng + ?Sized>(rng: &mut R, utterance: &str) -> Feedback {
    let (grammar_score, fluency_score, vocabulary_score) = score_utterance(utterance);
    let count = rng.random_range(1..=3);
    let suggestions = SUGGESTION_POOL
        .choose_multiple(rng, count)
        .map(|s| s.to_string())
        .collect();
    let encouragement = ENCOURAGEMENT_POOL
        .choose(rng)
        .map(|s| s.to_string())
        .unwrap_or_default();

    Feedback {
        grammar_score,
        fluency_score,
        vocabulary_score,
        suggestions,
        corrections: Vec::new(),
        encouragement,
    }
}
