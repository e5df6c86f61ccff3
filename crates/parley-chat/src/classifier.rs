//! Utterance classification for local synthesis.
//!
//! Rules are tried in a fixed order: greetings, practice requests,
//! questions, then the topical categories the personality has templates
//! for. The first match wins; nothing matching yields `Default`.

use regex::Regex;
use std::sync::LazyLock;

use crate::personality::{Personality, ResponseCategory};

// =============================================================================
// Compiled regex sets (compiled once, reused across calls)
// =============================================================================

struct CategoryPatterns {
    greetings: Vec<Regex>,
    practice: Vec<Regex>,
    question: Vec<Regex>,
    business: Vec<Regex>,
    travel: Vec<Regex>,
    culture: Vec<Regex>,
    grammar: Vec<Regex>,
}

impl CategoryPatterns {
    fn topical(&self, category: ResponseCategory) -> &[Regex] {
        match category {
            ResponseCategory::Business => &self.business,
            ResponseCategory::Travel => &self.travel,
            ResponseCategory::Culture => &self.culture,
            ResponseCategory::Grammar => &self.grammar,
            _ => &[],
        }
    }
}

// Input is lower-cased before matching, so no pattern needs (?i).
static PATTERNS: LazyLock<CategoryPatterns> = LazyLock::new(|| {
    let mk = |pats: &[&str]| -> Vec<Regex> {
        pats.iter()
            .map(|p| Regex::new(p).expect("Invalid category regex"))
            .collect()
    };

    CategoryPatterns {
        greetings: mk(&[
            r"^\s*(?:hi|hello|hey|hiya|howdy|greetings|yo)\b",
            r"^\s*good\s+(?:morning|afternoon|evening|day)\b",
            r"\bhow\s+are\s+you\b",
            r"\bhow'?s\s+it\s+going\b",
            r"\bnice\s+to\s+meet\s+you\b",
        ]),
        practice: mk(&[
            r"\b(?:let'?s|let\s+us|can\s+we|could\s+we|i\s+want\s+to|i'?d\s+like\s+to)\s+(?:practi[cs]e|train|rehearse)\b",
            r"\bpracti[cs]e\b",
            r"\b(?:quiz|test)\s+me\b",
            r"\bgive\s+me\s+(?:an?\s+)?(?:exercise|task|challenge)\b",
            r"\bhelp\s+me\s+(?:improve|learn)\b",
        ]),
        question: mk(&[
            r"\?\s*$",
            r"^\s*(?:what|why|how|when|where|who|which|whose)\b",
            r"^\s*(?:can|could|would|should|do|does|did|is|are|am|will)\s+(?:i|you|we|it|they|there|this|that)\b",
        ]),
        business: mk(&[
            r"\bmeetings?\b",
            r"\bpresentations?\b",
            r"\binterviews?\b",
            r"\bnegotiat\w*",
            r"\bclients?\b",
            r"\bdeadlines?\b",
            r"\b(?:business|office|manager|colleague|email|report)s?\b",
        ]),
        travel: mk(&[
            r"\b(?:airport|flight|hotel|train|station|ticket|passport|luggage|trip)s?\b",
            r"\btravel\w*",
            r"\bdirections?\b",
            r"\b(?:vacation|holiday)s?\b",
        ]),
        culture: mk(&[
            r"\bcultur\w*",
            r"\btraditions?\b",
            r"\bfestivals?\b",
            r"\bcustoms?\b",
            r"\b(?:food|music|cuisine|celebrat\w*)\b",
        ]),
        grammar: mk(&[
            r"\bgrammar\b",
            r"\btenses?\b",
            r"\b(?:verb|noun|adjective|adverb|preposition|pronoun|article)s?\b",
            r"\bconjugat\w*",
            r"\bplurals?\b",
        ]),
    }
});

fn any_match(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Classify an utterance for the given personality.
///
/// Pure: the same utterance and personality always give the same category.
pub fn classify(utterance: &str, personality: &Personality) -> ResponseCategory {
    let text = utterance.to_lowercase();
    let patterns = &*PATTERNS;

    if any_match(&patterns.greetings, &text) {
        return ResponseCategory::Greetings;
    }
    if any_match(&patterns.practice, &text) {
        return ResponseCategory::PracticeRequest;
    }
    if any_match(&patterns.question, &text) {
        return ResponseCategory::Question;
    }
    for category in ResponseCategory::TOPICAL {
        if personality.has_category(category) && any_match(patterns.topical(category), &text) {
            return category;
        }
    }
    ResponseCategory::Default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality::PersonalityCatalog;
    use std::sync::Arc;

    fn agent(id: &str) -> Arc<Personality> {
        PersonalityCatalog::builtin().get(id).unwrap()
    }

    #[test]
    fn test_greetings() {
        let tutor = agent("friendly-tutor");
        for text in [
            "Hello, how are you?",
            "hi",
            "Hey there",
            "Good morning!",
            "Nice to meet you",
            "So, how's it going",
        ] {
            assert_eq!(classify(text, &tutor), ResponseCategory::Greetings, "{}", text);
        }
    }

    #[test]
    fn test_greeting_beats_question() {
        let tutor = agent("friendly-tutor");
        assert_eq!(
            classify("Hello, how are you?", &tutor),
            ResponseCategory::Greetings
        );
    }

    #[test]
    fn test_practice_requests() {
        let tutor = agent("friendly-tutor");
        for text in [
            "Let's practice",
            "I want to practise my speaking",
            "Can you quiz me?",
            "Give me an exercise",
            "help me improve my English",
        ] {
            assert_eq!(
                classify(text, &tutor),
                ResponseCategory::PracticeRequest,
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_questions() {
        let tutor = agent("friendly-tutor");
        for text in [
            "Why is the sky blue",
            "What does this word mean?",
            "Is it correct to say that?",
            "I wonder about it?",
        ] {
            assert_eq!(classify(text, &tutor), ResponseCategory::Question, "{}", text);
        }
    }

    #[test]
    fn test_topical_requires_personality_templates() {
        let text = "I have a meeting with a client tomorrow";
        assert_eq!(
            classify(text, &agent("business-coach")),
            ResponseCategory::Business
        );
        assert_eq!(
            classify(text, &agent("friendly-tutor")),
            ResponseCategory::Default
        );
    }

    #[test]
    fn test_topical_order() {
        // Travel is tried before culture.
        let guide = agent("travel-guide");
        assert_eq!(
            classify("We took a train to the food festival", &guide),
            ResponseCategory::Travel
        );
        assert_eq!(
            classify("I love the music and food here", &guide),
            ResponseCategory::Culture
        );
    }

    #[test]
    fn test_grammar_category() {
        assert_eq!(
            classify("I always confuse my verb tenses", &agent("grammar-expert")),
            ResponseCategory::Grammar
        );
    }

    #[test]
    fn test_default() {
        let tutor = agent("friendly-tutor");
        assert_eq!(
            classify("I went to the park yesterday", &tutor),
            ResponseCategory::Default
        );
        assert_eq!(classify("", &tutor), ResponseCategory::Default);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let coach = agent("business-coach");
        let text = "Could we rehearse my presentation?";
        let first = classify(text, &coach);
        for _ in 0..50 {
            assert_eq!(classify(text, &coach), first);
        }
    }

    #[test]
    fn test_case_insensitive() {
        let tutor = agent("friendly-tutor");
        assert_eq!(classify("HELLO THERE", &tutor), ResponseCategory::Greetings);
        assert_eq!(classify("LET'S PRACTICE", &tutor), ResponseCategory::PracticeRequest);
    }
}
