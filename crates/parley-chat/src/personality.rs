//! Agent personalities.
//!
//! A closed registry of validated personalities. Each one carries the
//! response templates used for local synthesis, keyed by response category,
//! and the voice parameters used when its turns are spoken.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ChatError;

// =============================================================================
// ResponseCategory
// =============================================================================

/// Category an utterance is classified into before a template is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    Greetings,
    PracticeRequest,
    Question,
    Business,
    Travel,
    Culture,
    Grammar,
    Default,
}

impl ResponseCategory {
    /// Categories only matched when a personality carries templates for them,
    /// in the order they are tried.
    pub const TOPICAL: [ResponseCategory; 4] = [
        ResponseCategory::Business,
        ResponseCategory::Travel,
        ResponseCategory::Culture,
        ResponseCategory::Grammar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCategory::Greetings => "greetings",
            ResponseCategory::PracticeRequest => "practice_request",
            ResponseCategory::Question => "question",
            ResponseCategory::Business => "business",
            ResponseCategory::Travel => "travel",
            ResponseCategory::Culture => "culture",
            ResponseCategory::Grammar => "grammar",
            ResponseCategory::Default => "default",
        }
    }
}

impl fmt::Display for ResponseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseCategory {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greetings" => Ok(ResponseCategory::Greetings),
            "practice_request" => Ok(ResponseCategory::PracticeRequest),
            "question" => Ok(ResponseCategory::Question),
            "business" => Ok(ResponseCategory::Business),
            "travel" => Ok(ResponseCategory::Travel),
            "culture" => Ok(ResponseCategory::Culture),
            "grammar" => Ok(ResponseCategory::Grammar),
            "default" => Ok(ResponseCategory::Default),
            other => Err(ChatError::MalformedPersonality(format!(
                "unknown response category \"{}\"",
                other
            ))),
        }
    }
}

// =============================================================================
// Personality
// =============================================================================

/// Voice rendering hints for a personality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    /// 0.0 to 2.0, 1.0 is the platform's normal pitch.
    pub pitch: f32,
    /// 0.1 to 10.0, 1.0 is the platform's normal speaking rate.
    pub rate: f32,
    /// Voice names or language tags, most preferred first.
    pub preferences: Vec<String>,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            rate: 1.0,
            preferences: Vec::new(),
        }
    }
}

/// An agent the user can converse with.
#[derive(Debug, Clone, PartialEq)]
pub struct Personality {
    pub id: String,
    pub display_name: String,
    pub tone_categories: BTreeMap<ResponseCategory, Vec<String>>,
    pub voice: VoiceParams,
}

impl Personality {
    /// Templates for `category`, or `None` if the personality has none.
    pub fn templates(&self, category: ResponseCategory) -> Option<&[String]> {
        self.tone_categories
            .get(&category)
            .map(Vec::as_slice)
            .filter(|t| !t.is_empty())
    }

    pub fn has_category(&self, category: ResponseCategory) -> bool {
        self.templates(category).is_some()
    }

    /// Check identifiers, voice ranges and templates. A personality must
    /// have non-empty `default` templates.
    pub fn validate(&self) -> Result<(), ChatError> {
        let malformed = |msg: String| Err(ChatError::MalformedPersonality(msg));

        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return malformed(format!(
                "id \"{}\" must be non-empty lowercase letters, digits or '-'",
                self.id
            ));
        }
        if self.display_name.trim().is_empty() {
            return malformed(format!("{}: display_name is empty", self.id));
        }
        if !(0.0..=2.0).contains(&self.voice.pitch) {
            return malformed(format!(
                "{}: pitch {} outside 0.0..=2.0",
                self.id, self.voice.pitch
            ));
        }
        if !(0.1..=10.0).contains(&self.voice.rate) {
            return malformed(format!(
                "{}: rate {} outside 0.1..=10.0",
                self.id, self.voice.rate
            ));
        }
        // Every utterance must resolve to a template, so `default` is required.
        if !self.has_category(ResponseCategory::Default) {
            return malformed(format!("{}: no default templates", self.id));
        }
        for (category, templates) in &self.tone_categories {
            if templates.iter().any(|t| t.trim().is_empty()) {
                return malformed(format!("{}: empty template in {}", self.id, category));
            }
        }
        Ok(())
    }
}

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Deserialize)]
struct PersonalityFile {
    #[serde(default)]
    personality: Vec<PersonalityDef>,
}

#[derive(Debug, Deserialize)]
struct PersonalityDef {
    id: String,
    display_name: String,
    #[serde(default)]
    voice: VoiceParams,
    #[serde(default)]
    templates: BTreeMap<String, Vec<String>>,
}

impl TryFrom<PersonalityDef> for Personality {
    type Error = ChatError;

    fn try_from(def: PersonalityDef) -> Result<Self, Self::Error> {
        let mut tone_categories = BTreeMap::new();
        for (name, templates) in def.templates {
            tone_categories.insert(name.parse::<ResponseCategory>()?, templates);
        }
        let personality = Personality {
            id: def.id,
            display_name: def.display_name,
            tone_categories,
            voice: def.voice,
        };
        personality.validate()?;
        Ok(personality)
    }
}

/// Parse `[[personality]]` tables from TOML text.
pub fn parse_personalities(content: &str) -> Result<Vec<Personality>, ChatError> {
    let file: PersonalityFile = toml::from_str(content)
        .map_err(|e| ChatError::MalformedPersonality(e.to_string()))?;
    file.personality
        .into_iter()
        .map(Personality::try_from)
        .collect()
}

// =============================================================================
// PersonalityCatalog
// =============================================================================

/// Read-only registry of personalities keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PersonalityCatalog {
    personalities: BTreeMap<String, Arc<Personality>>,
}

impl PersonalityCatalog {
    /// Catalog with no personalities.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The five built-in agents.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for personality in builtin_personalities() {
            catalog
                .personalities
                .insert(personality.id.clone(), Arc::new(personality));
        }
        catalog
    }

    /// Built-ins plus the personalities defined in `path`.
    pub fn with_file(path: &Path) -> Result<Self, ChatError> {
        let mut catalog = Self::builtin();
        catalog.load_file(path)?;
        Ok(catalog)
    }

    /// Merge personalities from a TOML file. Existing ids are replaced.
    ///
    /// Nothing is merged if any definition in the file is invalid.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ChatError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChatError::MalformedPersonality(format!("{}: {}", path.display(), e))
        })?;
        let loaded = parse_personalities(&content)?;
        let count = loaded.len();
        for personality in loaded {
            self.insert(personality)?;
        }
        info!("Loaded {} personalities from {}", count, path.display());
        Ok(count)
    }

    /// Add or replace a personality after validating it.
    pub fn insert(&mut self, personality: Personality) -> Result<(), ChatError> {
        personality.validate()?;
        if self.personalities.contains_key(&personality.id) {
            info!(agent = %personality.id, "Replacing personality");
        }
        self.personalities
            .insert(personality.id.clone(), Arc::new(personality));
        Ok(())
    }

    /// Look up a personality. Unknown ids fail with `InvalidAgent`.
    pub fn get(&self, id: &str) -> Result<Arc<Personality>, ChatError> {
        self.personalities
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::InvalidAgent(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.personalities.contains_key(id)
    }

    /// All personalities, ordered by id.
    pub fn list(&self) -> impl Iterator<Item = &Arc<Personality>> {
        self.personalities.values()
    }

    pub fn len(&self) -> usize {
        self.personalities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personalities.is_empty()
    }
}

// =============================================================================
// Built-in personalities
// =============================================================================

fn personality(
    id: &str,
    display_name: &str,
    voice: VoiceParams,
    categories: &[(ResponseCategory, &[&str])],
) -> Personality {
    Personality {
        id: id.to_string(),
        display_name: display_name.to_string(),
        tone_categories: categories
            .iter()
            .map(|(category, templates)| {
                (*category, templates.iter().map(|t| t.to_string()).collect())
            })
            .collect(),
        voice,
    }
}

fn voice(pitch: f32, rate: f32, preferences: &[&str]) -> VoiceParams {
    VoiceParams {
        pitch,
        rate,
        preferences: preferences.iter().map(|p| p.to_string()).collect(),
    }
}

fn builtin_personalities() -> Vec<Personality> {
    use ResponseCategory::*;

    vec![
        personality(
            "friendly-tutor",
            "Friendly Tutor",
            voice(1.1, 0.95, &["Samantha", "en-US"]),
            &[
                (
                    Greetings,
                    &[
                        "Hi there! It's so nice to hear from you. How has your day been?",
                        "Hello! I'm doing great, thanks for asking. What would you like to talk about today?",
                        "Hey! Welcome back. I'm happy to practice with you.",
                    ],
                ),
                (
                    PracticeRequest,
                    &[
                        "Great idea! Let's start simple: tell me about your morning routine.",
                        "Let's practice! Describe your favourite place in your town.",
                        "Sure thing. Try telling me what you did last weekend, in three or four sentences.",
                    ],
                ),
                (
                    Question,
                    &[
                        "That's a good question! What do you think the answer might be?",
                        "Good question. Let's work through it together. Can you tell me a little more?",
                        "I love your curiosity! Before I answer, how would you explain it in your own words?",
                    ],
                ),
                (
                    Default,
                    &[
                        "That's interesting! Can you tell me more about it?",
                        "I see. How did that make you feel?",
                        "Nice! You're expressing yourself clearly. What happened next?",
                        "Thanks for sharing that. Could you say it another way, using a new word?",
                    ],
                ),
            ],
        ),
        personality(
            "business-coach",
            "Business Coach",
            voice(0.9, 1.0, &["Daniel", "en-GB"]),
            &[
                (
                    Greetings,
                    &[
                        "Good to see you. Shall we get down to business?",
                        "Hello. I hope your week is productive so far. What are we working on today?",
                    ],
                ),
                (
                    PracticeRequest,
                    &[
                        "Let's rehearse. Introduce yourself as if you were opening a client meeting.",
                        "Practice time: give me a thirty-second summary of a project you're proud of.",
                    ],
                ),
                (
                    Question,
                    &[
                        "Sharp question. How would you phrase it if you were asking your manager?",
                        "Good question. In a professional setting, what outcome would you be looking for?",
                    ],
                ),
                (
                    Business,
                    &[
                        "Let's role-play that. I'll be the client: what is your proposal?",
                        "In a meeting, you might say: \"Could we align on next steps before Friday?\" Try your own version.",
                        "Deadlines are a great topic. How would you politely ask for an extension?",
                    ],
                ),
                (
                    Default,
                    &[
                        "Understood. How would you present that point to a team?",
                        "Clear and concise. Could you make it even more persuasive?",
                        "Noted. What would your key takeaway be for a busy executive?",
                    ],
                ),
            ],
        ),
        personality(
            "travel-guide",
            "Travel Guide",
            voice(1.05, 1.05, &["Karen", "en-AU"]),
            &[
                (
                    Greetings,
                    &[
                        "Hello, traveller! Where is your next adventure taking you?",
                        "Hi! Ready to explore a new place together?",
                    ],
                ),
                (
                    PracticeRequest,
                    &[
                        "Let's practice at the airport. You're at check-in: what do you say to the agent?",
                        "Imagine you're ordering dinner in a small restaurant abroad. Go ahead and order!",
                    ],
                ),
                (
                    Question,
                    &[
                        "Good question! How would you ask a local for help with that?",
                        "Let's find out together. What words would you use to ask at the information desk?",
                    ],
                ),
                (
                    Travel,
                    &[
                        "Sounds like quite a trip! How would you ask for directions to your hotel?",
                        "Train stations can be busy. Try asking me which platform your train leaves from.",
                        "Passport ready? Tell me the purpose of your visit, as you would at border control.",
                    ],
                ),
                (
                    Culture,
                    &[
                        "Local customs are fascinating. What tradition from your country would you share with a visitor?",
                        "Festivals are a wonderful way to learn a culture. Describe one you'd love to attend.",
                    ],
                ),
                (
                    Default,
                    &[
                        "That sounds wonderful. What did you enjoy most?",
                        "Interesting! Would you recommend it to other travellers?",
                        "I can picture it. Can you describe what you saw?",
                    ],
                ),
            ],
        ),
        personality(
            "conversation-partner",
            "Conversation Partner",
            voice(1.0, 1.0, &["Alex", "en-US"]),
            &[
                (
                    Greetings,
                    &[
                        "Hey! Good to hear from you. What's new?",
                        "Hi! I'm doing well. How about you?",
                    ],
                ),
                (
                    PracticeRequest,
                    &[
                        "Sure, let's just chat. What's something you've been thinking about lately?",
                        "Let's practice small talk. What do you usually do on Sunday afternoons?",
                    ],
                ),
                (
                    Question,
                    &[
                        "Hmm, good one. What's your take on it?",
                        "I've wondered that too. What made you think of it?",
                    ],
                ),
                (
                    Culture,
                    &[
                        "Oh, I love talking about food and music. What's your favourite dish from home?",
                        "That's a cool tradition. How do people usually celebrate it?",
                    ],
                ),
                (
                    Default,
                    &[
                        "No way! Then what happened?",
                        "Ha, I know what you mean. Tell me more.",
                        "That makes sense. Do you do that often?",
                    ],
                ),
            ],
        ),
        personality(
            "grammar-expert",
            "Grammar Expert",
            voice(0.95, 0.9, &["Serena", "en-GB"]),
            &[
                (
                    Greetings,
                    &[
                        "Good day. Shall we polish your grammar a little today?",
                        "Hello. I'm well, thank you. Which area of grammar would you like to focus on?",
                    ],
                ),
                (
                    PracticeRequest,
                    &[
                        "Let's practise. Write three sentences about yesterday using the past simple.",
                        "Exercise: tell me about your plans for next year using \"going to\".",
                    ],
                ),
                (
                    Question,
                    &[
                        "A precise question. Could you give me an example sentence where it comes up?",
                        "Let's examine that. Which part of the sentence are you unsure about?",
                    ],
                ),
                (
                    Grammar,
                    &[
                        "Good topic. Remember: the present perfect links the past to now, as in \"I have lived here for two years\".",
                        "Prepositions are tricky. Try a sentence with \"in\", \"on\" and \"at\" for time.",
                        "Let's look at verb tenses. Rewrite your last sentence in the future tense.",
                    ],
                ),
                (
                    Default,
                    &[
                        "Well constructed. Could you combine that with a subordinate clause?",
                        "I follow you. Now try the same idea in the passive voice.",
                        "Good. Which verb tense did you use there, and why?",
                    ],
                ),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXTRA: &str = r#"
[[personality]]
id = "history-buff"
display_name = "History Buff"

[personality.voice]
pitch = 0.8
rate = 0.9
preferences = ["en-GB"]

[personality.templates]
greetings = ["Salutations! Which era shall we visit today?"]
culture = ["Every tradition has a story. Tell me one from your family."]
default = ["Fascinating. What happened after that?"]
"#;

    #[test]
    fn test_builtin_catalog() {
        let catalog = PersonalityCatalog::builtin();
        assert_eq!(catalog.len(), 5);
        for id in [
            "friendly-tutor",
            "business-coach",
            "travel-guide",
            "conversation-partner",
            "grammar-expert",
        ] {
            let p = catalog.get(id).unwrap();
            assert_eq!(p.id, id);
            p.validate().unwrap();
            assert!(p.has_category(ResponseCategory::Default));
            assert!(p.has_category(ResponseCategory::Greetings));
        }
    }

    #[test]
    fn test_unknown_agent_is_invalid() {
        let catalog = PersonalityCatalog::builtin();
        let err = catalog.get("pirate").unwrap_err();
        assert!(matches!(err, ChatError::InvalidAgent(id) if id == "pirate"));
        assert!(!catalog.contains("pirate"));
    }

    #[test]
    fn test_list_is_ordered_by_id() {
        let catalog = PersonalityCatalog::builtin();
        let ids: Vec<&str> = catalog.list().map(|p| p.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_category_parse_and_display() {
        for category in [
            ResponseCategory::Greetings,
            ResponseCategory::PracticeRequest,
            ResponseCategory::Question,
            ResponseCategory::Business,
            ResponseCategory::Travel,
            ResponseCategory::Culture,
            ResponseCategory::Grammar,
            ResponseCategory::Default,
        ] {
            assert_eq!(category.as_str().parse::<ResponseCategory>().unwrap(), category);
        }
        assert!("smalltalk".parse::<ResponseCategory>().is_err());
    }

    #[test]
    fn test_parse_personalities() {
        let loaded = parse_personalities(EXTRA).unwrap();
        assert_eq!(loaded.len(), 1);
        let p = &loaded[0];
        assert_eq!(p.id, "history-buff");
        assert_eq!(p.voice.pitch, 0.8);
        assert_eq!(p.voice.preferences, vec!["en-GB"]);
        assert!(p.has_category(ResponseCategory::Culture));
        assert!(!p.has_category(ResponseCategory::Travel));
    }

    #[test]
    fn test_parse_rejects_unknown_category() {
        let content = r#"
[[personality]]
id = "odd"
display_name = "Odd"
[personality.templates]
smalltalk = ["hm"]
"#;
        let err = parse_personalities(content).unwrap_err();
        assert!(matches!(err, ChatError::MalformedPersonality(_)));
        assert!(err.to_string().contains("smalltalk"));
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let good = PersonalityCatalog::builtin()
            .get("friendly-tutor")
            .unwrap()
            .as_ref()
            .clone();

        let mut p = good.clone();
        p.id = "Friendly Tutor".into();
        assert!(p.validate().is_err());

        let mut p = good.clone();
        p.display_name = "  ".into();
        assert!(p.validate().is_err());

        let mut p = good.clone();
        p.voice.pitch = 3.0;
        assert!(p.validate().is_err());

        let mut p = good.clone();
        p.voice.rate = 0.0;
        assert!(p.validate().is_err());

        let mut p = good.clone();
        p.tone_categories.clear();
        assert!(p.validate().is_err());

        let mut p = good;
        p.tone_categories
            .insert(ResponseCategory::Travel, vec!["".into()]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_personality_without_default_is_rejected() {
        let content = r#"
[[personality]]
id = "travel-only"
display_name = "Travel Only"
[personality.templates]
travel = ["Bon voyage!"]
"#;
        let err = parse_personalities(content).unwrap_err();
        assert!(matches!(err, ChatError::MalformedPersonality(ref msg) if msg.contains("default")));

        let mut p = PersonalityCatalog::builtin()
            .get("travel-guide")
            .unwrap()
            .as_ref()
            .clone();
        p.tone_categories.remove(&ResponseCategory::Default);
        let mut catalog = PersonalityCatalog::empty();
        assert!(catalog.insert(p.clone()).is_err());
        assert!(catalog.is_empty());

        p.tone_categories.insert(ResponseCategory::Default, vec![]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_load_file_merges_into_builtins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXTRA.as_bytes()).unwrap();

        let catalog = PersonalityCatalog::with_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 6);
        assert!(catalog.contains("history-buff"));
        assert!(catalog.contains("friendly-tutor"));
    }

    #[test]
    fn test_load_file_replaces_existing_id() {
        let content = r#"
[[personality]]
id = "friendly-tutor"
display_name = "Friendlier Tutor"
[personality.templates]
default = ["Hello from the file."]
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();

        let catalog = PersonalityCatalog::with_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 5);
        let p = catalog.get("friendly-tutor").unwrap();
        assert_eq!(p.display_name, "Friendlier Tutor");
        assert!(!p.has_category(ResponseCategory::Greetings));
    }

    #[test]
    fn test_load_missing_file_is_malformed() {
        let mut catalog = PersonalityCatalog::builtin();
        let err = catalog
            .load_file(Path::new("/nonexistent/agents.toml"))
            .unwrap_err();
        assert!(matches!(err, ChatError::MalformedPersonality(_)));
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn test_templates_filters_empty_lists() {
        let mut p = PersonalityCatalog::builtin()
            .get("friendly-tutor")
            .unwrap()
            .as_ref()
            .clone();
        p.tone_categories.insert(ResponseCategory::Travel, vec![]);
        assert!(p.templates(ResponseCategory::Travel).is_none());
    }
}
