//! Keyword-based fact extraction and recall.
//!
//! Each pattern maps a user statement to a keyed fact with a kind tag and a
//! fixed confidence. Storage upserts by key, so a repeated statement refreshes
//! the fact and a higher-confidence phrasing wins over a lower one.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::infrastructure::entities::Memory;

pub const KIND_IDENTITY: &str = "identity";
pub const KIND_LOCATION: &str = "location";
pub const KIND_OCCUPATION: &str = "occupation";
pub const KIND_PREFERENCE: &str = "preference";

/// Preference facts go stale; identity facts do not.
pub const PREFERENCE_TTL_DAYS: i64 = 90;

const MAX_VALUE_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub key: String,
    pub value: String,
    pub kind: &'static str,
    pub confidence: f64,
    pub ttl_days: Option<i64>,
}

struct Pattern {
    regex: Regex,
    kind: &'static str,
    confidence: f64,
    ttl_days: Option<i64>,
    /// Fixed key, or None to derive `"<prefix>:<first word>"` from the match.
    key: Option<&'static str>,
    key_prefix: &'static str,
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        Pattern {
            regex: Regex::new(r"(?i)\bmy name is ([A-Za-z][A-Za-z'\-]*)").unwrap(),
            kind: KIND_IDENTITY,
            confidence: 0.9,
            ttl_days: None,
            key: Some("name"),
            key_prefix: "",
        },
        Pattern {
            regex: Regex::new(r"(?i)\bcall me ([A-Za-z][A-Za-z'\-]*)").unwrap(),
            kind: KIND_IDENTITY,
            confidence: 0.85,
            ttl_days: None,
            key: Some("name"),
            key_prefix: "",
        },
        Pattern {
            regex: Regex::new(r"(?i)\bi live in ([A-Za-z][A-Za-z ,'\-]*)").unwrap(),
            kind: KIND_LOCATION,
            confidence: 0.8,
            ttl_days: None,
            key: Some("location"),
            key_prefix: "",
        },
        Pattern {
            regex: Regex::new(r"(?i)\bi work (?:as an? |as |at )([A-Za-z][A-Za-z ,'\-]*)").unwrap(),
            kind: KIND_OCCUPATION,
            confidence: 0.75,
            ttl_days: None,
            key: Some("occupation"),
            key_prefix: "",
        },
        Pattern {
            regex: Regex::new(r"(?i)\bi (?:really )?(?:like|love|enjoy) ([^.!?\n]+)").unwrap(),
            kind: KIND_PREFERENCE,
            confidence: 0.6,
            ttl_days: Some(PREFERENCE_TTL_DAYS),
            key: None,
            key_prefix: "likes",
        },
        Pattern {
            regex: Regex::new(r"(?i)\bi (?:hate|dislike|can't stand) ([^.!?\n]+)").unwrap(),
            kind: KIND_PREFERENCE,
            confidence: 0.6,
            ttl_days: Some(PREFERENCE_TTL_DAYS),
            key: None,
            key_prefix: "dislikes",
        },
    ]
});

/// Runs every pattern over the message. Later matches of the same key within
/// one message are dropped.
pub fn extract_facts(text: &str) -> Vec<ExtractedFact> {
    let mut facts: Vec<ExtractedFact> = Vec::new();

    for pattern in PATTERNS.iter() {
        for captures in pattern.regex.captures_iter(text) {
            let Some(raw) = captures.get(1) else {
                continue;
            };
            let value = clean_value(raw.as_str());
            if value.is_empty() {
                continue;
            }

            let key = match pattern.key {
                Some(key) => key.to_owned(),
                None => {
                    let first_word = value
                        .split_whitespace()
                        .next()
                        .unwrap_or_default()
                        .to_lowercase();
                    format!("{}:{}", pattern.key_prefix, first_word)
                }
            };

            if facts.iter().any(|f| f.key == key) {
                continue;
            }

            facts.push(ExtractedFact {
                key,
                value,
                kind: pattern.kind,
                confidence: pattern.confidence,
                ttl_days: pattern.ttl_days,
            });
        }
    }

    facts
}

impl ExtractedFact {
    pub fn into_memory(self, user: uuid::Uuid, now: DateTime<Utc>) -> Memory {
        Memory {
            user,
            key: self.key,
            value: self.value,
            kind: self.kind.to_owned(),
            confidence: self.confidence,
            expires_at: self.ttl_days.map(|days| now + Duration::days(days)),
            updated_at: now,
        }
    }
}

/// Renders remembered facts into a system-prompt preamble, or None when there
/// is nothing to recall.
pub fn render_preamble(memories: &[Memory]) -> Option<String> {
    if memories.is_empty() {
        return None;
    }

    let mut preamble = String::from("Known facts about this user:\n");
    for memory in memories {
        preamble.push_str(&format!("- {}: {}\n", memory.key, memory.value));
    }
    Some(preamble)
}

fn clean_value(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches([',', ' ']);
    let mut value: String = trimmed.chars().take(MAX_VALUE_LEN).collect();
    value.truncate(value.trim_end().len());
    value
}
