//! Wake-phrase detection and query classification on noisy transcripts.
//!
//! Streaming transcription mangles wake phrases in predictable ways: words
//! arrive split ("glin t"), joined, or cut across utterance boundaries with
//! the tail of the last word leaking into the next utterance ("a, how much
//! is the ticket"). The matcher pre-builds tolerant patterns per phrase so
//! detection stays a single regex scan per event.

use regex::Regex;

/// Keywords that mark a query as needing the camera context.
const VISION_KEYWORDS: &[&str] = &[
    "what do you see",
    "what am i looking at",
    "what is this",
    "what's this",
    "look at",
    "in front of me",
    "read this",
    "read that",
    "describe this",
    "describe what",
    "what color",
    "what colour",
];

/// Keywords that mark a query as needing coordinates and a street address.
const LOCATION_KEYWORDS: &[&str] = &[
    "where am i",
    "where i am",
    "my location",
    "near me",
    "nearby",
    "around here",
    "closest",
    "nearest",
    "directions",
    "how far",
    "what street",
    "what address",
];

/// Keywords that mark a query as weather-related.
const WEATHER_KEYWORDS: &[&str] = &[
    "weather",
    "temperature",
    "forecast",
    "rain",
    "snow",
    "sunny",
    "humidity",
    "windy",
    "umbrella",
];

/// A successful wake-phrase detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeMatch {
    /// Byte offset of the phrase in the scanned text.
    pub index: usize,
    /// Text after the phrase, trimmed, with leading `[,.\s]+` stripped.
    pub tail: String,
}

/// Tolerant matcher for a closed set of wake phrases.
pub struct WakeMatcher {
    phrases: Vec<String>,
    /// One tolerant pattern per phrase.
    patterns: Vec<Regex>,
    /// One leading-residue pattern per phrase (phrases with a one-letter
    /// last word have none).
    residue_patterns: Vec<Regex>,
    /// Leading punctuation/whitespace stripped from a detection tail.
    tail_prefix: Regex,
    /// Word-bounded "in"/"at" used by the weather/geocoding split.
    place_preposition: Regex,
}

impl WakeMatcher {
    /// Build a matcher for the given phrases.
    ///
    /// Per phrase the pattern tolerates zero or more whitespace characters
    /// between adjacent characters of one word and one or more whitespace
    /// characters where the phrase has a space. Matching is case-insensitive.
    #[must_use]
    pub fn new(phrases: &[String]) -> Self {
        let phrases: Vec<String> = phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let patterns = phrases
            .iter()
            .map(|phrase| tolerant_phrase_pattern(phrase))
            .collect();

        let residue_patterns = phrases
            .iter()
            .filter_map(|phrase| residue_pattern(phrase))
            .collect();

        Self {
            phrases,
            patterns,
            residue_patterns,
            tail_prefix: Regex::new(r"^[,.\s]+").expect("static pattern compiles"),
            place_preposition: Regex::new(r"\b(?:in|at)\b").expect("static pattern compiles"),
        }
    }

    /// Returns the configured phrases (lowercased).
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Scan `text` for any wake phrase; earliest match wins.
    #[must_use]
    pub fn detect(&self, text: &str) -> Option<WakeMatch> {
        let best = self
            .patterns
            .iter()
            .filter_map(|p| p.find(text))
            .min_by_key(|m| (m.start(), std::cmp::Reverse(m.end())))?;

        let tail = self.tail_prefix.replace(&text[best.end()..], "");
        Some(WakeMatch {
            index: best.start(),
            tail: tail.trim().to_owned(),
        })
    }

    /// Remove the first wake-phrase occurrence (and anything before it) from
    /// `text`. Identity when no phrase matches.
    #[must_use]
    pub fn remove_wake_word(&self, text: &str) -> String {
        match self.detect(text) {
            Some(m) => m.tail,
            None => text.trim().to_owned(),
        }
    }

    /// Strip a leading wake-word residue fragment.
    ///
    /// A residue is any 1..len-1 character suffix of the last word of a
    /// phrase, immediately followed by at least one of `,.!?;:` — the shape
    /// left behind when the stream splits the last word of the phrase across
    /// an utterance boundary. Text not starting with such a fragment is
    /// returned unchanged.
    #[must_use]
    pub fn strip_residue<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        let trimmed = text.trim_start();
        for pattern in &self.residue_patterns {
            if let Some(m) = pattern.find(trimmed) {
                return std::borrow::Cow::Owned(trimmed[m.end()..].to_owned());
            }
        }
        std::borrow::Cow::Borrowed(text)
    }

    /// Whether the query should be answered with a photo attached.
    #[must_use]
    pub fn is_vision_query(&self, query: &str) -> bool {
        contains_any(query, VISION_KEYWORDS)
    }

    /// Whether the query needs coordinates at all.
    #[must_use]
    pub fn is_location_query(&self, query: &str) -> bool {
        contains_any(query, LOCATION_KEYWORDS) || self.is_weather_query(query)
    }

    /// Whether the query needs a reverse-geocoded address.
    ///
    /// Everything in the location set does. Weather queries only do when
    /// they name a place ("weather in …"); bare weather queries use raw
    /// coordinates.
    #[must_use]
    pub fn needs_geocoding(&self, query: &str) -> bool {
        if contains_any(query, LOCATION_KEYWORDS) {
            return true;
        }
        self.is_weather_query(query) && self.place_preposition.is_match(&query.to_lowercase())
    }

    /// Whether the query is weather-related.
    #[must_use]
    pub fn is_weather_query(&self, query: &str) -> bool {
        contains_any(query, WEATHER_KEYWORDS)
    }
}

fn contains_any(query: &str, keywords: &[&str]) -> bool {
    let query = query.to_lowercase();
    keywords.iter().any(|k| query.contains(k))
}

/// Build the tolerant pattern for one phrase.
///
/// The last word additionally matches any non-empty prefix of itself when
/// the text ends there — the stream often finalises an utterance mid-word
/// and delivers the rest (the residue) at the start of the next one.
fn tolerant_phrase_pattern(phrase: &str) -> Regex {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let Some((last, head)) = words.split_last() else {
        return Regex::new("$^").expect("static pattern compiles");
    };

    let mut parts: Vec<String> = head.iter().map(|w| spaced_word(w)).collect();
    parts.push(format!(
        "(?:{}|{}\\s*$)",
        spaced_word(last),
        truncatable_word(last)
    ));

    let pattern = format!("(?i){}", parts.join(r"\s+"));
    Regex::new(&pattern).expect("escaped phrase pattern compiles")
}

/// One word with `\s*` tolerated between adjacent characters.
fn spaced_word(word: &str) -> String {
    word.chars()
        .map(|c| regex::escape(&c.to_string()))
        .collect::<Vec<_>>()
        .join(r"\s*")
}

/// One word matching any non-empty prefix of itself (nested optionals).
fn truncatable_word(word: &str) -> String {
    let chars: Vec<String> = word.chars().map(|c| regex::escape(&c.to_string())).collect();
    let mut pattern = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i == 0 {
            pattern.push_str(c);
        } else {
            pattern.push_str(&format!("(?:\\s*{c}"));
        }
    }
    pattern.push_str(&")?".repeat(chars.len().saturating_sub(1)));
    pattern
}

/// Build the leading-residue pattern for one phrase, if it has any fragments.
fn residue_pattern(phrase: &str) -> Option<Regex> {
    let last_word = phrase.split_whitespace().next_back()?;
    let chars: Vec<char> = last_word.chars().collect();
    if chars.len() < 2 {
        return None;
    }

    // Proper suffixes, longest first so the alternation prefers them.
    let fragments: Vec<String> = (1..chars.len())
        .map(|start| regex::escape(&chars[start..].iter().collect::<String>()))
        .collect();

    let pattern = format!("(?i)^(?:{})[,.!?;:]+\\s*", fragments.join("|"));
    Regex::new(&pattern).ok()
}
