//! Formatting of agent responses for speech-only devices.
//!
//! Agents answer in markdown. Glasses with speakers but no display need the
//! response read aloud, so markdown structure is stripped, common written
//! abbreviations are expanded, and the text is normalised into plain
//! sentences.

use pulldown_cmark::{Event, Parser};

/// Written abbreviations that read badly when synthesised.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("etc.", "and so on"),
    ("vs.", "versus"),
    ("approx.", "approximately"),
    ("min.", "minutes"),
    ("hr.", "hours"),
];

/// Turn a markdown agent response into plain speakable text.
#[must_use]
pub fn format_for_speech(markdown: &str) -> String {
    let plain = strip_markdown(markdown);
    let expanded = expand_abbreviations(&plain);
    collapse_whitespace(&expanded)
}

/// Split speakable text into sentences (terminator kept).
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|next| next.is_whitespace()) {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_owned());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }
    sentences
}

/// Flatten markdown to its text content.
fn strip_markdown(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push(' '),
            Event::End(_) => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
    out
}

fn expand_abbreviations(text: &str) -> String {
    let mut out = text.to_owned();
    for (written, spoken) in ABBREVIATIONS {
        out = out.replace(written, spoken);
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn strips_markdown_structure() {
        let spoken = format_for_speech("**Bold** and `code` in a [link](https://example.com).");
        assert_eq!(spoken, "Bold and code in a link .");
    }

    #[test]
    fn flattens_lists_and_headings() {
        let spoken = format_for_speech("# Plan\n\n- first step\n- second step");
        assert!(spoken.contains("Plan"));
        assert!(spoken.contains("first step second step"));
        assert!(!spoken.contains('#'));
        assert!(!spoken.contains('-'));
    }

    #[test]
    fn expands_abbreviations() {
        let spoken = format_for_speech("Pack light, e.g. one jacket.");
        assert_eq!(spoken, "Pack light, for example one jacket.");
    }

    #[test]
    fn plain_text_is_preserved() {
        assert_eq!(
            format_for_speech("It is quarter past three."),
            "It is quarter past three."
        );
    }

    #[test]
    fn sentences_split_on_terminators() {
        let sentences = split_sentences("First. Second one! Third?");
        assert_eq!(sentences, vec!["First.", "Second one!", "Third?"]);
    }

    #[test]
    fn decimal_points_do_not_split() {
        let sentences = split_sentences("It is 3.5 kilometres away. Turn left.");
        assert_eq!(sentences, vec!["It is 3.5 kilometres away.", "Turn left."]);
    }

    #[test]
    fn trailing_fragment_is_kept() {
        let sentences = split_sentences("One. and then");
        assert_eq!(sentences, vec!["One.", "and then"]);
    }
}
