//! Text clean-up applied to model output before display and synthesis.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

static TIME_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[time: .*?\]\s*").unwrap());
static PARENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());
static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@!?\d+>").unwrap());

/// Default share of ideographs above which a sentence is dropped.
pub const FOREIGN_RATIO_THRESHOLD: f64 = 0.95;

/// Sentence terminators. Each one closes the sentence it ends.
const TERMINATORS: [char; 4] = ['。', '！', '？', '…'];

/// Remove `[time: ...]` annotations together with the whitespace that follows them.
pub fn remove_time_tag(text: &str) -> String {
    TIME_TAG.replace_all(text, "").into_owned()
}

/// Remove `<@123>` / `<@!123>` mention tokens.
pub fn remove_discord_mentions(text: &str) -> String {
    MENTION.replace_all(text, "").trim().to_string()
}

/// Remove `(...)` asides. Nesting is not understood: the match stops at the first `)`.
pub fn remove_parentheses(text: &str) -> String {
    PARENS.replace_all(text, "").trim().to_string()
}

/// CJK unified ideographs, extension A and compatibility ideographs.
fn is_ideograph(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

/// Ideographs plus hiragana and katakana.
fn is_east_asian_letter(c: char) -> bool {
    is_ideograph(c) || matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}')
}

/// Split after every terminator, keeping the terminator with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (idx, c) in text.char_indices() {
        if TERMINATORS.contains(&c) {
            let end = idx + c.len_utf8();
            sentences.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// Drop sentences made (almost) entirely of ideographs.
///
/// Meant for replies in Japanese that append a Chinese translation: kana
/// pull a sentence's ideograph ratio down, a pure Chinese sentence sits at
/// 1.0. Sentences without any East Asian letter are kept verbatim, the rest
/// are trimmed. Surviving sentences are concatenated as-is; where one or
/// more sentences were dropped between two survivors a single space marks
/// the gap.
pub fn remove_foreign_sentences(text: &str, ratio_threshold: f64) -> String {
    let mut result = String::with_capacity(text.len());
    let mut dropped_since_last = false;

    for sentence in split_sentences(text) {
        let letters = sentence.chars().filter(|&c| is_east_asian_letter(c)).count();
        let ideographs = sentence.chars().filter(|&c| is_ideograph(c)).count();

        let kept = if letters == 0 {
            sentence
        } else if ideographs as f64 / letters as f64 > ratio_threshold {
            debug!(sentence, ideographs, letters, "dropping foreign sentence");
            dropped_since_last = true;
            continue;
        } else {
            sentence.trim()
        };

        if kept.trim().is_empty() {
            continue;
        }
        if dropped_since_last && !result.is_empty() {
            result.push(' ');
        }
        dropped_since_last = false;
        result.push_str(kept);
    }

    result
}

/// Full clean-up for text handed to speech synthesis.
pub fn speech_text(text: &str) -> String {
    let text = remove_time_tag(text);
    let text = remove_discord_mentions(&text);
    let text = remove_parentheses(&text);
    remove_foreign_sentences(&text, FOREIGN_RATIO_THRESHOLD)
}
