//! Turns the classifier's free-text answer into a risk verdict.
//!
//! The model is asked to open with YES or NO, then give `Confidence: <0-1>` and a short
//! explanation. Anything without a readable confidence is treated as safe.

use crate::utils::snippet;

const CONFIDENCE_MARKER: &str = "confidence:";
const MAX_EXPLANATION_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub risk: bool,
    pub confidence: f64,
    /// False when no confidence could be read.
    pub confidence_parsed: bool,
    pub explanation: String,
}

pub fn parse_verdict(text: &str) -> Verdict {
    let answered_yes = leading_answer(text).unwrap_or_else(|| contains_word(text, "yes"));

    match extract_confidence(text) {
        Some(confidence) => Verdict {
            risk: answered_yes,
            confidence,
            confidence_parsed: true,
            explanation: explanation(text),
        },
        None => Verdict {
            risk: false,
            confidence: 0.0,
            confidence_parsed: false,
            explanation: explanation(text),
        },
    }
}

/// `Some(true)` for a leading YES, `Some(false)` for a leading NO.
fn leading_answer(text: &str) -> Option<bool> {
    let first = text
        .trim_start()
        .split(|c: char| !c.is_alphanumeric())
        .next()?
        .to_ascii_lowercase();
    match first.as_str() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token.eq_ignore_ascii_case(word))
}

/// Number following the `confidence:` marker, clamped to `0..=1`.
///
/// A `%` suffix or a bare value of 2 or more is read as a percentage; anything between
/// 1 and 2 is an overshoot of the unit scale and clamps to 1.
pub fn extract_confidence(text: &str) -> Option<f64> {
    let lowered = text.to_ascii_lowercase();
    let start = lowered.find(CONFIDENCE_MARKER)? + CONFIDENCE_MARKER.len();
    let token: String = lowered[start..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '%')
        .collect();

    let (number, percent) = match token.strip_suffix('%') {
        Some(number) => (number, true),
        None => (token.trim_end_matches('.'), false),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    let value = if percent || value >= 2.0 { value / 100.0 } else { value };
    Some(value.clamp(0.0, 1.0))
}

/// Answer text with the YES/NO token and confidence clause stripped.
fn explanation(text: &str) -> String {
    let mut body = text.trim();
    if leading_answer(body).is_some() {
        body = body
            .trim_start_matches(|c: char| c.is_alphabetic())
            .trim_start_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    }

    let cleaned: Vec<String> = body
        .lines()
        .map(strip_confidence)
        .filter(|line| !line.is_empty())
        .collect();

    snippet(&cleaned.join(" "), MAX_EXPLANATION_CHARS)
}

fn strip_confidence(line: &str) -> String {
    let Some(pos) = line.to_ascii_lowercase().find(CONFIDENCE_MARKER) else {
        return line.trim().to_string();
    };
    let before = line[..pos].trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    let after = line[pos + CONFIDENCE_MARKER.len()..]
        .trim_start()
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '%')
        .trim_start_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());

    match (before.is_empty(), after.is_empty()) {
        (true, _) => after.trim_end().to_string(),
        (false, true) => before.to_string(),
        (false, false) => format!("{before}. {}", after.trim_end()),
    }
}
