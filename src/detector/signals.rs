//! Page-text signal scanning and result parsing.
//!
//! This is the only place that inspects detector page text; everything
//! above it sees typed errors and numbers.

use regex::Regex;

/// Signals recognisable from a result page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSignal {
    /// The identity's daily quota is exhausted
    QuotaExhausted,
    /// A verification/captcha wall fired
    VerificationFailure,
}

/// Case-sensitive substring scan; detector pages mix scripts, so the
/// phrase lists carry both localisations verbatim.
pub fn contains_any(text: &str, phrases: &[String]) -> bool {
    phrases.iter().any(|p| !p.is_empty() && text.contains(p.as_str()))
}

/// Scan page text for quota/verification walls, quota first: a page can
/// show both and quota is the stronger signal.
pub fn scan_signals(
    text: &str,
    quota_phrases: &[String],
    verification_phrases: &[String],
) -> Option<PageSignal> {
    if contains_any(text, quota_phrases) {
        return Some(PageSignal::QuotaExhausted);
    }
    if contains_any(text, verification_phrases) {
        return Some(PageSignal::VerificationFailure);
    }
    None
}

/// Find the first plausible AI-probability percentage in the page text.
///
/// Lines are candidates when they contain a percent sign, are short
/// enough to be a result widget rather than page prose, and match no
/// page-chrome exclusion phrase. Returns the value and the line it was
/// read from.
pub fn parse_ai_probability(text: &str, exclusions: &[String]) -> Option<(f64, String)> {
    let percentage = Regex::new(r"(\d+(?:\.\d+)?)%").expect("static regex");

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains('%') || line.chars().count() >= 200 {
            continue;
        }

        let lowered = line.to_lowercase();
        if exclusions
            .iter()
            .any(|e| !e.is_empty() && lowered.contains(&e.to_lowercase()))
        {
            continue;
        }

        for capture in percentage.captures_iter(line) {
            if let Ok(value) = capture[1].parse::<f64>() {
                if (0.0..=100.0).contains(&value) {
                    return Some((value, line.to_string()));
                }
            }
        }
    }
    None
}
