//! Citation markers appended by the model.
//!
//! The model is told to finish every answer with a run such as
//! `ARTIKEL 1 ARTIKEL 4`. Extraction reads every marker in the text; cleaning
//! removes only the end-anchored run plus any parenthesized `(ARTIKEL n)` the
//! model slipped into the prose.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bARTIKEL\s+(\d+)").expect("invalid marker regex"));

// A run of complete markers at the end of the text. While streaming, the run
// may be followed by the start of the next marker (`ARTIK`); that fragment is
// captured so it can be kept until it completes.
static TRAILING_RUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\s*\bARTIKEL\s+\d+\b)+(?:(?P<fragment>\s+A(?:R(?:T(?:I(?:K(?:E(?:L\s*)?)?)?)?)?)?)|[.\s]*)$",
    )
    .expect("invalid trailing run regex")
});

static INLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\(\s*ARTIKEL\s+\d+\s*\)(?P<next>\w)?")
        .expect("invalid inline marker regex")
});

/// 1-based article position as written by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CitationCode(pub u32);

impl CitationCode {
    /// Zero-based corpus index, `None` for code 0.
    pub fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub clean_text: String,
    pub codes: Vec<CitationCode>,
}

pub fn extract(raw: &str) -> Extraction {
    Extraction {
        clean_text: clean(raw),
        codes: extract_codes(raw),
    }
}

/// Every marker in the text, in order of appearance, duplicates included.
pub fn extract_codes(raw: &str) -> Vec<CitationCode> {
    MARKER_RE
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .map(CitationCode)
        .collect()
}

/// Strips inline and trailing markers until nothing changes, so the result is
/// stable under repeated application. An unfinished marker at the very end is
/// kept; the complete markers before it are not.
pub fn clean(raw: &str) -> String {
    let mut text = raw.to_string();
    loop {
        let next = {
            let without_inline = INLINE_RE.replace_all(&text, |caps: &Captures| {
                // Keep words on both sides of the marker apart.
                match caps.name("next") {
                    Some(next) if caps.get(0).map_or(0, |m| m.start()) > 0 => {
                        format!(" {}", next.as_str())
                    }
                    Some(next) => next.as_str().to_string(),
                    None => String::new(),
                }
            });
            TRAILING_RUN_RE
                .replace(&without_inline, "${fragment}")
                .into_owned()
        };
        if next == text {
            return text;
        }
        text = next;
    }
}

pub fn contains_marker(text: &str) -> bool {
    MARKER_RE.is_match(text)
}
