//! Verse highlighting
//!
//! Splits verse text into matched and unmatched spans around every
//! case-insensitive occurrence of the selected word. Pure and eager;
//! verse texts are short.

use regex::RegexBuilder;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    pub is_match: bool,
}

impl Segment {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_match: false,
        }
    }

    fn matched(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_match: true,
        }
    }
}

/// Split `text` on every case-insensitive occurrence of `term`. The term is
/// matched as a literal; case folding is full Unicode so Greek capitals
/// match their lowercase forms. An empty term yields the whole text as one
/// unmatched segment.
pub fn highlight(text: &str, term: &str) -> Vec<Segment> {
    if text.is_empty() {
        return Vec::new();
    }
    if term.is_empty() {
        return vec![Segment::plain(text)];
    }

    let Ok(matcher) = RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
    else {
        return vec![Segment::plain(text)];
    };

    let mut segments = Vec::new();
    let mut last = 0;
    for m in matcher.find_iter(text) {
        if m.start() > last {
            segments.push(Segment::plain(&text[last..m.start()]));
        }
        segments.push(Segment::matched(m.as_str()));
        last = m.end();
    }
    if last < text.len() {
        segments.push(Segment::plain(&text[last..]));
    }
    segments
}
