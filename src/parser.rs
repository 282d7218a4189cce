//! Turn parsing: separates the reasoning preamble from `<tool_call>`
//! directives in a buffer that grows as the collaborator streams.
//!
//! Every function here works on the full buffer so far. Nothing is diffed
//! between calls; re-scanning is cheap next to turn sizes and keeps the
//! results a plain function of the text. [`TurnParser`] only adds the
//! buffer itself and the one piece of state that must not regress: whether
//! the preamble has been finalized.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{PREAMBLE_WINDOW_WORDS, ToolCallRecord};

static PREAMBLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<preamble>(.*?)</preamble>").unwrap());

static PREAMBLE_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<preamble>").unwrap());

/// `PREAMBLE` heading, body, then an `HTML` heading; either heading may
/// carry an ordinal like `1)` or `2.`.
static LEGACY_SECTIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:^|\n)[ \t]*(?:\d+[.)][ \t]*)?PREAMBLE[ \t]*:?[ \t]*\n(.*?)\n[ \t]*(?:\d+[.)][ \t]*)?HTML\b")
        .unwrap()
});

static LEGACY_HTML_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:\d+[.)][ \t]*)?HTML[ \t]*:?[ \t]*$").unwrap()
});

static HEADING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\d+[.)]\s*)?(?:PREAMBLE|HTML)\s*:?\s*$").unwrap()
});

static MARKUP_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<!doctype\s+html|<html[\s>]").unwrap());

static HTML_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<html[\s>]").unwrap());

static HTML_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</html\s*>").unwrap());

static TOOL_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tool_call>(.*?)</tool_call>").unwrap());

static CALL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<name>(.*?)</name>").unwrap());

static CALL_ARGUMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<arguments>(.*?)</arguments>").unwrap());

fn normalize(raw: &str) -> String {
    raw.replace('\r', "")
}

/// Drops heading lines and collapses runs of blank lines to one.
fn clean_section(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines().filter(|l| !HEADING_LINE.is_match(l)) {
        let blank = line.trim().is_empty();
        if blank && out.last().is_some_and(|prev| prev.trim().is_empty()) {
            continue;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}

/// Start of the HTML section: a legacy `HTML` heading, a doctype or an
/// opening `<html>` tag, whichever comes first.
fn html_boundary(text: &str) -> Option<usize> {
    let heading = LEGACY_HTML_HEADING.find(text).map(|m| m.start());
    let markup = MARKUP_START.find(text).map(|m| m.start());
    match (heading, markup) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// The finalized preamble, or `None` while no boundary has been seen.
///
/// Tried in order: an explicit `<preamble>` block, legacy `PREAMBLE` /
/// `HTML` headings, then everything before the HTML section.
pub fn extract_preamble(raw: &str) -> Option<String> {
    let text = normalize(raw);
    if let Some(caps) = PREAMBLE_TAG.captures(&text) {
        return Some(caps[1].trim().to_string());
    }
    if let Some(caps) = LEGACY_SECTIONS.captures(&text) {
        return Some(clean_section(&caps[1]));
    }
    html_boundary(&text).map(|idx| clean_section(&text[..idx]))
}

/// True once a closed `<preamble>` block or an HTML boundary is present.
/// Growing the buffer can never turn this back to false.
pub fn is_preamble_complete(raw: &str) -> bool {
    let text = normalize(raw);
    PREAMBLE_TAG.is_match(&text) || html_boundary(&text).is_some()
}

/// The last `words` words of the text, skipping anything before an
/// unclosed `<preamble>` tag and a trailing half-received tag.
pub fn sliding_window(raw: &str, words: usize) -> String {
    let text = normalize(raw);
    let body = match PREAMBLE_OPEN.find_iter(&text).last() {
        Some(open) => &text[open.end()..],
        None => text.as_str(),
    };
    let body = match body.rfind('<') {
        Some(lt) if !body[lt..].contains('>') => &body[..lt],
        _ => body,
    };
    let all: Vec<&str> = body.split_whitespace().collect();
    all[all.len().saturating_sub(words)..].join(" ")
}

/// The part of the buffer directives are read from: the `<html>` section
/// when one has started, else the whole text.
pub fn html_section(raw: &str) -> &str {
    let Some(open) = HTML_OPEN.find(raw) else {
        return raw;
    };
    let rest = &raw[open.start()..];
    match HTML_CLOSE.find(rest) {
        Some(close) => &rest[..close.end()],
        None => rest,
    }
}

/// Every complete `<tool_call>` block, in the order its closing tag
/// appears. Blocks without a `<name>` are skipped; unparseable arguments
/// become `{}`.
pub fn extract_directives(raw: &str) -> Vec<ToolCallRecord> {
    TOOL_CALL
        .captures_iter(html_section(raw))
        .filter_map(|block| {
            let body = block.get(1)?.as_str();
            let name = CALL_NAME.captures(body)?.get(1)?.as_str().trim();
            if name.is_empty() {
                return None;
            }
            let arguments = CALL_ARGUMENTS
                .captures(body)
                .and_then(|c| c.get(1))
                .map_or("", |m| m.as_str());
            Some(ToolCallRecord::new(name, arguments))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreambleView {
    pub text: String,
    pub complete: bool,
}

/// Accumulates one turn's text.
#[derive(Debug, Clone)]
pub struct TurnParser {
    buffer: String,
    window_words: usize,
    finalized: Option<String>,
}

impl Default for TurnParser {
    fn default() -> Self {
        Self::new(PREAMBLE_WINDOW_WORDS)
    }
}

impl TurnParser {
    pub fn new(window_words: usize) -> Self {
        Self {
            buffer: String::new(),
            window_words,
            finalized: None,
        }
    }

    pub fn push(&mut self, delta: &str) {
        self.buffer.push_str(delta);
    }

    /// Adopts the collaborator's final full text when it carries one.
    pub fn complete_with(&mut self, text: &str) {
        if !text.is_empty() {
            self.buffer = text.to_string();
        }
    }


    /// Current preamble. Once finalized it stays finalized for the rest of
    /// the turn, whatever arrives afterwards.
    pub fn preamble(&mut self) -> PreambleView {
        if is_preamble_complete(&self.buffer) {
            if let Some(text) = extract_preamble(&self.buffer) {
                self.finalized = Some(text);
            }
        }
        match &self.finalized {
            Some(text) => PreambleView {
                text: text.clone(),
                complete: true,
            },
            None => PreambleView {
                text: sliding_window(&self.buffer, self.window_words),
                complete: false,
            },
        }
    }

    /// Preamble once the turn has ended. Without a finalized block the
    /// whole text stands, minus directive blocks, instead of the window.
    pub fn finish(&mut self) -> PreambleView {
        let view = self.preamble();
        if view.complete {
            return view;
        }
        let text = normalize(&self.buffer);
        let text = TOOL_CALL.replace_all(&text, "");
        let text = PREAMBLE_OPEN.replace_all(&text, "");
        PreambleView {
            text: text.trim().to_string(),
            complete: true,
        }
    }

    pub fn directives(&self) -> Vec<ToolCallRecord> {
        extract_directives(&self.buffer)
    }
}
