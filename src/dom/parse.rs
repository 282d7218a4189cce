//! Tolerant HTML parser.
//!
//! Generated pages are written by a model and are frequently sloppy, so the
//! parser never fails: unknown constructs become text or comments, stray
//! end tags are dropped and the `html`/`body` skeleton is implied.

use super::{Document, NodeData, NodeId, RAW_TEXT_ELEMENTS, VOID_ELEMENTS};

/// Elements whose content is text up to the matching end tag.
const TEXT_ONLY_ELEMENTS: &[&str] = &["textarea", "title"];

/// Opening one of these closes an open `<p>`.
const CLOSES_PARAGRAPH: &[&str] = &[
    "p", "div", "ul", "ol", "table", "form", "section", "article", "header", "footer", "nav",
    "main", "aside", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote", "hr",
];

pub fn parse_html(input: &str) -> Document {
    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = vec![doc.root()];
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];

        if let Some(after) = rest.strip_prefix("<!--") {
            let (body, consumed) = match after.find("-->") {
                Some(end) => (&after[..end], 4 + end + 3),
                None => (after, rest.len()),
            };
            let node = doc.create_comment(body);
            append(&mut doc, &stack, node);
            pos += consumed;
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map_or(rest.len(), |i| i + 1);
            let inner = rest[2..end].trim_end_matches('>').trim();
            if inner
                .get(..7)
                .is_some_and(|head| head.eq_ignore_ascii_case("doctype"))
            {
                let node = doc.create_doctype(inner[7..].trim());
                append(&mut doc, &stack, node);
            } else {
                let node = doc.create_comment(inner);
                append(&mut doc, &stack, node);
            }
            pos += end;
            continue;
        }

        if let Some(after) = rest.strip_prefix("</") {
            if after.starts_with(|c: char| c.is_ascii_alphabetic()) {
                let end = after.find('>').map_or(after.len(), |i| i + 1);
                let name = after[..end]
                    .trim_end_matches('>')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                close_element(&doc, &mut stack, &name);
                pos += 2 + end;
                continue;
            }
        }

        if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let tag = read_start_tag(&rest[1..]);
            pos += 1 + tag.consumed;

            imply_end_tags(&doc, &mut stack, &tag.name);
            let node = doc.create_element(&tag.name);
            for (name, value) in &tag.attrs {
                if !doc.has_attr(node, name) {
                    doc.set_attr(node, name, value);
                }
            }
            append(&mut doc, &stack, node);

            let raw = RAW_TEXT_ELEMENTS.contains(&tag.name.as_str());
            let text_only = TEXT_ONLY_ELEMENTS.contains(&tag.name.as_str());
            if raw || text_only {
                let body = &input[pos..];
                let end = find_end_tag(body, &tag.name).unwrap_or(body.len());
                let content = &body[..end];
                if !content.is_empty() {
                    let text = if raw {
                        content.to_string()
                    } else {
                        decode_entities(content)
                    };
                    let child = doc.create_text(&text);
                    doc.append_child(node, child);
                }
                pos += end;
                if let Some(close) = input[pos..].find('>') {
                    if end < body.len() {
                        pos += close + 1;
                    }
                }
                continue;
            }

            if !tag.self_closing && !VOID_ELEMENTS.contains(&tag.name.as_str()) {
                stack.push(node);
            }
            continue;
        }

        // Text up to the next thing that looks like markup.
        let first = rest.chars().next().map_or(1, char::len_utf8);
        let next = rest[first..]
            .find('<')
            .map_or(rest.len(), |i| i + first);
        let text = decode_entities(&rest[..next]);
        let top = *stack.last().unwrap_or(&doc.root());
        if !(top == doc.root() && text.trim().is_empty()) {
            let node = doc.create_text(&text);
            append(&mut doc, &stack, node);
        }
        pos += next;
    }

    ensure_skeleton(&mut doc);
    doc
}

fn append(doc: &mut Document, stack: &[NodeId], node: NodeId) {
    let parent = stack.last().copied().unwrap_or_else(|| doc.root());
    doc.append_child(parent, node);
}

fn close_element(doc: &Document, stack: &mut Vec<NodeId>, name: &str) {
    if let Some(depth) = stack
        .iter()
        .rposition(|n| doc.tag_name(*n) == Some(name))
    {
        stack.truncate(depth);
    }
}

fn imply_end_tags(doc: &Document, stack: &mut Vec<NodeId>, opening: &str) {
    let Some(top) = stack.last().copied() else {
        return;
    };
    let top_tag = doc.tag_name(top).unwrap_or("");
    let closes = match opening {
        "li" => top_tag == "li",
        "option" => top_tag == "option",
        "dt" | "dd" => top_tag == "dt" || top_tag == "dd",
        "tr" => top_tag == "tr" || top_tag == "td" || top_tag == "th",
        "td" | "th" => top_tag == "td" || top_tag == "th",
        other => top_tag == "p" && CLOSES_PARAGRAPH.contains(&other),
    };
    if closes && stack.len() > 1 {
        stack.pop();
        if opening == "tr" && doc.tag_name(top) != Some("tr") {
            close_element(doc, stack, "tr");
        }
    }
}

struct StartTag {
    name: String,
    attrs: Vec<(String, String)>,
    self_closing: bool,
    consumed: usize,
}

/// Reads a start tag from just after its `<`.
fn read_start_tag(src: &str) -> StartTag {
    let mut cur = Cursor { src, pos: 0 };
    let name = cur
        .take_while(|c| !c.is_whitespace() && c != '>' && c != '/')
        .to_ascii_lowercase();
    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        cur.skip_whitespace();
        match cur.peek() {
            None => break,
            Some('>') => {
                cur.bump();
                break;
            }
            Some('/') => {
                cur.bump();
                if cur.peek() == Some('>') {
                    self_closing = true;
                }
            }
            Some(_) => {
                let start = cur.pos;
                let attr = cur
                    .take_while(|c| !c.is_whitespace() && c != '>' && c != '/' && c != '=')
                    .to_ascii_lowercase();
                cur.skip_whitespace();
                let value = if cur.peek() == Some('=') {
                    cur.bump();
                    cur.skip_whitespace();
                    match cur.peek() {
                        Some(q @ ('"' | '\'')) => {
                            cur.bump();
                            let v = cur.take_while(|c| c != q).to_string();
                            cur.bump();
                            decode_entities(&v)
                        }
                        _ => decode_entities(cur.take_while(|c| !c.is_whitespace() && c != '>')),
                    }
                } else {
                    String::new()
                };
                if attr.is_empty() {
                    // Unparseable byte; skip it so the loop makes progress.
                    if cur.pos == start {
                        cur.bump();
                    }
                } else {
                    attrs.push((attr, value));
                }
            }
        }
    }

    StartTag {
        name,
        attrs,
        self_closing,
        consumed: cur.pos,
    }
}

/// Byte offset of `</name` (case-insensitive) in `body`.
fn find_end_tag(body: &str, name: &str) -> Option<usize> {
    let needle = format!("</{name}");
    let lower = body.to_ascii_lowercase();
    lower.find(&needle)
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }
}

pub(crate) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &rest[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Guarantees a single `html` root with a `body`, moving stray content in.
fn ensure_skeleton(doc: &mut Document) {
    let root = doc.root();
    let html = match doc.document_element() {
        Some(el) if doc.tag_name(el) == Some("html") => el,
        _ => {
            let html = doc.create_element("html");
            let movable: Vec<NodeId> = doc
                .children(root)
                .iter()
                .copied()
                .filter(|c| !matches!(doc.data(*c), NodeData::Doctype(_)))
                .collect();
            for child in movable {
                doc.append_child(html, child);
            }
            doc.append_child(root, html);
            html
        }
    };

    if doc.body().is_none() {
        let body = doc.create_element("body");
        let movable: Vec<NodeId> = doc
            .children(html)
            .iter()
            .copied()
            .filter(|c| doc.tag_name(*c) != Some("head"))
            .collect();
        for child in movable {
            doc.append_child(body, child);
        }
        doc.append_child(html, body);
    }
}
