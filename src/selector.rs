//! Stable selectors: a selector string for an element that a later query
//! over a possibly mutated document will most likely resolve back to it.
//!
//! Preference order, first match wins: `#id`, `[data-testid="…"]`,
//! `[name="…"]`, then a `tag:nth-of-type(n)` path that stops at the first
//! ancestor carrying an id. Ordinal segments shift when same-tag siblings
//! are inserted or removed before the element.

use crate::dom::{Document, NodeId};

pub const TEST_ID_ATTR: &str = "data-testid";

/// Returns `None` only for nodes that are not elements.
pub fn stable_selector(doc: &Document, node: NodeId) -> Option<String> {
    if !doc.is_element(node) {
        return None;
    }
    if let Some(id) = non_empty(doc.attr(node, "id")) {
        return Some(id_selector(id));
    }
    if let Some(test_id) = non_empty(doc.attr(node, TEST_ID_ATTR)) {
        return Some(attr_selector(TEST_ID_ATTR, test_id));
    }
    if let Some(name) = non_empty(doc.attr(node, "name")) {
        return Some(attr_selector("name", name));
    }
    Some(css_path(doc, node))
}

fn css_path(doc: &Document, node: NodeId) -> String {
    let mut segments = Vec::new();
    let mut current = Some(node);
    while let Some(el) = current.filter(|n| doc.is_element(*n)) {
        let tag = doc.tag_name(el).unwrap_or("*");
        if let Some(id) = non_empty(doc.attr(el, "id")) {
            segments.push(if is_plain_ident(id) {
                format!("{tag}#{id}")
            } else {
                format!("{tag}{}", attr_selector("id", id))
            });
            break;
        }
        segments.push(format!("{tag}:nth-of-type({})", doc.index_of_type(el)));
        current = doc.parent_element(el);
    }
    segments.reverse();
    segments.join(" > ")
}

pub fn id_selector(id: &str) -> String {
    if is_plain_ident(id) {
        format!("#{id}")
    } else {
        attr_selector("id", id)
    }
}

pub fn attr_selector(name: &str, value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[{name}=\"{escaped}\"]")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Ids usable verbatim after `#`: no leading digit, only ident characters.
fn is_plain_ident(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let starts_ok = match first {
        '-' => chars
            .next()
            .is_some_and(|second| second.is_ascii_alphabetic() || second == '_' || second == '-'),
        c => c.is_ascii_alphabetic() || c == '_',
    };
    starts_ok && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(doc: &Document, node: NodeId) -> Vec<NodeId> {
        let sel = stable_selector(doc, node).unwrap();
        doc.query_selector_all(&sel).unwrap()
    }

    #[test]
    fn id_selectors_round_trip() {
        let doc = Document::parse(
            r#"<body><button id="start">Go</button><p id="1st">x</p><i id="a b">y</i></body>"#,
        );
        for id in ["start", "1st", "a b"] {
            let node = doc.get_element_by_id(id).unwrap();
            assert_eq!(roundtrip(&doc, node), vec![node], "id {id}");
        }
        let start = doc.get_element_by_id("start").unwrap();
        assert_eq!(stable_selector(&doc, start).as_deref(), Some("#start"));
    }

    #[test]
    fn dash_digit_ids_use_attribute_form() {
        assert_eq!(id_selector("-1"), r#"[id="-1"]"#);
        assert_eq!(id_selector("-"), r#"[id="-"]"#);
        assert_eq!(id_selector("-menu"), "#-menu");
        assert_eq!(id_selector("_x1"), "#_x1");
    }

    #[test]
    fn test_id_beats_name() {
        let doc = Document::parse(
            r#"<body><input name="email" data-testid="email-field"></body>"#,
        );
        let input = doc.query_selector("input").unwrap().unwrap();
        assert_eq!(
            stable_selector(&doc, input).as_deref(),
            Some(r#"[data-testid="email-field"]"#)
        );
    }

    #[test]
    fn name_used_when_nothing_better() {
        let doc = Document::parse(r#"<body><select name="plan"></select></body>"#);
        let select = doc.query_selector("select").unwrap().unwrap();
        assert_eq!(stable_selector(&doc, select).as_deref(), Some(r#"[name="plan"]"#));
    }

    #[test]
    fn structural_path_stops_at_identified_ancestor() {
        let doc = Document::parse(
            r#"<body><div id="form"><p>a</p><p><span>one</span><span>two</span></p></div></body>"#,
        );
        let spans = doc.query_selector_all("span").unwrap();
        let sel = stable_selector(&doc, spans[1]).unwrap();
        assert_eq!(sel, "div#form > p:nth-of-type(2) > span:nth-of-type(2)");
        assert_eq!(roundtrip(&doc, spans[1]), vec![spans[1]]);
    }

    #[test]
    fn structural_path_without_ids_reaches_root() {
        let doc = Document::parse("<body><ul><li>a</li><li>b</li></ul></body>");
        let items = doc.query_selector_all("li").unwrap();
        let sel = stable_selector(&doc, items[1]).unwrap();
        assert_eq!(
            sel,
            "html:nth-of-type(1) > body:nth-of-type(1) > ul:nth-of-type(1) > li:nth-of-type(2)"
        );
        assert_eq!(roundtrip(&doc, items[1]), vec![items[1]]);
    }

    #[test]
    fn non_elements_have_no_selector() {
        let doc = Document::parse("<body>text</body>");
        assert_eq!(stable_selector(&doc, doc.root()), None);
    }
}
