//! In-memory document model.
//!
//! An arena of nodes with just enough of the DOM surface for the agent:
//! attributes, inline styles, text, form values, selector queries and
//! serialization back to HTML. Removed nodes stay in the arena, detached.

mod parse;
mod query;
mod window;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use parse::parse_html;
pub use query::SelectorList;
pub use window::{
    ClickOutcome, Event, EventTarget, HistoryFn, Listener, ListenerId, OpenFn, PopupHandle,
    SharedWindow, Window,
};

/// Viewport width used when estimating the size of block elements.
pub const VIEWPORT_WIDTH: f64 = 1280.0;

const LINE_HEIGHT: f64 = 24.0;
const CHAR_WIDTH: f64 = 8.0;
const INLINE_PADDING: f64 = 16.0;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

const BLOCK_ELEMENTS: &[&str] = &[
    "html", "body", "div", "main", "section", "article", "header", "footer", "nav", "aside",
    "form", "p", "ul", "ol", "li", "table", "h1", "h2", "h3", "h4", "h5", "h6", "fieldset",
    "dialog",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Doctype(String),
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    /// Live `value` of a form control once script has set it.
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Axis-aligned box in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document holding only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn parse(html: &str) -> Self {
        parse_html(html)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
            value: None,
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Comment(text.to_string()))
    }

    pub fn create_doctype(&mut self, name: &str) -> NodeId {
        self.push(NodeData::Doctype(name.to_string()))
    }

    /// Appends `child` to `parent`, detaching it from any previous parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.node_mut(id).parent.take() {
            self.node_mut(parent).children.retain(|c| *c != id);
        }
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.node(id).data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|p| self.is_element(*p))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    /// `None` for non-elements and for ids from another document.
    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes.get(id.0)?.data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match &mut self.nodes.get_mut(id.0)?.data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Element(_))
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.tag.as_str())
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |n| self.parent(*n))
    }

    /// Descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|c| self.is_element(*c))
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .into_iter()
            .find(|c| self.tag_name(*c) == Some("body"))
    }

    // --- attributes -------------------------------------------------------

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let Some(el) = self.element_mut(id) else {
            return;
        };
        let name = name.to_ascii_lowercase();
        match el.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => el.attrs.push((name, value.to_string())),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(el) = self.element_mut(id) {
            el.attrs.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        }
    }

    /// The element's id, when present and non-empty.
    pub fn id_of(&self, id: NodeId) -> Option<&str> {
        self.attr(id, "id").filter(|v| !v.is_empty())
    }

    pub fn get_element_by_id(&self, element_id: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|n| self.id_of(*n) == Some(element_id))
    }

    pub fn classes(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.attr(id, "class").unwrap_or("").split_whitespace()
    }

    // --- inline style -----------------------------------------------------

    fn style_declarations(&self, id: NodeId) -> Vec<(String, String)> {
        self.attr(id, "style")
            .unwrap_or("")
            .split(';')
            .filter_map(|decl| {
                let (prop, value) = decl.split_once(':')?;
                let prop = prop.trim().to_ascii_lowercase();
                (!prop.is_empty()).then(|| (prop, value.trim().to_string()))
            })
            .collect()
    }

    fn write_style(&mut self, id: NodeId, decls: &[(String, String)]) {
        if decls.is_empty() {
            self.remove_attr(id, "style");
            return;
        }
        let css = decls
            .iter()
            .map(|(p, v)| format!("{p}: {v};"))
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attr(id, "style", &css);
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<String> {
        let property = property.to_ascii_lowercase();
        self.style_declarations(id)
            .into_iter()
            .find(|(p, _)| *p == property)
            .map(|(_, v)| v)
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) {
        if !self.is_element(id) {
            return;
        }
        let property = property.to_ascii_lowercase();
        let mut decls = self.style_declarations(id);
        match decls.iter_mut().find(|(p, _)| *p == property) {
            Some((_, v)) => *v = value.to_string(),
            None => decls.push((property, value.to_string())),
        }
        self.write_style(id, &decls);
    }

    pub fn remove_style(&mut self, id: NodeId, property: &str) {
        let property = property.to_ascii_lowercase();
        let mut decls = self.style_declarations(id);
        let before = decls.len();
        decls.retain(|(p, _)| *p != property);
        if decls.len() != before {
            self.write_style(id, &decls);
        }
    }

    // --- text and values --------------------------------------------------

    pub fn text_content(&self, id: NodeId) -> String {
        match &self.node(id).data {
            NodeData::Text(t) => t.clone(),
            NodeData::Comment(_) | NodeData::Doctype(_) => String::new(),
            NodeData::Document | NodeData::Element(_) => self
                .descendants(id)
                .into_iter()
                .filter_map(|n| match &self.node(n).data {
                    NodeData::Text(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        for child in self.children(id).to_vec() {
            self.detach(child);
        }
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node);
        }
    }

    /// Current value of a form control, following browser semantics for
    /// `input`, `textarea` and `select`.
    pub fn value(&self, id: NodeId) -> String {
        let Some(el) = self.element(id) else {
            return String::new();
        };
        if let Some(v) = &el.value {
            return v.clone();
        }
        match el.tag.as_str() {
            "textarea" => self.text_content(id),
            "select" => {
                let options: Vec<NodeId> = self
                    .descendants(id)
                    .into_iter()
                    .filter(|n| self.tag_name(*n) == Some("option"))
                    .collect();
                options
                    .iter()
                    .copied()
                    .find(|o| self.has_attr(*o, "selected"))
                    .or_else(|| options.first().copied())
                    .map(|o| self.value(o))
                    .unwrap_or_default()
            }
            "option" => self
                .attr(id, "value")
                .map(str::to_string)
                .unwrap_or_else(|| self.text_content(id).trim().to_string()),
            _ => self.attr(id, "value").unwrap_or("").to_string(),
        }
    }

    // --- queries ----------------------------------------------------------

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>, DomError> {
        self.query_selector_in(self.root(), selector)
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>, DomError> {
        self.query_selector_all_in(self.root(), selector)
    }

    pub fn query_selector_in(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> Result<Option<NodeId>, DomError> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .descendants(scope)
            .into_iter()
            .find(|n| list.matches(self, *n)))
    }

    pub fn query_selector_all_in(
        &self,
        scope: NodeId,
        selector: &str,
    ) -> Result<Vec<NodeId>, DomError> {
        let list = SelectorList::parse(selector)?;
        Ok(self
            .descendants(scope)
            .into_iter()
            .filter(|n| list.matches(self, *n))
            .collect())
    }

    /// Nearest inclusive ancestor with the given tag name.
    pub fn closest_tag(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|n| self.tag_name(*n) == Some(tag))
    }

    /// 1-based position among element siblings sharing the same tag.
    pub fn index_of_type(&self, id: NodeId) -> usize {
        let Some(tag) = self.tag_name(id) else {
            return 1;
        };
        let Some(parent) = self.parent(id) else {
            return 1;
        };
        self.children(parent)
            .iter()
            .take_while(|c| **c != id)
            .filter(|c| self.tag_name(**c) == Some(tag))
            .count()
            + 1
    }

    /// 1-based position among all element siblings.
    pub fn element_index(&self, id: NodeId) -> usize {
        let Some(parent) = self.parent(id) else {
            return 1;
        };
        self.children(parent)
            .iter()
            .take_while(|c| **c != id)
            .filter(|c| self.is_element(**c))
            .count()
            + 1
    }

    pub fn is_last_element_child(&self, id: NodeId) -> bool {
        let Some(parent) = self.parent(id) else {
            return true;
        };
        self.children(parent)
            .iter()
            .rev()
            .find(|c| self.is_element(**c))
            .is_some_and(|last| *last == id)
    }

    // --- geometry ---------------------------------------------------------

    /// Estimated box for an element. There is no layout engine behind this:
    /// explicit pixel values in the inline style win, otherwise block
    /// elements span the viewport and inline ones are sized from their text.
    pub fn bounding_box(&self, id: NodeId) -> Rect {
        let px = |prop: &str| self.style(id, prop).and_then(|v| parse_px(&v));
        let tag = self.tag_name(id).unwrap_or("");
        let block = BLOCK_ELEMENTS.contains(&tag);

        let width = px("width").unwrap_or_else(|| {
            if block {
                VIEWPORT_WIDTH
            } else {
                let chars = self.text_content(id).trim().chars().count() as f64;
                chars * CHAR_WIDTH + INLINE_PADDING
            }
        });
        let height = px("height").unwrap_or(LINE_HEIGHT);

        Rect {
            x: px("left").unwrap_or(0.0),
            y: px("top").unwrap_or(0.0),
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    // --- serialization ----------------------------------------------------

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(*child, &mut out);
        }
        out
    }

    /// The whole document, doctype included.
    pub fn to_html(&self) -> String {
        self.inner_html(self.root())
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match &self.node(id).data {
            NodeData::Document => {
                for child in self.children(id) {
                    self.write_node(*child, out);
                }
            }
            NodeData::Doctype(name) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(name);
                out.push('>');
            }
            NodeData::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
            NodeData::Text(text) => {
                let raw = self
                    .parent(id)
                    .and_then(|p| self.tag_name(p))
                    .is_some_and(|t| RAW_TEXT_ELEMENTS.contains(&t));
                if raw {
                    out.push_str(text);
                } else {
                    out.push_str(&escape_text(text));
                }
            }
            NodeData::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&el.tag.as_str()) {
                    return;
                }
                for child in self.children(id) {
                    self.write_node(*child, out);
                }
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

/// Parses `12px`, `12.5px` or a bare number.
pub fn parse_px(value: &str) -> Option<f64> {
    let v = value.trim();
    let v = v.strip_suffix("px").unwrap_or(v).trim();
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
