//! Window object around a [`Document`].
//!
//! Holds the pieces a page can use to escape its frame: `open`,
//! `history.pushState` / `history.replaceState` (replaceable function slots)
//! and the default actions of clicks on links and submit buttons.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{Document, NodeId};

pub type SharedWindow = Arc<Mutex<Window>>;

/// `window.open`. Returns the opened window, or `None` when nothing opened.
pub type OpenFn = Arc<dyn Fn(&mut Window, &str) -> Option<PopupHandle> + Send + Sync>;

/// `history.pushState` / `history.replaceState`, reduced to the URL argument.
pub type HistoryFn = Arc<dyn Fn(&mut Window, &str) + Send + Sync>;

pub type Listener = Arc<dyn Fn(&mut Window, &mut Event) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupHandle {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// The document itself; listeners survive document replacement.
    Document,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    target: EventTarget,
    event_type: String,
    capture: bool,
    callback: Listener,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub target: NodeId,
    pub bubbles: bool,
    pub cancelable: bool,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl Event {
    fn new(event_type: &str, target: NodeId, bubbles: bool, cancelable: bool) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            bubbles,
            cancelable,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// What a synthesized click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClickOutcome {
    pub default_prevented: bool,
    /// Set when the click replaced the document with a new location.
    pub navigated_to: Option<String>,
}

pub struct Window {
    document: Document,
    location: String,
    history: Vec<String>,
    popups: Vec<String>,
    open_fn: OpenFn,
    push_state_fn: HistoryFn,
    replace_state_fn: HistoryFn,
    listeners: Vec<Registration>,
    next_listener: u64,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("location", &self.location)
            .field("history", &self.history.len())
            .field("popups", &self.popups)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Window {
    pub fn new(location: &str, document: Document) -> Self {
        Self {
            document,
            location: location.to_string(),
            history: vec![location.to_string()],
            popups: Vec::new(),
            open_fn: Arc::new(native_open),
            push_state_fn: Arc::new(native_push_state),
            replace_state_fn: Arc::new(native_replace_state),
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn from_html(location: &str, html: &str) -> Self {
        Self::new(location, Document::parse(html))
    }

    pub fn into_shared(self) -> SharedWindow {
        Arc::new(Mutex::new(self))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// URLs of every window opened through the native `open`.
    pub fn popups(&self) -> &[String] {
        &self.popups
    }

    // --- patchable globals ------------------------------------------------

    pub fn open(&mut self, url: &str) -> Option<PopupHandle> {
        let f = Arc::clone(&self.open_fn);
        f(self, url)
    }

    pub fn push_state(&mut self, url: &str) {
        let f = Arc::clone(&self.push_state_fn);
        f(self, url)
    }

    pub fn replace_state(&mut self, url: &str) {
        let f = Arc::clone(&self.replace_state_fn);
        f(self, url)
    }

    pub fn open_fn(&self) -> OpenFn {
        Arc::clone(&self.open_fn)
    }

    pub fn push_state_fn(&self) -> HistoryFn {
        Arc::clone(&self.push_state_fn)
    }

    pub fn replace_state_fn(&self) -> HistoryFn {
        Arc::clone(&self.replace_state_fn)
    }

    /// Installs a new `open`, returning the previous one.
    pub fn replace_open(&mut self, f: OpenFn) -> OpenFn {
        std::mem::replace(&mut self.open_fn, f)
    }

    pub fn replace_push_state(&mut self, f: HistoryFn) -> HistoryFn {
        std::mem::replace(&mut self.push_state_fn, f)
    }

    pub fn replace_replace_state(&mut self, f: HistoryFn) -> HistoryFn {
        std::mem::replace(&mut self.replace_state_fn, f)
    }

    // --- events -----------------------------------------------------------

    pub fn add_event_listener(
        &mut self,
        target: EventTarget,
        event_type: &str,
        capture: bool,
        callback: Listener,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push(Registration {
            id,
            target,
            event_type: event_type.to_string(),
            capture,
            callback,
        });
        id
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|r| r.id != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn listeners_for(&self, node: NodeId, event_type: &str, phase: Phase) -> Vec<Listener> {
        let target = if node == self.document.root() {
            EventTarget::Document
        } else {
            EventTarget::Node(node)
        };
        self.listeners
            .iter()
            .filter(|r| r.target == target && r.event_type == event_type)
            .filter(|r| match phase {
                Phase::Capturing => r.capture,
                Phase::AtTarget => true,
                Phase::Bubbling => !r.capture,
            })
            .map(|r| Arc::clone(&r.callback))
            .collect()
    }

    /// Dispatches through capture, target and bubble phases and returns the
    /// event as the last listener left it.
    pub fn dispatch_event(
        &mut self,
        target: NodeId,
        event_type: &str,
        bubbles: bool,
        cancelable: bool,
    ) -> Event {
        let mut event = Event::new(event_type, target, bubbles, cancelable);
        let mut path: Vec<NodeId> = self.document.ancestors(target).collect();
        path.reverse();

        for node in &path {
            self.invoke(*node, &mut event, Phase::Capturing);
            if event.propagation_stopped {
                return event;
            }
        }
        self.invoke(target, &mut event, Phase::AtTarget);
        if event.propagation_stopped || !bubbles {
            return event;
        }
        for node in path.iter().rev() {
            self.invoke(*node, &mut event, Phase::Bubbling);
            if event.propagation_stopped {
                break;
            }
        }
        event
    }

    fn invoke(&mut self, node: NodeId, event: &mut Event, phase: Phase) {
        for callback in self.listeners_for(node, &event.event_type, phase) {
            callback(self, event);
        }
    }

    /// Synthesized `element.click()`, default action included.
    pub fn click(&mut self, node: NodeId) -> ClickOutcome {
        let event = self.dispatch_event(node, "click", true, true);
        if event.default_prevented() {
            debug!(?node, "click default action prevented");
            return ClickOutcome {
                default_prevented: true,
                navigated_to: None,
            };
        }
        ClickOutcome {
            default_prevented: false,
            navigated_to: self.click_default_action(node),
        }
    }

    pub fn focus(&mut self, node: NodeId) {
        self.dispatch_event(node, "focus", false, false);
    }

    /// Submits `form` the way a submit button would. Returns the new
    /// location when the submission navigated.
    pub fn submit(&mut self, form: NodeId) -> Option<String> {
        let event = self.dispatch_event(form, "submit", true, true);
        if event.default_prevented() {
            debug!(?form, "form submission prevented");
            return None;
        }
        let action = self
            .document
            .attr(form, "action")
            .filter(|a| !a.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.location.clone());
        Some(self.navigate(&action))
    }

    fn click_default_action(&mut self, node: NodeId) -> Option<String> {
        let doc = &self.document;
        if let Some(anchor) = doc.closest_tag(node, "a") {
            let href = doc.attr(anchor, "href")?.trim().to_string();
            let blank = doc.attr(anchor, "target") == Some("_blank");
            if href.starts_with('#') {
                self.set_fragment(&href);
                return None;
            }
            if href.to_ascii_lowercase().starts_with("javascript:") {
                return None;
            }
            if blank {
                self.open(&href);
                return None;
            }
            return Some(self.navigate(&href));
        }

        let control = std::iter::once(node)
            .chain(doc.ancestors(node))
            .find(|n| is_submit_control(doc, *n))?;
        let form = doc.closest_tag(control, "form")?;
        self.submit(form)
    }

    /// Replaces the document with a blank one at `url`.
    pub fn navigate(&mut self, url: &str) -> String {
        let next = resolve_url(&self.location, url);
        debug!(from = %self.location, to = %next, "window navigated");
        self.location = next.clone();
        self.history.push(next.clone());
        self.document = Document::parse("");
        self.listeners
            .retain(|r| r.target == EventTarget::Document);
        next
    }

    fn set_fragment(&mut self, fragment: &str) {
        let base = self
            .location
            .split_once('#')
            .map_or(self.location.as_str(), |(b, _)| b);
        self.location = format!("{base}{fragment}");
        self.history.push(self.location.clone());
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Capturing,
    AtTarget,
    Bubbling,
}

fn is_submit_control(doc: &Document, node: NodeId) -> bool {
    match doc.tag_name(node) {
        Some("button") => doc
            .attr(node, "type")
            .is_none_or(|t| t.eq_ignore_ascii_case("submit")),
        Some("input") => doc
            .attr(node, "type")
            .is_some_and(|t| t.eq_ignore_ascii_case("submit") || t.eq_ignore_ascii_case("image")),
        _ => false,
    }
}

fn native_open(win: &mut Window, url: &str) -> Option<PopupHandle> {
    let url = resolve_url(&win.location, url);
    win.popups.push(url.clone());
    Some(PopupHandle { url })
}

fn native_push_state(win: &mut Window, url: &str) {
    win.location = resolve_url(&win.location, url);
    win.history.push(win.location.clone());
}

fn native_replace_state(win: &mut Window, url: &str) {
    win.location = resolve_url(&win.location, url);
    match win.history.last_mut() {
        Some(last) => *last = win.location.clone(),
        None => win.history.push(win.location.clone()),
    }
}

/// Minimal URL resolution: absolute URLs pass through, fragments and
/// relative paths are joined onto `base`.
pub(crate) fn resolve_url(base: &str, url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return base.to_string();
    }
    if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
        return url.to_string();
    }
    let without_fragment = base.split_once('#').map_or(base, |(b, _)| b);
    if url.starts_with('#') {
        return format!("{without_fragment}{url}");
    }
    let origin_end = without_fragment
        .find("://")
        .and_then(|scheme| {
            without_fragment[scheme + 3..]
                .find('/')
                .map(|slash| scheme + 3 + slash)
        })
        .unwrap_or(without_fragment.len());
    if url.starts_with('/') {
        return format!("{}{url}", &without_fragment[..origin_end]);
    }
    let dir_end = without_fragment
        .rfind('/')
        .filter(|i| *i >= origin_end)
        .map_or(without_fragment.len(), |i| i + 1);
    let dir = &without_fragment[..dir_end];
    if dir.ends_with('/') {
        format!("{dir}{url}")
    } else {
        format!("{dir}/{url}")
    }
}
