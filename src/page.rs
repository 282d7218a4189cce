//! Frame-scoped page controller.
//!
//! Every read and write the agent makes against the sandboxed page goes
//! through [`PageController`]. It also owns the navigation guard that keeps
//! the page from leaving its frame while the agent works on it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::dom::{Event, EventTarget, ListenerId, SharedWindow, Window};
use crate::error::{AgentError, ToolError};
use crate::selector::stable_selector;
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{InputField, Snapshot};

/// The embedding slot a page is loaded into. Cloning shares the slot, so a
/// reload through one handle is visible through every other.
#[derive(Clone, Default)]
pub struct Frame {
    content: Arc<Mutex<Option<SharedWindow>>>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `window` into the frame, replacing whatever was there.
    pub fn load(&self, window: Window) -> SharedWindow {
        let shared = window.into_shared();
        *self.content.lock() = Some(Arc::clone(&shared));
        shared
    }

    pub fn load_html(&self, url: &str, html: &str) -> SharedWindow {
        self.load(Window::from_html(url, html))
    }

    pub fn content_window(&self) -> Option<SharedWindow> {
        self.content.lock().clone()
    }
}

/// Hrefs a guarded page may still follow: in-page fragments and
/// `javascript:` URLs, neither of which leaves the document.
pub fn is_contained_href(href: &str) -> bool {
    let href = href.trim();
    href.starts_with('#')
        || href
            .get(..11)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("javascript:"))
}

/// Installed containment. Holds the originals it replaced and puts them
/// back on release.
struct NavigationGuard {
    window: SharedWindow,
    teardown: Box<dyn FnOnce(&mut Window) + Send>,
}

impl NavigationGuard {
    fn install(window: &SharedWindow) -> Self {
        let mut win = window.lock();

        let click: ListenerId = win.add_event_listener(
            EventTarget::Document,
            "click",
            true,
            Arc::new(|win: &mut Window, event: &mut Event| {
                let doc = win.document();
                let href = doc
                    .closest_tag(event.target, "a")
                    .and_then(|anchor| doc.attr(anchor, "href"));
                if let Some(href) = href.filter(|h| !is_contained_href(h)) {
                    debug!(%href, "blocked anchor navigation");
                    event.prevent_default();
                    event.stop_propagation();
                }
            }),
        );
        let submit: ListenerId = win.add_event_listener(
            EventTarget::Document,
            "submit",
            true,
            Arc::new(|_: &mut Window, event: &mut Event| {
                debug!(form = ?event.target, "blocked form submission");
                event.prevent_default();
                event.stop_propagation();
            }),
        );
        let open = win.replace_open(Arc::new(|_: &mut Window, url: &str| {
            debug!(%url, "blocked window.open");
            None
        }));
        let push_state = win.replace_push_state(Arc::new(|_: &mut Window, url: &str| {
            debug!(%url, "suppressed history.pushState");
        }));
        let replace_state = win.replace_replace_state(Arc::new(|_: &mut Window, url: &str| {
            debug!(%url, "suppressed history.replaceState");
        }));

        Self {
            window: Arc::clone(window),
            teardown: Box::new(move |win: &mut Window| {
                win.remove_event_listener(click);
                win.remove_event_listener(submit);
                win.replace_open(open);
                win.replace_push_state(push_state);
                win.replace_replace_state(replace_state);
            }),
        }
    }

    fn release(self) {
        let mut win = self.window.lock();
        (self.teardown)(&mut *win);
    }
}

#[derive(Default)]
struct Binding {
    frame: Option<Frame>,
    window: Option<SharedWindow>,
    guard: Option<NavigationGuard>,
    guards_wanted: bool,
}

impl Binding {
    fn install_guard_if_wanted(&mut self) {
        if !self.guards_wanted || self.guard.is_some() {
            return;
        }
        if let Some(window) = &self.window {
            self.guard = Some(NavigationGuard::install(window));
        }
    }

    fn release_guard(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
    }
}

pub struct PageController {
    registry: ToolRegistry,
    binding: Mutex<Binding>,
}

impl PageController {
    pub fn new(frame: &Frame) -> Self {
        let controller = Self {
            registry: ToolRegistry::builtin(),
            binding: Mutex::new(Binding::default()),
        };
        controller.attach(frame);
        controller
    }

    /// Rebinds to `frame`'s current content window. Active guards move
    /// with the binding: torn down on the old window, installed on the new.
    pub fn attach(&self, frame: &Frame) {
        let mut binding = self.binding.lock();
        binding.release_guard();
        binding.frame = Some(frame.clone());
        binding.window = frame.content_window();
        binding.install_guard_if_wanted();
        debug!(bound = binding.window.is_some(), "page controller attached");
    }

    fn ensure_window(&self) -> Result<SharedWindow, AgentError> {
        let mut binding = self.binding.lock();
        if let Some(window) = &binding.window {
            return Ok(Arc::clone(window));
        }
        let window = binding
            .frame
            .as_ref()
            .and_then(Frame::content_window)
            .ok_or(AgentError::NotReady)?;
        binding.window = Some(Arc::clone(&window));
        binding.install_guard_if_wanted();
        Ok(window)
    }

    pub fn snapshot(&self) -> Result<Snapshot, AgentError> {
        let window = self.ensure_window()?;
        let win = window.lock();
        let doc = win.document();

        let html = doc
            .document_element()
            .map(|el| doc.outer_html(el))
            .unwrap_or_default();
        let inputs = doc
            .query_selector_all("input, textarea, select")
            .map_err(ToolError::from)?
            .into_iter()
            .enumerate()
            .map(|(idx, node)| InputField {
                selector: stable_selector(doc, node)
                    .unwrap_or_else(|| format!(":agent-field-{idx}")),
                value: doc.value(node),
            })
            .collect();

        Ok(Snapshot { html, inputs })
    }

    /// Looks up, validates, then executes. Validation happens before the
    /// window is touched, so invalid input never mutates the page.
    pub async fn run_tool(&self, name: &str, args: &Value) -> Result<Value, AgentError> {
        let kind = self
            .registry
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        let input = kind.validate(args)?;
        let ctx = ToolContext {
            window: self.ensure_window()?,
            resolve: stable_selector,
        };
        Ok(input.execute(&ctx).await?)
    }

    /// Idempotent: enabling twice installs once, disabling when off does
    /// nothing. Guards requested before a window is bound are installed on
    /// the first window that shows up.
    pub fn enable_nav_guards(&self, enable: bool) {
        let mut binding = self.binding.lock();
        binding.guards_wanted = enable;
        if enable {
            let fresh = binding.guard.is_none();
            binding.install_guard_if_wanted();
            if fresh && binding.guard.is_some() {
                info!("navigation guards enabled");
            }
        } else if binding.guard.is_some() {
            binding.release_guard();
            info!("navigation guards disabled");
        }
    }

    pub fn guards_active(&self) -> bool {
        self.binding.lock().guard.is_some()
    }

    /// Drops guards, then the binding. The controller is `NotReady` after.
    pub fn dispose(&self) {
        let mut binding = self.binding.lock();
        binding.release_guard();
        binding.guards_wanted = false;
        binding.window = None;
        binding.frame = None;
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn list_tool_schemas(&self) -> BTreeMap<&'static str, Value> {
        self.registry.list_schemas()
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r##"<!DOCTYPE html><html><body>
        <a id="away" href="https://example.com">away</a>
        <a id="jump" href="#section">jump</a>
        <form id="signup" action="/subscribe">
          <input id="email" value="a@b.c"><input name="age"><textarea>hi</textarea>
          <select><option>x</option><option selected>y</option></select>
          <button id="send">Send</button>
        </form>
    </body></html>"##;

    fn loaded() -> (Frame, PageController) {
        let frame = Frame::new();
        frame.load_html("http://localhost:3000/site.html", PAGE);
        let page = PageController::new(&frame);
        (frame, page)
    }

    #[test]
    fn unloaded_frame_is_not_ready() {
        let page = PageController::new(&Frame::new());
        assert!(matches!(page.snapshot(), Err(AgentError::NotReady)));
    }

    #[test]
    fn late_loaded_frame_is_picked_up() {
        let frame = Frame::new();
        let page = PageController::new(&frame);
        page.enable_nav_guards(true);
        assert!(!page.guards_active());

        frame.load_html("about:blank", "<body></body>");
        assert!(page.snapshot().is_ok());
        assert!(page.guards_active());
    }

    #[test]
    fn snapshot_lists_fields_in_order() {
        let (_frame, page) = loaded();
        let snap = page.snapshot().unwrap();
        assert!(snap.html.starts_with("<html>"));
        let fields: Vec<(&str, &str)> = snap
            .inputs
            .iter()
            .map(|f| (f.selector.as_str(), f.value.as_str()))
            .collect();
        assert_eq!(fields[0], ("#email", "a@b.c"));
        assert_eq!(fields[1], (r#"[name="age"]"#, ""));
        assert_eq!(fields[2].1, "hi");
        assert_eq!(fields[3].1, "y");
    }

    #[test]
    fn guards_contain_escapes() {
        let (frame, page) = loaded();
        page.enable_nav_guards(true);
        let window = frame.content_window().unwrap();
        let mut win = window.lock();

        let away = win.document().get_element_by_id("away").unwrap();
        let outcome = win.click(away);
        assert!(outcome.default_prevented);
        assert_eq!(win.location(), "http://localhost:3000/site.html");

        let jump = win.document().get_element_by_id("jump").unwrap();
        assert!(!win.click(jump).default_prevented);
        assert_eq!(win.location(), "http://localhost:3000/site.html#section");

        let send = win.document().get_element_by_id("send").unwrap();
        assert_eq!(win.click(send).navigated_to, None);

        assert_eq!(win.open("https://ads.example"), None);
        win.push_state("/spa-route");
        win.replace_state("/other");
        assert_eq!(win.location(), "http://localhost:3000/site.html#section");
        assert!(win.popups().is_empty());
    }

    #[test]
    fn guards_do_not_stack_and_restore_originals() {
        let (frame, page) = loaded();
        let window = frame.content_window().unwrap();
        let (open, push, replace, listeners) = {
            let win = window.lock();
            (win.open_fn(), win.push_state_fn(), win.replace_state_fn(), win.listener_count())
        };

        page.enable_nav_guards(true);
        page.enable_nav_guards(true);
        assert_eq!(window.lock().listener_count(), listeners + 2);

        page.enable_nav_guards(false);
        page.enable_nav_guards(false);
        let win = window.lock();
        assert!(Arc::ptr_eq(&win.open_fn(), &open));
        assert!(Arc::ptr_eq(&win.push_state_fn(), &push));
        assert!(Arc::ptr_eq(&win.replace_state_fn(), &replace));
        assert_eq!(win.listener_count(), listeners);
        assert!(!page.guards_active());
    }

    #[test]
    fn reattach_moves_guards_to_new_window() {
        let (frame, page) = loaded();
        page.enable_nav_guards(true);
        let old = frame.content_window().unwrap();
        let before = old.lock().listener_count();

        let fresh = frame.load_html("http://localhost:3000/next.html", PAGE);
        page.attach(&frame);

        assert_eq!(old.lock().listener_count(), before - 2);
        assert!(fresh.lock().open("https://x.example").is_none());
        assert!(page.guards_active());
    }

    #[tokio::test]
    async fn run_tool_reports_unknown_and_invalid() {
        let (_frame, page) = loaded();
        let err = page.run_tool("eraseAll", &json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "eraseAll"));

        let before = page.snapshot().unwrap().html;
        let err = page.run_tool("moveButton", &json!({"selector": "#send"})).await.unwrap_err();
        assert!(matches!(err, AgentError::Tool(ToolError::Validation { .. })));
        assert_eq!(page.snapshot().unwrap().html, before);
    }

    #[test]
    fn contained_hrefs() {
        assert!(is_contained_href("#top"));
        assert!(is_contained_href(" JavaScript:void(0)"));
        assert!(!is_contained_href("https://example.com"));
        assert!(!is_contained_href("/relative"));
    }
}
