//! Visible and durable marks left on elements the agent touched.
//!
//! Outlines are presentation only. The attributes are the contract: any
//! layer can find agent-touched elements with an attribute query.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::dom::{Document, Event, EventTarget, NodeId, SharedWindow, Window};

/// Outline state: `pinned` or a one-shot token for a pending clear.
pub const OUTLINE_ATTR: &str = "data-agent-outline";
pub const MODIFIED_ATTR: &str = "data-agent-modified";
pub const INSERTED_ATTR: &str = "data-agent-inserted";
pub const AGENT_ID_ATTR: &str = "data-agent-id";

pub const OUTLINE_CLEAR_DELAY: Duration = Duration::from_millis(1500);

const OUTLINE: &str = "2px dashed #f43f5e";
const OUTLINE_OFFSET: &str = "2px";

static TRANSIENT_TOKENS: AtomicU64 = AtomicU64::new(0);

fn paint(doc: &mut Document, node: NodeId) {
    doc.set_style(node, "outline", OUTLINE);
    doc.set_style(node, "outline-offset", OUTLINE_OFFSET);
}

/// Outline that stays until something else removes it.
pub(super) fn pin(doc: &mut Document, node: NodeId) {
    paint(doc, node);
    doc.set_attr(node, OUTLINE_ATTR, "pinned");
}

/// Outlines `node` and clears it after [`OUTLINE_CLEAR_DELAY`], unless the
/// element was re-marked or pinned in the meantime.
pub(super) fn flash(window: &SharedWindow, doc: &mut Document, node: NodeId) {
    let token = format!("t{}", TRANSIENT_TOKENS.fetch_add(1, Ordering::Relaxed));
    paint(doc, node);
    doc.set_attr(node, OUTLINE_ATTR, &token);

    let window = Arc::clone(window);
    tokio::spawn(async move {
        tokio::time::sleep(OUTLINE_CLEAR_DELAY).await;
        let mut win = window.lock();
        let doc = win.document_mut();
        // The window may have navigated; a replaced document never carries
        // this token, so the node id is only trusted when it does.
        if doc.attr(node, OUTLINE_ATTR) == Some(token.as_str()) {
            doc.remove_style(node, "outline");
            doc.remove_style(node, "outline-offset");
            doc.remove_attr(node, OUTLINE_ATTR);
            trace!(?node, "transient outline cleared");
        }
    });
}

/// Permanent mark for elements whose mutation is itself permanent.
pub(super) fn mark_modified(doc: &mut Document, node: NodeId) {
    pin(doc, node);
    doc.set_attr(node, MODIFIED_ATTR, "true");
}

/// Marks an inserted element and re-applies the mark whenever it is
/// clicked or focused, so later style resets cannot erase it silently.
pub(super) fn mark_inserted(win: &mut Window, node: NodeId) {
    reassert_inserted(win.document_mut(), node);
    for event in ["click", "focus"] {
        win.add_event_listener(
            EventTarget::Node(node),
            event,
            false,
            Arc::new(move |win: &mut Window, _: &mut Event| reassert_inserted(win.document_mut(), node)),
        );
    }
}

fn reassert_inserted(doc: &mut Document, node: NodeId) {
    pin(doc, node);
    doc.set_attr(node, INSERTED_ATTR, "true");
}
