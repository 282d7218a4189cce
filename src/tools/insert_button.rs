use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{AGENT_ID_ATTR, ToolContext, ensure_ready, marking};
use crate::dom::Document;
use crate::error::ToolError;
use crate::selector::{TEST_ID_ATTR, attr_selector, id_selector};

const DEFAULT_TEXT: &str = "Click me";
const DEFAULT_TEST_ID: &str = "inserted-button";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InsertButtonArgs {
    /// Container to append to. Falls back to the body, then the root element.
    #[serde(default)]
    pub target_selector: Option<String>,
    /// Button label, `Click me` when omitted.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
}

/// `agent-btn-N` with the smallest N not already used in `doc`.
fn next_agent_id(doc: &Document) -> String {
    (1..)
        .map(|n| format!("agent-btn-{n}"))
        .find(|candidate| {
            doc.query_selector(&attr_selector(AGENT_ID_ATTR, candidate))
                .map(|found| found.is_none())
                .unwrap_or(true)
        })
        .unwrap_or_default()
}

pub(super) async fn run(ctx: &ToolContext, args: InsertButtonArgs) -> Result<Value, ToolError> {
    let mut win = ctx.window.lock();
    let root = ensure_ready(win.document())?;

    let doc = win.document();
    let target = match args.target_selector.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(selector) => doc.query_selector(selector)?,
        None => None,
    };
    let container = target.or_else(|| doc.body()).unwrap_or(root);
    let id = args.id.as_deref().filter(|v| !v.is_empty());

    let (selector, agent_id) = match id {
        Some(id) => (id_selector(id), None),
        None => {
            let agent_id = next_agent_id(doc);
            (attr_selector(AGENT_ID_ATTR, &agent_id), Some(agent_id))
        }
    };

    let doc = win.document_mut();
    let button = doc.create_element("button");
    doc.set_text_content(button, args.text.as_deref().unwrap_or(DEFAULT_TEXT));
    if let Some(id) = id {
        doc.set_attr(button, "id", id);
    }
    if let Some(class) = args.class_name.as_deref().filter(|v| !v.is_empty()) {
        doc.set_attr(button, "class", class);
    }
    doc.set_attr(button, TEST_ID_ATTR, id.unwrap_or(DEFAULT_TEST_ID));
    if let Some(agent_id) = &agent_id {
        doc.set_attr(button, AGENT_ID_ATTR, agent_id);
    }
    doc.append_child(container, button);
    marking::mark_inserted(&mut win, button);

    let rect = win.document().bounding_box(button);
    debug!(%selector, "button inserted");

    Ok(json!({
        "inserted": true,
        "selector": selector,
        "box": rect,
    }))
}
