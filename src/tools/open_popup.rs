use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ToolContext, ensure_ready, marking};
use crate::dom::{Document, NodeId};
use crate::error::ToolError;

/// Tried in order when no selector is given.
const POPUP_CANDIDATES: [&str; 4] = [
    r#"[data-testid*="popup"]"#,
    r#"[aria-haspopup="true"]"#,
    "button",
    r#"[role="button"]"#,
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize, JsonSchema)]
pub struct OpenPopupArgs {
    /// Element to click. When omitted the first popup-like control is used.
    #[serde(default)]
    pub selector: Option<String>,
    /// Keep the outline instead of clearing it after a short delay.
    #[serde(default)]
    pub pin: bool,
}

fn find_clickable(doc: &Document, selector: Option<&str>) -> Result<Option<NodeId>, ToolError> {
    if let Some(selector) = selector.filter(|s| !s.trim().is_empty()) {
        return Ok(doc.query_selector(selector)?);
    }
    for candidate in POPUP_CANDIDATES {
        if let Some(node) = doc.query_selector(candidate)? {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

pub(super) async fn run(ctx: &ToolContext, args: OpenPopupArgs) -> Result<Value, ToolError> {
    let mut win = ctx.window.lock();
    ensure_ready(win.document())?;

    let node = find_clickable(win.document(), args.selector.as_deref())?.ok_or_else(|| {
        ToolError::NotFound(args.selector.clone().unwrap_or_else(|| "a clickable element".into()))
    })?;
    let selector = (ctx.resolve)(win.document(), node);

    if args.pin {
        marking::pin(win.document_mut(), node);
    } else {
        marking::flash(&ctx.window, win.document_mut(), node);
    }

    let outcome = win.click(node);
    debug!(?selector, ?outcome, "popup trigger clicked");

    let mut result = json!({
        "clicked": true,
        "selector": selector,
        "defaultPrevented": outcome.default_prevented,
    });
    if let Some(url) = outcome.navigated_to {
        result["navigatedTo"] = Value::String(url);
    }
    Ok(result)
}
