use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ToolContext, ensure_ready, marking};
use crate::error::ToolError;

#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
pub struct MoveButtonArgs {
    pub selector: String,
    /// Left offset in CSS pixels; rounded to an integer.
    pub x: f64,
    /// Top offset in CSS pixels; rounded to an integer.
    pub y: f64,
}

/// Half-up rounding, so `-2.5` becomes `-2` like browser `Math.round`.
fn round_px(v: f64) -> i64 {
    (v + 0.5).floor() as i64
}

pub(super) async fn run(ctx: &ToolContext, args: MoveButtonArgs) -> Result<Value, ToolError> {
    let mut win = ctx.window.lock();
    ensure_ready(win.document())?;

    let node = win
        .document()
        .query_selector(&args.selector)?
        .ok_or_else(|| ToolError::NotFound(args.selector.clone()))?;

    let left = format!("{}px", round_px(args.x));
    let top = format!("{}px", round_px(args.y));
    let doc = win.document_mut();
    doc.set_style(node, "position", "absolute");
    doc.set_style(node, "left", &left);
    doc.set_style(node, "top", &top);
    doc.set_style(node, "z-index", "1000");
    marking::mark_modified(doc, node);

    let rect = doc.bounding_box(node);
    let selector = (ctx.resolve)(doc, node);
    debug!(?selector, %left, %top, "element moved");

    Ok(json!({
        "moved": true,
        "selector": selector,
        "left": left,
        "top": top,
        "box": rect,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Window;
    use crate::selector::stable_selector;
    use crate::tools::MODIFIED_ATTR;

    #[tokio::test]
    async fn moves_and_marks_element() {
        let ctx = ToolContext {
            window: Window::from_html("about:blank", r#"<body><button id="btn">Pay</button></body>"#)
                .into_shared(),
            resolve: stable_selector,
        };
        let out = run(
            &ctx,
            MoveButtonArgs { selector: "#btn".into(), x: 10.4, y: 19.5 },
        )
        .await
        .unwrap();

        assert_eq!(out["left"], "10px");
        assert_eq!(out["top"], "20px");
        assert_eq!(out["box"]["x"], 10.0);
        assert_eq!(out["box"]["y"], 20.0);
        assert_eq!(out["selector"], "#btn");

        let win = ctx.window.lock();
        let doc = win.document();
        let btn = doc.get_element_by_id("btn").unwrap();
        assert_eq!(doc.style(btn, "position").as_deref(), Some("absolute"));
        assert_eq!(doc.style(btn, "z-index").as_deref(), Some("1000"));
        assert_eq!(doc.attr(btn, MODIFIED_ATTR), Some("true"));
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_px(-2.5), -2);
        assert_eq!(round_px(2.5), 3);
        assert_eq!(round_px(0.49), 0);
    }
}
