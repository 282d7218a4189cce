use std::sync::Arc;

use page_saboteur::pages::{FALLBACK_PAGE, FALLBACK_URL};
use page_saboteur::tools::{MODIFIED_ATTR, OUTLINE_ATTR};
use page_saboteur::{AgentError, Frame, PageController, ToolError};
use pretty_assertions::assert_eq;
use serde_json::json;

fn checkout(guarded: bool) -> (Frame, PageController) {
    let frame = Frame::new();
    frame.load_html(FALLBACK_URL, FALLBACK_PAGE);
    let page = PageController::new(&frame);
    page.enable_nav_guards(guarded);
    (frame, page)
}

#[tokio::test]
async fn guarded_clicks_stay_in_the_frame() {
    let (frame, page) = checkout(true);

    let out = page
        .run_tool("openPopup", &json!({"selector": "footer a", "pin": true}))
        .await
        .unwrap();
    assert_eq!(out["defaultPrevented"], json!(true));

    let out = page
        .run_tool("openPopup", &json!({"selector": "#pay"}))
        .await
        .unwrap();
    assert_eq!(out.get("navigatedTo"), None);

    let out = page
        .run_tool("openPopup", &json!({"selector": "nav a"}))
        .await
        .unwrap();
    assert_eq!(out["defaultPrevented"], json!(false));

    let window = frame.content_window().unwrap();
    let win = window.lock();
    assert_eq!(win.location(), format!("{FALLBACK_URL}#summary"));
    assert!(win.popups().is_empty());
    let terms = win.document().query_selector("footer a").unwrap().unwrap();
    assert_eq!(win.document().attr(terms, OUTLINE_ATTR), Some("pinned"));
}

#[tokio::test]
async fn unguarded_clicks_escape() {
    let (frame, page) = checkout(false);

    page.run_tool("openPopup", &json!({"selector": "footer a"}))
        .await
        .unwrap();
    let out = page
        .run_tool("openPopup", &json!({"selector": "#pay"}))
        .await
        .unwrap();
    assert_eq!(out["navigatedTo"], json!("https://sandbox.local/checkout/confirm"));

    let window = frame.content_window().unwrap();
    let win = window.lock();
    assert_eq!(win.popups(), ["https://shop.example.com/terms".to_string()]);
    assert_eq!(win.location(), "https://sandbox.local/checkout/confirm");
}

#[tokio::test]
async fn guard_toggling_restores_native_functions() {
    let (frame, page) = checkout(false);
    let window = frame.content_window().unwrap();
    let native_open = window.lock().open_fn();

    page.enable_nav_guards(true);
    page.enable_nav_guards(true);
    assert!(!Arc::ptr_eq(&window.lock().open_fn(), &native_open));
    page.enable_nav_guards(false);

    let mut win = window.lock();
    assert!(Arc::ptr_eq(&win.open_fn(), &native_open));
    assert!(win.open("https://ads.example").is_some());
}

#[tokio::test]
async fn invalid_arguments_never_touch_the_page() {
    let (_frame, page) = checkout(true);
    let before = page.snapshot().unwrap();

    for (tool, args) in [
        ("moveButton", json!({"selector": "#pay"})),
        ("moveButton", json!({"selector": "#pay", "x": "ten", "y": 0})),
        ("insertButton", json!({"text": 42})),
        ("openPopup", json!({"pin": "yes"})),
    ] {
        let err = page.run_tool(tool, &args).await.unwrap_err();
        assert!(
            matches!(err, AgentError::Tool(ToolError::Validation { .. })),
            "{tool} {args}: {err}"
        );
    }
    assert_eq!(page.snapshot().unwrap(), before);
}

#[tokio::test]
async fn moved_buttons_carry_a_durable_marker() {
    let (frame, page) = checkout(true);
    let out = page
        .run_tool("moveButton", &json!({"selector": "#pay", "x": 12.5, "y": -3.5}))
        .await
        .unwrap();
    assert_eq!(out["left"], json!("13px"));
    assert_eq!(out["top"], json!("-3px"));
    assert_eq!(out["selector"], json!("#pay"));

    let window = frame.content_window().unwrap();
    let win = window.lock();
    let doc = win.document();
    let marked = doc.query_selector_all(&format!("[{MODIFIED_ATTR}]")).unwrap();
    assert_eq!(marked, vec![doc.get_element_by_id("pay").unwrap()]);
}

#[test]
fn schemas_describe_required_arguments() {
    let (_frame, page) = checkout(true);
    let schemas = page.list_tool_schemas();
    assert_eq!(
        schemas.keys().copied().collect::<Vec<_>>(),
        vec!["insertButton", "moveButton", "openPopup"]
    );
    assert_eq!(schemas["moveButton"]["required"], json!(["selector", "x", "y"]));
    assert!(schemas["insertButton"].get("required").is_none());
}

#[test]
fn disposed_controller_is_not_ready() {
    let (_frame, page) = checkout(true);
    page.dispose();
    assert!(!page.guards_active());
    assert!(matches!(page.snapshot(), Err(AgentError::NotReady)));
}
