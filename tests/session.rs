use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use page_saboteur::brain::FrameStream;
use page_saboteur::sse::StreamFrame;
use page_saboteur::tools::INSERTED_ATTR;
use page_saboteur::{
    ActionKind, ActionState, AgentAction, AgentError, AgentRunner, Collaborator, Frame,
    PageController, RunOutcome, RunSummary, RunnerConfig, TurnRequest, TurnResponse,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;

const PAGE: &str = r#"<html><body><main><button id="start">Go</button></main></body></html>"#;

enum Script {
    Frames(Vec<Result<StreamFrame, AgentError>>),
    /// Sends the frames, then never finishes.
    Hang(Vec<StreamFrame>),
    Fail(String),
}

/// Plays one scripted turn per request and records what it was sent.
#[derive(Default)]
struct Scripted {
    turns: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl Scripted {
    fn new(turns: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Collaborator for Scripted {
    async fn complete(&self, _request: TurnRequest) -> Result<TurnResponse, AgentError> {
        Ok(TurnResponse::default())
    }

    async fn stream(&self, request: TurnRequest) -> Result<FrameStream, AgentError> {
        self.requests.lock().push(request);
        let turn = self.turns.lock().pop_front();
        match turn {
            Some(Script::Frames(frames)) => Ok(stream::iter(frames).boxed()),
            Some(Script::Hang(frames)) => Ok(stream::iter(frames.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(Script::Fail(reason)) => Err(AgentError::Transport(reason)),
            None => Ok(stream::empty().boxed()),
        }
    }
}

fn delta(text: &str) -> Result<StreamFrame, AgentError> {
    Ok(StreamFrame::TextDelta {
        delta: text.to_string(),
    })
}

fn directive(name: &str, arguments: &str) -> String {
    format!("<tool_call><name>{name}</name><arguments>{arguments}</arguments></tool_call>")
}

fn setup(script: Vec<Script>) -> (Frame, Arc<Scripted>, Arc<AgentRunner>) {
    let frame = Frame::new();
    frame.load_html("https://sandbox.local/", PAGE);
    let page = Arc::new(PageController::new(&frame));
    let brain = Scripted::new(script);
    let config = RunnerConfig {
        iteration_delay: Duration::ZERO,
        ..RunnerConfig::default()
    };
    let runner = Arc::new(AgentRunner::new(page, brain.clone(), config));
    (frame, brain, runner)
}

fn drain(rx: &mut broadcast::Receiver<AgentAction>) -> Vec<AgentAction> {
    let mut out = Vec::new();
    while let Ok(action) = rx.try_recv() {
        out.push(action);
    }
    out
}

fn tool_actions(actions: &[AgentAction], state: ActionState) -> Vec<&AgentAction> {
    actions
        .iter()
        .filter(|a| a.kind == ActionKind::Tool && a.state == state)
        .collect()
}

#[tokio::test]
async fn inserts_a_marked_button_end_to_end() {
    let call = directive(
        "insertButton",
        r#"{"targetSelector":"body","text":"Extra","id":"extra-btn"}"#,
    );
    let (frame, _brain, runner) = setup(vec![Script::Frames(vec![
        delta("<preamble>Adding a decoy</pre"),
        delta(&format!("amble><html>{}", &call[..20])),
        delta(&format!("{}</html>", &call[20..])),
    ])]);
    let mut rx = runner.subscribe();

    let summary = runner.run_once("clutter the page").await.unwrap();
    assert_eq!(
        summary,
        RunSummary {
            iterations: 1,
            tool_calls: 1,
            outcome: RunOutcome::BudgetSpent,
        }
    );

    let window = frame.content_window().unwrap();
    let win = window.lock();
    let doc = win.document();
    let button = doc.query_selector("#extra-btn").unwrap().unwrap();
    assert_eq!(doc.tag_name(button), Some("button"));
    assert_eq!(doc.text_content(button), "Extra");
    assert!(doc.has_attr(button, INSERTED_ATTR));
    drop(win);

    let actions = drain(&mut rx);
    let completed = tool_actions(&actions, ActionState::Completed);
    assert_eq!(completed.len(), 1);
    let output = completed[0].tool_output.as_ref().unwrap();
    assert_eq!(output["selector"], json!("#extra-btn"));
    assert!(output["box"]["width"].as_f64().unwrap() >= 0.0);
    assert!(output["box"]["height"].as_f64().unwrap() >= 0.0);

    let reasoning: Vec<_> = actions
        .iter()
        .filter(|a| a.kind == ActionKind::Reasoning)
        .collect();
    let last = reasoning.last().unwrap();
    assert_eq!(last.state, ActionState::Completed);
    assert_eq!(last.content.as_deref(), Some("Adding a decoy"));
    assert!(reasoning.iter().all(|a| a.id == last.id));
}

/// Answers every turn whole, without streaming.
struct WholeTurn(String);

#[async_trait]
impl Collaborator for WholeTurn {
    async fn complete(&self, _request: TurnRequest) -> Result<TurnResponse, AgentError> {
        Ok(TurnResponse {
            text: self.0.clone(),
            tool_calls: Vec::new(),
        })
    }
}

#[tokio::test]
async fn whole_turn_reasoning_is_not_windowed() {
    let words: Vec<String> = (1..=80).map(|i| format!("w{i}")).collect();
    let frame = Frame::new();
    frame.load_html("https://sandbox.local/", PAGE);
    let page = Arc::new(PageController::new(&frame));
    let runner = AgentRunner::new(
        page,
        Arc::new(WholeTurn(words.join(" "))),
        RunnerConfig::default(),
    );
    let mut rx = runner.subscribe();

    let summary = runner.run_once("explain yourself").await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::BudgetSpent);

    let last = drain(&mut rx).pop().unwrap();
    assert_eq!(last.kind, ActionKind::Reasoning);
    assert_eq!(last.state, ActionState::Completed);
    assert_eq!(last.content, Some(words.join(" ")));
}

#[tokio::test]
async fn stops_after_an_iteration_without_tool_calls() {
    let (_frame, brain, runner) = setup(vec![
        Script::Frames(vec![delta(&format!(
            "<preamble>Shift it</preamble><html>{}</html>",
            directive("moveButton", r##"{"selector":"#start","x":40,"y":60}"##)
        ))]),
        Script::Frames(vec![delta("<preamble>Nothing left to do</preamble>")]),
        Script::Frames(vec![delta("never requested")]),
    ]);

    let summary = runner.run_iterations("move things", 3).await.unwrap();
    assert_eq!(
        summary,
        RunSummary {
            iterations: 2,
            tool_calls: 1,
            outcome: RunOutcome::Exhausted,
        }
    );
    assert!(!runner.is_running());

    let requests = brain.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].iteration, Some(2));
    assert_eq!(requests[0].trace_id, requests[1].trace_id);
    assert_eq!(
        requests[1].active_tools,
        vec!["insertButton", "moveButton", "openPopup"]
    );

    // Leading user turn replaced, tool pair carried over.
    let second = serde_json::to_value(&requests[1].messages).unwrap();
    assert_eq!(second.as_array().unwrap().len(), 3);
    let objective = second[0]["content"].as_str().unwrap();
    assert!(objective.starts_with(
        "Objective: Continue with objective: move things. This is iteration 2 of 3."
    ));
    assert!(objective.contains("Snapshot:\n<html>"));
    assert_eq!(second[1]["content"][0]["type"], json!("tool-call"));
    assert_eq!(second[2]["content"][0]["type"], json!("tool-result"));
}

#[tokio::test]
async fn rescanned_and_resolved_calls_run_once() {
    let call = directive("insertButton", r#"{"text":"Dup"}"#);
    let (frame, _brain, runner) = setup(vec![
        Script::Frames(vec![
            delta(&format!("<preamble>Once</preamble><html>{call}")),
            delta(" <p>more markup"),
            delta("</p></html>"),
            Ok(StreamFrame::ToolInputAvailable {
                tool_name: "insertButton".into(),
                tool_call_id: Some("call-1".into()),
                input: json!({"text": "Dup"}),
            }),
        ]),
        // The same directive again next iteration is still a repeat.
        Script::Frames(vec![delta(&format!("<html>{call}</html>"))]),
    ]);
    let mut rx = runner.subscribe();

    let summary = runner.run_iterations("duplicate", 3).await.unwrap();
    assert_eq!(summary.tool_calls, 1);
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.outcome, RunOutcome::Exhausted);

    let window = frame.content_window().unwrap();
    let inserted = window
        .lock()
        .document()
        .query_selector_all(&format!("[{INSERTED_ATTR}]"))
        .unwrap();
    assert_eq!(inserted.len(), 1);
    assert_eq!(tool_actions(&drain(&mut rx), ActionState::Running).len(), 1);
}

#[tokio::test]
async fn failing_tools_are_reported_and_recorded() {
    let (_frame, _brain, runner) = setup(vec![Script::Frames(vec![delta(&format!(
        "<html>{}{}</html>",
        directive("deleteEverything", "{}"),
        directive("moveButton", r##"{"selector":"#missing","x":1,"y":1}"##)
    ))])]);
    let mut rx = runner.subscribe();

    let summary = runner.run_once("break it").await.unwrap();
    assert_eq!(summary.tool_calls, 2);

    let actions = drain(&mut rx);
    let failed = tool_actions(&actions, ActionState::Error);
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].tool_name.as_deref(), Some("deleteEverything"));
    assert!(failed[0].tool_error.as_ref().unwrap().contains("deleteEverything"));

    let transcript = serde_json::to_value(runner.transcript()).unwrap();
    assert_eq!(transcript.as_array().unwrap().len(), 5);
    let result = &transcript[2]["content"][0];
    assert_eq!(result["type"], json!("tool-result"));
    assert!(result["output"]["error"].is_string());
}

#[tokio::test]
async fn abort_while_awaiting_a_chunk_returns_cleanly() {
    let (_frame, _brain, runner) = setup(vec![Script::Hang(vec![StreamFrame::TextDelta {
        delta: "Thinking about the layout".into(),
    }])]);
    let mut rx = runner.subscribe();

    let task = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run_iterations("stall", 3).await }
    });

    loop {
        let action = rx.recv().await.unwrap();
        if action.content.as_deref() == Some("Thinking about the layout") {
            break;
        }
    }
    assert!(runner.is_running());
    runner.abort();
    assert!(!runner.is_running());

    let summary = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Aborted);
    assert_eq!(summary.iterations, 1);
    assert!(!runner.is_running());
}

#[tokio::test]
async fn second_session_while_running_is_busy() {
    let (_frame, _brain, runner) = setup(vec![Script::Hang(Vec::new())]);
    let task = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run_loop("forever").await }
    });
    while !runner.is_running() {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        runner.run_once("another").await,
        Err(AgentError::Busy)
    ));

    runner.abort();
    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.outcome, RunOutcome::Aborted);
}

#[tokio::test]
async fn transport_failure_ends_the_session() {
    let (_frame, _brain, runner) = setup(vec![Script::Fail("connection refused".into())]);
    let mut rx = runner.subscribe();

    let summary = runner.run_iterations("anything", 3).await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::TransportFailed);
    assert_eq!(summary.iterations, 1);
    assert!(!runner.is_running());

    let last = drain(&mut rx).pop().unwrap();
    assert_eq!(last.kind, ActionKind::Reasoning);
    assert_eq!(last.state, ActionState::Error);
    assert!(last.content.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn empty_frame_is_not_ready() {
    let frame = Frame::new();
    let page = Arc::new(PageController::new(&frame));
    let runner = AgentRunner::new(page, Scripted::new(Vec::new()), RunnerConfig::default());

    let summary = runner.run_once("anything").await.unwrap();
    assert_eq!(summary.outcome, RunOutcome::PageNotReady);
    assert_eq!(summary.tool_calls, 0);
    assert!(!runner.is_running());
}

#[tokio::test]
async fn zero_iterations_do_nothing() {
    let (_frame, brain, runner) = setup(Vec::new());
    let summary = runner.run_iterations("idle", 0).await.unwrap();
    assert_eq!(summary.iterations, 0);
    assert_eq!(summary.outcome, RunOutcome::BudgetSpent);
    assert!(brain.requests().is_empty());
}
