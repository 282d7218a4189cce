use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, bail};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use page_saboteur::{AgentAction, AgentRunner};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// An objective queued from the console.
#[derive(Debug, Clone)]
pub struct Command {
    pub objective: String,
    pub iterations: Option<usize>,
}

#[derive(Clone)]
struct AppState {
    runner: Arc<AgentRunner>,
    cmd_tx: mpsc::Sender<Command>,
}

#[derive(Deserialize)]
struct CommandPayload {
    objective: String,
    #[serde(default)]
    iterations: Option<usize>,
}

/// Binds the console on the first free port from `first_port` up and
/// serves it in the background. Queued objectives come out of the
/// returned receiver.
pub async fn start_server(
    runner: Arc<AgentRunner>,
    first_port: u16,
) -> Result<mpsc::Receiver<Command>> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(1);
    let state = Arc::new(AppState { runner, cmd_tx });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/events", get(sse_handler))
        .route("/command", post(command_handler))
        .route("/abort", post(abort_handler))
        .route("/tools", get(tools_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for port in first_port..first_port.saturating_add(10) {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                bound = Some((listener, port));
                break;
            }
            Err(err) => debug!(port, %err, "port unavailable"),
        }
    }
    let Some((listener, port)) = bound else {
        bail!(
            "could not bind any port {first_port}-{}; stop the old agent first",
            first_port.saturating_add(9)
        );
    };

    info!("console running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!(%err, "console server stopped");
        }
    });

    Ok(cmd_rx)
}

async fn index_handler() -> Html<&'static str> {
    debug!("GET /");
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> Response {
    info!(objective = %payload.objective, "POST /command");
    let objective = payload.objective.trim().to_string();
    if objective.is_empty() {
        return (StatusCode::BAD_REQUEST, "objective is empty").into_response();
    }
    if state.runner.is_running() {
        return (StatusCode::CONFLICT, "a session is already running").into_response();
    }
    let command = Command {
        objective,
        iterations: payload.iterations,
    };
    match state.cmd_tx.try_send(command) {
        Ok(()) => (StatusCode::ACCEPTED, "queued").into_response(),
        Err(_) => (StatusCode::CONFLICT, "a session is already queued").into_response(),
    }
}

async fn abort_handler(State(state): State<Arc<AppState>>) -> &'static str {
    info!("POST /abort");
    state.runner.abort();
    "ok"
}

async fn tools_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.runner.page().registry().descriptors())
}

async fn snapshot_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.runner.snapshot() {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.runner.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(action) => to_sse_event(&action).map(Ok::<_, Infallible>),
        Err(err) => {
            debug!(%err, "console feed lagged");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(action: &AgentAction) -> Option<Event> {
    Event::default().event("action").json_data(action).ok()
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Page Saboteur</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 32px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 20px; font-weight: 600; color: #fff; }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 860px;
    width: 100%;
    margin: 0 auto;
    padding: 24px 32px;
    gap: 16px;
    overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 8px; }
  .entry {
    padding: 10px 14px;
    border-radius: 8px;
    font-size: 14px;
    line-height: 1.5;
    background: #111118;
    border-left: 3px solid #3b82f6;
    white-space: pre-wrap;
  }
  .entry.reasoning { border-left-color: #f59e0b; }
  .entry.completed { border-left-color: #22c55e; }
  .entry.error { border-left-color: #ef4444; color: #fca5a5; }
  .entry .tag { color: #6366f1; font-weight: 700; margin-right: 8px; }
  .input-area { display: flex; gap: 8px; }
  input {
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  #objective { flex: 1; }
  #iterations { width: 80px; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 20px;
    font-size: 15px;
    font-weight: 600;
    cursor: pointer;
  }
  button.stop { background: #b91c1c; }
</style>
</head>
<body>
  <header><h1>Page Saboteur</h1></header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input id="objective" placeholder="What should the agent break?" autofocus />
      <input id="iterations" type="number" min="1" value="3" />
      <button onclick="send()">Run</button>
      <button class="stop" onclick="fetch('/abort', {method: 'POST'})">Abort</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const objective = document.getElementById('objective');
  const iterations = document.getElementById('iterations');
  const entries = new Map();

  function esc(s) { return String(s).replace(/</g, '&lt;'); }

  function render(a) {
    let div = entries.get(a.id);
    if (!div) {
      div = document.createElement('div');
      entries.set(a.id, div);
      log.appendChild(div);
    }
    div.className = 'entry ' + a.type + ' ' + a.state;
    if (a.type === 'reasoning') {
      div.innerHTML = esc(a.content || '');
    } else {
      const detail = a.state === 'error' ? a.toolError : JSON.stringify(a.toolOutput ?? a.toolInput);
      div.innerHTML = '<span class="tag">' + esc(a.toolName) + '</span>' + esc(detail || '');
    }
    log.scrollTop = log.scrollHeight;
  }

  async function send() {
    const text = objective.value.trim();
    if (!text) return;
    const res = await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({objective: text, iterations: Number(iterations.value) || undefined}),
    });
    if (!res.ok) alert(await res.text());
  }

  objective.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  es.addEventListener('action', e => render(JSON.parse(e.data)));
</script>
</body>
</html>
"##;
