//! Session controller: drives an objective across collaborator turns.
//!
//! Each iteration snapshots the page, asks the collaborator for a turn,
//! and executes every new tool call it names while the turn streams in.
//! Sessions stop when the budget is spent, when a turn produces no new tool
//! calls, on transport failure, or on [`AgentRunner::abort`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::brain::{Collaborator, TurnRequest};
use crate::error::AgentError;
use crate::page::PageController;
use crate::parser::{PreambleView, TurnParser};
use crate::sse::StreamFrame;
use crate::types::{
    ActionState, AgentAction, ChatMessage, PREAMBLE_WINDOW_WORDS, SNAPSHOT_EXCERPT_CHARS, Snapshot,
    ToolCallRecord,
};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pause before every iteration after the first.
    pub iteration_delay: Duration,
    pub snapshot_chars: usize,
    pub window_words: usize,
    /// Buffered actions per subscriber before slow ones start lagging.
    pub action_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            iteration_delay: Duration::from_secs(1),
            snapshot_chars: SNAPSHOT_EXCERPT_CHARS,
            window_words: PREAMBLE_WINDOW_WORDS,
            action_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// A turn produced no new tool calls.
    Exhausted,
    /// Every budgeted iteration ran.
    BudgetSpent,
    Aborted,
    TransportFailed,
    PageNotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub iterations: usize,
    pub tool_calls: usize,
    pub outcome: RunOutcome,
}

/// Per-session bookkeeping.
struct Session<'a> {
    objective: &'a str,
    budget: Option<usize>,
    token: CancellationToken,
    dispatched: HashSet<String>,
    tool_calls: usize,
    iterations: usize,
}

impl Session<'_> {
    fn label(&self, iteration: usize) -> String {
        match self.budget {
            Some(total) => format!("Iteration {iteration}/{total}"),
            None => format!("Iteration {iteration}"),
        }
    }

    fn iteration_objective(&self, iteration: usize) -> String {
        match (iteration, self.budget) {
            (1, _) => self.objective.to_string(),
            (k, Some(total)) => format!(
                "Continue with objective: {}. This is iteration {k} of {total}.",
                self.objective
            ),
            (k, None) => format!(
                "Continue with objective: {}. This is iteration {k}.",
                self.objective
            ),
        }
    }
}

/// Per-turn streaming state.
struct Turn {
    iteration: usize,
    label: String,
    reasoning_id: String,
    parser: TurnParser,
    shown: Option<PreambleView>,
    reasoning_done: bool,
    new_calls: usize,
}

enum IterationEnd {
    Continue { new_calls: usize },
    Stop(RunOutcome),
}

pub struct AgentRunner {
    page: Arc<PageController>,
    brain: Arc<dyn Collaborator>,
    config: RunnerConfig,
    actions: broadcast::Sender<AgentAction>,
    running: AtomicBool,
    generation: AtomicU64,
    cancel: Mutex<CancellationToken>,
    transcript: Mutex<Vec<ChatMessage>>,
    trace_id: Mutex<Option<String>>,
}

impl AgentRunner {
    pub fn new(page: Arc<PageController>, brain: Arc<dyn Collaborator>, config: RunnerConfig) -> Self {
        let (actions, _) = broadcast::channel(config.action_capacity.max(1));
        Self {
            page,
            brain,
            config,
            actions,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            cancel: Mutex::new(CancellationToken::new()),
            transcript: Mutex::new(Vec::new()),
            trace_id: Mutex::new(None),
        }
    }

    /// Live feed of every action emission. Updates reuse the action id.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentAction> {
        self.actions.subscribe()
    }

    pub fn page(&self) -> &Arc<PageController> {
        &self.page
    }

    /// Capabilities advertised to the collaborator.
    pub fn list_tool_schemas(&self) -> BTreeMap<&'static str, Value> {
        self.page.list_tool_schemas()
    }

    pub fn snapshot(&self) -> Result<Snapshot, AgentError> {
        self.page.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.lock().clone()
    }

    /// Trace id shared by every turn this runner sends, once one was sent.
    pub fn trace_id(&self) -> Option<String> {
        self.trace_id.lock().clone()
    }

    /// Stops the current session. The in-flight request is cancelled and
    /// no further tool call is dispatched; one already executing finishes.
    pub fn abort(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("session aborted");
        }
        self.cancel.lock().cancel();
    }

    pub async fn run_once(&self, objective: &str) -> Result<RunSummary, AgentError> {
        self.run_session(objective, Some(1)).await
    }

    pub async fn run_iterations(
        &self,
        objective: &str,
        iterations: usize,
    ) -> Result<RunSummary, AgentError> {
        self.run_session(objective, Some(iterations)).await
    }

    /// Runs until a turn produces no new tool call, or until aborted.
    pub async fn run_loop(&self, objective: &str) -> Result<RunSummary, AgentError> {
        self.run_session(objective, None).await
    }

    fn begin(&self) -> Result<(u64, CancellationToken), AgentError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgentError::Busy);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.transcript.lock().clear();
        self.trace_id
            .lock()
            .get_or_insert_with(|| format!("trace_{:016x}", rand::random::<u64>()));
        Ok((generation, token))
    }

    fn end(&self, generation: u64) {
        // A session started after an abort owns the flag now.
        if self.generation.load(Ordering::SeqCst) == generation {
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn keep_going(&self, token: &CancellationToken) -> bool {
        self.running.load(Ordering::SeqCst) && !token.is_cancelled()
    }

    fn emit(&self, action: AgentAction) {
        debug!(id = %action.id, state = ?action.state, "action");
        let _ = self.actions.send(action);
    }

    async fn run_session(
        &self,
        objective: &str,
        budget: Option<usize>,
    ) -> Result<RunSummary, AgentError> {
        let (generation, token) = self.begin()?;
        info!(objective, ?budget, "session started");

        let mut session = Session {
            objective,
            budget,
            token,
            dispatched: HashSet::new(),
            tool_calls: 0,
            iterations: 0,
        };
        let outcome = self.drive(&mut session).await;
        self.end(generation);

        let summary = RunSummary {
            iterations: session.iterations,
            tool_calls: session.tool_calls,
            outcome,
        };
        info!(?summary, "session finished");
        Ok(summary)
    }

    async fn drive(&self, session: &mut Session<'_>) -> RunOutcome {
        loop {
            let next = session.iterations + 1;
            if session.budget.is_some_and(|total| next > total) {
                return RunOutcome::BudgetSpent;
            }
            if !self.keep_going(&session.token) {
                return RunOutcome::Aborted;
            }
            if next > 1 && !self.config.iteration_delay.is_zero() {
                tokio::select! {
                    _ = session.token.cancelled() => return RunOutcome::Aborted,
                    _ = tokio::time::sleep(self.config.iteration_delay) => {}
                }
            }
            session.iterations = next;

            match self.iterate(session, next).await {
                IterationEnd::Continue { new_calls: 0 } => {
                    info!(iteration = next, "no new tool calls, objective exhausted");
                    return RunOutcome::Exhausted;
                }
                IterationEnd::Continue { .. } => {}
                IterationEnd::Stop(outcome) => return outcome,
            }
        }
    }

    async fn iterate(&self, session: &mut Session<'_>, iteration: usize) -> IterationEnd {
        let label = session.label(iteration);
        let reasoning_id = format!("reasoning-{iteration}-{}", Utc::now().timestamp_millis());

        let snapshot = match self.page.snapshot() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, "snapshot failed");
                self.emit(AgentAction::reasoning(
                    &reasoning_id,
                    format!("{label}: Page is not ready: {err}"),
                    ActionState::Error,
                ));
                return IterationEnd::Stop(RunOutcome::PageNotReady);
            }
        };

        let user_turn = format!(
            "Objective: {}\n\nSnapshot:\n{}",
            session.iteration_objective(iteration),
            excerpt(&snapshot.html, self.config.snapshot_chars)
        );
        let messages = {
            let mut transcript = self.transcript.lock();
            match transcript.first_mut() {
                Some(first) => *first = ChatMessage::user(user_turn),
                None => transcript.push(ChatMessage::user(user_turn)),
            }
            transcript.clone()
        };

        self.emit(AgentAction::reasoning(
            &reasoning_id,
            format!("{label}: Analyzing current state and planning next actions..."),
            ActionState::Running,
        ));

        let request = TurnRequest {
            messages,
            active_tools: self.page.tool_names().into_iter().map(String::from).collect(),
            trace_id: self.trace_id(),
            iteration: Some(iteration),
        };
        info!(iteration, "requesting turn");

        let opened = tokio::select! {
            _ = session.token.cancelled() => Err(AgentError::Cancelled),
            stream = self.brain.stream(request) => stream,
        };
        let mut frames = match opened {
            Ok(frames) => frames,
            Err(err) => return self.fail_turn(&reasoning_id, &label, err),
        };

        let mut turn = Turn {
            iteration,
            label,
            reasoning_id,
            parser: TurnParser::new(self.config.window_words),
            shown: None,
            reasoning_done: false,
            new_calls: 0,
        };

        loop {
            if !self.keep_going(&session.token) {
                return self.fail_turn(&turn.reasoning_id, &turn.label, AgentError::Cancelled);
            }
            let next = tokio::select! {
                _ = session.token.cancelled() => {
                    return self.fail_turn(&turn.reasoning_id, &turn.label, AgentError::Cancelled);
                }
                next = frames.next() => next,
            };
            match next {
                None => break,
                Some(Err(err)) => return self.fail_turn(&turn.reasoning_id, &turn.label, err),
                Some(Ok(StreamFrame::TextDelta { delta })) => {
                    turn.parser.push(&delta);
                    self.on_text(session, &mut turn).await;
                }
                Some(Ok(StreamFrame::Text { text })) => {
                    turn.parser.complete_with(&text);
                    self.on_text(session, &mut turn).await;
                }
                Some(Ok(StreamFrame::ToolInputAvailable {
                    tool_name,
                    tool_call_id,
                    input,
                })) => {
                    let call = ToolCallRecord::from_input(&tool_name, tool_call_id, input);
                    self.dispatch(session, &mut turn, call).await;
                }
                Some(Ok(StreamFrame::Other)) => {}
            }
        }

        // A closing tag in the very last chunk only completes here.
        for call in turn.parser.directives() {
            self.dispatch(session, &mut turn, call).await;
        }

        if !turn.reasoning_done {
            let view = turn.parser.finish();
            let content = if view.text.is_empty() {
                format!(
                    "{}: Analysis complete. Executed {} tools.",
                    turn.label, turn.new_calls
                )
            } else {
                view.text
            };
            self.emit(AgentAction::reasoning(
                &turn.reasoning_id,
                content,
                ActionState::Completed,
            ));
        }

        IterationEnd::Continue {
            new_calls: turn.new_calls,
        }
    }

    fn fail_turn(&self, reasoning_id: &str, label: &str, err: AgentError) -> IterationEnd {
        let (content, outcome) = match err {
            AgentError::Cancelled => (format!("{label}: Aborted"), RunOutcome::Aborted),
            other => {
                warn!(err = %other, "turn failed");
                (
                    format!("{label}: Failed to get response from agent: {other}"),
                    RunOutcome::TransportFailed,
                )
            }
        };
        self.emit(AgentAction::reasoning(reasoning_id, content, ActionState::Error));
        IterationEnd::Stop(outcome)
    }

    /// Refreshes the reasoning action and dispatches directives that became
    /// complete with the latest text.
    async fn on_text(&self, session: &mut Session<'_>, turn: &mut Turn) {
        let view = turn.parser.preamble();
        if !view.text.is_empty() && turn.shown.as_ref() != Some(&view) {
            let state = if view.complete {
                ActionState::Completed
            } else {
                ActionState::Running
            };
            turn.reasoning_done = view.complete;
            self.emit(AgentAction::reasoning(&turn.reasoning_id, view.text.clone(), state));
            turn.shown = Some(view);
        }

        for call in turn.parser.directives() {
            self.dispatch(session, turn, call).await;
        }
    }

    /// Executes `call` unless its dedup key already ran this session.
    async fn dispatch(&self, session: &mut Session<'_>, turn: &mut Turn, call: ToolCallRecord) {
        if session.dispatched.contains(&call.dedup_key) {
            return;
        }
        if !self.keep_going(&session.token) {
            debug!(tool = %call.tool_name, "not dispatching after abort");
            return;
        }
        session.dispatched.insert(call.dedup_key.clone());
        session.tool_calls += 1;
        turn.new_calls += 1;

        let tool_id = format!(
            "tool-{}-{}-{}",
            turn.iteration,
            call.tool_call_id.as_deref().unwrap_or("call"),
            session.tool_calls
        );
        let running = AgentAction::tool_running(&tool_id, &call);
        self.emit(running.clone());
        info!(tool = %call.tool_name, args = %call.raw_arguments, "dispatching tool");

        let output = match self.page.run_tool(&call.tool_name, &call.arguments).await {
            Ok(output) => {
                self.emit(running.completed(output.clone()));
                output
            }
            Err(err) => {
                warn!(tool = %call.tool_name, %err, "tool failed");
                let message = err.to_string();
                self.emit(running.failed(message.clone()));
                json!({ "error": message })
            }
        };

        let mut transcript = self.transcript.lock();
        transcript.push(ChatMessage::tool_call(&call));
        transcript.push(ChatMessage::tool_result(&call, output));
    }
}

/// At most `max` characters of `html`, cut on a character boundary.
fn excerpt(html: &str, max: usize) -> &str {
    match html.char_indices().nth(max) {
        Some((end, _)) => &html[..end],
        None => html,
    }
}
