//! Adversarial page agent.
//!
//! Drives an LLM-backed agent that sabotages a sandboxed page (inserting
//! buttons, moving controls, opening popups) while keeping the page from
//! escaping its frame. The pieces, leaves first:
//!
//! - [`dom`]: in-memory document, selector engine and window model.
//! - [`selector`]: stable selectors for elements across snapshots.
//! - [`tools`]: the closed set of page-mutating capabilities.
//! - [`page`]: the frame-scoped page controller and navigation guards.
//! - [`parser`] / [`sse`]: streamed turn parsing and transport framing.
//! - [`brain`]: the collaborator seam the runner talks to.
//! - [`runner`]: the multi-iteration session controller.
//! - [`pages`]: the built-in page the host binary falls back to.

pub mod brain;
pub mod dom;
pub mod error;
pub mod page;
pub mod pages;
pub mod parser;
pub mod runner;
pub mod selector;
pub mod sse;
pub mod tools;
pub mod types;

pub use brain::{Collaborator, FrameStream, HttpBrain, TurnRequest, TurnResponse};
pub use dom::{Document, NodeId, SharedWindow, Window};
pub use error::{AgentError, ToolError};
pub use page::{Frame, PageController};
pub use runner::{AgentRunner, RunOutcome, RunSummary, RunnerConfig};
pub use types::{ActionKind, ActionState, AgentAction, ChatMessage, Snapshot, ToolCallRecord};
