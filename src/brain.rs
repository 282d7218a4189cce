//! The collaborator seam: whatever produces a turn for the agent.
//!
//! The runner only sees [`Collaborator`]. [`HttpBrain`] is the production
//! implementation, posting the transcript to an agent endpoint and reading
//! either a JSON turn or an event stream of frames back.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::sse::{SseDecoder, StreamFrame, decode_frame};
use crate::types::ChatMessage;

pub type FrameStream = BoxStream<'static, Result<StreamFrame, AgentError>>;

const FRAME_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub messages: Vec<ChatMessage>,
    pub active_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
}

/// A whole turn, as returned by a non-streaming collaborator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub input: Value,
}

impl TurnResponse {
    /// The same turn as the frames a streaming collaborator would send:
    /// the full text first, then one resolved tool call per entry.
    pub fn into_frames(self) -> Vec<StreamFrame> {
        let text = (!self.text.is_empty()).then_some(StreamFrame::Text { text: self.text });
        text.into_iter()
            .chain(self.tool_calls.into_iter().map(|call| StreamFrame::ToolInputAvailable {
                tool_name: call.tool_name,
                tool_call_id: call.tool_call_id,
                input: call.input,
            }))
            .collect()
    }
}

#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn complete(&self, request: TurnRequest) -> Result<TurnResponse, AgentError>;

    /// Streams the turn. Collaborators without native streaming get their
    /// complete response replayed as frames.
    async fn stream(&self, request: TurnRequest) -> Result<FrameStream, AgentError> {
        let response = self.complete(request).await?;
        Ok(stream::iter(response.into_frames().into_iter().map(Ok)).boxed())
    }
}

/// Collaborator reached over HTTP.
pub struct HttpBrain {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpBrain {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, request: &TurnRequest, accept: &str) -> Result<reqwest::Response, AgentError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, accept)
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "collaborator request failed");
            return Err(AgentError::Transport(format!("collaborator returned {status}: {body}")));
        }
        Ok(response)
    }
}

#[async_trait]
impl Collaborator for HttpBrain {
    async fn complete(&self, request: TurnRequest) -> Result<TurnResponse, AgentError> {
        let response = self.post(&request, "application/json").await?;
        Ok(response.json::<TurnResponse>().await?)
    }

    async fn stream(&self, request: TurnRequest) -> Result<FrameStream, AgentError> {
        let response = self.post(&request, "text/event-stream").await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if is_json {
            debug!("collaborator answered with a whole turn");
            let turn = response.json::<TurnResponse>().await?;
            return Ok(stream::iter(turn.into_frames().into_iter().map(Ok)).boxed());
        }

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut bytes = Box::pin(response.bytes_stream());
            let mut decoder = SseDecoder::new();
            loop {
                let chunk = tokio::select! {
                    _ = tx.closed() => return,
                    chunk = bytes.next() => chunk,
                };
                let (payloads, ended) = match chunk {
                    Some(Ok(chunk)) => (decoder.push_bytes(&chunk), false),
                    Some(Err(err)) => {
                        let _ = tx.send(Err(AgentError::from(err))).await;
                        return;
                    }
                    None => (decoder.finish(), true),
                };
                for frame in payloads.iter().filter_map(|p| decode_frame(p)) {
                    if tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
                if ended {
                    return;
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Canned(TurnResponse);

    #[async_trait]
    impl Collaborator for Canned {
        async fn complete(&self, _request: TurnRequest) -> Result<TurnResponse, AgentError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn request_uses_wire_names() {
        let request = TurnRequest {
            messages: vec![ChatMessage::user("Objective: x")],
            active_tools: vec!["openPopup".into()],
            trace_id: Some("trace_1".into()),
            iteration: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "messages": [{"role": "user", "content": "Objective: x"}],
                "activeTools": ["openPopup"],
                "traceId": "trace_1"
            })
        );
    }

    #[tokio::test]
    async fn whole_turns_replay_as_frames() {
        let turn: TurnResponse = serde_json::from_value(json!({
            "text": "Moving things around",
            "toolCalls": [{"toolName": "openPopup", "toolCallId": "c1", "input": {}}]
        }))
        .unwrap();
        let frames: Vec<_> = Canned(turn)
            .stream(TurnRequest {
                messages: Vec::new(),
                active_tools: Vec::new(),
                trace_id: None,
                iteration: Some(1),
            })
            .await
            .unwrap()
            .collect()
            .await;
        let frames: Vec<StreamFrame> = frames.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            frames,
            vec![
                StreamFrame::Text { text: "Moving things around".into() },
                StreamFrame::ToolInputAvailable {
                    tool_name: "openPopup".into(),
                    tool_call_id: Some("c1".into()),
                    input: json!({}),
                },
            ]
        );
    }

    #[test]
    fn empty_text_adds_no_frame() {
        assert!(TurnResponse::default().into_frames().is_empty());
    }
}
