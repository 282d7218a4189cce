use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Characters of snapshot HTML included in a turn's user message.
pub const SNAPSHOT_EXCERPT_CHARS: usize = 40_000;

/// Words shown by the streaming preamble view before a boundary is known.
pub const PREAMBLE_WINDOW_WORDS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Reasoning,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Running,
    Completed,
    Error,
}

/// One entry of the live action feed. A later emission with the same `id`
/// replaces the earlier one, so observers can render transitions in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,
    pub state: ActionState,
}

impl AgentAction {
    pub fn reasoning(id: &str, content: impl Into<String>, state: ActionState) -> Self {
        Self {
            id: id.to_string(),
            kind: ActionKind::Reasoning,
            timestamp: Utc::now(),
            content: Some(content.into()),
            tool_name: None,
            tool_input: None,
            tool_output: None,
            tool_error: None,
            state,
        }
    }

    pub fn tool_running(id: &str, call: &ToolCallRecord) -> Self {
        Self {
            id: id.to_string(),
            kind: ActionKind::Tool,
            timestamp: Utc::now(),
            content: None,
            tool_name: Some(call.tool_name.clone()),
            tool_input: Some(call.arguments.clone()),
            tool_output: None,
            tool_error: None,
            state: ActionState::Running,
        }
    }

    pub fn completed(mut self, output: Value) -> Self {
        self.timestamp = Utc::now();
        self.tool_output = Some(output);
        self.state = ActionState::Completed;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.timestamp = Utc::now();
        self.tool_error = Some(error.into());
        self.state = ActionState::Error;
        self
    }
}

/// Page state handed to the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub html: String,
    pub inputs: Vec<InputField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputField {
    pub selector: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A message in the transcript sent to the collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    #[serde(rename_all = "camelCase")]
    ToolCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        tool_name: String,
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        tool_name: String,
        output: Value,
    },
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_call(call: &ToolCallRecord) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(vec![MessagePart::ToolCall {
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                input: call.arguments.clone(),
            }]),
        }
    }

    pub fn tool_result(call: &ToolCallRecord, output: Value) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![MessagePart::ToolResult {
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                output,
            }]),
        }
    }
}

/// A tool-call directive, from parsed text or a resolved stream frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub raw_arguments: String,
    pub arguments: Value,
    pub dedup_key: String,
}

impl ToolCallRecord {
    /// Builds a record from directive text. Arguments that are not valid
    /// JSON become an empty object rather than dropping the call.
    pub fn new(tool_name: &str, raw_arguments: &str) -> Self {
        let arguments = serde_json::from_str::<Value>(raw_arguments.trim())
            .unwrap_or_else(|_| Value::Object(Default::default()));
        let mut record = Self::from_input(tool_name, None, arguments);
        record.raw_arguments = raw_arguments.to_string();
        record
    }

    pub fn from_input(tool_name: &str, tool_call_id: Option<String>, input: Value) -> Self {
        let tool_name = tool_name.trim().to_string();
        let raw_arguments = input.to_string();
        Self {
            dedup_key: format!("{tool_name}:{raw_arguments}"),
            tool_name,
            tool_call_id,
            raw_arguments,
            arguments: input,
        }
    }
}
