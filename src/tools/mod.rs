//! Page-mutating capabilities offered to the collaborator.
//!
//! The set is closed: [`ToolKind`] has one variant per tool and the
//! registry maps wire names onto it. Arguments are deserialized into the
//! tool's typed input before anything touches the document, so a call that
//! fails validation never mutates the page.

mod insert_button;
mod marking;
mod move_button;
mod open_popup;

use std::collections::{BTreeMap, HashMap};

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::dom::{Document, NodeId, SharedWindow};
use crate::error::ToolError;

pub use insert_button::InsertButtonArgs;
pub use marking::{
    AGENT_ID_ATTR, INSERTED_ATTR, MODIFIED_ATTR, OUTLINE_ATTR, OUTLINE_CLEAR_DELAY,
};
pub use move_button::MoveButtonArgs;
pub use open_popup::OpenPopupArgs;

/// Resolves an element to a selector that should survive later snapshots.
pub type SelectorResolver = fn(&Document, NodeId) -> Option<String>;

/// What an executor gets to work with. Built fresh for every call.
#[derive(Clone)]
pub struct ToolContext {
    pub window: SharedWindow,
    pub resolve: SelectorResolver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    OpenPopup,
    MoveButton,
    InsertButton,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::OpenPopup, ToolKind::MoveButton, ToolKind::InsertButton];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::OpenPopup => "openPopup",
            ToolKind::MoveButton => "moveButton",
            ToolKind::InsertButton => "insertButton",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::OpenPopup => {
                "Open a popup or modal by clicking an element. Without a selector the first \
                 popup-like control on the page is used."
            }
            ToolKind::MoveButton => "Move an element to an absolute position in pixels.",
            ToolKind::InsertButton => {
                "Insert a button with text and optional id/class into a target container."
            }
        }
    }

    pub fn input_schema(self) -> Value {
        match self {
            ToolKind::OpenPopup => schema::<OpenPopupArgs>(),
            ToolKind::MoveButton => schema::<MoveButtonArgs>(),
            ToolKind::InsertButton => schema::<InsertButtonArgs>(),
        }
    }

    /// Checks `args` against this tool's input type. A JSON `null` is read
    /// as an empty object so tools without required fields accept it.
    pub fn validate(self, args: &Value) -> Result<ToolInput, ToolError> {
        Ok(match self {
            ToolKind::OpenPopup => ToolInput::OpenPopup(parse_args(self, args)?),
            ToolKind::MoveButton => ToolInput::MoveButton(parse_args(self, args)?),
            ToolKind::InsertButton => ToolInput::InsertButton(parse_args(self, args)?),
        })
    }
}

/// Validated arguments, ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    OpenPopup(OpenPopupArgs),
    MoveButton(MoveButtonArgs),
    InsertButton(InsertButtonArgs),
}

impl ToolInput {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolInput::OpenPopup(_) => ToolKind::OpenPopup,
            ToolInput::MoveButton(_) => ToolKind::MoveButton,
            ToolInput::InsertButton(_) => ToolKind::InsertButton,
        }
    }

    pub async fn execute(self, ctx: &ToolContext) -> Result<Value, ToolError> {
        debug!(tool = self.kind().name(), "executing tool");
        match self {
            ToolInput::OpenPopup(args) => open_popup::run(ctx, args).await,
            ToolInput::MoveButton(args) => move_button::run(ctx, args).await,
            ToolInput::InsertButton(args) => insert_button::run(ctx, args).await,
        }
    }
}

/// Advertised shape of a tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Name-keyed lookup over the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    by_name: HashMap<&'static str, ToolKind>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolRegistry {
    pub fn builtin() -> Self {
        Self {
            by_name: ToolKind::ALL.iter().map(|k| (k.name(), *k)).collect(),
        }
    }

    /// Unknown names are `None`; callers decide how to report them.
    pub fn get(&self, name: &str) -> Option<ToolKind> {
        self.by_name.get(name).copied()
    }

    /// Tool names in a stable order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.by_name.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn list_schemas(&self) -> BTreeMap<&'static str, Value> {
        self.by_name
            .iter()
            .map(|(name, kind)| (*name, kind.input_schema()))
            .collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.names()
            .into_iter()
            .filter_map(|name| self.get(name))
            .map(|kind| ToolDescriptor {
                name: kind.name(),
                description: kind.description(),
                input_schema: kind.input_schema(),
            })
            .collect()
    }
}

fn schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

fn parse_args<T: DeserializeOwned>(kind: ToolKind, args: &Value) -> Result<T, ToolError> {
    let args = match args {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(args).map_err(|e| ToolError::Validation {
        tool: kind.name(),
        reason: e.to_string(),
    })
}

/// The document must have a root element before any tool can act on it.
fn ensure_ready(doc: &Document) -> Result<NodeId, ToolError> {
    doc.document_element()
        .ok_or(ToolError::Unsupported("document has no root element"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_lists_every_tool() {
        let registry = ToolRegistry::builtin();
        assert_eq!(registry.names(), vec!["insertButton", "moveButton", "openPopup"]);
        assert_eq!(registry.get("moveButton"), Some(ToolKind::MoveButton));
        assert_eq!(registry.get("deleteEverything"), None);

        let schemas = registry.list_schemas();
        let required = &schemas["moveButton"]["required"];
        for field in ["selector", "x", "y"] {
            assert!(required.as_array().unwrap().contains(&json!(field)), "{field}");
        }
        assert!(schemas["insertButton"]["properties"].get("targetSelector").is_some());
    }

    #[test]
    fn validation_rejects_missing_fields() {
        let err = ToolKind::MoveButton.validate(&json!({"selector": "#x"})).unwrap_err();
        assert!(matches!(err, ToolError::Validation { tool: "moveButton", .. }));
        let err = ToolKind::MoveButton
            .validate(&json!({"selector": "#x", "x": "ten", "y": 1}))
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[test]
    fn null_reads_as_empty_object() {
        assert_eq!(
            ToolKind::OpenPopup.validate(&Value::Null).unwrap(),
            ToolInput::OpenPopup(OpenPopupArgs::default())
        );
        assert!(ToolKind::InsertButton.validate(&json!("body")).is_err());
    }

    #[test]
    fn validated_input_knows_its_tool() {
        let args = json!({"selector": "#a", "x": 1, "y": 2, "text": "t"});
        for kind in ToolKind::ALL {
            let args = if kind == ToolKind::MoveButton { args.clone() } else { json!({}) };
            assert_eq!(kind.validate(&args).unwrap().kind(), kind);
        }
    }
}
