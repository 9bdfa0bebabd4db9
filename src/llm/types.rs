//! Common types for chat interactions
//!
//! The message shapes follow the `chat/completions` wire format so that a
//! snapshot of the log can be sent to the backend without reshaping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

// ============================================================================
// Messages
// ============================================================================

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn-level record of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Absent on a pure tool-call announcement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Set on `tool` messages; links to the invoking call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `assistant` messages that requested invocations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn with_role(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Some(text.into()))
    }

    /// Assistant message announcing tool invocations, without text
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, None)
        }
    }

    /// Result of a tool invocation, correlated by call id
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, Some(content.into()))
        }
    }

    /// Text content, or the empty string when absent
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ============================================================================
// Tool calls
// ============================================================================

/// A model-requested invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned, stable across streamed fragments of the same call
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ToolKind,
    pub function: FunctionCall,
}

/// Function name plus its raw argument text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Opaque JSON text, accumulated incrementally while streaming
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ToolKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the argument text as JSON.
    ///
    /// Blank arguments become an empty object. Text that is not valid JSON is
    /// kept verbatim as a string value so the tool can still see it.
    pub fn parsed_arguments(&self) -> Value {
        let trimmed = self.function.arguments.trim();
        if trimmed.is_empty() {
            return Value::Object(Map::new());
        }
        serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
    }
}

// ============================================================================
// Tool declarations
// ============================================================================

/// Discriminator for tool declarations; only functions exist today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Function,
}

/// A capability declaration offered to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

/// JSON schema subset describing a tool's parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl ParameterSchema {
    /// An object schema with no parameters
    pub fn empty_object() -> Self {
        Self {
            schema_type: "object".to_string(),
            required: Vec::new(),
            properties: Map::new(),
        }
    }
}

// ============================================================================
// Requests and streamed deltas
// ============================================================================

/// One backend call: the full log plus the declared tools
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Arc<[Message]>,
    pub tools: Vec<ToolDefinition>,
}

/// One incremental fragment of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub choices: Vec<DeltaChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaChoice {
    #[serde(default)]
    pub delta: DeltaPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Partial tool call; `id` and `name` usually arrive only on the first fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// What a single delta contributes, with the optional fields resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaFragment<'a> {
    /// Neither content nor tool calls; folds as a no-op
    Empty,
    Content(&'a str),
    ToolCalls(&'a [ToolCallDelta]),
    Mixed {
        content: &'a str,
        tool_calls: &'a [ToolCallDelta],
    },
}

#[cfg(test)]
impl ChatDelta {
    /// Delta carrying a content fragment
    pub fn content(text: impl Into<String>) -> Self {
        Self::from_payload(DeltaPayload {
            content: Some(text.into()),
            tool_calls: None,
        })
    }

    /// Delta carrying tool-call fragments
    pub fn tool_calls(fragments: Vec<ToolCallDelta>) -> Self {
        Self::from_payload(DeltaPayload {
            content: None,
            tool_calls: Some(fragments),
        })
    }

    fn from_payload(delta: DeltaPayload) -> Self {
        Self {
            choices: vec![DeltaChoice {
                delta,
                finish_reason: None,
            }],
        }
    }
}

impl ChatDelta {
    /// Classify the first choice. Only the first choice is ever consumed.
    pub fn fragment(&self) -> DeltaFragment<'_> {
        let Some(choice) = self.choices.first() else {
            return DeltaFragment::Empty;
        };
        let content = choice.delta.content.as_deref().filter(|c| !c.is_empty());
        let tool_calls = choice
            .delta
            .tool_calls
            .as_deref()
            .filter(|calls| !calls.is_empty());

        match (content, tool_calls) {
            (None, None) => DeltaFragment::Empty,
            (Some(content), None) => DeltaFragment::Content(content),
            (None, Some(tool_calls)) => DeltaFragment::ToolCalls(tool_calls),
            (Some(content), Some(tool_calls)) => DeltaFragment::Mixed {
                content,
                tool_calls,
            },
        }
    }
}

#[cfg(test)]
impl ToolCallDelta {
    /// First fragment of a call: establishes id and name
    pub fn start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            id: Some(id.into()),
            kind: Some("function".to_string()),
            function: Some(FunctionCallDelta {
                name: Some(name.into()),
                arguments: None,
            }),
        }
    }

    /// Follow-up fragment carrying more argument text
    pub fn arguments(index: u32, fragment: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            id: None,
            kind: None,
            function: Some(FunctionCallDelta {
                name: None,
                arguments: Some(fragment.into()),
            }),
        }
    }

    pub fn with_arguments(mut self, fragment: impl Into<String>) -> Self {
        let function = self.function.get_or_insert_with(FunctionCallDelta::default);
        function.arguments = Some(fragment.into());
        self
    }
}
