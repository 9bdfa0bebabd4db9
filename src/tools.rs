//! Tools offered to the model
//!
//! Tools are stateless singletons; everything a call needs arrives through
//! [`ToolContext`].

mod analyze_dashboard;

pub use analyze_dashboard::AnalyzeDashboardTool;

use crate::llm::{FunctionDefinition, ParameterSchema, ToolDefinition, ToolKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }

    /// Text placed in the `tool` message sent back to the model
    pub fn into_content(self) -> String {
        if self.success {
            self.output
        } else {
            format!("Error: {}", self.output)
        }
    }
}

/// All context needed for a tool invocation.
///
/// Created fresh for each call. `ambient` is the most recent dashboard/panel
/// context object received by the session, if any.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Fires when the turn is cancelled; tools check it before producing output
    pub cancel: CancellationToken,
    pub ambient: Option<Arc<Value>>,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, ambient: Option<Arc<Value>>) -> Self {
        Self { cancel, ambient }
    }
}

/// Trait for tools the model may call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    fn parameters(&self) -> ParameterSchema;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            kind: ToolKind::Function,
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description(),
                parameters: self.parameters(),
            },
        }
    }

    /// Execute the tool. `input` is the call's parsed arguments.
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// The model asked for a tool that was never declared
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown tool: {name}")]
pub struct UnknownToolError {
    pub name: String,
}

/// Fixed, ordered collection of tools shared by every turn of a session
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    definitions: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let definitions = tools.iter().map(|t| t.definition()).collect();
        Self { tools, definitions }
    }

    /// Registry with the dashboard analysis tool
    pub fn standard() -> Self {
        Self::new(vec![Arc::new(AnalyzeDashboardTool)])
    }

    /// Registry that declares nothing
    #[cfg(test)]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Declarations sent with every backend call, in registration order
    pub fn list(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>, UnknownToolError> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| UnknownToolError {
                name: name.to_string(),
            })
    }
}
