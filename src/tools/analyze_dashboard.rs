//! Dashboard analysis tool - hands the ambient dashboard/panel context to the model

use super::{Tool, ToolContext, ToolOutput};
use crate::llm::ParameterSchema;
use async_trait::async_trait;
use serde_json::Value;

pub struct AnalyzeDashboardTool;

#[async_trait]
impl Tool for AnalyzeDashboardTool {
    fn name(&self) -> &'static str {
        "analyze_dashboard"
    }

    fn description(&self) -> String {
        "Return the JSON description of the Grafana dashboard or panel the user is currently looking at. Call this when the question refers to \"this panel\", \"this dashboard\" or the telemetry being displayed.".to_string()
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::empty_object()
    }

    async fn run(&self, _input: Value, ctx: ToolContext) -> ToolOutput {
        if ctx.cancel.is_cancelled() {
            return ToolOutput::error("cancelled");
        }
        let Some(context) = ctx.ambient else {
            return ToolOutput::error("no dashboard or panel context has been received");
        };
        match serde_json::to_string(context.as_ref()) {
            Ok(text) => ToolOutput::success(text),
            Err(e) => ToolOutput::error(format!("failed to serialize context: {e}")),
        }
    }
}
