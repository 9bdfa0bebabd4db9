//! System message construction
//!
//! The session's single system message is the configured base prompt,
//! optionally followed by guidance about the payload filter pattern.

/// Prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with deep knowledge of System Center Operations Manager, Grafana, telemetry and monitoring. When given a grafana dashboard panel json string you are able to explain what telemetry it is and what it represents.";

/// Build the system message content.
///
/// The pattern is carried as opaque text; it is never compiled or applied
/// here. A blank pattern adds nothing.
pub fn build_system_prompt(base: &str, payload_pattern: Option<&str>) -> String {
    let base = base.trim();
    match payload_pattern.map(str::trim).filter(|p| !p.is_empty()) {
        Some(pattern) => format!(
            "{base}\n\nWhen describing a dashboard, focus on the parts of the content payload matching this regular expression: {pattern}"
        ),
        None => base.to_string(),
    }
}
