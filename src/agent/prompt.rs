//! System instructions sent with every request.

use std::fmt::Write;

use super::tool::ToolDefinition;

/// Base instructions for the assistant.
pub const BASE_INSTRUCTIONS: &str = "You are a helpful and knowledgeable AI assistant running on a locally hosted open-weight model.

You should:
- Be concise but thorough in your responses
- Explain your reasoning when solving complex problems
- Ask clarifying questions when the request is ambiguous
- Be honest about the limits of your knowledge";

/// Guidance appended when web tools are available.
const TOOL_GUIDANCE: &str = "When you use a tool:
1. Call it only when it is needed to answer the question
2. Base your answer on what the tool returned and cite sources when you can
3. Always finish with a direct answer to the user's question";

/// Builds the instructions for a session.
///
/// Custom instructions replace the defaults entirely. Otherwise the base text
/// is extended with the tool catalog, and only when there is one.
#[must_use]
pub fn build_instructions(custom: Option<&str>, tools: &[ToolDefinition]) -> String {
    if let Some(custom) = custom.map(str::trim).filter(|s| !s.is_empty()) {
        return custom.to_string();
    }

    let mut text = BASE_INSTRUCTIONS.to_string();
    if tools.is_empty() {
        return text;
    }

    text.push_str("\n\nYou have access to the following tools ONLY:\n");
    for tool in tools {
        let _ = writeln!(text, "- {}: {}", tool.name, tool.description);
    }
    text.push_str("\nDo NOT attempt to call any other tool; none exist.\n\n");
    text.push_str(TOOL_GUIDANCE);
    text
}
