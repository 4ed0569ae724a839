use chatflow_traits::ToolSchema;

use crate::llm::Message;

/// Assemble the request for one iteration: system instruction, prior context,
/// the active input, then this execution's scratchpad.
pub fn build_messages(
    system_prompt: &str,
    tools: &[ToolSchema],
    history: &[Message],
    input: &str,
    scratchpad: &[Message],
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + scratchpad.len() + 2);
    messages.push(Message::system(build_system_prompt(system_prompt, tools)));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(input));
    messages.extend(scratchpad.iter().cloned());
    messages
}

fn build_system_prompt(base: &str, tools: &[ToolSchema]) -> String {
    let mut sections = vec![base.to_string()];

    let tools_desc: Vec<String> = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect();
    if !tools_desc.is_empty() {
        sections.push(format!("## Available Tools\n\n{}", tools_desc.join("\n")));
    }

    sections.join("\n\n")
}
