//! C9 — Prompt Builder. Deterministic assembly of the message list sent
//! to the LLM client: one system message, then turn history verbatim,
//! then the trailing user turn (spec.md §4.9).

use cortex_domain::tool::ChatMessage;
use cortex_memory::Memory;

pub struct PromptInput<'a> {
    pub memories: &'a [Memory],
    pub topic_summary: Option<&'a str>,
    pub turns: &'a [ChatMessage],
    pub user_text: &'a str,
    pub tool_names: &'a [String],
}

pub fn build_prompt(input: PromptInput) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(input.turns.len() + 2);
    messages.push(ChatMessage::system(system_prompt(
        input.memories,
        input.topic_summary,
        input.tool_names,
    )));
    messages.extend(input.turns.iter().cloned());
    messages.push(ChatMessage::user(input.user_text));
    messages
}

fn system_prompt(memories: &[cortex_memory::Memory], topic_summary: Option<&str>, tool_names: &[String]) -> String {
    let mut parts = Vec::new();

    parts.push(
        "You are Cortex, a channel-agnostic assistant. Respond helpfully and concisely, \
         staying consistent with prior conversation history and any remembered facts below."
            .to_string(),
    );

    if tool_names.is_empty() {
        parts.push("You have no tools available for this conversation.".to_string());
    } else {
        parts.push(format!(
            "You have access to the following tools: {}.",
            tool_names.join(", ")
        ));
    }

    parts.push(
        "When you learn a durable fact, preference, or decision worth remembering, state it \
         plainly in your reply; it may be captured for long-term memory. Format replies as \
         plain text suitable for direct display to the user."
            .to_string(),
    );

    if !memories.is_empty() {
        let mut block = String::from("Relevant memories:\n");
        for memory in memories {
            block.push_str(&format!("- [{}] {}\n", memory.category, memory.content));
        }
        parts.push(block.trim_end().to_string());
    }

    if let Some(summary) = topic_summary.filter(|s| !s.is_empty()) {
        parts.push(format!("Conversation summary so far:\n{summary}"));
    }

    parts.join("\n\n")
}
