use mozi_core::types::{Message, Role};

/// Builds the message list sent to an `LLMProvider` for a single cron-triggered
/// turn: a system prompt, prior conversation history for the job's session,
/// then the turn's own message.
pub struct ContextBuilder {
    system_prompt: String,
}

impl ContextBuilder {
    pub fn new(system_prompt: String) -> Self {
        Self { system_prompt }
    }

    pub fn build(&self, history: &[Message], current_message: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::new("system", "global", Role::System, &self.system_prompt));
        messages.extend_from_slice(history);
        messages.push(Message::new("cron", "current", Role::User, current_message));
        messages
    }
}
