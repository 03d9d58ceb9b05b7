use crate::message::{Message, Role};

/// In-memory transcript storage.
#[derive(Default, Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
}

impl ConversationMemory {
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + '_ {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Approximate prompt-token budget. Keeps system messages and as many of the
/// most recent messages as fit.
#[derive(Clone, Debug)]
pub struct TokenBudget {
    max_tokens: usize,
    /// Approximate characters per token (default: 4)
    chars_per_token: usize,
}

impl TokenBudget {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens: max_tokens as usize,
            chars_per_token: 4,
        }
    }

    pub fn estimate(&self, message: &Message) -> usize {
        let mut chars = message.content.len();
        for call in &message.tool_calls {
            chars += call.name.len() + call.arguments.to_string().len();
        }
        chars.div_ceil(self.chars_per_token)
    }

    /// Messages to send to the model. The newest message is always kept, and a
    /// kept window never starts with a tool result whose call was cut off.
    pub fn fit(&self, messages: &[Message]) -> Vec<Message> {
        let mut total: usize = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| self.estimate(m))
            .sum();

        let conversation: Vec<&Message> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        let mut keep_from = conversation.len();
        for (i, msg) in conversation.iter().enumerate().rev() {
            let tokens = self.estimate(msg);
            if total + tokens > self.max_tokens && keep_from < conversation.len() {
                break;
            }
            total += tokens;
            keep_from = i;
        }
        keep_from = self.pair_tool_results(&conversation, keep_from);

        if keep_from > 0 {
            tracing::debug!(
                dropped = keep_from,
                budget = self.max_tokens,
                "trimmed conversation to token budget"
            );
        }

        messages
            .iter()
            .filter(|m| m.role == Role::System)
            .chain(conversation[keep_from..].iter().copied())
            .cloned()
            .collect()
    }

    /// Move the window start off leading tool results. Older results are
    /// skipped; when only tool results remain, the window grows back to the
    /// assistant message that requested them, even past the budget.
    fn pair_tool_results(&self, conversation: &[&Message], keep_from: usize) -> usize {
        let window = &conversation[keep_from..];
        match window.iter().position(|m| m.role != Role::Tool) {
            Some(offset) => keep_from + offset,
            None if window.is_empty() => keep_from,
            None => conversation[..keep_from]
                .iter()
                .rposition(|m| m.role != Role::Tool)
                .filter(|&i| !conversation[i].tool_calls.is_empty())
                .unwrap_or(keep_from),
        }
    }
}
