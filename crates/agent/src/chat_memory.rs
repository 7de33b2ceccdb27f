//! Conversation history bounded by a token budget.

use std::collections::VecDeque;

use ragdesk_core::error::HistoryError;
use ragdesk_core::message::{Message, Role};
use ragdesk_core::token::{estimate_message_tokens, estimate_messages_tokens};

/// Where a session keeps its turns.
///
/// Implementations must keep the stored turns within their budget after
/// every `put`.
pub trait ChatStore: Send + Sync {
    /// All stored turns, oldest first.
    fn messages(&self) -> Vec<Message>;

    fn put(&mut self, message: Message) -> Result<(), HistoryError>;

    fn clear(&mut self) -> Result<(), HistoryError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process history that evicts the oldest turns once the estimated
/// token total exceeds `token_limit`.
#[derive(Debug, Clone)]
pub struct ChatMemoryBuffer {
    messages: VecDeque<Message>,
    token_limit: usize,
    tokens: usize,
}

impl ChatMemoryBuffer {
    pub fn new(token_limit: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            token_limit,
            tokens: 0,
        }
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    fn evict_front(&mut self) {
        if let Some(old) = self.messages.pop_front() {
            self.tokens -= estimate_message_tokens(&old);
        }
    }

    fn trim(&mut self) {
        while self.tokens > self.token_limit {
            self.evict_front();
        }
        // History handed to the model should open with a user turn
        while self
            .messages
            .front()
            .is_some_and(|m| m.role == Role::Assistant)
        {
            self.evict_front();
        }
    }
}

impl ChatStore for ChatMemoryBuffer {
    fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    fn put(&mut self, message: Message) -> Result<(), HistoryError> {
        self.tokens += estimate_message_tokens(&message);
        self.messages.push_back(message);
        self.trim();
        debug_assert_eq!(self.tokens, estimate_messages_tokens(&self.messages));
        Ok(())
    }

    fn clear(&mut self) -> Result<(), HistoryError> {
        self.messages.clear();
        self.tokens = 0;
        Ok(())
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_read_in_order() {
        let mut buf = ChatMemoryBuffer::new(1000);
        buf.put(Message::user("hi")).unwrap();
        buf.put(Message::assistant("hello")).unwrap();

        let msgs = buf.messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hi");
        assert_eq!(msgs[1].role, Role::Assistant);
    }

    #[test]
    fn oldest_turns_evicted_first() {
        // Each message: 4 overhead + 25 tokens = 29
        let mut buf = ChatMemoryBuffer::new(60);
        let text = "a".repeat(100);
        buf.put(Message::user(format!("1{}", &text[1..]))).unwrap();
        buf.put(Message::assistant(format!("2{}", &text[1..]))).unwrap();
        buf.put(Message::user(format!("3{}", &text[1..]))).unwrap();

        let msgs = buf.messages();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].content.starts_with('3'));
        assert!(buf.tokens() <= buf.token_limit());
    }

    #[test]
    fn budget_holds_after_every_put() {
        let mut buf = ChatMemoryBuffer::new(50);
        for i in 0..40 {
            let content = "x".repeat(i * 3);
            let msg = if i % 2 == 0 {
                Message::user(content)
            } else {
                Message::assistant(content)
            };
            buf.put(msg).unwrap();
            assert!(estimate_messages_tokens(&buf.messages()) <= 50);
        }
    }

    #[test]
    fn history_never_opens_with_assistant() {
        let mut buf = ChatMemoryBuffer::new(12);
        buf.put(Message::user("aaaa")).unwrap(); // 5
        buf.put(Message::assistant("bbbb")).unwrap(); // 10
        buf.put(Message::user("cccc")).unwrap(); // 15 → drop user, then assistant

        let msgs = buf.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[0].content, "cccc");
    }

    #[test]
    fn oversized_message_is_not_kept() {
        let mut buf = ChatMemoryBuffer::new(10);
        buf.put(Message::user("x".repeat(400))).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.tokens(), 0);
    }

    #[test]
    fn clear_empties() {
        let mut buf = ChatMemoryBuffer::new(100);
        buf.put(Message::user("hi")).unwrap();
        buf.clear().unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.tokens(), 0);
    }
}
