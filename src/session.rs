use crate::answer::Answer;

/// One question and the answer it received
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// IDs of the chunks the answer cited
    pub cited: Vec<String>,
}

/// Conversation state for one chat session.
///
/// Created when a session starts and dropped when it ends; every question is
/// asked against a `&mut ChatSession` so history never outlives its session.
#[derive(Debug, Default)]
pub struct ChatSession {
    turns: Vec<ConversationTurn>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, question: &str, answer: &Answer) {
        self.turns.push(ConversationTurn {
            question: question.to_string(),
            answer: answer.text.clone(),
            cited: answer.cited_ids(),
        });
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// The last `n` turns, oldest first
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
