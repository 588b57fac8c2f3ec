use serde::{Deserialize, Serialize};

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Conversation history of one chat session.
///
/// Only the engine appends to it, and only after a turn has fully succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent `n` turns, oldest first
    pub fn recent(&self, n: usize) -> &[Turn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn push(&mut self, user: String, assistant: String) {
        self.turns.push(Turn { user, assistant });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_turns() {
        let mut state = ConversationState::new();
        assert!(state.recent(3).is_empty());

        for i in 0..5 {
            state.push(format!("q{}", i), format!("a{}", i));
        }

        let recent: Vec<&str> = state.recent(2).iter().map(|t| t.user.as_str()).collect();
        assert_eq!(recent, vec!["q3", "q4"]);
        assert_eq!(state.recent(10).len(), 5);
        assert!(state.recent(0).is_empty());
    }
}
