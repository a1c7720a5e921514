use crate::models::{ConversationTurn, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposingState {
    #[default]
    Idle,
    /// A send is in flight and no assistant text has arrived yet.
    Composing,
    Streaming,
}

impl ComposingState {
    pub fn shows_indicator(self) -> bool {
        matches!(self, ComposingState::Composing)
    }

    pub fn is_busy(self) -> bool {
        !matches!(self, ComposingState::Idle)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComposingTracker {
    state: ComposingState,
}

impl ComposingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ComposingState {
        self.state
    }

    pub fn begin_send(&mut self) -> ComposingState {
        self.state = ComposingState::Composing;
        self.state
    }

    /// Re-evaluates against the latest turn list. Has no effect while idle.
    pub fn observe(&mut self, turns: &[ConversationTurn]) -> ComposingState {
        if self.state == ComposingState::Idle {
            return self.state;
        }

        self.state = match turns.last() {
            Some(turn) if turn.role == Role::Assistant && !turn.raw_content.is_empty() => {
                ComposingState::Streaming
            }
            _ => ComposingState::Composing,
        };
        self.state
    }

    pub fn finish(&mut self) -> ComposingState {
        self.state = ComposingState::Idle;
        self.state
    }

    pub fn cancel(&mut self) -> ComposingState {
        self.finish()
    }
}
