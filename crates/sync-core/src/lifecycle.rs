use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Lifecycle phase of the active conversation session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionPhase {
    /// No conversation selected.
    Idle,
    /// A conversation was selected and its initial page is in flight.
    Loading,
    /// Initial page applied; pagination, sends and push events are live.
    Ready,
    /// Initial load failed; selecting again retries.
    Failed,
}

/// Session-level operations gated by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Select,
    LoadOlder,
    Send,
    Edit,
    Delete,
    MarkSeen,
    Reset,
}

impl SessionAction {
    fn label(self) -> &'static str {
        match self {
            Self::Select => "select_conversation",
            Self::LoadOlder => "load_older",
            Self::Send => "send_message",
            Self::Edit => "edit_message",
            Self::Delete => "delete_message",
            Self::MarkSeen => "mark_seen",
            Self::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    phase: SessionPhase,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
        }
    }
}

impl SessionLifecycle {
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Apply an action, returning the phase after the transition.
    pub fn apply(&mut self, action: SessionAction) -> Result<SessionPhase, ChatError> {
        use SessionAction::*;

        match action {
            Select => {
                self.phase = SessionPhase::Loading;
                Ok(self.phase)
            }
            Reset => {
                self.phase = SessionPhase::Idle;
                Ok(self.phase)
            }
            LoadOlder | Send | Edit | Delete | MarkSeen => {
                if self.phase == SessionPhase::Ready {
                    Ok(self.phase)
                } else {
                    Err(ChatError::invalid_state(self.phase, action.label()))
                }
            }
        }
    }

    /// Resolve the initial load started by `Select`.
    pub fn on_initial_load(&mut self, success: bool) -> Result<SessionPhase, ChatError> {
        if self.phase != SessionPhase::Loading {
            return Err(ChatError::invalid_state(self.phase, "on_initial_load"));
        }

        self.phase = if success {
            SessionPhase::Ready
        } else {
            SessionPhase::Failed
        };
        Ok(self.phase)
    }
}
