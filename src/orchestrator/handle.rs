//! Turn handle and outcome.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agent_engine_llm::{Message, TurnUsage};

use super::step::AgentStep;
use crate::error::EngineError;

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed {
        steps: Vec<AgentStep>,
        /// The conversation including everything this turn appended
        messages: Vec<Message>,
        usage: TurnUsage,
        /// `max_steps` when the step cap ended the turn
        stop_reason: String,
    },
    Failed {
        steps: Vec<AgentStep>,
        error: EngineError,
    },
    Cancelled {
        steps: Vec<AgentStep>,
    },
}

impl TurnOutcome {
    pub fn steps(&self) -> &[AgentStep] {
        match self {
            TurnOutcome::Completed { steps, .. }
            | TurnOutcome::Failed { steps, .. }
            | TurnOutcome::Cancelled { steps } => steps,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TurnOutcome::Cancelled { .. })
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            TurnOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Control over a spawned turn.
#[derive(Debug)]
pub struct TurnHandle {
    cancel: CancellationToken,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<TurnOutcome>) -> Self {
        Self { cancel, task }
    }

    /// Request cancellation. No further events are emitted once the loop
    /// observes it; an in-flight vendor response is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the turn to end.
    pub async fn join(self) -> TurnOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Turn task failed");
                TurnOutcome::Failed {
                    steps: Vec::new(),
                    error: EngineError::Internal(format!("turn task failed: {}", e)),
                }
            }
        }
    }
}
