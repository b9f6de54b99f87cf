// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

use crate::state::AutomationState;

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Returned by cancellable waits once the run's signal has been raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("automation cancelled")]
pub struct Cancelled;

/// Error returned by a step handler.
#[derive(Debug, Error)]
pub enum StepError {
    /// The run was cancelled while the step was suspended.
    #[error("automation cancelled")]
    Cancelled,

    /// Unexpected failure; ends the run in the `Error` state.
    #[error(transparent)]
    Fault(DynError),
}

impl StepError {
    pub fn fault(err: impl Into<DynError>) -> Self {
        Self::Fault(err.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<Cancelled> for StepError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

pub type StepResult<T> = Result<T, StepError>;

/// Unrecoverable error reported to listeners.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("{state} step failed: {source}")]
    StepFault {
        state: AutomationState,
        #[source]
        source: DynError,
    },

    #[error("{state} step panicked")]
    Panicked { state: AutomationState },
}

impl AutomationError {
    /// State whose handler produced the error.
    pub fn state(&self) -> AutomationState {
        match self {
            Self::StepFault { state, .. } | Self::Panicked { state } => *state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_converts_to_step_error() {
        let err: StepError = Cancelled.into();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "automation cancelled");
    }

    #[test]
    fn test_fault_keeps_source_message() {
        let err = StepError::fault("sensor offline");
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "sensor offline");
    }

    #[test]
    fn test_automation_error_names_state() {
        let err = AutomationError::StepFault {
            state: AutomationState::Processing,
            source: "spindle stalled".into(),
        };
        assert_eq!(err.state(), AutomationState::Processing);
        assert_eq!(err.to_string(), "Processing step failed: spindle stalled");
    }
}
