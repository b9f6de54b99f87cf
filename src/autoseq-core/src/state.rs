// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Operational states of an automation run.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed set of stages an automation moves through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AutomationState {
    /// Resting state, both initial and terminal after a graceful stop.
    #[default]
    Idle = 0,
    Initialize = 1,
    DataUpdate = 2,
    StartProcess = 3,
    Processing = 4,
    QualityCheck = 5,
    DataReport = 6,
    Complete = 7,
    /// Stage failure awaiting a recovery decision.
    Error = 8,
    /// Hard stop. The loop ends once the emergency handler has run.
    Emergency = 9,
}

impl AutomationState {
    /// Every state, in declaration order.
    pub const ALL: [AutomationState; 10] = [
        Self::Idle,
        Self::Initialize,
        Self::DataUpdate,
        Self::StartProcess,
        Self::Processing,
        Self::QualityCheck,
        Self::DataReport,
        Self::Complete,
        Self::Error,
        Self::Emergency,
    ];

    /// Position of this state in [`AutomationState::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Initialize => "Initialize",
            Self::DataUpdate => "DataUpdate",
            Self::StartProcess => "StartProcess",
            Self::Processing => "Processing",
            Self::QualityCheck => "QualityCheck",
            Self::DataReport => "DataReport",
            Self::Complete => "Complete",
            Self::Error => "Error",
            Self::Emergency => "Emergency",
        }
    }

    /// Check if a run that settles in this state has no work left.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Emergency)
    }
}

impl fmt::Display for AutomationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decision returned by a step handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Enter the given state and keep running.
    Advance(AutomationState),
    /// Stay in the current state.
    Remain,
    /// Enter the given state, then end the run.
    Halt(AutomationState),
}

impl Transition {
    /// State the controller ends up in after applying this decision.
    pub fn target(self, current: AutomationState) -> AutomationState {
        match self {
            Self::Advance(next) | Self::Halt(next) => next,
            Self::Remain => current,
        }
    }

    pub fn ends_run(self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_declaration_order() {
        assert_eq!(AutomationState::ALL.len(), 10);
        for (i, state) in AutomationState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
            assert_eq!(AutomationState::ALL[state.index()], *state);
        }
    }

    #[test]
    fn test_display_uses_variant_name() {
        assert_eq!(AutomationState::QualityCheck.to_string(), "QualityCheck");
        assert_eq!(AutomationState::default(), AutomationState::Idle);
    }

    #[test]
    fn test_serializes_as_variant_name() {
        let json = serde_json::to_string(&AutomationState::DataReport).unwrap();
        assert_eq!(json, "\"DataReport\"");
        let back: AutomationState = serde_json::from_str("\"Emergency\"").unwrap();
        assert_eq!(back, AutomationState::Emergency);
    }

    #[test]
    fn test_transition_target() {
        let current = AutomationState::Processing;
        assert_eq!(Transition::Remain.target(current), current);
        assert_eq!(
            Transition::Advance(AutomationState::QualityCheck).target(current),
            AutomationState::QualityCheck
        );
        assert!(Transition::Halt(AutomationState::Idle).ends_run());
        assert!(!Transition::Remain.ends_run());
    }
}
