// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Nominal durations of the simulated stage work.

use std::time::Duration;

use crate::state::AutomationState;

/// Pause inserted between two dispatch cycles.
pub const DEFAULT_CYCLE_PAUSE: Duration = Duration::from_millis(50);

/// Wait performed by the idle handler before checking again.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(100);

/// How long each default step handler waits to stand in for real work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimings {
    stages: [Duration; AutomationState::ALL.len()],
    cycle_pause: Duration,
}

impl Default for StageTimings {
    fn default() -> Self {
        let mut timings = Self::uniform(Duration::ZERO);
        for (state, ms) in [
            (AutomationState::Idle, DEFAULT_IDLE_WAIT.as_millis() as u64),
            (AutomationState::Initialize, 500),
            (AutomationState::DataUpdate, 300),
            (AutomationState::StartProcess, 200),
            (AutomationState::Processing, 1000),
            (AutomationState::QualityCheck, 300),
            (AutomationState::DataReport, 200),
            (AutomationState::Complete, 100),
            (AutomationState::Error, 1000),
            (AutomationState::Emergency, 200),
        ] {
            timings.stages[state.index()] = Duration::from_millis(ms);
        }
        timings.cycle_pause = DEFAULT_CYCLE_PAUSE;
        timings
    }
}

impl StageTimings {
    /// Same duration for every stage, with the default cycle pause.
    pub fn uniform(duration: Duration) -> Self {
        Self {
            stages: [duration; AutomationState::ALL.len()],
            cycle_pause: DEFAULT_CYCLE_PAUSE,
        }
    }

    pub fn stage(&self, state: AutomationState) -> Duration {
        self.stages[state.index()]
    }

    pub fn cycle_pause(&self) -> Duration {
        self.cycle_pause
    }

    pub fn with_stage(mut self, state: AutomationState, duration: Duration) -> Self {
        self.stages[state.index()] = duration;
        self
    }

    pub fn with_cycle_pause(mut self, pause: Duration) -> Self {
        self.cycle_pause = pause;
        self
    }
}
