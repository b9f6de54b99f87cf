// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Automation controller components.
//!
//! This module contains the control loop, the per-state step handlers,
//! the event notification system and the decision policies that pick
//! between branches of the sequence.

pub mod events;
pub mod handlers;
pub mod machine;
pub mod policies;
pub mod timings;

pub use events::{AutomationEvent, AutomationEventEmitter, AutomationListener, EventSink, ListenerId};
pub use handlers::{
    default_handler, CompleteStep, DataReportStep, DataUpdateStep, EmergencyStep, ErrorStep,
    HandlerTable, IdleStep, InitializeStep, ProcessingStep, QualityCheckStep, StartProcessStep,
    StepContext, StepFuture, StepHandler,
};
pub use machine::{AutomationController, AutomationControllerBuilder};
pub use policies::{
    BoundedRecovery, CycleLimit, DecisionContext, DecisionFns, DecisionPolicy, DefaultDecisions,
};
pub use timings::{StageTimings, DEFAULT_CYCLE_PAUSE, DEFAULT_IDLE_WAIT};
