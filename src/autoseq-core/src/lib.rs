// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod cancel;
pub mod controller;
pub mod error;
pub mod state;

pub type DynResult<T> = Result<T, error::DynError>;

pub use cancel::CancelSignal;
pub use controller::{AutomationController, AutomationListener, DecisionPolicy, StepHandler};
pub use error::{AutomationError, Cancelled, DynError, StepError, StepResult};
pub use state::{AutomationState, Transition};
