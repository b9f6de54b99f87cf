// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Step handlers, one per automation state.
//!
//! Each handler performs the work of a single stage and returns a
//! [`Transition`] telling the controller where to go next. The default
//! handlers simulate the work with a cancellable wait and consult the
//! [`DecisionPolicy`]; concrete automations replace individual entries of
//! the [`HandlerTable`] without touching the loop.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelSignal;
use crate::error::{Cancelled, StepResult};
use crate::state::{AutomationState, Transition};

use super::policies::{DecisionContext, DecisionPolicy};
use super::timings::StageTimings;

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = StepResult<Transition>> + Send + 'a>>;

/// Everything a handler may use while running one stage.
pub struct StepContext<'a> {
    cancel: &'a CancelSignal,
    policy: &'a dyn DecisionPolicy,
    timings: &'a StageTimings,
    decision: DecisionContext,
    log: &'a (dyn Fn(&str) + Send + Sync),
}

impl<'a> StepContext<'a> {
    pub fn new(
        decision: DecisionContext,
        cancel: &'a CancelSignal,
        policy: &'a dyn DecisionPolicy,
        timings: &'a StageTimings,
        log: &'a (dyn Fn(&str) + Send + Sync),
    ) -> Self {
        Self {
            cancel,
            policy,
            timings,
            decision,
            log,
        }
    }

    /// State being handled.
    pub fn state(&self) -> AutomationState {
        self.decision.state
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        self.cancel
    }

    pub fn policy(&self) -> &dyn DecisionPolicy {
        self.policy
    }

    pub fn timings(&self) -> &StageTimings {
        self.timings
    }

    pub fn decision(&self) -> &DecisionContext {
        &self.decision
    }

    /// Emit a log line to the controller's listeners.
    pub fn log(&self, message: &str) {
        (self.log)(message);
    }

    /// Wait for the nominal duration of the current stage.
    pub async fn simulate(&self) -> Result<(), Cancelled> {
        self.cancel.sleep(self.timings.stage(self.state())).await
    }

    /// Wait for an arbitrary duration, observing cancellation.
    pub async fn delay(&self, duration: Duration) -> Result<(), Cancelled> {
        self.cancel.sleep(duration).await
    }
}

impl fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("decision", &self.decision)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Unit of work executed for one automation state.
pub trait StepHandler: Send + Sync {
    /// Human-readable name of the step, for logs.
    fn name(&self) -> &'static str;

    /// Run the stage and decide the next state.
    ///
    /// Returning [`StepError::Cancelled`](crate::StepError::Cancelled) ends the
    /// run quietly; returning a fault ends it in the `Error` state.
    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a>;
}

/// Simulate the stage, then pick `success` or `Error` depending on `passed`.
async fn checked_stage(
    ctx: &StepContext<'_>,
    activity: &str,
    passed: fn(&dyn DecisionPolicy, &DecisionContext) -> bool,
    success: AutomationState,
) -> StepResult<Transition> {
    ctx.log(activity);
    ctx.simulate().await?;
    if passed(ctx.policy(), ctx.decision()) {
        Ok(Transition::Advance(success))
    } else {
        ctx.log(&format!("{} check failed", ctx.state()));
        Ok(Transition::Advance(AutomationState::Error))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitializeStep;

impl StepHandler for InitializeStep {
    fn name(&self) -> &'static str {
        "Initialize"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(checked_stage(
            ctx,
            "Initializing equipment",
            |p, c| p.check_initialization_complete(c),
            AutomationState::StartProcess,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataUpdateStep;

impl StepHandler for DataUpdateStep {
    fn name(&self) -> &'static str {
        "DataUpdate"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(checked_stage(
            ctx,
            "Updating process data",
            |p, c| p.check_data_update_complete(c),
            AutomationState::StartProcess,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StartProcessStep;

impl StepHandler for StartProcessStep {
    fn name(&self) -> &'static str {
        "StartProcess"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log("Starting process");
            ctx.simulate().await?;
            Ok(Transition::Advance(AutomationState::Processing))
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessingStep;

impl StepHandler for ProcessingStep {
    fn name(&self) -> &'static str {
        "Processing"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log("Processing");
            ctx.simulate().await?;
            Ok(Transition::Advance(AutomationState::QualityCheck))
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QualityCheckStep;

impl StepHandler for QualityCheckStep {
    fn name(&self) -> &'static str {
        "QualityCheck"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(checked_stage(
            ctx,
            "Running quality check",
            |p, c| p.check_quality_pass(c),
            AutomationState::DataReport,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataReportStep;

impl StepHandler for DataReportStep {
    fn name(&self) -> &'static str {
        "DataReport"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(checked_stage(
            ctx,
            "Reporting results",
            |p, c| p.check_data_report_complete(c),
            AutomationState::Complete,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteStep;

impl StepHandler for CompleteStep {
    fn name(&self) -> &'static str {
        "Complete"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log(&format!(
                "Cycle {} complete",
                ctx.decision().completed_cycles
            ));
            ctx.simulate().await?;
            if ctx.policy().should_continue_process(ctx.decision()) {
                Ok(Transition::Advance(AutomationState::StartProcess))
            } else {
                ctx.log("No further cycles requested");
                Ok(Transition::Advance(AutomationState::Idle))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorStep;

impl StepHandler for ErrorStep {
    fn name(&self) -> &'static str {
        "Error"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log("Attempting error recovery");
            ctx.simulate().await?;
            if ctx.policy().attempt_error_recovery(ctx.decision()) {
                ctx.log("Recovery accepted, restarting from Initialize");
                Ok(Transition::Advance(AutomationState::Initialize))
            } else {
                ctx.log("Recovery refused, stopping automation");
                Ok(Transition::Halt(AutomationState::Idle))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmergencyStep;

impl StepHandler for EmergencyStep {
    fn name(&self) -> &'static str {
        "Emergency"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log("Emergency shutdown");
            ctx.simulate().await?;
            Ok(Transition::Halt(AutomationState::Emergency))
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdleStep;

impl StepHandler for IdleStep {
    fn name(&self) -> &'static str {
        "Idle"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.simulate().await?;
            Ok(Transition::Remain)
        })
    }
}

/// Built-in handler for `state`.
pub fn default_handler(state: AutomationState) -> Arc<dyn StepHandler> {
    match state {
        AutomationState::Idle => Arc::new(IdleStep),
        AutomationState::Initialize => Arc::new(InitializeStep),
        AutomationState::DataUpdate => Arc::new(DataUpdateStep),
        AutomationState::StartProcess => Arc::new(StartProcessStep),
        AutomationState::Processing => Arc::new(ProcessingStep),
        AutomationState::QualityCheck => Arc::new(QualityCheckStep),
        AutomationState::DataReport => Arc::new(DataReportStep),
        AutomationState::Complete => Arc::new(CompleteStep),
        AutomationState::Error => Arc::new(ErrorStep),
        AutomationState::Emergency => Arc::new(EmergencyStep),
    }
}

/// Strategy table mapping every state to its handler.
#[derive(Clone)]
pub struct HandlerTable {
    handlers: [Arc<dyn StepHandler>; AutomationState::ALL.len()],
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self {
            handlers: AutomationState::ALL.map(default_handler),
        }
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                AutomationState::ALL
                    .iter()
                    .map(|state| (state.name(), self.get(*state).name())),
            )
            .finish()
    }
}

impl HandlerTable {
    /// Table with the default handler for every state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the handler for `state`.
    pub fn with_handler<H>(mut self, state: AutomationState, handler: H) -> Self
    where
        H: StepHandler + 'static,
    {
        self.set(state, Arc::new(handler));
        self
    }

    pub fn set(&mut self, state: AutomationState, handler: Arc<dyn StepHandler>) {
        self.handlers[state.index()] = handler;
    }

    pub fn get(&self, state: AutomationState) -> &dyn StepHandler {
        self.handlers[state.index()].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::policies::{DecisionFns, DefaultDecisions};
    use crate::error::StepError;
    use std::sync::Mutex;

    async fn run_step(
        state: AutomationState,
        policy: &dyn DecisionPolicy,
        cancel: &CancelSignal,
    ) -> StepResult<Transition> {
        let timings = StageTimings::uniform(Duration::ZERO);
        let log = |_: &str| {};
        let ctx = StepContext::new(DecisionContext::new(state), cancel, policy, &timings, &log);
        let table = HandlerTable::default();
        table.get(state).run(&ctx).await
    }

    #[tokio::test]
    async fn test_default_happy_path_transitions() {
        let cancel = CancelSignal::new();
        let expected = [
            (AutomationState::Initialize, Transition::Advance(AutomationState::StartProcess)),
            (AutomationState::DataUpdate, Transition::Advance(AutomationState::StartProcess)),
            (AutomationState::StartProcess, Transition::Advance(AutomationState::Processing)),
            (AutomationState::Processing, Transition::Advance(AutomationState::QualityCheck)),
            (AutomationState::QualityCheck, Transition::Advance(AutomationState::DataReport)),
            (AutomationState::DataReport, Transition::Advance(AutomationState::Complete)),
            (AutomationState::Complete, Transition::Advance(AutomationState::StartProcess)),
            (AutomationState::Error, Transition::Halt(AutomationState::Idle)),
            (AutomationState::Emergency, Transition::Halt(AutomationState::Emergency)),
            (AutomationState::Idle, Transition::Remain),
        ];
        for (state, transition) in expected {
            let got = run_step(state, &DefaultDecisions, &cancel).await.unwrap();
            assert_eq!(got, transition, "unexpected decision for {state}");
        }
    }

    #[tokio::test]
    async fn test_failed_checks_go_to_error() {
        let cancel = CancelSignal::new();
        let policy = DecisionFns::new()
            .initialization_complete(|_| false)
            .data_update_complete(|_| false)
            .quality_pass(|_| false)
            .data_report_complete(|_| false);
        for state in [
            AutomationState::Initialize,
            AutomationState::DataUpdate,
            AutomationState::QualityCheck,
            AutomationState::DataReport,
        ] {
            let got = run_step(state, &policy, &cancel).await.unwrap();
            assert_eq!(got, Transition::Advance(AutomationState::Error));
        }
    }

    #[tokio::test]
    async fn test_policy_branches() {
        let cancel = CancelSignal::new();
        let policy = DecisionFns::new()
            .continue_process(|_| false)
            .error_recovery(|_| true);

        let got = run_step(AutomationState::Complete, &policy, &cancel).await.unwrap();
        assert_eq!(got, Transition::Advance(AutomationState::Idle));

        let got = run_step(AutomationState::Error, &policy, &cancel).await.unwrap();
        assert_eq!(got, Transition::Advance(AutomationState::Initialize));
    }

    #[tokio::test]
    async fn test_cancelled_step_reports_cancellation() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = run_step(AutomationState::Processing, &DefaultDecisions, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Cancelled));
    }

    #[tokio::test]
    async fn test_step_logs_through_context() {
        let lines = Mutex::new(Vec::new());
        let log = |line: &str| lines.lock().unwrap().push(line.to_string());
        let cancel = CancelSignal::new();
        let timings = StageTimings::uniform(Duration::ZERO);
        let ctx = StepContext::new(
            DecisionContext::new(AutomationState::StartProcess),
            &cancel,
            &DefaultDecisions,
            &timings,
            &log,
        );
        StartProcessStep.run(&ctx).await.unwrap();
        assert_eq!(lines.lock().unwrap().as_slice(), ["Starting process"]);
    }

    #[test]
    fn test_table_override() {
        #[derive(Debug)]
        struct Custom;
        impl StepHandler for Custom {
            fn name(&self) -> &'static str {
                "Custom"
            }
            fn run<'a>(&'a self, _ctx: &'a StepContext<'a>) -> StepFuture<'a> {
                Box::pin(async { Ok(Transition::Remain) })
            }
        }

        let table = HandlerTable::new().with_handler(AutomationState::QualityCheck, Custom);
        assert_eq!(table.get(AutomationState::QualityCheck).name(), "Custom");
        assert_eq!(table.get(AutomationState::DataReport).name(), "DataReport");
    }
}
