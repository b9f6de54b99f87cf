// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Decision predicates that gate stage transitions.
//!
//! Step handlers ask a [`DecisionPolicy`] whether a stage succeeded, whether
//! another cycle should run and whether a failed run may recover. The
//! defaults let the automation run end to end with no equipment attached:
//! every check passes and recovery is refused.

use std::fmt;
use std::sync::Arc;

use crate::state::AutomationState;

/// What a predicate can see about the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionContext {
    /// State whose handler is asking.
    pub state: AutomationState,
    /// Number of times the run has entered `Complete`, including the current one.
    pub completed_cycles: u64,
    /// Number of `Error -> Initialize` recoveries already taken in this run.
    pub recoveries: u32,
}

impl DecisionContext {
    pub fn new(state: AutomationState) -> Self {
        Self {
            state,
            completed_cycles: 0,
            recoveries: 0,
        }
    }
}

/// Policy deciding the outcome of each stage.
pub trait DecisionPolicy: Send + Sync {
    fn check_initialization_complete(&self, _ctx: &DecisionContext) -> bool {
        true
    }

    fn check_data_update_complete(&self, _ctx: &DecisionContext) -> bool {
        true
    }

    fn check_quality_pass(&self, _ctx: &DecisionContext) -> bool {
        true
    }

    fn check_data_report_complete(&self, _ctx: &DecisionContext) -> bool {
        true
    }

    /// Whether `Complete` loops back to `StartProcess` instead of going idle.
    fn should_continue_process(&self, _ctx: &DecisionContext) -> bool {
        true
    }

    /// Whether `Error` restarts from `Initialize` instead of stopping.
    fn attempt_error_recovery(&self, _ctx: &DecisionContext) -> bool {
        false
    }
}

impl<P: DecisionPolicy + ?Sized> DecisionPolicy for Arc<P> {
    fn check_initialization_complete(&self, ctx: &DecisionContext) -> bool {
        (**self).check_initialization_complete(ctx)
    }

    fn check_data_update_complete(&self, ctx: &DecisionContext) -> bool {
        (**self).check_data_update_complete(ctx)
    }

    fn check_quality_pass(&self, ctx: &DecisionContext) -> bool {
        (**self).check_quality_pass(ctx)
    }

    fn check_data_report_complete(&self, ctx: &DecisionContext) -> bool {
        (**self).check_data_report_complete(ctx)
    }

    fn should_continue_process(&self, ctx: &DecisionContext) -> bool {
        (**self).should_continue_process(ctx)
    }

    fn attempt_error_recovery(&self, ctx: &DecisionContext) -> bool {
        (**self).attempt_error_recovery(ctx)
    }
}

/// Policy using every default answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecisions;

impl DecisionPolicy for DefaultDecisions {}

type Predicate = Arc<dyn Fn(&DecisionContext) -> bool + Send + Sync>;

/// Policy assembled from closures. Predicates left unset keep their default.
///
/// ```
/// use autoseq_core::controller::{DecisionFns, DecisionPolicy, DecisionContext};
/// use autoseq_core::AutomationState;
///
/// let policy = DecisionFns::new().quality_pass(|_| false);
/// let ctx = DecisionContext::new(AutomationState::QualityCheck);
/// assert!(!policy.check_quality_pass(&ctx));
/// assert!(policy.check_data_report_complete(&ctx));
/// ```
#[derive(Clone, Default)]
pub struct DecisionFns {
    initialization_complete: Option<Predicate>,
    data_update_complete: Option<Predicate>,
    quality_pass: Option<Predicate>,
    data_report_complete: Option<Predicate>,
    continue_process: Option<Predicate>,
    error_recovery: Option<Predicate>,
}

impl fmt::Debug for DecisionFns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionFns")
            .field("initialization_complete", &self.initialization_complete.is_some())
            .field("data_update_complete", &self.data_update_complete.is_some())
            .field("quality_pass", &self.quality_pass.is_some())
            .field("data_report_complete", &self.data_report_complete.is_some())
            .field("continue_process", &self.continue_process.is_some())
            .field("error_recovery", &self.error_recovery.is_some())
            .finish()
    }
}

impl DecisionFns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialization_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        self.initialization_complete = Some(Arc::new(f));
        self
    }

    pub fn data_update_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        self.data_update_complete = Some(Arc::new(f));
        self
    }

    pub fn quality_pass<F>(mut self, f: F) -> Self
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        self.quality_pass = Some(Arc::new(f));
        self
    }

    pub fn data_report_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        self.data_report_complete = Some(Arc::new(f));
        self
    }

    pub fn continue_process<F>(mut self, f: F) -> Self
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        self.continue_process = Some(Arc::new(f));
        self
    }

    pub fn error_recovery<F>(mut self, f: F) -> Self
    where
        F: Fn(&DecisionContext) -> bool + Send + Sync + 'static,
    {
        self.error_recovery = Some(Arc::new(f));
        self
    }
}

fn ask(predicate: &Option<Predicate>, ctx: &DecisionContext, default: bool) -> bool {
    predicate.as_ref().map_or(default, |f| f(ctx))
}

impl DecisionPolicy for DecisionFns {
    fn check_initialization_complete(&self, ctx: &DecisionContext) -> bool {
        ask(&self.initialization_complete, ctx, true)
    }

    fn check_data_update_complete(&self, ctx: &DecisionContext) -> bool {
        ask(&self.data_update_complete, ctx, true)
    }

    fn check_quality_pass(&self, ctx: &DecisionContext) -> bool {
        ask(&self.quality_pass, ctx, true)
    }

    fn check_data_report_complete(&self, ctx: &DecisionContext) -> bool {
        ask(&self.data_report_complete, ctx, true)
    }

    fn should_continue_process(&self, ctx: &DecisionContext) -> bool {
        ask(&self.continue_process, ctx, true)
    }

    fn attempt_error_recovery(&self, ctx: &DecisionContext) -> bool {
        ask(&self.error_recovery, ctx, false)
    }
}

/// Allow at most `max_attempts` recoveries per run.
///
/// Every other question is answered by the wrapped policy.
#[derive(Debug, Clone)]
pub struct BoundedRecovery<P = DefaultDecisions> {
    inner: P,
    max_attempts: u32,
}

impl BoundedRecovery {
    pub fn new(max_attempts: u32) -> Self {
        Self::wrap(DefaultDecisions, max_attempts)
    }
}

impl<P> BoundedRecovery<P> {
    pub fn wrap(inner: P, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl<P: DecisionPolicy> DecisionPolicy for BoundedRecovery<P> {
    fn check_initialization_complete(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_initialization_complete(ctx)
    }

    fn check_data_update_complete(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_data_update_complete(ctx)
    }

    fn check_quality_pass(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_quality_pass(ctx)
    }

    fn check_data_report_complete(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_data_report_complete(ctx)
    }

    fn should_continue_process(&self, ctx: &DecisionContext) -> bool {
        self.inner.should_continue_process(ctx)
    }

    fn attempt_error_recovery(&self, ctx: &DecisionContext) -> bool {
        ctx.recoveries < self.max_attempts
    }
}

/// Stop continuing after `max_cycles` completed cycles.
///
/// `max_cycles == 0` means no limit.
#[derive(Debug, Clone)]
pub struct CycleLimit<P = DefaultDecisions> {
    inner: P,
    max_cycles: u64,
}

impl<P> CycleLimit<P> {
    pub fn wrap(inner: P, max_cycles: u64) -> Self {
        Self { inner, max_cycles }
    }
}

impl<P: DecisionPolicy> DecisionPolicy for CycleLimit<P> {
    fn check_initialization_complete(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_initialization_complete(ctx)
    }

    fn check_data_update_complete(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_data_update_complete(ctx)
    }

    fn check_quality_pass(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_quality_pass(ctx)
    }

    fn check_data_report_complete(&self, ctx: &DecisionContext) -> bool {
        self.inner.check_data_report_complete(ctx)
    }

    fn should_continue_process(&self, ctx: &DecisionContext) -> bool {
        if self.max_cycles != 0 && ctx.completed_cycles >= self.max_cycles {
            return false;
        }
        self.inner.should_continue_process(ctx)
    }

    fn attempt_error_recovery(&self, ctx: &DecisionContext) -> bool {
        self.inner.attempt_error_recovery(ctx)
    }
}
