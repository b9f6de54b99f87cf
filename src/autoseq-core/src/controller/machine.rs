// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Automation controller and its main loop.
//!
//! The controller owns the current state, the running flag and the
//! background task of the active run. Each run gets a fresh
//! [`CancelSignal`]; the loop dispatches the current state to its step
//! handler, applies the returned [`Transition`], pauses briefly and repeats
//! until it is stopped, cancelled, halted by a handler, or hits a fault.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::error::{AutomationError, StepError};
use crate::state::{AutomationState, Transition};

use super::events::{AutomationEventEmitter, AutomationListener, ListenerId};
use super::handlers::{HandlerTable, StepContext, StepHandler};
use super::policies::{DecisionContext, DecisionPolicy, DefaultDecisions};
use super::timings::StageTimings;

/// State shared between the controller and the loop task.
struct Shared {
    state: watch::Sender<AutomationState>,
    /// Generation of the active run, 0 when nothing runs.
    running: watch::Sender<u64>,
    generation: AtomicU64,
    emitter: RwLock<AutomationEventEmitter>,
    handlers: HandlerTable,
    policy: Arc<dyn DecisionPolicy>,
    timings: StageTimings,
}

impl Shared {
    fn current_state(&self) -> AutomationState {
        *self.state.borrow()
    }

    fn emitter(&self) -> AutomationEventEmitter {
        self.emitter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unconditionally write the state. Returns true if it changed.
    fn set_state(&self, new: AutomationState) -> bool {
        let mut old = None;
        self.state.send_if_modified(|current| {
            if *current == new {
                return false;
            }
            old = Some(*current);
            *current = new;
            true
        });
        match old {
            Some(old) => {
                self.announce(old, new);
                true
            }
            None => false,
        }
    }

    /// Write the state only while `generation` owns the run. Returns true
    /// if the state changed.
    fn set_state_owned(&self, generation: u64, new: AutomationState) -> bool {
        let mut old = None;
        self.while_owner(generation, || {
            self.state.send_if_modified(|current| {
                if *current == new {
                    return false;
                }
                old = Some(*current);
                *current = new;
                true
            })
        });
        match old {
            Some(old) => {
                self.announce(old, new);
                true
            }
            None => false,
        }
    }

    /// Move from `from` to `to` unless the state was changed externally
    /// in the meantime or `generation` no longer owns the run. Returns
    /// false if the decision was discarded.
    fn transition(&self, generation: u64, from: AutomationState, to: AutomationState) -> bool {
        let mut applied = false;
        let changed = self.while_owner(generation, || {
            self.state.send_if_modified(|current| {
                if *current != from {
                    return false;
                }
                applied = true;
                if from == to {
                    return false;
                }
                *current = to;
                true
            })
        });
        if changed == Some(true) {
            self.announce(from, to);
        }
        applied
    }

    /// Run `write` with the running flag locked, if `generation` owns it.
    /// `claim` and `clear_running` cannot interleave with `write`.
    fn while_owner<R>(&self, generation: u64, write: impl FnOnce() -> R) -> Option<R> {
        let mut out = None;
        self.running.send_if_modified(|current| {
            if *current == generation {
                out = Some(write());
            }
            false
        });
        out
    }

    fn announce(&self, old: AutomationState, new: AutomationState) {
        let line = format!("State changed: {old} -> {new}");
        info!("{}", line);
        let emitter = self.emitter();
        emitter.notify_state_change(old, new);
        emitter.notify_log(&line);
    }

    fn log(&self, line: &str) {
        debug!("{}", line);
        self.emitter().notify_log(line);
    }

    fn report(&self, err: &AutomationError) {
        error!("Automation fault: {}", err);
        self.emitter().notify_error(err);
    }

    fn is_running(&self) -> bool {
        *self.running.borrow() != 0
    }

    fn owns_run(&self, generation: u64) -> bool {
        *self.running.borrow() == generation
    }

    /// Mark a new run as active, unless one already is.
    fn claim(&self) -> Option<u64> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let claimed = self.running.send_if_modified(|current| {
            if *current != 0 {
                return false;
            }
            *current = generation;
            true
        });
        claimed.then_some(generation)
    }

    /// Clear the running flag if `generation` is still the active run.
    fn release(&self, generation: u64) -> bool {
        self.running.send_if_modified(|current| {
            if *current != generation {
                return false;
            }
            *current = 0;
            true
        })
    }

    /// Clear the running flag whatever run owns it.
    fn clear_running(&self) -> bool {
        self.running.send_if_modified(|current| {
            if *current == 0 {
                return false;
            }
            *current = 0;
            true
        })
    }
}

/// Per-run counters exposed to decision predicates.
#[derive(Debug, Default)]
struct RunStats {
    completed_cycles: u64,
    recoveries: u32,
}

impl RunStats {
    fn decision(&self, state: AutomationState) -> DecisionContext {
        DecisionContext {
            state,
            completed_cycles: self.completed_cycles,
            recoveries: self.recoveries,
        }
    }

    fn record(&mut self, from: AutomationState, to: AutomationState) {
        if to == AutomationState::Complete && from != AutomationState::Complete {
            self.completed_cycles += 1;
        }
        if from == AutomationState::Error && to == AutomationState::Initialize {
            self.recoveries = self.recoveries.saturating_add(1);
        }
    }
}

/// Clears the running flag however the loop task ends, including a panic.
struct RunGuard {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if std::thread::panicking() && self.shared.owns_run(self.generation) {
            let err = AutomationError::Panicked {
                state: self.shared.current_state(),
            };
            self.shared.report(&err);
            self.shared.set_state_owned(self.generation, AutomationState::Error);
        }
        self.shared.release(self.generation);
    }
}

enum LoopExit {
    Stopped,
    Cancelled,
    Halted(AutomationState),
    Faulted(AutomationError),
}

async fn run_loop(shared: Arc<Shared>, cancel: CancelSignal, generation: u64) {
    let guard = RunGuard {
        shared: shared.clone(),
        generation,
    };
    let mut stats = RunStats::default();

    let exit = loop {
        if !shared.owns_run(generation) {
            break LoopExit::Stopped;
        }
        if cancel.is_cancelled() {
            break LoopExit::Cancelled;
        }

        let state = shared.current_state();
        let handler = shared.handlers.get(state);
        let log = |line: &str| shared.log(line);
        let ctx = StepContext::new(
            stats.decision(state),
            &cancel,
            shared.policy.as_ref(),
            &shared.timings,
            &log,
        );
        debug!("Running {} step", handler.name());

        match handler.run(&ctx).await {
            // The run was cancelled while the handler finished its work;
            // whatever state the canceller forced takes precedence.
            Ok(_) if cancel.is_cancelled() => break LoopExit::Cancelled,
            Ok(transition) => {
                let next = transition.target(state);
                if shared.transition(generation, state, next) {
                    stats.record(state, next);
                    if transition.ends_run() {
                        shared.release(generation);
                        break LoopExit::Halted(next);
                    }
                } else {
                    debug!(
                        "State changed externally during {} step; discarding {:?}",
                        state, transition
                    );
                }
            }
            Err(StepError::Cancelled) => break LoopExit::Cancelled,
            Err(StepError::Fault(source)) => {
                break LoopExit::Faulted(AutomationError::StepFault { state, source })
            }
        }

        if cancel.sleep(shared.timings.cycle_pause()).await.is_err() {
            break LoopExit::Cancelled;
        }
    };

    match exit {
        LoopExit::Stopped => debug!("Automation loop stopped"),
        LoopExit::Cancelled => {
            info!("Automation cancelled");
            shared.log("Automation cancelled");
        }
        LoopExit::Halted(state) => info!("Automation halted in {}", state),
        LoopExit::Faulted(err) if shared.owns_run(generation) => {
            shared.report(&err);
            shared.set_state_owned(generation, AutomationState::Error);
        }
        LoopExit::Faulted(err) => debug!("Discarding fault of a stopped run: {}", err),
    }
    drop(guard);
}

struct ActiveRun {
    id: Uuid,
    cancel: CancelSignal,
}

/// Cancellable, event-emitting automation controller.
///
/// Must be used from within a tokio runtime: [`start`](Self::start) spawns
/// the loop with [`tokio::spawn`].
pub struct AutomationController {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveRun>>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Default for AutomationController {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AutomationController {
    /// Controller with default handlers, predicates and timings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> AutomationControllerBuilder {
        AutomationControllerBuilder::default()
    }

    pub fn current_state(&self) -> AutomationState {
        self.shared.current_state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Id of the active (or most recent) run.
    pub fn run_id(&self) -> Option<Uuid> {
        self.lock_active().as_ref().map(|run| run.id)
    }

    pub fn timings(&self) -> &StageTimings {
        &self.shared.timings
    }

    /// Register a listener for state changes, log lines and faults.
    pub fn subscribe(&self, listener: Arc<dyn AutomationListener>) -> ListenerId {
        self.shared
            .emitter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared
            .emitter
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(id)
    }

    /// Watch the current state without registering a listener.
    pub fn subscribe_state(&self) -> watch::Receiver<AutomationState> {
        self.shared.state.subscribe()
    }

    /// Resolve once no run is active.
    pub async fn wait_stopped(&self) {
        let mut rx = self.shared.running.subscribe();
        let _ = rx.wait_for(|generation| *generation == 0).await;
    }

    /// Start a new run in the background. No effect if one is active.
    pub fn start(&self) {
        let Ok(mut task) = self.task.try_lock() else {
            warn!("Automation stop in progress; start ignored");
            return;
        };
        let Some(generation) = self.shared.claim() else {
            debug!("Automation already running; start ignored");
            return;
        };

        let cancel = CancelSignal::new();
        let id = Uuid::new_v4();
        if let Some(previous) = self.lock_active().replace(ActiveRun {
            id,
            cancel: cancel.clone(),
        }) {
            previous.cancel.cancel();
        }

        info!("Starting automation run {}", id);
        self.shared.set_state(AutomationState::Initialize);

        // A loop whose stop was abandoned mid-join may still be unwinding.
        // It can no longer write state, but the new loop only begins once
        // it is gone.
        let previous = task.take().filter(|handle| !handle.is_finished());
        if previous.is_some() {
            debug!("Previous automation loop still exiting; run {} waits for it", id);
        }
        let run = run_loop(self.shared.clone(), cancel, generation);
        let span = info_span!("automation", run = %id);
        *task = Some(tokio::spawn(
            async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                run.await;
            }
            .instrument(span),
        ));
    }

    /// Stop the active run and wait until its loop has exited.
    ///
    /// The state is forced to `Idle` afterwards. No effect if not running,
    /// apart from joining a loop left behind by an abandoned `stop`.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let was_running = self.shared.clear_running();
        if was_running {
            self.cancel_active();
        } else if task.as_ref().map_or(true, JoinHandle::is_finished) {
            return;
        }

        // The handle leaves the slot only once joined, so dropping this
        // future never detaches the loop.
        if let Some(handle) = task.as_mut() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Automation task panicked: {}", e);
                }
            }
        }
        task.take();

        if was_running {
            self.shared.set_state(AutomationState::Idle);
            info!("Automation stopped");
        }
    }

    /// Force the `Emergency` state and cancel the active run.
    ///
    /// Does not wait for the loop to exit.
    pub fn emergency_stop(&self) {
        warn!("Emergency stop requested");
        self.shared.set_state(AutomationState::Emergency);
        self.cancel_active();
    }

    /// Overwrite the current state, bypassing all handler logic.
    pub fn force_state(&self, state: AutomationState) {
        info!("Forcing state {}", state);
        self.shared.set_state(state);
    }

    /// Stop the active run and release its resources. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.task.lock().await.take();
        self.lock_active().take();
    }

    /// Blocking variant of [`shutdown`](Self::shutdown).
    ///
    /// Inside a multi-threaded runtime the worker is handed over with
    /// [`tokio::task::block_in_place`]. Outside any runtime a private
    /// current-thread runtime drives the stop. On a current-thread runtime
    /// blocking would deadlock the loop, so only cancellation is requested.
    pub fn shutdown_blocking(&self) {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.shutdown()));
            }
            Ok(_) => {
                warn!("Blocking shutdown on a current-thread runtime; requesting cancellation only");
                self.shared.clear_running();
                self.cancel_active();
            }
            Err(_) => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(self.shutdown()),
                Err(e) => {
                    warn!("Failed to build shutdown runtime: {}", e);
                    self.shared.clear_running();
                    self.cancel_active();
                }
            },
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_active(&self) {
        if let Some(run) = self.lock_active().as_ref() {
            run.cancel.cancel();
        }
    }
}

impl Drop for AutomationController {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = active.take() {
            run.cancel.cancel();
        }
    }
}

/// Builder for [`AutomationController`].
pub struct AutomationControllerBuilder {
    handlers: HandlerTable,
    policy: Arc<dyn DecisionPolicy>,
    timings: StageTimings,
}

impl Default for AutomationControllerBuilder {
    fn default() -> Self {
        Self {
            handlers: HandlerTable::default(),
            policy: Arc::new(DefaultDecisions),
            timings: StageTimings::default(),
        }
    }
}

impl AutomationControllerBuilder {
    pub fn handlers(mut self, handlers: HandlerTable) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replace the handler of a single state.
    pub fn handler<H>(mut self, state: AutomationState, handler: H) -> Self
    where
        H: StepHandler + 'static,
    {
        self.handlers.set(state, Arc::new(handler));
        self
    }

    pub fn policy<P>(self, policy: P) -> Self
    where
        P: DecisionPolicy + 'static,
    {
        self.shared_policy(Arc::new(policy))
    }

    pub fn shared_policy(mut self, policy: Arc<dyn DecisionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn timings(mut self, timings: StageTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn build(self) -> AutomationController {
        let (state, _) = watch::channel(AutomationState::Idle);
        let (running, _) = watch::channel(0);
        AutomationController {
            shared: Arc::new(Shared {
                state,
                running,
                generation: AtomicU64::new(0),
                emitter: RwLock::new(AutomationEventEmitter::new()),
                handlers: self.handlers,
                policy: self.policy,
                timings: self.timings,
            }),
            active: Mutex::new(None),
            task: AsyncMutex::new(None),
        }
    }
}
