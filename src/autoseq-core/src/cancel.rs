// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Cooperative cancellation for a single automation run.
//!
//! A [`CancelSignal`] is created fresh for every run and threaded through
//! every suspension point of the loop and its step handlers. Raising it is
//! one-way: once cancelled, a signal never resets.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::error::Cancelled;

/// Raise-once cancellation signal shared between the controller and its loop.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.tx.send_if_modified(|raised| {
            if *raised {
                false
            } else {
                *raised = true;
                true
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been raised.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                break;
            }
        }
    }

    /// Wait for `duration`, or return early with [`Cancelled`].
    ///
    /// A zero duration still yields to the scheduler so that tight loops
    /// remain cancellable.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return if self.is_cancelled() {
                Err(Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            _ = time::sleep(duration) => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the signal is raised first.
    pub async fn run_until<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_sleep_completes_when_not_cancelled() {
        let signal = CancelSignal::new();
        assert_eq!(signal.sleep(Duration::from_millis(5)).await, Ok(()));
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_returns_early_on_cancel() {
        let signal = CancelSignal::new();
        let remote = signal.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            remote.cancel();
        });

        let started = Instant::now();
        assert_eq!(signal.sleep(Duration::from_secs(30)).await, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_is_sticky_and_idempotent() {
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancel();
        assert!(signal.is_cancelled());
        assert_eq!(signal.sleep(Duration::ZERO).await, Err(Cancelled));
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn test_run_until_yields_output() {
        let signal = CancelSignal::new();
        let out = signal.run_until(async { 42 }).await;
        assert_eq!(out, Ok(42));

        signal.cancel();
        let out = signal.run_until(std::future::pending::<u8>()).await;
        assert_eq!(out, Err(Cancelled));
    }
}
