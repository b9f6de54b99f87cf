// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use autoseq_core::controller::{StepContext, StepFuture, StepHandler};
use autoseq_core::{AutomationState, Transition};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::info;

use crate::fetcher::JsonFetcher;

/// `DataUpdate` handler that pulls a JSON document over HTTP.
///
/// The latest decoded value is published through a watch channel. A failed
/// fetch or a negative `check_data_update_complete` leads to `Error`.
pub struct FetchDataUpdateStep<T> {
    fetcher: JsonFetcher,
    url: String,
    tx: watch::Sender<Option<T>>,
}

impl<T> FetchDataUpdateStep<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(fetcher: JsonFetcher, url: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            fetcher,
            url: url.into(),
            tx,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receiver of the most recently fetched value.
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }
}

impl<T> StepHandler for FetchDataUpdateStep<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "DataUpdate"
    }

    fn run<'a>(&'a self, ctx: &'a StepContext<'a>) -> StepFuture<'a> {
        Box::pin(async move {
            ctx.log(&format!("Updating data from {}", self.url));
            let fetched = ctx
                .cancel_signal()
                .run_until(self.fetcher.try_fetch_json::<T>(&self.url))
                .await?;

            let value = match fetched {
                Ok(value) => value,
                Err(e) => {
                    self.fetcher.report(&e);
                    ctx.log(&format!("Data update failed: {e}"));
                    return Ok(Transition::Advance(AutomationState::Error));
                }
            };
            self.tx.send_replace(Some(value));
            info!("Data updated from {}", self.url);

            if ctx.policy().check_data_update_complete(ctx.decision()) {
                Ok(Transition::Advance(AutomationState::StartProcess))
            } else {
                Ok(Transition::Advance(AutomationState::Error))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoseq_core::controller::{
        AutomationController, DecisionContext, DecisionFns, DecisionPolicy, DefaultDecisions,
        StageTimings,
    };
    use autoseq_core::{CancelSignal, StepError, StepResult};
    use serde::Deserialize;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Setpoint {
        target: f64,
    }

    async fn serve(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/setpoint"))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    fn step(server: &MockServer) -> FetchDataUpdateStep<Setpoint> {
        let fetcher = JsonFetcher::new(Duration::from_secs(5)).unwrap();
        FetchDataUpdateStep::new(fetcher, format!("{}/setpoint", server.uri()))
    }

    async fn run_step(
        step: &FetchDataUpdateStep<Setpoint>,
        cancel: &CancelSignal,
        policy: &dyn DecisionPolicy,
    ) -> StepResult<Transition> {
        let timings = StageTimings::default();
        let log = |_: &str| {};
        let ctx = StepContext::new(
            DecisionContext::new(AutomationState::DataUpdate),
            cancel,
            policy,
            &timings,
            &log,
        );
        step.run(&ctx).await
    }

    #[tokio::test]
    async fn test_success_publishes_value() {
        let server = serve(ResponseTemplate::new(200).set_body_string(r#"{"Target": 42.0}"#)).await;
        let step = step(&server);
        let rx = step.subscribe();

        let transition = run_step(&step, &CancelSignal::new(), &DefaultDecisions)
            .await
            .unwrap();
        assert_eq!(transition, Transition::Advance(AutomationState::StartProcess));
        assert_eq!(*rx.borrow(), Some(Setpoint { target: 42.0 }));
    }

    #[tokio::test]
    async fn test_fetch_failure_goes_to_error() {
        let server = serve(ResponseTemplate::new(404)).await;
        let step = step(&server);

        let transition = run_step(&step, &CancelSignal::new(), &DefaultDecisions)
            .await
            .unwrap();
        assert_eq!(transition, Transition::Advance(AutomationState::Error));
        assert_eq!(*step.subscribe().borrow(), None);
    }

    #[tokio::test]
    async fn test_policy_can_reject_fetched_data() {
        let server = serve(ResponseTemplate::new(200).set_body_string(r#"{"target": 1}"#)).await;
        let step = step(&server);
        let policy = DecisionFns::new().data_update_complete(|_| false);

        let transition = run_step(&step, &CancelSignal::new(), &policy)
            .await
            .unwrap();
        assert_eq!(transition, Transition::Advance(AutomationState::Error));
    }

    #[tokio::test]
    async fn test_cancel_aborts_slow_fetch() {
        let server = serve(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"target": 1}"#)
                .set_delay(Duration::from_secs(30)),
        )
        .await;
        let step = step(&server);
        let cancel = CancelSignal::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run_step(&step, &cancel, &DefaultDecisions),
        )
        .await
        .expect("fetch was not cancelled");
        assert!(matches!(result, Err(StepError::Cancelled)));
    }

    #[tokio::test]
    async fn test_controller_runs_fetch_step() {
        let server = serve(ResponseTemplate::new(200).set_body_string(r#"{"TARGET": 7}"#)).await;
        let step = step(&server);
        let mut rx = step.subscribe();

        let controller = AutomationController::builder()
            .timings(StageTimings::uniform(Duration::ZERO).with_cycle_pause(Duration::from_millis(1)))
            .handler(AutomationState::DataUpdate, step)
            .build();
        let mut states = controller.subscribe_state();
        controller.start();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s != AutomationState::Idle),
        )
        .await
        .unwrap()
        .unwrap();
        // The default sequence skips DataUpdate, so route the loop there.
        controller.force_state(AutomationState::DataUpdate);

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow(), Some(Setpoint { target: 7.0 }));
        controller.stop().await;
    }
}
