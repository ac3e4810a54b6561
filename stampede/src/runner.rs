use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, RunConfig};
use crate::executor::{CancelHandle, VuScheduler};
use crate::http::HttpExecutor;
use crate::metrics::Aggregator;
use crate::report::RunReport;
use crate::scenario::Registry;
use crate::threshold;

/// Problems that stop a run from producing a report.
///
/// Note what is *not* here: network failures, failed checks, and threshold
/// violations. Those are run data, surfaced through the report, never errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no scenarios registered")]
    EmptyRegistry,
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Owns one run end to end: validate, schedule, aggregate, evaluate.
pub struct Runner {
    config: RunConfig,
    base_url: Url,
    cancel: CancelHandle,
    progress: Option<Duration>,
}

impl Runner {
    /// Validates the configuration up front. A bad config fails here, before
    /// anything is spawned.
    pub fn new(config: RunConfig) -> Result<Self, ConfigError> {
        let base_url = config.validate()?;
        Ok(Self {
            config,
            base_url,
            cancel: CancelHandle::new(),
            progress: None,
        })
    }

    /// A handle that stops the run early when cancelled, from anywhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Log a metrics snapshot every `every` while the run is active.
    pub fn with_progress(mut self, every: Duration) -> Self {
        self.progress = Some(every);
        self
    }

    /// Drive the run to completion and return its report.
    pub async fn run(&self, registry: Registry) -> Result<RunReport, Error> {
        if registry.is_empty() {
            return Err(Error::EmptyRegistry);
        }

        let client = Client::builder()
            .timeout(self.config.request_timeout)
            .build()?;
        let http = Arc::new(HttpExecutor::new(client, self.config.max_connections));
        let aggregator = Arc::new(Aggregator::new(num_cpus::get()));

        tracing::info!(
            target_url = %self.base_url,
            vus = self.config.vus,
            scenarios = ?registry.names(),
            "starting run"
        );

        let progress = self.progress.map(|every| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let snap = aggregator.snapshot();
                    tracing::info!(
                        requests = snap.requests,
                        failures = snap.request_failures,
                        iterations = snap.iterations,
                        active_vus = snap.active_vus,
                        "progress"
                    );
                }
            })
        });

        let scheduler = VuScheduler::new(self.config.clone(), self.base_url.clone());
        scheduler
            .run(
                &registry,
                http,
                Arc::clone(&aggregator),
                self.cancel.clone(),
            )
            .await;

        if let Some(progress) = progress {
            progress.abort();
        }

        tracing::info!("all virtual users terminated, evaluating thresholds");
        let metrics = aggregator.snapshot();
        let verdict = threshold::evaluate(&metrics, &self.config.thresholds);
        match &verdict {
            threshold::Verdict::Pass => tracing::info!("run passed"),
            threshold::Verdict::Fail(violations) => {
                tracing::warn!(violations = violations.len(), "run failed thresholds");
            }
        }

        Ok(RunReport {
            scenarios: registry.names(),
            config: self.config.clone(),
            metrics,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_fails_before_anything_runs() {
        let config = RunConfig::builder()
            .base_url("not a url")
            .vus(1)
            .iterations(1)
            .build();
        assert!(Runner::new(config).is_err());
    }

    #[tokio::test]
    async fn empty_registry_is_an_error() {
        let config = RunConfig::builder()
            .base_url("http://localhost:8080")
            .vus(1)
            .iterations(1)
            .build();
        let runner = Runner::new(config).unwrap();
        assert!(matches!(
            runner.run(Registry::new()).await,
            Err(Error::EmptyRegistry)
        ));
    }
}
