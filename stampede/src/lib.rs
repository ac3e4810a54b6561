//! Stampede — a small HTTP load-generation engine for Rust.
//!
//! Stampede is the engine that load-test scripts are written against: it runs
//! many concurrent scenario instances, issues HTTP requests, evaluates named
//! checks, aggregates everything into a metrics snapshot, and applies
//! pass/fail thresholds to decide whether the run succeeded. The design takes
//! its cues from K6's execution model (virtual users, checks, thresholds)
//! while staying a plain Rust library with no scripting layer.
//!
//! # Architecture
//!
//! The main building blocks, in data-flow order:
//!
//! - [`RunConfig`]: the immutable description of a run: target URL, virtual
//!   users, duration or iteration cap, ramp windows, threshold rules.
//!   Validated once, before anything is spawned.
//! - [`Scenario`]: the unit of load-test logic. A named async function taking
//!   a [`ScenarioContext`] and performing zero or more requests plus checks.
//! - [`executor::VuScheduler`]: admits and retires virtual users along the
//!   configured ramp curve; each virtual user loops its bound scenario until
//!   a stop condition.
//! - [`metrics::Aggregator`]: sharded, concurrency-safe accumulation of
//!   request results, check outcomes, and latency distribution.
//! - [`threshold`]: applies the configured rules to the final snapshot and
//!   produces the run's [`Verdict`].
//! - [`report`]: the structured [`RunReport`] plus pluggable [`Reporter`]s
//!   for stdout and JSON output.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use stampede::{Registry, RunConfig, Runner, Scenario};
//! use stampede::report::{Reporter, StdoutReporter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::builder()
//!         .base_url("http://localhost:8080")
//!         .query(vec![("email".into(), "joao@amplemarket.com".into())])
//!         .vus(10)
//!         .duration(Duration::from_secs(30))
//!         .ramp_up(Duration::from_secs(5))
//!         .thresholds(vec![
//!             "error_rate < 0.01".parse()?,
//!             "request_duration_p95 < 800".parse()?,
//!         ])
//!         .build();
//!
//!     let validate = Scenario::new("email validation", |ctx| async move {
//!         let res = ctx.get("/v1/addresses/validate").await?;
//!         ctx.check("is status 200", res.status == Some(200));
//!         Ok(())
//!     });
//!
//!     let runner = Runner::new(config)?;
//!     let report = runner.run(Registry::new().register(validate)).await?;
//!     StdoutReporter.report(&report).await.ok();
//!     std::process::exit(report.exit_code());
//! }
//! ```
//!
//! # Error model
//!
//! Only configuration problems are errors: a malformed URL or an impossible
//! run shape fails fast from [`Runner::new`], before any execution. Network
//! failures, failed checks, and threshold violations are *data*; they flow
//! into the metrics and surface through the report and its exit code, never
//! as `Err`.
//!
//! # Feature flags
//!
//! - `macros`: the `#[scenario]` attribute that turns a plain async fn into a
//!   registrable [`Scenario`]. (Enabled by default)

/// Named boolean assertions over responses
pub mod check;
/// Run configuration and fail-fast validation
pub mod config;
/// The virtual-user scheduler and ramp profiles
pub mod executor;
/// The HTTP executor wrapping the shared client
pub mod http;
/// Concurrent metrics aggregation and snapshots
pub mod metrics;
/// Run reports and reporters
pub mod report;
/// Glue that drives a whole run end to end
pub mod runner;
/// Scenario values, contexts, and the registry
pub mod scenario;
/// Pass/fail rules over aggregated metrics
pub mod threshold;

pub use check::CheckResult;
pub use config::{ConfigError, RunConfig};
pub use executor::CancelHandle;
pub use http::{ErrorKind, HttpRequest, RequestResult};
pub use metrics::MetricsSnapshot;
pub use report::{Reporter, RunReport};
pub use runner::{Error, Runner};
pub use scenario::{Registry, Scenario, ScenarioContext, ScenarioResult};
pub use threshold::{ThresholdRule, Verdict};

#[cfg(feature = "macros")]
/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use stampede_macros::*;
}
