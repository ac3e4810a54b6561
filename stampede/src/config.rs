use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use typed_builder::TypedBuilder;
use url::Url;

use crate::metrics;
use crate::threshold::ThresholdRule;

/// Everything a run needs to know before it starts.
///
/// A `RunConfig` is built once, validated once, and never mutated while the run
/// is in flight. The run timeline it describes is:
///
/// ```text
/// 0 ──ramp_up──▶ vus ──duration──▶ vus ──ramp_down──▶ 0
/// ```
///
/// Active virtual users grow linearly from zero to `vus` over `ramp_up`, hold
/// for `duration`, then shrink linearly back to zero over `ramp_down`. Both
/// ramps default to zero, which gives a plain constant-VU run. When only
/// `iterations` is set (no `duration`), the run ends once every virtual user
/// has exhausted its per-VU iteration cap.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct RunConfig {
    /// Base URL every scenario request is resolved against.
    #[builder(setter(into))]
    pub base_url: String,
    /// Query parameters appended to every request URL.
    #[builder(default)]
    pub query: Vec<(String, String)>,
    /// Target number of concurrent virtual users.
    pub vus: usize,
    /// How long to hold at full concurrency. At least one of `duration` and
    /// `iterations` must be set.
    #[builder(default, setter(strip_option))]
    pub duration: Option<Duration>,
    /// Per-VU iteration cap.
    #[builder(default, setter(strip_option))]
    pub iterations: Option<u64>,
    #[builder(default)]
    pub ramp_up: Duration,
    #[builder(default)]
    pub ramp_down: Duration,
    /// Pass/fail rules evaluated against the final metrics snapshot.
    #[builder(default)]
    pub thresholds: Vec<ThresholdRule>,
    /// Per-request timeout applied by the HTTP client.
    #[builder(default = Duration::from_secs(30))]
    pub request_timeout: Duration,
    /// Upper bound on concurrent in-flight requests across all virtual users.
    #[builder(default = 1024)]
    pub max_connections: usize,
    /// Optional fixed delay between iterations of the same virtual user.
    #[builder(default, setter(strip_option))]
    pub pacing: Option<Duration>,
    /// Granularity of the scheduler's control loop.
    #[builder(default = Duration::from_millis(100))]
    pub tick: Duration,
    /// How long retiring virtual users get to finish their in-flight
    /// iteration before being aborted.
    #[builder(default = Duration::from_secs(10))]
    pub graceful_stop: Duration,
}

impl RunConfig {
    /// Fail-fast validation, run once before anything is spawned.
    ///
    /// Returns the parsed base URL on success so callers never re-parse it.
    pub fn validate(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if self.vus == 0 {
            return Err(ConfigError::ZeroVus);
        }
        if self.duration.is_none() && self.iterations.is_none() {
            return Err(ConfigError::NoStopCondition);
        }
        if self.iterations == Some(0) {
            return Err(ConfigError::ZeroIterations);
        }
        if self.tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        for rule in &self.thresholds {
            if !metrics::known_metric(&rule.metric) {
                return Err(ConfigError::UnknownMetric(rule.metric.clone()));
            }
        }
        Ok(url)
    }
}

/// Configuration problems detected before the run starts.
///
/// These are fatal to the whole run: nothing is spawned and no partial
/// results are produced.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("base url scheme must be http or https, got {0:?}")]
    UnsupportedScheme(String),
    #[error("target vus must be greater than zero")]
    ZeroVus,
    #[error("a run needs a duration, an iteration cap, or both")]
    NoStopCondition,
    #[error("iteration cap must be greater than zero")]
    ZeroIterations,
    #[error("scheduler tick must be non-zero")]
    ZeroTick,
    #[error("max_connections must be greater than zero")]
    ZeroConnections,
    #[error("threshold references unknown metric {0:?}")]
    UnknownMetric(String),
    #[error("cannot parse threshold {0:?}, expected e.g. \"error_rate < 0.01\"")]
    BadThreshold(String),
}
