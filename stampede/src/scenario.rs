use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use url::Url;

use crate::check::{self, CheckResult, Predicate};
use crate::http::{HttpExecutor, HttpRequest, RequestResult};
use crate::metrics::Recorder;

/// What one scenario invocation reports back.
///
/// `Err` marks the invocation as failed without terminating the virtual user;
/// the error is recorded and the loop moves on to the next iteration.
pub type ScenarioResult = anyhow::Result<()>;

type ActionFn = dyn Fn(ScenarioContext) -> BoxFuture<'static, ScenarioResult> + Send + Sync;

/// A named unit of load-test logic: zero or more requests plus checks.
///
/// Scenarios are created at configuration time and immutable afterwards.
/// Virtual users reference a scenario, they never own it; the action is a
/// shared function value invoked once per iteration with a fresh context.
#[derive(Clone)]
pub struct Scenario {
    name: Arc<str>,
    query: Vec<(String, String)>,
    action: Arc<ActionFn>,
}

impl Scenario {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ScenarioContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ScenarioResult> + Send + 'static,
    {
        Self {
            name: name.into().into(),
            query: Vec::new(),
            action: Arc::new(move |ctx| action(ctx).boxed()),
        }
    }

    /// Add a query parameter applied to every request this scenario makes,
    /// on top of the run-wide ones from the config.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub(crate) fn invoke(&self, ctx: ScenarioContext) -> BoxFuture<'static, ScenarioResult> {
        (self.action)(ctx)
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// The immutable set of scenarios for one run.
///
/// Virtual users are bound round-robin across registered scenarios at
/// admission time.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    scenarios: Vec<Scenario>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.scenarios.iter().map(|s| s.name().to_string()).collect()
    }

    pub(crate) fn bind(&self, vu_id: usize) -> Scenario {
        self.scenarios[vu_id % self.scenarios.len()].clone()
    }
}

/// Read-only view handed to each scenario invocation.
///
/// Everything environment-specific (target URL, query parameters, the HTTP
/// client) is injected through the context, never hardcoded in scenario
/// logic.
#[derive(Clone)]
pub struct ScenarioContext {
    base_url: Url,
    query: Vec<(String, String)>,
    http: Arc<HttpExecutor>,
    recorder: Recorder,
    vu: usize,
    iteration: u64,
}

impl ScenarioContext {
    pub(crate) fn new(
        base_url: Url,
        query: Vec<(String, String)>,
        http: Arc<HttpExecutor>,
        recorder: Recorder,
        vu: usize,
        iteration: u64,
    ) -> Self {
        Self {
            base_url,
            query,
            http,
            recorder,
            vu,
            iteration,
        }
    }

    /// Which virtual user is running this invocation.
    pub fn vu(&self) -> usize {
        self.vu
    }

    /// This virtual user's iteration counter, starting at zero.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Resolve `path` against the base URL, appending the configured query
    /// parameters.
    pub fn url(&self, path: &str) -> anyhow::Result<Url> {
        let mut url = self.base_url.join(path)?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// GET `path` and record the result. Network failures come back as data
    /// in the [`RequestResult`]; only a malformed path is an `Err`.
    pub async fn get(&self, path: &str) -> anyhow::Result<RequestResult> {
        self.request(HttpRequest::get(self.url(path)?)).await
    }

    /// Issue an arbitrary prepared request and record the result.
    pub async fn request(&self, request: HttpRequest) -> anyhow::Result<RequestResult> {
        let result = self.http.execute(request).await;
        self.recorder.record_request(&result);
        Ok(result)
    }

    /// Record one named check outcome and hand it back so the scenario can
    /// branch on it.
    pub fn check(&self, name: &str, ok: bool) -> bool {
        self.recorder.record_check(CheckResult {
            name: name.to_string(),
            ok,
        });
        ok
    }

    /// Evaluate a set of named predicates against a response, k6-style.
    /// Every check runs and is recorded; returns true only if all passed.
    pub fn check_all(&self, result: &RequestResult, checks: &[(&str, Predicate)]) -> bool {
        let mut all_ok = true;
        for outcome in check::check_all(result, checks) {
            all_ok &= outcome.ok;
            self.recorder.record_check(outcome);
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Client;

    use super::*;
    use crate::metrics::Aggregator;

    fn context(base: &str, query: Vec<(String, String)>) -> ScenarioContext {
        let agg = Arc::new(Aggregator::new(1));
        ScenarioContext::new(
            Url::parse(base).unwrap(),
            query,
            Arc::new(HttpExecutor::new(Client::new(), 1)),
            agg.recorder(),
            0,
            0,
        )
    }

    #[test]
    fn url_resolves_path_and_appends_query() {
        let ctx = context(
            "http://localhost:8080",
            vec![("email".into(), "a@b.com".into())],
        );
        let url = ctx.url("/v1/addresses/validate").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/v1/addresses/validate?email=a%40b.com"
        );
    }

    #[test]
    fn scenario_query_extends_config_query() {
        let scenario = Scenario::new("s", |_ctx| async { Ok(()) }).with_query("key", "secret");
        assert_eq!(scenario.query(), &[("key".into(), "secret".into())]);
    }

    #[test]
    fn registry_binds_round_robin() {
        let registry = Registry::new()
            .register(Scenario::new("a", |_ctx| async { Ok(()) }))
            .register(Scenario::new("b", |_ctx| async { Ok(()) }));
        assert_eq!(registry.bind(0).name(), "a");
        assert_eq!(registry.bind(1).name(), "b");
        assert_eq!(registry.bind(2).name(), "a");
    }

    #[tokio::test]
    async fn checks_flow_into_the_aggregator() {
        let agg = Arc::new(Aggregator::new(1));
        let ctx = ScenarioContext::new(
            Url::parse("http://localhost:8080").unwrap(),
            Vec::new(),
            Arc::new(HttpExecutor::new(Client::new(), 1)),
            agg.recorder(),
            0,
            0,
        );
        assert!(ctx.check("passes", true));
        assert!(!ctx.check("fails", false));

        let snap = agg.snapshot();
        assert_eq!(snap.checks, 2);
        assert_eq!(snap.check_failures, 1);
    }
}
