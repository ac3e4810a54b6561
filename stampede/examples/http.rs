use std::time::Duration;

use stampede::report::{Reporter, StdoutReporter};
use stampede::{Registry, RunConfig, Runner, Scenario};

/// Load-tests an email-validation endpoint: GET /v1/addresses/validate with
/// an `email` query parameter, checking for status 200.
///
/// The target and credentials come from the environment, not the scenario:
///
/// ```sh
/// TARGET_URL=http://localhost:8080 cargo run --example http
/// TARGET_URL=https://posterum.bemisc.com API_KEY=... cargo run --example http
/// ```
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let base_url =
        std::env::var("TARGET_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let email = std::env::var("EMAIL").unwrap_or_else(|_| "joao@amplemarket.com".to_string());

    let config = RunConfig::builder()
        .base_url(base_url)
        .query(vec![("email".into(), email)])
        .vus(10)
        .duration(Duration::from_secs(30))
        .ramp_up(Duration::from_secs(5))
        .ramp_down(Duration::from_secs(5))
        .thresholds(vec![
            "error_rate < 0.01".parse().unwrap(),
            "check_rate >= 0.99".parse().unwrap(),
            "request_duration_p95 < 800".parse().unwrap(),
        ])
        .build();

    let mut validate = Scenario::new("email validation", |ctx| async move {
        let res = ctx.get("/v1/addresses/validate").await?;
        ctx.check("is status 200", res.status == Some(200));
        Ok(())
    });
    // Remote deployments authenticate with an API key.
    if let Ok(key) = std::env::var("API_KEY") {
        validate = validate.with_query("key", key);
    }

    let runner = Runner::new(config)
        .unwrap()
        .with_progress(Duration::from_secs(5));
    let report = runner
        .run(Registry::new().register(validate))
        .await
        .unwrap();

    StdoutReporter.report(&report).await.unwrap();
    std::process::exit(report.exit_code());
}
