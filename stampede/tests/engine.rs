//! End-to-end runs against a minimal in-process HTTP target.

use std::net::SocketAddr;
use std::time::Duration;

use stampede::macros::scenario;
use stampede::{
    Registry, RunConfig, Runner, Scenario, ScenarioContext, ScenarioResult, Verdict,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Hand-rolled HTTP/1.1 responder that answers every request with a fixed
/// status. Good enough for a load target: keep-alive, no parsing beyond
/// "some bytes arrived".
async fn spawn_target(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if socket.write_all(response.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

const OK: &str = "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok";
const SERVER_ERROR: &str = "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n";

fn validate_scenario() -> Scenario {
    Scenario::new("email validation", |ctx| async move {
        let res = ctx.get("/v1/addresses/validate").await?;
        ctx.check("is status 200", res.status == Some(200));
        Ok(())
    })
}

fn config(addr: SocketAddr, vus: usize, iterations: u64) -> RunConfig {
    RunConfig::builder()
        .base_url(format!("http://{addr}"))
        .query(vec![("email".into(), "a@b.com".into())])
        .vus(vus)
        .iterations(iterations)
        .tick(Duration::from_millis(10))
        .thresholds(vec!["error_rate < 0.01".parse().unwrap()])
        .build()
}

#[tokio::test]
async fn healthy_target_passes_with_no_failed_checks() {
    let addr = spawn_target(OK).await;
    let runner = Runner::new(config(addr, 10, 20)).unwrap();
    let report = runner
        .run(Registry::new().register(validate_scenario()))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.metrics.requests, 200);
    assert_eq!(report.metrics.request_failures, 0);
    assert_eq!(report.metrics.check_failures, 0);
    assert_eq!(report.metrics.per_check["is status 200"].passes, 200);
    assert_eq!(report.metrics.status_counts["2xx"], 200);
}

#[tokio::test]
async fn failing_target_violates_the_error_rate_threshold() {
    let addr = spawn_target(SERVER_ERROR).await;
    let runner = Runner::new(config(addr, 5, 10)).unwrap();
    let report = runner
        .run(Registry::new().register(validate_scenario()))
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 1);
    match &report.verdict {
        Verdict::Fail(violations) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].rule.metric, "error_rate");
            assert_eq!(violations[0].observed, 1.0);
        }
        Verdict::Pass => panic!("expected a threshold violation"),
    }
    assert_eq!(report.metrics.requests, 50);
    assert_eq!(report.metrics.request_failures, 50);
    assert_eq!(report.metrics.per_check["is status 200"].failures, 50);
}

#[tokio::test]
async fn unreachable_target_fails_iterations_but_not_the_run() {
    // Bind and immediately drop so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = RunConfig::builder()
        .base_url(format!("http://{addr}"))
        .vus(4)
        .iterations(5)
        .tick(Duration::from_millis(10))
        .build();
    let runner = Runner::new(config).unwrap();
    let report = runner
        .run(Registry::new().register(Scenario::new("must reach target", |ctx| {
            async move {
                let res = ctx.get("/").await?;
                if res.failed() {
                    anyhow::bail!("request failed: {:?}", res.error);
                }
                Ok(())
            }
        })))
        .await
        .unwrap();

    // Every iteration failed, yet every unit ran its full cap and the run
    // produced a report instead of an error.
    assert_eq!(report.metrics.iterations, 20);
    assert_eq!(report.metrics.iterations_failed, 20);
    assert_eq!(report.metrics.requests, 20);
    assert_eq!(report.metrics.request_failures, 20);
}

#[tokio::test]
async fn request_timeout_is_recorded_as_data() {
    // A target that accepts and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            // Hold the socket open without responding.
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(socket);
            });
        }
    });

    let config = RunConfig::builder()
        .base_url(format!("http://{addr}"))
        .vus(2)
        .iterations(2)
        .tick(Duration::from_millis(10))
        .request_timeout(Duration::from_millis(200))
        .build();
    let runner = Runner::new(config).unwrap();
    let report = runner
        .run(Registry::new().register(validate_scenario()))
        .await
        .unwrap();

    assert_eq!(report.metrics.requests, 4);
    assert_eq!(report.metrics.request_failures, 4);
    assert_eq!(report.metrics.iterations, 4);
}

#[scenario]
async fn macro_flow(ctx: ScenarioContext) -> ScenarioResult {
    let res = ctx.get("/").await?;
    ctx.check("got a status", res.status.is_some());
    Ok(())
}

#[tokio::test]
async fn scenario_attribute_builds_a_named_scenario() {
    let addr = spawn_target(OK).await;
    let config = RunConfig::builder()
        .base_url(format!("http://{addr}"))
        .vus(2)
        .iterations(3)
        .tick(Duration::from_millis(10))
        .build();
    let report = Runner::new(config)
        .unwrap()
        .run(Registry::new().register(macro_flow()))
        .await
        .unwrap();

    assert_eq!(report.scenarios, vec!["macro_flow".to_string()]);
    assert_eq!(report.metrics.requests, 6);
    assert_eq!(report.metrics.check_failures, 0);
}

#[tokio::test]
async fn cancellation_cuts_a_duration_run_short() {
    let addr = spawn_target(OK).await;
    let config = RunConfig::builder()
        .base_url(format!("http://{addr}"))
        .vus(5)
        .duration(Duration::from_secs(3600))
        .tick(Duration::from_millis(10))
        .build();
    let runner = Runner::new(config).unwrap();
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        runner.run(Registry::new().register(validate_scenario())),
    )
    .await
    .expect("run did not observe cancellation")
    .unwrap();

    assert!(report.metrics.iterations > 0);
    assert_eq!(report.metrics.active_vus, 0);
}
