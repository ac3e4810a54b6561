use async_trait::async_trait;
use serde::Serialize;

use crate::config::RunConfig;
use crate::metrics::MetricsSnapshot;
use crate::threshold::Verdict;

/// The run's terminal output: final metrics plus the threshold verdict.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenarios: Vec<String>,
    pub config: RunConfig,
    pub metrics: MetricsSnapshot,
    pub verdict: Verdict,
}

impl RunReport {
    /// Process exit status for the run: 0 on pass, non-zero on fail.
    pub fn exit_code(&self) -> i32 {
        if self.verdict.passed() { 0 } else { 1 }
    }
}

/// Consumes a finished report and sends it somewhere: stdout, a file, a
/// service. Reporters are free to format however they like.
#[async_trait]
pub trait Reporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>>;
}

/// Human-readable summary on stdout.
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
        let m = &report.metrics;
        println!("scenarios: {}", report.scenarios.join(", "));
        println!(
            "requests:   {} total, {} failed ({:.2}% error rate)",
            m.requests,
            m.request_failures,
            m.value("error_rate").unwrap_or(0.0) * 100.0
        );
        println!(
            "iterations: {} total, {} failed",
            m.iterations, m.iterations_failed
        );
        println!("checks:     {} total, {} failed", m.checks, m.check_failures);
        for (name, counts) in &m.per_check {
            println!("  ✓ {name}: {} passed / {} failed", counts.passes, counts.failures);
        }
        let l = &m.latency_ms;
        println!(
            "latency ms: min={:.1} avg={:.1} p50={:.1} p90={:.1} p95={:.1} p99={:.1} max={:.1}",
            l.min, l.avg, l.p50, l.p90, l.p95, l.p99, l.max
        );
        println!(
            "vus:        {} peak, {:.1} rps over {:.1}s",
            m.peak_vus,
            m.value("rps").unwrap_or(0.0),
            m.elapsed.as_secs_f64()
        );
        match &report.verdict {
            Verdict::Pass => println!("verdict:    PASS"),
            Verdict::Fail(violations) => {
                println!("verdict:    FAIL");
                for violation in violations {
                    println!(
                        "  ✗ {} (observed {:.4})",
                        violation.rule, violation.observed
                    );
                }
            }
        }
        Ok(())
    }
}

/// One JSON document on stdout, for machine consumption.
pub struct JsonReporter;

#[async_trait]
impl Reporter for JsonReporter {
    async fn report(&self, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metrics::Aggregator;
    use crate::threshold::{Comparison, ThresholdRule, Violation};

    fn report(verdict: Verdict) -> RunReport {
        RunReport {
            scenarios: vec!["email validation".into()],
            config: RunConfig::builder()
                .base_url("http://localhost:8080")
                .vus(1)
                .iterations(1)
                .build(),
            metrics: Arc::new(Aggregator::new(1)).snapshot(),
            verdict,
        }
    }

    #[test]
    fn exit_code_follows_the_verdict() {
        assert_eq!(report(Verdict::Pass).exit_code(), 0);
        let failed = report(Verdict::Fail(vec![Violation {
            rule: ThresholdRule::new("error_rate", Comparison::Lt, 0.01),
            observed: 1.0,
        }]));
        assert_eq!(failed.exit_code(), 1);
    }

    #[test]
    fn report_serializes_to_json() {
        let json = serde_json::to_value(report(Verdict::Pass)).unwrap();
        assert_eq!(json["verdict"], "Pass");
        assert_eq!(json["metrics"]["requests"], 0);
    }
}
