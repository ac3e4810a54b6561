use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::metrics::MetricsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, value: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => value < bound,
            Comparison::Le => value <= bound,
            Comparison::Gt => value > bound,
            Comparison::Ge => value >= bound,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// One pass/fail rule over the aggregated run metrics.
///
/// Parses from the compact notation load-test configs usually carry:
/// `"error_rate < 0.01"`, `"request_duration_p95 <= 800"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric: String,
    pub op: Comparison,
    pub bound: f64,
}

impl ThresholdRule {
    pub fn new(metric: impl Into<String>, op: Comparison, bound: f64) -> Self {
        Self {
            metric: metric.into(),
            op,
            bound,
        }
    }
}

impl std::fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.metric, self.op.symbol(), self.bound)
    }
}

impl FromStr for ThresholdRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Two-character operators first so "<=" is not read as "<".
        for (symbol, op) in [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ] {
            if let Some((metric, bound)) = s.split_once(symbol) {
                let metric = metric.trim();
                let bound: f64 = bound
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::BadThreshold(s.to_string()))?;
                if metric.is_empty() {
                    return Err(ConfigError::BadThreshold(s.to_string()));
                }
                return Ok(ThresholdRule::new(metric, op, bound));
            }
        }
        Err(ConfigError::BadThreshold(s.to_string()))
    }
}

/// A rule that did not hold, with the value actually observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub rule: ThresholdRule,
    pub observed: f64,
}

/// Overall outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Verdict {
    Pass,
    Fail(Vec<Violation>),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Apply every rule to the final snapshot, independently of order.
///
/// Violations are collected as a set (sorted, deduplicated), never
/// short-circuited, so permuting the rules yields the same verdict and the
/// same violation set. Runs once, after all virtual users have terminated.
pub fn evaluate(snapshot: &MetricsSnapshot, rules: &[ThresholdRule]) -> Verdict {
    let mut violations = Vec::new();
    for rule in rules {
        // Unknown metrics were rejected at config validation; if one slips
        // through anyway it counts as a violation rather than a pass.
        let observed = snapshot.value(&rule.metric).unwrap_or(f64::NAN);
        if !rule.op.holds(observed, rule.bound) {
            violations.push(Violation {
                rule: rule.clone(),
                observed,
            });
        }
    }
    if violations.is_empty() {
        return Verdict::Pass;
    }
    violations.sort_by(|a, b| {
        (&a.rule.metric, a.rule.op.symbol())
            .cmp(&(&b.rule.metric, b.rule.op.symbol()))
            .then(a.rule.bound.total_cmp(&b.rule.bound))
    });
    violations.dedup();
    Verdict::Fail(violations)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metrics::Aggregator;

    fn empty_snapshot() -> MetricsSnapshot {
        Arc::new(Aggregator::new(1)).snapshot()
    }

    #[test]
    fn parses_compact_notation() {
        let rule: ThresholdRule = "error_rate < 0.01".parse().unwrap();
        assert_eq!(rule, ThresholdRule::new("error_rate", Comparison::Lt, 0.01));

        let rule: ThresholdRule = "request_duration_p95<=800".parse().unwrap();
        assert_eq!(
            rule,
            ThresholdRule::new("request_duration_p95", Comparison::Le, 800.0)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("error_rate".parse::<ThresholdRule>().is_err());
        assert!("< 0.01".parse::<ThresholdRule>().is_err());
        assert!("error_rate < banana".parse::<ThresholdRule>().is_err());
    }

    #[test]
    fn empty_run_passes_an_error_rate_bound() {
        let snapshot = empty_snapshot();
        let rules = vec!["error_rate < 0.01".parse().unwrap()];
        assert_eq!(evaluate(&snapshot, &rules), Verdict::Pass);
    }

    #[test]
    fn violated_rule_reports_the_observed_value() {
        let snapshot = empty_snapshot();
        // requests == 0, so "requests >= 1" must fail with observed 0.
        let rules = vec!["requests >= 1".parse().unwrap()];
        match evaluate(&snapshot, &rules) {
            Verdict::Fail(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].observed, 0.0);
            }
            Verdict::Pass => panic!("expected a violation"),
        }
    }

    #[test]
    fn evaluation_is_order_independent() {
        let snapshot = empty_snapshot();
        let rules: Vec<ThresholdRule> = vec![
            "requests >= 1".parse().unwrap(),
            "error_rate < 0.01".parse().unwrap(),
            "checks > 0".parse().unwrap(),
        ];
        let mut permuted = rules.clone();
        permuted.reverse();
        assert_eq!(evaluate(&snapshot, &rules), evaluate(&snapshot, &permuted));
    }

    #[test]
    fn unknown_metric_is_a_violation_not_a_pass() {
        let snapshot = empty_snapshot();
        let rules = vec![ThresholdRule::new("no_such_metric", Comparison::Lt, 1.0)];
        assert!(matches!(evaluate(&snapshot, &rules), Verdict::Fail(_)));
    }
}
