use serde::{Deserialize, Serialize};

use crate::http::RequestResult;

/// One named boolean assertion, evaluated against a response.
///
/// Check names are scoped per scenario invocation but aggregated globally by
/// name, so two scenarios sharing a check name share its pass/fail counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
}

/// A predicate over a request result. Capture-free closures coerce here, so
/// `|r| r.status == Some(200)` works directly.
pub type Predicate = fn(&RequestResult) -> bool;

/// Evaluate every predicate against `result`, independent of each other.
///
/// All checks run even when an early one fails, so a scenario invocation may
/// end up with some passing and some failing checks. Returns the results in
/// declaration order so the caller can record them and branch on the overall
/// outcome.
pub fn check_all(result: &RequestResult, checks: &[(&str, Predicate)]) -> Vec<CheckResult> {
    checks
        .iter()
        .map(|(name, predicate)| CheckResult {
            name: (*name).to_string(),
            ok: predicate(result),
        })
        .collect()
}
