//! Output expectations.

use regex::Regex;

use super::result::Failure;
use crate::task::Expectation;
use crate::utils::truncate;

/// Characters of agent output copied into a failure.
const ACTUAL_PREVIEW_CHARS: usize = 500;

/// Checks `output` against every expectation and returns all violations.
///
/// An invalid pattern is a failure of its own kind. `exit_code` is not
/// evaluated.
pub fn check_expectations(output: &str, expectations: &[Expectation]) -> Vec<Failure> {
    let mut failures = Vec::new();

    for expect in expectations {
        if let Some(pattern) = expect.contains.as_deref() {
            match Regex::new(pattern) {
                Err(e) => failures.push(invalid_regex("contains", pattern, e)),
                Ok(re) if !re.is_match(output) => failures.push(
                    Failure::new(
                        "contains",
                        format!("output does not match pattern: {}", pattern),
                    )
                    .with_expected(pattern)
                    .with_actual(truncate(output, ACTUAL_PREVIEW_CHARS)),
                ),
                Ok(_) => {}
            }
        }

        if let Some(pattern) = expect.not_contains.as_deref() {
            match Regex::new(pattern) {
                Err(e) => failures.push(invalid_regex("notContains", pattern, e)),
                Ok(re) if re.is_match(output) => failures.push(
                    Failure::new(
                        "notContains",
                        format!("output should not match pattern: {}", pattern),
                    )
                    .with_expected(format!("NOT {}", pattern))
                    .with_actual(truncate(output, ACTUAL_PREVIEW_CHARS)),
                ),
                Ok(_) => {}
            }
        }
    }

    failures
}

fn invalid_regex(kind: &str, pattern: &str, err: regex::Error) -> Failure {
    Failure::new(kind, format!("invalid regex: {}", err)).with_expected(pattern)
}
