//! ARN suffix extraction for metric dimensions.
//!
//! CloudWatch dimensions identify a load balancer as `app/<name>/<id>`
//! and a target group as `targetgroup/<name>/<id>`: the trailing
//! segments of their ARNs. The match anchors at the last occurrence of
//! the marker and requires a non-empty prefix before it.

use regex::Regex;

use crate::error::{HealthError, HealthResult};

fn extract_suffix(arn: &str, pattern: &'static str, regex: &Regex) -> HealthResult<String> {
    regex
        .captures(arn)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| HealthError::MalformedArn {
            pattern,
            arn: arn.to_string(),
        })
}

/// Extract the `app/...` load-balancer id from an ALB ARN.
pub fn extract_alb_id(arn: &str) -> HealthResult<String> {
    // Unwrap is fine: the pattern is a compile-time constant.
    let regex = Regex::new(r"^.+(app/.+)$").unwrap();
    extract_suffix(arn, "app/", &regex)
}

/// Extract the `targetgroup/...` id from a target-group ARN.
pub fn extract_target_group_id(arn: &str) -> HealthResult<String> {
    let regex = Regex::new(r"^.+(targetgroup/.+)$").unwrap();
    extract_suffix(arn, "targetgroup/", &regex)
}
