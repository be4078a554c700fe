//! Staleness detection for credential files.
//!
//! A file is stale when the agent has not rewritten it for longer than the
//! configured `max_age`. Staleness is reported and logged only; it never
//! evicts a known-good credential.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::duration::format_duration;

/// Result of a staleness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StalenessCheck {
    pub is_stale: bool,
    #[serde(serialize_with = "crate::duration::serialize_duration_opt")]
    pub age: Option<Duration>,
    #[serde(serialize_with = "crate::duration::serialize_duration")]
    pub threshold: Duration,
}

impl StalenessCheck {
    pub fn stale(age: Duration, threshold: Duration) -> Self {
        Self { is_stale: true, age: Some(age), threshold }
    }

    pub fn fresh(age: Duration, threshold: Duration) -> Self {
        Self { is_stale: false, age: Some(age), threshold }
    }

    pub fn missing(threshold: Duration) -> Self {
        Self { is_stale: true, age: None, threshold }
    }
}

/// Check a file modification time against a threshold.
///
/// A modification time in the future (clock skew between the agent and us)
/// counts as age zero.
pub fn check_staleness(
    modified: Option<DateTime<Utc>>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> StalenessCheck {
    match modified {
        Some(modified) => {
            let age = (now - modified).to_std().unwrap_or(Duration::ZERO);
            if age > threshold {
                StalenessCheck::stale(age, threshold)
            } else {
                StalenessCheck::fresh(age, threshold)
            }
        }
        None => StalenessCheck::missing(threshold),
    }
}

/// Log a staleness check result for one credential.
pub fn log_credential_staleness(name: &str, check: &StalenessCheck) {
    let age_str = check
        .age
        .map(format_duration)
        .unwrap_or_else(|| "never".to_string());
    let threshold_str = format_duration(check.threshold);

    if check.is_stale {
        warn!(
            credential = name,
            age = %age_str,
            threshold = %threshold_str,
            "credential file is stale"
        );
    } else {
        info!(
            credential = name,
            age = %age_str,
            threshold = %threshold_str,
            "credential file is fresh"
        );
    }
}
