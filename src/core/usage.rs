//! Plan quotas and usage alert thresholds.
//!
//! Counters live on the user row; everything here is derived at read time.

use crate::infrastructure::entities::Plan;

/// Messages per billing cycle.
pub fn message_quota(plan: Plan) -> i64 {
    match plan {
        Plan::Free => 25,
        Plan::Pro => 1_000,
        Plan::Enterprise => 10_000,
    }
}

/// Percent-of-quota marks that trigger a usage notification.
pub const ALERT_THRESHOLDS: [u8; 3] = [80, 95, 100];

/// The fixed rejection message once the quota is exhausted.
pub fn limit_message(quota: i64) -> String {
    format!("Monthly message limit of {quota} reached. Upgrade your plan to continue.")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStatus {
    pub messages_used: i64,
    pub message_quota: i64,
    pub percent_used: u8,
    /// Highest alert threshold reached, if any.
    pub alert: Option<u8>,
}

pub fn status(plan: Plan, messages_used: i64) -> UsageStatus {
    let quota = message_quota(plan);
    let percent = percent_of_quota(messages_used, quota);

    UsageStatus {
        messages_used,
        message_quota: quota,
        percent_used: percent,
        alert: ALERT_THRESHOLDS
            .iter()
            .rev()
            .find(|&&t| percent >= t)
            .copied(),
    }
}

/// The threshold newly reached by going from `before` to `after` messages,
/// if the increment crossed one.
pub fn crossed_threshold(before: i64, after: i64, quota: i64) -> Option<u8> {
    let pct_before = percent_of_quota(before, quota);
    let pct_after = percent_of_quota(after, quota);

    ALERT_THRESHOLDS
        .iter()
        .rev()
        .find(|&&t| pct_before < t && pct_after >= t)
        .copied()
}

fn percent_of_quota(used: i64, quota: i64) -> u8 {
    if quota <= 0 {
        return 100;
    }
    ((used.max(0).saturating_mul(100)) / quota).min(100) as u8
}
