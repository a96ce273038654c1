/// Entitlement evaluation
///
/// The single source of truth for premium-content gating. Pure: no I/O,
/// no clock access. Callers must pass a freshly loaded snapshot so a
/// just-processed cancellation is never masked by a stale copy.
use crate::account::SubscriptionSnapshot;
use crate::subscription::SubscriptionStatus;
use chrono::{DateTime, Utc};

/// A snapshot is entitled iff its status is active and its paid period
/// has not ended.
pub fn is_active(snapshot: &SubscriptionSnapshot, now: DateTime<Utc>) -> bool {
    snapshot.status == SubscriptionStatus::Active
        && snapshot.current_period_end.is_some_and(|end| end > now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(status: SubscriptionStatus, period_end: Option<DateTime<Utc>>) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            status,
            billing_customer_id: Some("cus_123".to_string()),
            billing_subscription_id: Some("sub_123".to_string()),
            current_period_end: period_end,
        }
    }

    #[test]
    fn test_active_with_future_period_end() {
        let now = Utc::now();
        let snap = snapshot(SubscriptionStatus::Active, Some(now + Duration::days(365)));
        assert!(is_active(&snap, now));
    }

    #[test]
    fn test_inactive_statuses_never_entitle() {
        let now = Utc::now();
        let future = Some(now + Duration::days(30));

        for status in [
            SubscriptionStatus::Inactive,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::PastDue,
        ] {
            assert!(!is_active(&snapshot(status, future), now));
        }
    }

    #[test]
    fn test_active_but_expired_period_not_entitled() {
        let now = Utc::now();
        let snap = snapshot(SubscriptionStatus::Active, Some(now - Duration::days(1)));
        assert!(!is_active(&snap, now));
    }

    #[test]
    fn test_period_end_equal_to_now_not_entitled() {
        let now = Utc::now();
        let snap = snapshot(SubscriptionStatus::Active, Some(now));
        assert!(!is_active(&snap, now));
    }

    #[test]
    fn test_missing_period_end_not_entitled() {
        let now = Utc::now();
        let snap = snapshot(SubscriptionStatus::Active, None);
        assert!(!is_active(&snap, now));
    }
}
