//! Cancellation policy evaluation.
//!
//! Computes whether a cancellation is allowed and what it refunds. The
//! window check is inclusive: cancelling exactly `allowed_until_hours`
//! before start is allowed. Emergency and business-closure reasons bypass
//! both the window and the penalty.

use chrono::{DateTime, Utc};
use reservo_core::config::{CancellationConfig, RefundPolicy};
use reservo_core::domain::booking::{Booking, CancellationReason};
use serde::{Deserialize, Serialize};

/// Outcome of a cancellation evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationDecision {
    /// Whether the cancellation may proceed.
    pub allowed: bool,
    /// Why it was denied, when it was.
    pub denied_reason: Option<String>,
    /// Penalty withheld, in minor units.
    pub penalty_minor: i64,
    /// Amount refunded, in minor units.
    pub refund_minor: i64,
}

/// Evaluate a cancellation request.
#[must_use]
pub fn evaluate_cancellation(
    booking: &Booking,
    reason: CancellationReason,
    requested_at: DateTime<Utc>,
    config: &CancellationConfig,
) -> CancellationDecision {
    let until_start = booking.start_at - requested_at;
    let window = chrono::Duration::hours(config.allowed_until_hours);

    if until_start < window && !reason.bypasses_policy() {
        return CancellationDecision {
            allowed: false,
            denied_reason: Some(format!(
                "cancellations are allowed until {} hours before start",
                config.allowed_until_hours
            )),
            penalty_minor: 0,
            refund_minor: 0,
        };
    }

    let (penalty, refund) = if reason.bypasses_policy() {
        (0, booking.total_minor)
    } else {
        match config.refund_policy {
            RefundPolicy::Full => (0, booking.total_minor),
            RefundPolicy::None => (booking.total_minor, 0),
            RefundPolicy::Partial => {
                let penalty =
                    booking.total_minor * i64::from(config.penalty_percentage) / 100;
                (penalty, booking.total_minor - penalty)
            }
        }
    };

    CancellationDecision {
        allowed: true,
        denied_reason: None,
        penalty_minor: penalty,
        refund_minor: refund,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reservo_core::domain::booking::BookingStatus;
    use reservo_core::ids::{BookingId, CustomerId, ServiceId, TenantId};

    fn booking(start: DateTime<Utc>, total: i64) -> Booking {
        Booking {
            id: BookingId::new(),
            tenant_id: TenantId::nil(),
            customer_id: CustomerId::nil(),
            service_id: ServiceId::nil(),
            start_at: start,
            end_at: start + chrono::Duration::hours(1),
            status: BookingStatus::Confirmed,
            total_minor: total,
            idempotency_key: "k".into(),
            expires_at: None,
            created_at: start - chrono::Duration::days(7),
            updated_at: start - chrono::Duration::days(7),
        }
    }

    fn config() -> CancellationConfig {
        CancellationConfig {
            allowed_until_hours: 24,
            penalty_percentage: 10,
            refund_policy: RefundPolicy::Partial,
        }
    }

    #[test]
    fn within_window_computes_partial_refund() {
        let start = Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap();
        let decision = evaluate_cancellation(
            &booking(start, 10_000),
            CancellationReason::CustomerRequest,
            start - chrono::Duration::hours(48),
            &config(),
        );
        assert!(decision.allowed);
        assert_eq!(decision.penalty_minor, 1_000);
        assert_eq!(decision.refund_minor, 9_000);
    }

    #[test]
    fn boundary_exactly_at_window_is_allowed() {
        let start = Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap();
        let decision = evaluate_cancellation(
            &booking(start, 10_000),
            CancellationReason::CustomerRequest,
            start - chrono::Duration::hours(24),
            &config(),
        );
        assert!(decision.allowed);

        let decision = evaluate_cancellation(
            &booking(start, 10_000),
            CancellationReason::CustomerRequest,
            start - chrono::Duration::hours(24) + chrono::Duration::seconds(1),
            &config(),
        );
        assert!(!decision.allowed);
    }

    #[test]
    fn emergency_bypasses_window_and_penalty() {
        let start = Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap();
        for reason in [CancellationReason::Emergency, CancellationReason::BusinessClosure] {
            let decision = evaluate_cancellation(
                &booking(start, 10_000),
                reason,
                start - chrono::Duration::hours(1),
                &config(),
            );
            assert!(decision.allowed);
            assert_eq!(decision.penalty_minor, 0);
            assert_eq!(decision.refund_minor, 10_000);
        }
    }

    #[test]
    fn refund_policy_variants() {
        let start = Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap();
        let at = start - chrono::Duration::hours(48);

        let mut cfg = config();
        cfg.refund_policy = RefundPolicy::Full;
        let decision =
            evaluate_cancellation(&booking(start, 10_000), CancellationReason::CustomerRequest, at, &cfg);
        assert_eq!(decision.refund_minor, 10_000);

        cfg.refund_policy = RefundPolicy::None;
        let decision =
            evaluate_cancellation(&booking(start, 10_000), CancellationReason::CustomerRequest, at, &cfg);
        assert_eq!(decision.refund_minor, 0);
        assert_eq!(decision.penalty_minor, 10_000);
    }
}
