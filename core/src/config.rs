//! Engine configuration.
//!
//! Every knob the engine honors lives here with its documented default.
//! Values are provided by the application (environment loading happens at
//! the binary edge); builders allow programmatic construction in tests.

use crate::domain::notification::Channel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Refund behavior on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundPolicy {
    /// Refund everything.
    Full,
    /// Refund total minus penalty.
    Partial,
    /// No refund.
    None,
}

/// Booking-level policy knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicyConfig {
    /// Reject bookings that overlap another active booking of the same
    /// customer.
    pub prevent_double_booking: bool,
    /// Allow reserving beyond total capacity.
    pub allow_overbooking: bool,
    /// Overbooking headroom in percent (0-100), applied when
    /// `allow_overbooking` is set.
    pub overbooking_percent: u8,
    /// Minimum booking duration in minutes.
    pub min_booking_duration_minutes: i64,
    /// Maximum booking duration in minutes.
    pub max_booking_duration_minutes: i64,
    /// How far ahead bookings may be made, in days.
    pub advance_booking_days: i64,
}

impl Default for BookingPolicyConfig {
    fn default() -> Self {
        Self {
            prevent_double_booking: true,
            allow_overbooking: false,
            overbooking_percent: 0,
            min_booking_duration_minutes: 5,
            max_booking_duration_minutes: 480,
            advance_booking_days: 90,
        }
    }
}

/// Cancellation policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationConfig {
    /// Cancellations are allowed until this many hours before start.
    pub allowed_until_hours: i64,
    /// Penalty in percent of the booking total (0-100).
    pub penalty_percentage: u8,
    /// Refund behavior.
    pub refund_policy: RefundPolicy,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            allowed_until_hours: 24,
            penalty_percentage: 10,
            refund_policy: RefundPolicy::Partial,
        }
    }
}

/// Tentative-booking knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TentativeConfig {
    /// Whether tentative bookings are used at all.
    pub enabled: bool,
    /// Minutes a tentative booking holds capacity before auto-release.
    pub timeout_minutes: i64,
    /// Confirm automatically when a payment webhook arrives.
    pub auto_confirm_on_payment: bool,
    /// Maximum simultaneous tentative bookings per customer.
    pub max_per_customer: i32,
}

impl Default for TentativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_minutes: 15,
            auto_confirm_on_payment: true,
            max_per_customer: 3,
        }
    }
}

/// Idempotency-store knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Record TTL in minutes.
    pub default_expiration_minutes: i64,
    /// Retry budget for failed requests under the same key.
    pub max_retries: i32,
    /// Wait clients are told to observe while a key is processing.
    pub wait_ms: u64,
    /// `processing` records older than this are reconciled.
    pub stale_threshold_minutes: i64,
    /// Sweeper period in seconds.
    pub sweep_interval_secs: u64,
    /// Sweeper batch size.
    pub sweep_batch_size: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            default_expiration_minutes: 1440,
            max_retries: 3,
            wait_ms: 100,
            stale_threshold_minutes: 10,
            sweep_interval_secs: 60,
            sweep_batch_size: 100,
        }
    }
}

/// Retry knobs for serialization failures and deadlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockConfig {
    /// Maximum retry attempts.
    pub max_retries: usize,
    /// Base backoff in milliseconds; attempt `n` waits
    /// `backoff_ms * 2^(n-1)`.
    pub backoff_ms: u64,
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 100,
        }
    }
}

/// Background cleanup knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Period of the cleanup task in minutes.
    pub interval_minutes: i64,
    /// Timeslots whose end is older than this many days are deleted.
    pub retention_days: i64,
    /// Delete batch size.
    pub batch_size: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            retention_days: 30,
            batch_size: 1000,
        }
    }
}

/// Per-channel dispatcher knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Concurrent in-flight deliveries.
    pub max_concurrent: usize,
    /// Token-bucket rate in deliveries per minute.
    pub rate_limit_per_minute: u32,
    /// Retry budget per dispatch.
    pub max_retries: i32,
    /// Base retry backoff in milliseconds.
    pub backoff_ms: u64,
    /// Surface a `NOTIFICATION_FAILED` outbox event on permanent failure.
    pub flag_booking_on_permanent_failure: bool,
}

impl ChannelConfig {
    const fn new(max_concurrent: usize, rate_limit_per_minute: u32) -> Self {
        Self {
            max_concurrent,
            rate_limit_per_minute,
            max_retries: 3,
            backoff_ms: 1000,
            flag_booking_on_permanent_failure: false,
        }
    }
}

/// Dispatcher configuration: one [`ChannelConfig`] per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Per-channel settings.
    pub channels: HashMap<Channel, ChannelConfig>,
    /// Relay batch size.
    pub relay_batch_size: usize,
    /// Relay poll period.
    pub relay_poll_interval_ms: u64,
    /// Relay retry budget before deadletter.
    pub relay_max_attempts: i32,
    /// Number of relay worker shards.
    pub relay_shards: u32,
    /// Cap on per-dispatch retry backoff.
    pub max_backoff: Duration,
    /// Provider call timeout.
    pub provider_timeout: Duration,
}

impl NotificationConfig {
    /// Settings for `channel`, falling back to conservative defaults.
    #[must_use]
    pub fn channel(&self, channel: Channel) -> ChannelConfig {
        self.channels
            .get(&channel)
            .cloned()
            .unwrap_or(ChannelConfig::new(1, 10))
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let mut channels = HashMap::new();
        channels.insert(Channel::Email, ChannelConfig::new(10, 100));
        channels.insert(Channel::Sms, ChannelConfig::new(3, 30));
        channels.insert(Channel::Push, ChannelConfig::new(10, 300));
        channels.insert(Channel::Line, ChannelConfig::new(5, 60));
        channels.insert(Channel::Webhook, ChannelConfig::new(5, 60));
        Self {
            channels,
            relay_batch_size: 50,
            relay_poll_interval_ms: 1000,
            relay_max_attempts: 5,
            relay_shards: 2,
            max_backoff: Duration::from_secs(300),
            provider_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the engine needs, bundled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Booking policy.
    pub booking: BookingPolicyConfig,
    /// Cancellation policy.
    pub cancellation: CancellationConfig,
    /// Tentative-booking behavior.
    pub tentative: TentativeConfig,
    /// Idempotency store behavior.
    pub idempotency: IdempotencyConfig,
    /// Deadlock/serialization retry behavior.
    pub deadlock: DeadlockConfig,
    /// Background cleanup behavior.
    pub cleanup: CleanupConfig,
    /// Notification dispatcher behavior.
    pub notification: NotificationConfig,
}

impl EngineConfig {
    /// Builder-style override for the booking policy.
    #[must_use]
    pub fn with_booking(mut self, booking: BookingPolicyConfig) -> Self {
        self.booking = booking;
        self
    }

    /// Builder-style override for the cancellation policy.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationConfig) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Builder-style override for tentative behavior.
    #[must_use]
    pub fn with_tentative(mut self, tentative: TentativeConfig) -> Self {
        self.tentative = tentative;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.idempotency.default_expiration_minutes, 1440);
        assert_eq!(config.idempotency.max_retries, 3);
        assert_eq!(config.deadlock.max_retries, 3);
        assert_eq!(config.deadlock.backoff_ms, 100);
        assert_eq!(config.cleanup.batch_size, 1000);
        assert_eq!(config.notification.channel(Channel::Email).max_concurrent, 10);
        assert_eq!(config.notification.channel(Channel::Sms).max_concurrent, 3);
        assert_eq!(config.notification.channel(Channel::Email).rate_limit_per_minute, 100);
    }

    #[test]
    fn builder_overrides_compose() {
        let config = EngineConfig::default().with_tentative(TentativeConfig {
            enabled: true,
            timeout_minutes: 30,
            auto_confirm_on_payment: false,
            max_per_customer: 1,
        });
        assert!(config.tentative.enabled);
        assert_eq!(config.tentative.timeout_minutes, 30);
    }
}
