//! Notification dispatch rows, templates, and preferences.
//!
//! A dispatch is one scheduled delivery over one channel to one recipient.
//! Dispatch rows are keyed `(outbox_event_id, channel, recipient)` so relay
//! redelivery after a crash cannot duplicate them.

use crate::error::StoreError;
use crate::ids::{CustomerId, DispatchId, OutboxEventId, TenantId};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// Email.
    Email,
    /// SMS.
    Sms,
    /// Mobile push.
    Push,
    /// LINE message.
    Line,
    /// Outbound webhook.
    Webhook,
}

impl Channel {
    /// All channels, in a stable order.
    pub const ALL: [Self; 5] = [Self::Email, Self::Sms, Self::Push, Self::Line, Self::Webhook];

    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Push => "PUSH",
            Self::Line => "LINE",
            Self::Webhook => "WEBHOOK",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown channel.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "EMAIL" => Ok(Self::Email),
            "SMS" => Ok(Self::Sms),
            "PUSH" => Ok(Self::Push),
            "LINE" => Ok(Self::Line),
            "WEBHOOK" => Ok(Self::Webhook),
            _ => Err(StoreError::Database(format!("invalid channel: {s}"))),
        }
    }
}

/// Delivery priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Bulk traffic.
    Low,
    /// Default.
    Normal,
    /// Jump the queue.
    High,
    /// Immediate lane.
    Urgent,
}

impl Priority {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown priority.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            _ => Err(StoreError::Database(format!("invalid priority: {s}"))),
        }
    }
}

/// Lifecycle of a dispatch row.
///
/// Progression is one-way except `pending -> cancelled` and `sending ->
/// pending` (transient failure with attempts left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    /// Waiting to be claimed by a channel worker.
    Pending,
    /// Handed to the provider.
    Sending,
    /// Provider accepted the message.
    Sent,
    /// Provider confirmed delivery (callback).
    Delivered,
    /// Permanently failed.
    Failed,
    /// Cancelled before sending.
    Cancelled,
    /// Expired before delivery.
    Expired,
}

impl DispatchStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(StoreError::Database(format!("invalid dispatch status: {s}"))),
        }
    }

    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Sending)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Expired)
                | (Self::Sending, Self::Sent)
                | (Self::Sending, Self::Failed)
                | (Self::Sending, Self::Pending)
                | (Self::Sent, Self::Delivered)
                | (Self::Sent, Self::Failed)
        )
    }
}

/// One scheduled delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDispatch {
    /// Row id.
    pub id: DispatchId,
    /// Outbox event that produced this dispatch, if any.
    pub outbox_event_id: Option<OutboxEventId>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Delivery channel.
    pub channel: Channel,
    /// Lifecycle state.
    pub status: DispatchStatus,
    /// Channel-specific recipient address.
    pub recipient: String,
    /// Recipient identity used in the dedup key.
    pub recipient_id: String,
    /// Template to render.
    pub template_type: String,
    /// Template variables.
    pub variables: serde_json::Value,
    /// Priority class.
    pub priority: Priority,
    /// Delivery attempts so far.
    pub attempts: i32,
    /// Earliest next attempt.
    pub next_attempt_at: DateTime<Utc>,
    /// Provider-side message id once accepted.
    pub external_id: Option<String>,
    /// When the provider confirmed delivery.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the dispatch stops being worth delivering.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last delivery error.
    pub last_error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A dispatch about to be inserted by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDispatch {
    /// Outbox event that produced this dispatch.
    pub outbox_event_id: Option<OutboxEventId>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Delivery channel.
    pub channel: Channel,
    /// Channel-specific recipient address.
    pub recipient: String,
    /// Recipient identity used in the dedup key.
    pub recipient_id: String,
    /// Template to render.
    pub template_type: String,
    /// Template variables.
    pub variables: serde_json::Value,
    /// Priority class.
    pub priority: Priority,
    /// When the dispatch stops being worth delivering.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A message template for `(tenant, type, language)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Template type (matches `NewDispatch::template_type`).
    pub template_type: String,
    /// Language tag, or `"default"`.
    pub language: String,
    /// Subject line with `{{variable}}` placeholders.
    pub subject: String,
    /// Body with `{{variable}}` placeholders.
    pub body: String,
}

/// A recipient quiet-hours window in their local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    /// Window start (local).
    pub start: NaiveTime,
    /// Window end (local); may wrap past midnight.
    pub end: NaiveTime,
    /// Recipient UTC offset in minutes.
    pub utc_offset_minutes: i32,
}

/// Per-recipient notification preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    /// Recipient.
    pub customer_id: CustomerId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Channels the recipient accepts.
    pub enabled_channels: Vec<Channel>,
    /// Template types the recipient opted out of.
    pub disabled_types: Vec<String>,
    /// Quiet-hours suppression window, if configured.
    pub quiet_hours: Option<QuietHours>,
}

impl NotificationPreferences {
    /// Permissive defaults: everything enabled, no quiet hours.
    #[must_use]
    pub fn allow_all(tenant_id: TenantId, customer_id: CustomerId) -> Self {
        Self {
            customer_id,
            tenant_id,
            enabled_channels: Channel::ALL.to_vec(),
            disabled_types: Vec::new(),
            quiet_hours: None,
        }
    }

    /// Whether the recipient accepts `channel` for `template_type`.
    #[must_use]
    pub fn accepts(&self, channel: Channel, template_type: &str) -> bool {
        self.enabled_channels.contains(&channel)
            && !self.disabled_types.iter().any(|t| t == template_type)
    }
}

/// Provider verdict for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    /// Accepted and delivered synchronously.
    Delivered {
        /// Provider-side message id.
        external_id: Option<String>,
    },
    /// Accepted; delivery confirmation arrives via callback.
    Accepted {
        /// Provider-side message id.
        external_id: Option<String>,
    },
    /// Transient failure; retry with backoff.
    Retryable {
        /// Error detail.
        error: String,
    },
    /// Permanent failure; no retry will help.
    Permanent {
        /// Error detail.
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_roundtrip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::parse(channel.as_str()), Ok(channel));
        }
        assert!(Channel::parse("FAX").is_err());
    }

    #[test]
    fn priority_orders_low_to_urgent() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Urgent);
    }

    #[test]
    fn dispatch_transitions_are_one_way_with_two_exceptions() {
        use DispatchStatus as S;
        // Forward progression.
        assert!(S::Pending.can_transition(S::Sending));
        assert!(S::Sending.can_transition(S::Sent));
        assert!(S::Sent.can_transition(S::Delivered));
        // The two allowed reversals.
        assert!(S::Pending.can_transition(S::Cancelled));
        assert!(S::Sending.can_transition(S::Pending));
        // Everything else is refused.
        assert!(!S::Sent.can_transition(S::Pending));
        assert!(!S::Delivered.can_transition(S::Sent));
        assert!(!S::Failed.can_transition(S::Pending));
        assert!(!S::Cancelled.can_transition(S::Sending));
    }

    #[test]
    fn preferences_filter_channels_and_types() {
        let mut prefs =
            NotificationPreferences::allow_all(TenantId::new(), CustomerId::new());
        assert!(prefs.accepts(Channel::Email, "booking_created"));

        prefs.enabled_channels = vec![Channel::Sms];
        assert!(!prefs.accepts(Channel::Email, "booking_created"));
        assert!(prefs.accepts(Channel::Sms, "booking_created"));

        prefs.disabled_types = vec!["booking_created".to_string()];
        assert!(!prefs.accepts(Channel::Sms, "booking_created"));
    }
}
