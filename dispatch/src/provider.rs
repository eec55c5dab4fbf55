//! Notification provider port.
//!
//! One implementation per channel vendor; the dispatcher only sees the
//! verdict taxonomy: delivered, accepted (callback pending), retryable,
//! permanent.

use async_trait::async_trait;
use reservo_core::domain::notification::{Channel, ProviderResponse};

/// A rendered message ready for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Channel the message goes out on.
    pub channel: Channel,
    /// Channel-specific recipient address.
    pub recipient: String,
    /// Rendered subject line.
    pub subject: String,
    /// Rendered body.
    pub body: String,
}

/// The vendor contract the dispatcher depends on.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Attempt one delivery. Implementations never panic and express every
    /// failure through [`ProviderResponse`].
    async fn send(&self, message: &OutboundMessage) -> ProviderResponse;
}

/// Development provider: logs the message instead of delivering it.
///
/// Stands in for real vendor integrations in local runs; every send is
/// reported delivered.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleProvider;

#[async_trait]
impl NotificationProvider for ConsoleProvider {
    async fn send(&self, message: &OutboundMessage) -> ProviderResponse {
        tracing::info!(
            channel = message.channel.as_str(),
            recipient = %message.recipient,
            subject = %message.subject,
            "console delivery"
        );
        ProviderResponse::Delivered { external_id: None }
    }
}

#[cfg(feature = "test-utils")]
pub mod mock {
    //! Scripted provider for tests.

    use super::{NotificationProvider, OutboundMessage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reservo_core::domain::notification::ProviderResponse;
    use std::collections::VecDeque;

    /// Provider that replays a scripted sequence of responses and records
    /// every message it was asked to send.
    #[derive(Default)]
    pub struct ScriptedProvider {
        script: Mutex<VecDeque<ProviderResponse>>,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl ScriptedProvider {
        /// Provider that delivers everything.
        #[must_use]
        pub fn delivering() -> Self {
            Self::default()
        }

        /// Queue the next response.
        pub fn push_response(&self, response: ProviderResponse) {
            self.script.lock().push_back(response);
        }

        /// Messages sent so far.
        #[must_use]
        pub fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl NotificationProvider for ScriptedProvider {
        async fn send(&self, message: &OutboundMessage) -> ProviderResponse {
            self.sent.lock().push(message.clone());
            self.script.lock().pop_front().unwrap_or(ProviderResponse::Delivered {
                external_id: Some(format!("ext-{}", self.sent.lock().len())),
            })
        }
    }
}
