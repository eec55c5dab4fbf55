//! Outbox relay, notification dispatcher, and webhook ingress.
//!
//! The relay drains the transactional outbox into durable dispatch rows
//! keyed `(outbox_event_id, channel, recipient)`, so redelivery after a
//! crash is idempotent by construction. The dispatcher delivers those rows
//! over per-channel worker lanes with concurrency caps, token-bucket rate
//! limits, and a circuit breaker per provider. The ingress verifies
//! provider signatures, deduplicates events, and routes them back into the
//! engine (payment outcomes) or the dispatcher (delivery statuses).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod ingress;
pub mod provider;
pub mod relay;
pub mod template;

pub use dispatcher::{Dispatcher, JobOutcome};
pub use ingress::{IngressResponse, WebhookIngress, WebhookIngressError};
pub use provider::NotificationProvider;
pub use relay::OutboxRelay;
