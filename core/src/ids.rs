//! Typed identifiers.
//!
//! Every entity carries its own UUID newtype so a `BookingId` can never be
//! passed where a `TimeslotId` is expected. All ids serialize transparently
//! as their inner UUID.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            /// Generate a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// The nil id, useful as a placeholder in tests.
            #[must_use]
            pub const fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(value: uuid::Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a tenant. Partitions every other entity.
    TenantId
);
uuid_id!(
    /// Unique identifier for a bookable resource (staff, seat, room, table).
    ResourceId
);
uuid_id!(
    /// Unique identifier for a service offered by a tenant.
    ServiceId
);
uuid_id!(
    /// Unique identifier for a customer.
    CustomerId
);
uuid_id!(
    /// Unique identifier for a timeslot row.
    TimeslotId
);
uuid_id!(
    /// Unique identifier for a booking.
    BookingId
);
uuid_id!(
    /// Unique identifier for a saga execution.
    SagaId
);
uuid_id!(
    /// Unique identifier for a distributed transaction context.
    TransactionId
);
uuid_id!(
    /// Unique identifier for an outbox event row.
    OutboxEventId
);
uuid_id!(
    /// Unique identifier for a notification dispatch row.
    DispatchId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types_and_random() {
        let a = BookingId::new();
        let b = BookingId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = TenantId::new();
        let json = serde_json::to_string(&id).map_err(|e| e.to_string());
        assert_eq!(json, Ok(format!("\"{}\"", id.0)));
    }

    #[test]
    fn ids_order_by_uuid() {
        let mut ids = vec![ResourceId::new(), ResourceId::new(), ResourceId::new()];
        ids.sort();
        assert!(ids[0].0 <= ids[1].0 && ids[1].0 <= ids[2].0);
    }
}
