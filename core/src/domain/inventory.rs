//! Timeslot inventory types.
//!
//! A timeslot is a fixed-duration bucket on a resource carrying a mutable
//! `available_capacity` and a strictly monotonic integer `version`. Every
//! committed state satisfies `0 <= available_capacity <= total_capacity`.

use crate::error::StoreError;
use crate::ids::{ResourceId, TenantId, TimeslotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of thing a resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A staff member.
    Staff,
    /// A single seat.
    Seat,
    /// A room.
    Room,
    /// A table.
    Table,
}

impl ResourceKind {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Seat => "seat",
            Self::Room => "room",
            Self::Table => "table",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] for an unknown kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "staff" => Ok(Self::Staff),
            "seat" => Ok(Self::Seat),
            "room" => Ok(Self::Room),
            "table" => Ok(Self::Table),
            _ => Err(StoreError::Database(format!("invalid resource kind: {s}"))),
        }
    }
}

/// One capacity bucket on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeslot {
    /// Row id.
    pub id: TimeslotId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Resource the bucket belongs to.
    pub resource_id: ResourceId,
    /// Inclusive start.
    pub start_at: DateTime<Utc>,
    /// Exclusive end.
    pub end_at: DateTime<Utc>,
    /// Capacity still reservable.
    pub available_capacity: i32,
    /// Strictly monotonic version counter, bumped by every capacity write.
    pub version: i64,
    /// Last write timestamp (informational; never used as a version).
    pub updated_at: DateTime<Utc>,
}

/// Availability row returned by read paths: the slot joined with the
/// resource's total capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    /// The timeslot.
    #[serde(flatten)]
    pub timeslot: Timeslot,
    /// Total capacity of the owning resource.
    pub total_capacity: i32,
}

/// Seed row for bulk timeslot creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeslotSeed {
    /// Inclusive start.
    pub start_at: DateTime<Utc>,
    /// Exclusive end.
    pub end_at: DateTime<Utc>,
    /// Initial available capacity.
    pub capacity: i32,
}

/// One aggregate-availability probe: does `[start_at, end_at)` on the
/// resource still fit `required` units?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityProbe {
    /// Resource to probe.
    pub resource_id: ResourceId,
    /// Window start.
    pub start_at: DateTime<Utc>,
    /// Window end.
    pub end_at: DateTime<Utc>,
    /// Units required across the window.
    pub required: i32,
}

/// Answer to an [`AvailabilityProbe`]: the minimum available capacity over
/// the window and whether the requirement fits. Computed without locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    /// Resource probed.
    pub resource_id: ResourceId,
    /// Minimum `available_capacity` across the window's slots.
    pub available: i32,
    /// `available >= required`.
    pub fits: bool,
}

/// Outcome of a single capacity mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveOutcome {
    /// Mutation committed.
    Ok {
        /// Capacity after the write.
        new_capacity: i32,
        /// Version after the write.
        new_version: i64,
    },
    /// The caller's expected version is stale.
    VersionMismatch {
        /// Version currently on the row.
        current_version: i64,
        /// Capacity currently on the row.
        current_capacity: i32,
    },
    /// No such timeslot for this tenant.
    SlotNotFound,
    /// The mutation would drive capacity below zero.
    CapacityExceeded {
        /// Capacity still available.
        available: i32,
    },
    /// The owning resource is missing or not active.
    ResourceNotFound,
    /// The mutation would violate a bound (for example releasing above the
    /// resource's total capacity).
    BusinessRuleViolation {
        /// What was violated.
        reason: String,
    },
}

impl ReserveOutcome {
    /// Whether the mutation committed.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// The kind of capacity write in a bulk mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Decrement available capacity by the given amount.
    Reserve(i32),
    /// Increment available capacity by the given amount.
    Release(i32),
    /// Set available capacity to the given value.
    SetCapacity(i32),
}

/// One entry of a bulk capacity mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityMutation {
    /// Target timeslot.
    pub timeslot_id: TimeslotId,
    /// Owning resource; first component of the canonical lock order.
    pub resource_id: ResourceId,
    /// The write to apply.
    pub kind: MutationKind,
    /// Version the caller read.
    pub expected_version: i64,
}

/// Result entry for one bulk-mutation item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    /// Target timeslot.
    pub timeslot_id: TimeslotId,
    /// What happened.
    pub outcome: ReserveOutcome,
}

/// Sort mutations into canonical lock order: `(resource_id, timeslot_id)`
/// ascending. Every concurrent writer observing this order cannot deadlock
/// on timeslot row locks.
pub fn canonical_lock_order(mutations: &mut [CapacityMutation]) {
    mutations.sort_by_key(|m| (m.resource_id, m.timeslot_id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kind_roundtrip() {
        for kind in [ResourceKind::Staff, ResourceKind::Seat, ResourceKind::Room, ResourceKind::Table] {
            assert_eq!(ResourceKind::parse(kind.as_str()), Ok(kind));
        }
        assert!(ResourceKind::parse("desk").is_err());
    }

    #[test]
    fn canonical_order_sorts_by_resource_then_slot() {
        let r_small = ResourceId::nil();
        let r_big = ResourceId::new();
        let t1 = TimeslotId::new();
        let t2 = TimeslotId::new();
        let mut mutations = vec![
            CapacityMutation {
                timeslot_id: t1,
                resource_id: r_big,
                kind: MutationKind::Reserve(1),
                expected_version: 1,
            },
            CapacityMutation {
                timeslot_id: t2,
                resource_id: r_small,
                kind: MutationKind::Reserve(1),
                expected_version: 1,
            },
            CapacityMutation {
                timeslot_id: t1,
                resource_id: r_small,
                kind: MutationKind::Reserve(1),
                expected_version: 1,
            },
        ];
        canonical_lock_order(&mut mutations);
        assert_eq!(mutations[0].resource_id, r_small);
        assert_eq!(mutations[1].resource_id, r_small);
        assert_eq!(mutations[2].resource_id, r_big);
        assert!(mutations[0].timeslot_id <= mutations[1].timeslot_id);
    }
}
