//! Cached availability reads.
//!
//! The public availability feed goes through the tiered cache under keys
//! tagged per `(tenant, resource)`; the confirm/cancel/expiry paths
//! invalidate those tags, so reads stay fresh without ever locking
//! inventory rows.

use chrono::{DateTime, Duration, Utc};
use reservo_cache::TieredCache;
use reservo_core::domain::inventory::AvailableSlot;
use reservo_core::error::{CoreError, FieldError};
use reservo_core::ids::{ResourceId, ServiceId, TenantId};
use reservo_core::stores::InventoryStore;
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// Maximum queryable range.
const MAX_RANGE_DAYS: i64 = 90;

/// Cache TTL for availability pages; matches the HTTP `max-age`.
const PAGE_TTL: StdDuration = StdDuration::from_secs(15);

/// The cache tag every availability entry for `(tenant, resource)` lives
/// under. Capacity writers invalidate it.
#[must_use]
pub fn availability_tag(tenant_id: TenantId, resource_id: ResourceId) -> String {
    format!("availability:{tenant_id}:{resource_id}")
}

/// One availability page plus the freshness watermark the surface turns
/// into an ETag.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityPage {
    /// Slots in `(resource, start)` order.
    pub slots: Vec<AvailableSlot>,
    /// Most recent capacity write among the returned slots.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Cached availability read service.
pub struct AvailabilityService {
    inventory: Arc<dyn InventoryStore>,
    cache: Arc<TieredCache>,
}

impl AvailabilityService {
    /// Wire up the service.
    #[must_use]
    pub const fn new(inventory: Arc<dyn InventoryStore>, cache: Arc<TieredCache>) -> Self {
        Self { inventory, cache }
    }

    /// Query availability for `resource_ids` (or a service-wide read when
    /// the caller resolved resources upstream) inside `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for a bad range and store errors
    /// otherwise.
    pub async fn query(
        &self,
        tenant_id: TenantId,
        service_id: ServiceId,
        resource_ids: &[ResourceId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_capacity: Option<i32>,
    ) -> Result<AvailabilityPage, CoreError> {
        let mut details = Vec::new();
        if from >= to {
            details.push(FieldError::new("from", "from must be before to"));
        }
        if to - from > Duration::days(MAX_RANGE_DAYS) {
            details.push(FieldError::new(
                "to",
                format!("range may cover at most {MAX_RANGE_DAYS} days"),
            ));
        }
        if !details.is_empty() {
            return Err(CoreError::Validation { details });
        }

        let key = page_key(tenant_id, service_id, resource_ids, from, to, min_capacity);
        if let Some(page) = self.cache.get::<AvailabilityPage>(&key).await {
            return Ok(page);
        }

        let slots = self
            .inventory
            .available_slots(tenant_id, resource_ids, from, to, min_capacity)
            .await?;
        let page = AvailabilityPage {
            last_modified: slots.iter().map(|s| s.timeslot.updated_at).max(),
            slots,
        };

        let tags: Vec<String> = resource_ids
            .iter()
            .map(|r| availability_tag(tenant_id, *r))
            .collect();
        self.cache.put(&key, &page, PAGE_TTL, &tags).await;
        Ok(page)
    }
}

fn page_key(
    tenant_id: TenantId,
    service_id: ServiceId,
    resource_ids: &[ResourceId],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    min_capacity: Option<i32>,
) -> String {
    let mut resources: Vec<String> = resource_ids.iter().map(ToString::to_string).collect();
    resources.sort();
    format!(
        "availability:{tenant_id}:{service_id}:{from}:{to}:{}:{}",
        resources.join(","),
        min_capacity.unwrap_or(0)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tag_is_stable_per_tenant_resource() {
        let tenant = TenantId::nil();
        let resource = ResourceId::nil();
        assert_eq!(
            availability_tag(tenant, resource),
            format!("availability:{tenant}:{resource}")
        );
    }

    #[test]
    fn page_key_is_order_insensitive_in_resources() {
        let tenant = TenantId::new();
        let service = ServiceId::new();
        let a = ResourceId::new();
        let b = ResourceId::new();
        let from = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap();
        assert_eq!(
            page_key(tenant, service, &[a, b], from, to, None),
            page_key(tenant, service, &[b, a], from, to, None)
        );
    }
}
