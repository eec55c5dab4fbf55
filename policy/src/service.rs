//! Policy service: loads reference data and runs the pure validator.

use crate::outcome::ValidationOutcome;
use crate::validate::{validate_request, ValidationContext};
use chrono::Duration;
use reservo_core::clock::SharedClock;
use reservo_core::config::BookingPolicyConfig;
use reservo_core::domain::booking::BookingRequest;
use reservo_core::domain::inventory::AvailabilityProbe;
use reservo_core::error::StoreError;
use reservo_core::stores::{BookingStore, CatalogStore, InventoryStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Loads everything the validator needs and evaluates requests.
///
/// The catalog store behind this service is expected to be cache-backed;
/// the availability probe is the lock-free batch read.
pub struct PolicyService {
    catalog: Arc<dyn CatalogStore>,
    inventory: Arc<dyn InventoryStore>,
    bookings: Arc<dyn BookingStore>,
    clock: SharedClock,
    policy: BookingPolicyConfig,
    utc_offset_minutes: i32,
}

impl PolicyService {
    /// Wire up a policy service.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        inventory: Arc<dyn InventoryStore>,
        bookings: Arc<dyn BookingStore>,
        clock: SharedClock,
        policy: BookingPolicyConfig,
        utc_offset_minutes: i32,
    ) -> Self {
        Self {
            catalog,
            inventory,
            bookings,
            clock,
            policy,
            utc_offset_minutes,
        }
    }

    /// Load reference data for `request` and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when reference data cannot be loaded; policy
    /// conditions are reported through the outcome, never as errors.
    pub async fn validate(&self, request: &BookingRequest) -> Result<ValidationOutcome, StoreError> {
        let ctx = self.load_context(request).await?;
        let outcome = validate_request(request, &ctx);
        if !outcome.is_ok() {
            tracing::debug!(
                tenant = %request.tenant_id,
                customer = %request.customer_id,
                errors = outcome.errors.len(),
                "booking request failed validation"
            );
        }
        Ok(outcome)
    }

    async fn load_context(&self, request: &BookingRequest) -> Result<ValidationContext, StoreError> {
        let tenant = request.tenant_id;
        let now = self.clock.now();

        let mut resources = HashMap::new();
        let mut capable = Vec::new();
        let mut business_hours = Vec::new();
        let mut time_off = Vec::new();
        for item in &request.items {
            if resources.contains_key(&item.resource_id) {
                continue;
            }
            if let Some(resource) = self.catalog.resource(tenant, item.resource_id).await? {
                resources.insert(item.resource_id, resource);
            }
            if self
                .catalog
                .resource_supports_service(tenant, item.resource_id, request.service_id)
                .await?
            {
                capable.push(item.resource_id);
            }
            business_hours.extend(self.catalog.business_hours(tenant, item.resource_id).await?);
            time_off.extend(
                self.catalog
                    .time_off(tenant, item.resource_id, request.start_at, request.end_at)
                    .await?,
            );
        }

        let service = self.catalog.service(tenant, request.service_id).await?;
        let customer = self.catalog.customer(tenant, request.customer_id).await?;
        let active_booking_count = self.bookings.active_count(tenant, request.customer_id).await?;

        // Pad by a day on each side so local-time shifts cannot miss a holiday.
        let from = (request.start_at - Duration::days(1)).date_naive();
        let to = (request.end_at + Duration::days(1)).date_naive();
        let holidays = self.catalog.holidays(tenant, from, to).await?;

        let probes: Vec<AvailabilityProbe> = request
            .items
            .iter()
            .map(|item| AvailabilityProbe {
                resource_id: item.resource_id,
                start_at: item.start_at,
                end_at: item.end_at,
                required: item.capacity,
            })
            .collect();
        let availability = self.inventory.batch_availability(tenant, &probes).await?;

        let overlapping = if self.policy.prevent_double_booking {
            self.bookings
                .overlapping_active(tenant, request.customer_id, request.start_at, request.end_at)
                .await?
        } else {
            Vec::new()
        };

        Ok(ValidationContext {
            now,
            utc_offset_minutes: self.utc_offset_minutes,
            policy: self.policy.clone(),
            resources,
            capable_resources: capable,
            service,
            customer,
            active_booking_count,
            business_hours,
            holidays,
            time_off,
            availability,
            overlapping,
        })
    }
}
