//! Catalog (reference data) seam.

use crate::domain::catalog::{
    BusinessHours, Customer, Holiday, Resource, ResourceTimeOff, Service,
};
use crate::domain::notification::{NotificationPreferences, NotificationTemplate};
use crate::error::StoreError;
use crate::ids::{CustomerId, ResourceId, ServiceId, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Read-mostly reference data behind policy evaluation and template
/// rendering. Implementations may serve from cache; writes go elsewhere.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fetch a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn resource(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
    ) -> Result<Option<Resource>, StoreError>;

    /// Fetch a service.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn service(
        &self,
        tenant_id: TenantId,
        service_id: ServiceId,
    ) -> Result<Option<Service>, StoreError>;

    /// Resources mapped to a service, for service-wide availability reads.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn resources_for_service(
        &self,
        tenant_id: TenantId,
        service_id: ServiceId,
    ) -> Result<Vec<ResourceId>, StoreError>;

    /// Whether the resource is mapped to the service.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn resource_supports_service(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        service_id: ServiceId,
    ) -> Result<bool, StoreError>;

    /// Business-hours rows for a resource (resource-specific plus tenant
    /// defaults).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn business_hours(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
    ) -> Result<Vec<BusinessHours>, StoreError>;

    /// Holidays within `[from, to]`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn holidays(
        &self,
        tenant_id: TenantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>, StoreError>;

    /// Time-off windows for a resource overlapping `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn time_off(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ResourceTimeOff>, StoreError>;

    /// Fetch a customer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn customer(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Option<Customer>, StoreError>;

    /// Template for `(tenant, type, language)`, falling back to
    /// `language = "default"`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn template(
        &self,
        tenant_id: TenantId,
        template_type: &str,
        language: &str,
    ) -> Result<Option<NotificationTemplate>, StoreError>;

    /// Notification preferences for a customer; implementations return
    /// permissive defaults when none are stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure.
    async fn preferences(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<NotificationPreferences, StoreError>;
}
