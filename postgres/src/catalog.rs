//! PostgreSQL catalog store.
//!
//! Read paths for the reference data behind policy evaluation and template
//! rendering. These queries are the ones the tiered cache fronts.

use crate::gateway::map_sqlx_error;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use reservo_core::domain::catalog::{
    BusinessHours, Customer, Holiday, Resource, ResourceStatus, ResourceTimeOff, Service,
};
use reservo_core::domain::inventory::ResourceKind;
use reservo_core::domain::notification::{
    Channel, NotificationPreferences, NotificationTemplate, QuietHours,
};
use reservo_core::error::StoreError;
use reservo_core::ids::{CustomerId, ResourceId, ServiceId, TenantId};
use reservo_core::stores::CatalogStore;
use sqlx::{PgPool, Row};

/// Catalog store over a shared pool.
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    /// Create the store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn weekday_from_db(value: i16) -> Weekday {
    match value {
        1 => Weekday::Tue,
        2 => Weekday::Wed,
        3 => Weekday::Thu,
        4 => Weekday::Fri,
        5 => Weekday::Sat,
        6 => Weekday::Sun,
        _ => Weekday::Mon,
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn resource(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
    ) -> Result<Option<Resource>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, tenant_id, kind, total_capacity, status
            FROM resources
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(resource_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            let kind: String = row.get("kind");
            let status: String = row.get("status");
            Ok(Resource {
                id: ResourceId(row.get("id")),
                tenant_id: TenantId(row.get("tenant_id")),
                kind: ResourceKind::parse(&kind)?,
                total_capacity: row.get("total_capacity"),
                status: ResourceStatus::parse(&status)?,
            })
        })
        .transpose()
    }

    async fn service(
        &self,
        tenant_id: TenantId,
        service_id: ServiceId,
    ) -> Result<Option<Service>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, tenant_id, duration_minutes, price_minor, buffer_before_minutes,
                   buffer_after_minutes, min_advance_minutes, max_advance_days,
                   allow_weekends, allow_holidays, requires_approval, active
            FROM services
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(service_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| Service {
            id: ServiceId(row.get("id")),
            tenant_id: TenantId(row.get("tenant_id")),
            duration_minutes: row.get("duration_minutes"),
            price_minor: row.get("price_minor"),
            buffer_before_minutes: row.get("buffer_before_minutes"),
            buffer_after_minutes: row.get("buffer_after_minutes"),
            min_advance_minutes: row.get("min_advance_minutes"),
            max_advance_days: row.get("max_advance_days"),
            allow_weekends: row.get("allow_weekends"),
            allow_holidays: row.get("allow_holidays"),
            requires_approval: row.get("requires_approval"),
            active: row.get("active"),
        }))
    }

    async fn resources_for_service(
        &self,
        tenant_id: TenantId,
        service_id: ServiceId,
    ) -> Result<Vec<ResourceId>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT resource_id FROM resource_services
            WHERE tenant_id = $1 AND service_id = $2
            ORDER BY resource_id
            ",
        )
        .bind(tenant_id.0)
        .bind(service_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.iter().map(|row| ResourceId(row.get("resource_id"))).collect())
    }

    async fn resource_supports_service(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        service_id: ServiceId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r"
            SELECT 1 AS present FROM resource_services
            WHERE tenant_id = $1 AND resource_id = $2 AND service_id = $3
            ",
        )
        .bind(tenant_id.0)
        .bind(resource_id.0)
        .bind(service_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.is_some())
    }

    async fn business_hours(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
    ) -> Result<Vec<BusinessHours>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT tenant_id, resource_id, day_of_week, open_time, close_time,
                   effective_from, effective_to
            FROM business_hours
            WHERE tenant_id = $1 AND (resource_id = $2 OR resource_id IS NULL)
            ORDER BY day_of_week, open_time
            ",
        )
        .bind(tenant_id.0)
        .bind(resource_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .iter()
            .map(|row| BusinessHours {
                tenant_id: TenantId(row.get("tenant_id")),
                resource_id: row
                    .get::<Option<uuid::Uuid>, _>("resource_id")
                    .map(ResourceId),
                day_of_week: weekday_from_db(row.get("day_of_week")),
                open_time: row.get("open_time"),
                close_time: row.get("close_time"),
                effective_from: row.get("effective_from"),
                effective_to: row.get("effective_to"),
            })
            .collect())
    }

    async fn holidays(
        &self,
        tenant_id: TenantId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Holiday>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT tenant_id, date, name FROM holidays
            WHERE tenant_id = $1 AND date BETWEEN $2 AND $3
            ORDER BY date
            ",
        )
        .bind(tenant_id.0)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .iter()
            .map(|row| Holiday {
                tenant_id: TenantId(row.get("tenant_id")),
                date: row.get("date"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn time_off(
        &self,
        tenant_id: TenantId,
        resource_id: ResourceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ResourceTimeOff>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT tenant_id, resource_id, start_at, end_at, reason
            FROM resource_time_off
            WHERE tenant_id = $1 AND resource_id = $2
              AND start_at < $4 AND end_at > $3
            ",
        )
        .bind(tenant_id.0)
        .bind(resource_id.0)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .iter()
            .map(|row| ResourceTimeOff {
                tenant_id: TenantId(row.get("tenant_id")),
                resource_id: ResourceId(row.get("resource_id")),
                start_at: row.get("start_at"),
                end_at: row.get("end_at"),
                reason: row.get("reason"),
            })
            .collect())
    }

    async fn customer(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Option<Customer>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, tenant_id, active, blacklisted, max_concurrent, language, email, phone
            FROM customers
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(customer_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| Customer {
            id: CustomerId(row.get("id")),
            tenant_id: TenantId(row.get("tenant_id")),
            active: row.get("active"),
            blacklisted: row.get("blacklisted"),
            max_concurrent: row.get("max_concurrent"),
            language: row.get("language"),
            email: row.get("email"),
            phone: row.get("phone"),
        }))
    }

    async fn template(
        &self,
        tenant_id: TenantId,
        template_type: &str,
        language: &str,
    ) -> Result<Option<NotificationTemplate>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT tenant_id, template_type, language, subject, body
            FROM notification_templates
            WHERE tenant_id = $1 AND template_type = $2 AND language IN ($3, 'default')
            ORDER BY CASE WHEN language = $3 THEN 0 ELSE 1 END
            LIMIT 1
            ",
        )
        .bind(tenant_id.0)
        .bind(template_type)
        .bind(language)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| NotificationTemplate {
            tenant_id: TenantId(row.get("tenant_id")),
            template_type: row.get("template_type"),
            language: row.get("language"),
            subject: row.get("subject"),
            body: row.get("body"),
        }))
    }

    async fn preferences(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<NotificationPreferences, StoreError> {
        let row = sqlx::query(
            r"
            SELECT enabled_channels, disabled_types, quiet_hours
            FROM notification_preferences
            WHERE tenant_id = $1 AND customer_id = $2
            ",
        )
        .bind(tenant_id.0)
        .bind(customer_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(NotificationPreferences::allow_all(tenant_id, customer_id));
        };

        let enabled: Vec<String> =
            serde_json::from_value(row.get("enabled_channels")).unwrap_or_default();
        let enabled_channels = enabled
            .iter()
            .filter_map(|s| Channel::parse(s).ok())
            .collect();
        let disabled_types: Vec<String> =
            serde_json::from_value(row.get("disabled_types")).unwrap_or_default();
        let quiet_hours: Option<QuietHours> = row
            .get::<Option<serde_json::Value>, _>("quiet_hours")
            .and_then(|v| serde_json::from_value(v).ok());

        Ok(NotificationPreferences {
            customer_id,
            tenant_id,
            enabled_channels,
            disabled_types,
            quiet_hours,
        })
    }
}
