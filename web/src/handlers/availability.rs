//! Public availability feed.
//!
//! `GET /v1/public/availability`: rate-limited per `(ip, tenant)`,
//! 90-day range cap, weak ETag over the query identity plus the newest
//! capacity write, `Cache-Control: private, max-age=15`.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use reservo_core::error::{CoreError, FieldError};
use reservo_core::ids::{ResourceId, ServiceId, TenantId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Requests allowed per `(ip, tenant)` per minute.
pub const PUBLIC_RATE_PER_MINUTE: u32 = 20;

/// Query parameters of the public feed.
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Tenant to read.
    pub tenant_id: TenantId,
    /// Service whose resources are read.
    pub service_id: ServiceId,
    /// Window start (RFC 3339).
    pub from: DateTime<Utc>,
    /// Window end (RFC 3339).
    pub to: DateTime<Utc>,
    /// Restrict to one resource.
    pub resource_id: Option<ResourceId>,
    /// Minimum remaining capacity filter.
    pub granularity_min: Option<i32>,
}

/// One row of the public feed (snake_case wire names).
#[derive(Debug, Serialize)]
pub struct AvailabilityRow {
    timeslot_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    service_id: uuid::Uuid,
    resource_id: uuid::Uuid,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    available_capacity: i32,
}

/// Handler for `GET /v1/public/availability`.
///
/// # Errors
///
/// 400 on bad parameters, 429 past the rate limit, 304 on ETag match.
pub async fn get_availability(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Response, ApiError> {
    let limiter_key = format!("{}:{}", addr.ip(), query.tenant_id);
    if let Err(wait) = state.public_limiter.try_acquire(&limiter_key) {
        return Err(ApiError::from(CoreError::RateLimited {
            retry_after_secs: wait.as_secs().max(1),
        }));
    }

    let resources = match query.resource_id {
        Some(resource_id) => vec![resource_id],
        None => state
            .catalog
            .resources_for_service(query.tenant_id, query.service_id)
            .await
            .map_err(CoreError::from)?,
    };

    let page = state
        .availability
        .query(
            query.tenant_id,
            query.service_id,
            &resources,
            query.from,
            query.to,
            query.granularity_min,
        )
        .await
        .map_err(|err| match err {
            // Parameter problems on the public feed are 400, not 422.
            CoreError::Validation { details } => bad_parameters(details),
            other => ApiError::from(other),
        })?;

    let etag = weak_etag(&query, page.last_modified);
    if let Some(candidate) = headers.get(header::IF_NONE_MATCH) {
        if candidate.to_str().is_ok_and(|v| v == etag) {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            apply_cache_headers(&mut response, &etag);
            return Ok(response);
        }
    }

    let rows: Vec<AvailabilityRow> = page
        .slots
        .iter()
        .map(|slot| AvailabilityRow {
            timeslot_id: slot.timeslot.id.0,
            tenant_id: slot.timeslot.tenant_id.0,
            service_id: query.service_id.0,
            resource_id: slot.timeslot.resource_id.0,
            start_at: slot.timeslot.start_at,
            end_at: slot.timeslot.end_at,
            available_capacity: slot.timeslot.available_capacity,
        })
        .collect();

    let mut response = Json(rows).into_response();
    apply_cache_headers(&mut response, &etag);
    Ok(response)
}

fn bad_parameters(details: Vec<FieldError>) -> ApiError {
    // ApiError renders ValidationError as 422; the public feed promises
    // 400, so the message code stays VALIDATION_ERROR under a 400 status.
    ApiError::bad_request("invalid availability query", details)
}

fn apply_cache_headers(response: &mut Response, etag: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=15"),
    );
}

/// `W/"md5(tenant|service|from|to|resource|lastModified)"`.
fn weak_etag(query: &AvailabilityQuery, last_modified: Option<DateTime<Utc>>) -> String {
    let identity = format!(
        "{}|{}|{}|{}|{}|{}",
        query.tenant_id,
        query.service_id,
        query.from,
        query.to,
        query
            .resource_id
            .map(|r| r.to_string())
            .unwrap_or_default(),
        last_modified.map(|at| at.timestamp_micros()).unwrap_or_default(),
    );
    let digest = Md5::digest(identity.as_bytes());
    format!("W/\"{}\"", hex::encode(digest))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query(resource: Option<ResourceId>) -> AvailabilityQuery {
        AvailabilityQuery {
            tenant_id: TenantId::nil(),
            service_id: ServiceId::nil(),
            from: Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap(),
            resource_id: resource,
            granularity_min: None,
        }
    }

    #[test]
    fn etag_is_weak_and_stable() {
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let a = weak_etag(&query(None), Some(at));
        let b = weak_etag(&query(None), Some(at));
        assert_eq!(a, b);
        assert!(a.starts_with("W/\""));
        assert!(a.ends_with('"'));
    }

    #[test]
    fn etag_changes_with_last_modified_and_resource() {
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let base = weak_etag(&query(None), Some(at));
        let moved = weak_etag(&query(None), Some(at + chrono::Duration::seconds(1)));
        assert_ne!(base, moved);
        let scoped = weak_etag(&query(Some(ResourceId::new())), Some(at));
        assert_ne!(base, scoped);
    }
}
