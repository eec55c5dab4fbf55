//! Capability middleware.
//!
//! Authentication itself is an input precondition (an upstream gateway
//! authenticates and stamps the caller's capabilities into a header); this
//! layer only enforces the static capability table populated at route
//! registration: one required capability per protected route.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::sync::Arc;

/// Header listing the caller's capabilities, comma-separated.
pub const CAPABILITIES_HEADER: &str = "x-capabilities";

/// Static route → required-capability table.
#[derive(Debug, Default, Clone)]
pub struct CapabilityTable {
    routes: HashMap<&'static str, &'static str>,
}

impl CapabilityTable {
    /// Empty table (everything public).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a protected route at registration time.
    #[must_use]
    pub fn require(mut self, path_prefix: &'static str, capability: &'static str) -> Self {
        self.routes.insert(path_prefix, capability);
        self
    }

    /// The capability required for `path`, if any. Longest prefix wins.
    #[must_use]
    pub fn required_for(&self, path: &str) -> Option<&'static str> {
        self.routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(*prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, capability)| *capability)
    }
}

/// Enforce the capability table for one request.
pub async fn enforce_capabilities(
    table: Arc<CapabilityTable>,
    request: Request,
    next: Next,
) -> Response {
    let Some(required) = table.required_for(request.uri().path()) else {
        return next.run(request).await;
    };

    let Some(presented) = request
        .headers()
        .get(CAPABILITIES_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if presented.split(',').map(str::trim).any(|c| c == required) {
        next.run(request).await
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let table = CapabilityTable::new()
            .require("/v1/admin", "admin")
            .require("/v1/admin/bookings", "bookings:write");
        assert_eq!(table.required_for("/v1/admin/bookings/1"), Some("bookings:write"));
        assert_eq!(table.required_for("/v1/admin/resources"), Some("admin"));
        assert_eq!(table.required_for("/v1/public/availability"), None);
    }
}
