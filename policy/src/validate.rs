//! Per-booking validation.
//!
//! [`validate_request`] is pure: it evaluates a request against a
//! [`ValidationContext`] that the caller (usually [`crate::PolicyService`])
//! has already loaded. Errors accumulate across all checks; a single
//! failing slot aborts remaining slot checks only when the request demands
//! all slots.

use crate::hours::{
    day_windows, fits_any_window, is_holiday, is_weekend, next_open_after, overlaps_time_off,
    to_local,
};
use crate::outcome::{Suggestion, ValidationOutcome};
use chrono::{DateTime, Datelike, Duration, Utc};
use reservo_core::config::BookingPolicyConfig;
use reservo_core::domain::booking::{Booking, BookingRequest};
use reservo_core::domain::catalog::{
    BusinessHours, Customer, Holiday, Resource, ResourceTimeOff, Service,
};
use reservo_core::domain::inventory::AvailabilityReport;
use reservo_core::ids::ResourceId;
use std::collections::HashMap;

/// Duration above which a booking is legal but warned about.
const LONG_BOOKING: Duration = Duration::hours(8);

/// Minimum booking duration in minutes.
const MIN_DURATION_MINUTES: i64 = 5;

/// Tolerance around the service's nominal duration before warning.
const DURATION_TOLERANCE_MINUTES: i64 = 5;

/// Everything the pure validator needs, pre-loaded.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Evaluation instant.
    pub now: DateTime<Utc>,
    /// Tenant's UTC offset in minutes, for business-hours arithmetic.
    pub utc_offset_minutes: i32,
    /// Booking policy in force.
    pub policy: BookingPolicyConfig,
    /// Resources referenced by the request, by id.
    pub resources: HashMap<ResourceId, Resource>,
    /// Resources mapped to the requested service.
    pub capable_resources: Vec<ResourceId>,
    /// The requested service, when it exists.
    pub service: Option<Service>,
    /// The requesting customer, when it exists.
    pub customer: Option<Customer>,
    /// Customer's current active-booking count.
    pub active_booking_count: i64,
    /// Business-hours rows for the referenced resources (and defaults).
    pub business_hours: Vec<BusinessHours>,
    /// Holidays covering the requested window.
    pub holidays: Vec<Holiday>,
    /// Time-off windows covering the requested window.
    pub time_off: Vec<ResourceTimeOff>,
    /// Lock-free availability reports, one per requested item.
    pub availability: Vec<AvailabilityReport>,
    /// Customer's active bookings overlapping the requested window.
    pub overlapping: Vec<Booking>,
}

/// Validate a booking request against loaded reference data.
#[must_use]
pub fn validate_request(request: &BookingRequest, ctx: &ValidationContext) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();

    check_shape(request, ctx, &mut outcome);
    check_service(request, ctx, &mut outcome);
    check_customer(ctx, &mut outcome);
    check_slots(request, ctx, &mut outcome);
    check_availability(request, ctx, &mut outcome);
    check_double_booking(ctx, &mut outcome);

    outcome
}

fn check_shape(request: &BookingRequest, ctx: &ValidationContext, outcome: &mut ValidationOutcome) {
    if request.items.is_empty() {
        outcome.error("items", "at least one timeslot is required");
    }
    if request.idempotency_key.is_empty() {
        outcome.error("idempotencyKey", "idempotency key is required");
    }
    if request.start_at >= request.end_at {
        outcome.error("startAt", "start must be before end");
        return;
    }

    let duration = request.end_at - request.start_at;
    if duration < Duration::minutes(MIN_DURATION_MINUTES) {
        outcome.error("endAt", format!("booking must last at least {MIN_DURATION_MINUTES} minutes"));
    }
    if duration > LONG_BOOKING {
        outcome.warn(format!(
            "booking spans {} minutes, longer than {} hours",
            duration.num_minutes(),
            LONG_BOOKING.num_hours()
        ));
    }

    if request.start_at <= ctx.now {
        outcome.error("startAt", "start must be in the future");
    }
    let max_advance = Duration::days(ctx.policy.advance_booking_days);
    if request.start_at - ctx.now > max_advance {
        outcome.error(
            "startAt",
            format!("bookings may be made at most {} days ahead", ctx.policy.advance_booking_days),
        );
    }

    let minutes = duration.num_minutes();
    if minutes < ctx.policy.min_booking_duration_minutes {
        outcome.error(
            "endAt",
            format!(
                "duration {minutes} min is below the minimum of {} min",
                ctx.policy.min_booking_duration_minutes
            ),
        );
    }
    if minutes > ctx.policy.max_booking_duration_minutes {
        outcome.error(
            "endAt",
            format!(
                "duration {minutes} min exceeds the maximum of {} min",
                ctx.policy.max_booking_duration_minutes
            ),
        );
    }
}

fn check_service(
    request: &BookingRequest,
    ctx: &ValidationContext,
    outcome: &mut ValidationOutcome,
) {
    let Some(service) = &ctx.service else {
        outcome.error("serviceId", "service not found");
        return;
    };
    if !service.active {
        outcome.error("serviceId", "service is not active");
    }

    let duration_minutes = (request.end_at - request.start_at).num_minutes();
    let drift = (duration_minutes - i64::from(service.duration_minutes)).abs();
    if drift > DURATION_TOLERANCE_MINUTES {
        outcome.warn(format!(
            "requested duration {duration_minutes} min differs from the service's {} min",
            service.duration_minutes
        ));
    }

    // Boundary: start == now + min_advance is allowed; one second less is not.
    let advance = request.start_at - ctx.now;
    if advance < Duration::minutes(service.min_advance_minutes) {
        outcome.error(
            "startAt",
            format!("bookings require at least {} minutes of advance", service.min_advance_minutes),
        );
    }
    if advance > Duration::days(service.max_advance_days) {
        outcome.error(
            "startAt",
            format!("bookings may be made at most {} days ahead for this service", service.max_advance_days),
        );
    }

    let local_day = to_local(request.start_at, ctx.utc_offset_minutes).date();
    if !service.allow_weekends && is_weekend(local_day.weekday()) {
        outcome.error("startAt", "service is not offered on weekends");
    }
    if !service.allow_holidays && is_holiday(&ctx.holidays, local_day) {
        outcome.error("startAt", "service is not offered on holidays");
    }
}

fn check_customer(ctx: &ValidationContext, outcome: &mut ValidationOutcome) {
    let Some(customer) = &ctx.customer else {
        outcome.error("customerId", "customer not found");
        return;
    };
    if customer.blacklisted {
        outcome.error("customerId", "customer is not allowed to book");
    }
    if !customer.active {
        outcome.error("customerId", "customer account is inactive");
    }
    if ctx.active_booking_count >= i64::from(customer.max_concurrent) {
        outcome.error(
            "customerId",
            format!("customer already has {} active bookings (limit {})", ctx.active_booking_count, customer.max_concurrent),
        );
    }
}

fn check_slots(request: &BookingRequest, ctx: &ValidationContext, outcome: &mut ValidationOutcome) {
    let mut total_minutes = 0i64;

    for (index, item) in request.items.iter().enumerate() {
        let field = format!("items[{index}]");
        let mut slot_failed = false;

        if item.capacity < 1 {
            outcome.error(format!("{field}.capacity"), "capacity must be at least 1");
            slot_failed = true;
        }
        if item.start_at >= item.end_at {
            outcome.error(format!("{field}.startAt"), "slot start must be before its end");
            continue;
        }
        total_minutes += (item.end_at - item.start_at).num_minutes();

        match ctx.resources.get(&item.resource_id) {
            None => {
                outcome.error(format!("{field}.resourceId"), "resource not found");
                slot_failed = true;
            }
            Some(resource) => {
                if !resource.is_bookable() {
                    outcome.error(
                        format!("{field}.resourceId"),
                        format!("resource is {}", resource.status.as_str()),
                    );
                    slot_failed = true;
                }
                if resource.total_capacity < item.capacity {
                    outcome.error(
                        format!("{field}.capacity"),
                        format!(
                            "requested {} units but the resource holds {}",
                            item.capacity, resource.total_capacity
                        ),
                    );
                    slot_failed = true;
                }
                if !ctx.capable_resources.contains(&item.resource_id) {
                    outcome.error(
                        format!("{field}.resourceId"),
                        "resource does not offer the requested service",
                    );
                    slot_failed = true;
                }
                if !check_slot_hours(item.resource_id, item.start_at, item.end_at, ctx, outcome, &field) {
                    slot_failed = true;
                }
            }
        }

        // Cross-slot rule: no two requested slots on the same resource may
        // overlap in time.
        for (other_index, other) in request.items.iter().enumerate().take(index) {
            if other.resource_id == item.resource_id
                && other.start_at < item.end_at
                && other.end_at > item.start_at
            {
                outcome.error(
                    format!("{field}.startAt"),
                    format!("overlaps items[{other_index}] on the same resource"),
                );
                slot_failed = true;
            }
        }

        if slot_failed && request.require_all_slots {
            outcome.warn(format!(
                "slot validation stopped at items[{index}]: the request requires all slots"
            ));
            break;
        }
    }

    if total_minutes > LONG_BOOKING.num_minutes() {
        outcome.warn(format!(
            "requested slots sum to {total_minutes} minutes, longer than {} hours",
            LONG_BOOKING.num_hours()
        ));
    }
}

/// Returns `false` when the slot falls outside business hours, a holiday,
/// or a time-off window.
fn check_slot_hours(
    resource_id: ResourceId,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    ctx: &ValidationContext,
    outcome: &mut ValidationOutcome,
    field: &str,
) -> bool {
    let local_start = to_local(start_at, ctx.utc_offset_minutes);
    let local_end = to_local(end_at, ctx.utc_offset_minutes);
    let date = local_start.date();

    if overlaps_time_off(&ctx.time_off, resource_id, start_at, end_at) {
        outcome.error(format!("{field}.startAt"), "resource is off during the requested window");
        return false;
    }

    let windows = day_windows(&ctx.business_hours, resource_id, date, date.weekday());
    if windows.is_empty() {
        outcome.error(format!("{field}.startAt"), "resource has no business hours that day");
        return false;
    }

    // Windows apply within one local calendar day; a slot crossing local
    // midnight cannot fit any window.
    if local_end.date() != date || !fits_any_window(&windows, local_start.time(), local_end.time()) {
        outcome.error(format!("{field}.startAt"), "requested window is outside business hours");
        if let Some(open) = next_open_after(&windows, local_start.time()) {
            let shift = open - local_start.time();
            outcome.suggest(Suggestion {
                resource_id,
                start_at: start_at + shift,
                end_at: end_at + shift,
                reason: "next opening that day".to_string(),
            });
        }
        return false;
    }
    true
}

fn check_availability(
    request: &BookingRequest,
    ctx: &ValidationContext,
    outcome: &mut ValidationOutcome,
) {
    for (index, item) in request.items.iter().enumerate() {
        let report = ctx
            .availability
            .iter()
            .find(|r| r.resource_id == item.resource_id);
        if let Some(report) = report {
            if !report.fits {
                outcome.error(
                    format!("items[{index}].capacity"),
                    format!(
                        "requested {} units but only {} are currently available",
                        item.capacity, report.available
                    ),
                );
            }
        }
    }
}

fn check_double_booking(ctx: &ValidationContext, outcome: &mut ValidationOutcome) {
    if ctx.policy.prevent_double_booking && !ctx.overlapping.is_empty() {
        outcome.error(
            "startAt",
            "customer already has an active booking overlapping this window",
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Weekday};
    use reservo_core::domain::booking::BookingRequestItem;
    use reservo_core::domain::catalog::ResourceStatus;
    use reservo_core::domain::inventory::ResourceKind;
    use reservo_core::ids::{CustomerId, ServiceId, TenantId, TimeslotId};

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn base_context(resource_id: ResourceId) -> ValidationContext {
        let tenant = TenantId::nil();
        let resource = Resource {
            id: resource_id,
            tenant_id: tenant,
            kind: ResourceKind::Room,
            total_capacity: 2,
            status: ResourceStatus::Active,
        };
        let service = Service {
            id: ServiceId::nil(),
            tenant_id: tenant,
            duration_minutes: 60,
            price_minor: 10_000,
            buffer_before_minutes: 0,
            buffer_after_minutes: 0,
            min_advance_minutes: 30,
            max_advance_days: 90,
            allow_weekends: true,
            allow_holidays: false,
            requires_approval: false,
            active: true,
        };
        let customer = Customer {
            id: CustomerId::nil(),
            tenant_id: tenant,
            active: true,
            blacklisted: false,
            max_concurrent: 3,
            language: None,
            email: Some("c@example.com".into()),
            phone: None,
        };
        let hours = vec![BusinessHours {
            tenant_id: tenant,
            resource_id: None,
            day_of_week: Weekday::Mon,
            open_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            close_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            effective_from: None,
            effective_to: None,
        }];
        ValidationContext {
            now: ts(8, 0),
            utc_offset_minutes: 0,
            policy: BookingPolicyConfig::default(),
            resources: HashMap::from([(resource_id, resource)]),
            capable_resources: vec![resource_id],
            service: Some(service),
            customer: Some(customer),
            active_booking_count: 0,
            business_hours: hours,
            holidays: Vec::new(),
            time_off: Vec::new(),
            availability: vec![AvailabilityReport {
                resource_id,
                available: 2,
                fits: true,
            }],
            overlapping: Vec::new(),
        }
    }

    fn request(resource_id: ResourceId, start: DateTime<Utc>, end: DateTime<Utc>) -> BookingRequest {
        BookingRequest {
            tenant_id: TenantId::nil(),
            customer_id: CustomerId::nil(),
            service_id: ServiceId::nil(),
            start_at: start,
            end_at: end,
            items: vec![BookingRequestItem {
                timeslot_id: TimeslotId::nil(),
                resource_id,
                start_at: start,
                end_at: end,
                capacity: 1,
                expected_version: 1,
            }],
            total_minor: 10_000,
            idempotency_key: "k-1".to_string(),
            require_all_slots: true,
        }
    }

    #[test]
    fn valid_request_passes() {
        let r = ResourceId::new();
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &base_context(r));
        assert!(outcome.is_ok(), "unexpected errors: {:?}", outcome.errors);
    }

    #[test]
    fn past_start_fails() {
        let r = ResourceId::new();
        let ctx = base_context(r);
        let outcome = validate_request(&request(r, ts(7, 0), ts(8, 0)), &ctx);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn min_advance_boundary_is_inclusive() {
        let r = ResourceId::new();
        let mut ctx = base_context(r); // min_advance = 30 min
        ctx.now = ts(9, 30);
        // Exactly at now + 30 min: allowed.
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(outcome.is_ok(), "unexpected errors: {:?}", outcome.errors);
        // One second under the advance: rejected.
        let start = ts(10, 0) - Duration::seconds(1);
        let outcome = validate_request(&request(r, start, start + Duration::hours(1)), &ctx);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn slot_ending_at_close_passes_but_beyond_fails_with_suggestion() {
        let r = ResourceId::new();
        let ctx = base_context(r);
        // 16:00-17:00 ends exactly at close: fine.
        let outcome = validate_request(&request(r, ts(16, 0), ts(17, 0)), &ctx);
        assert!(outcome.is_ok());
        // 08:00-09:00 is before opening; rejected with next-open suggestion.
        let mut ctx_late = ctx;
        ctx_late.now = ts(6, 0);
        let outcome = validate_request(&request(r, ts(8, 0), ts(9, 0)), &ctx_late);
        assert!(!outcome.is_ok());
        assert_eq!(outcome.suggestions.len(), 1);
        assert_eq!(outcome.suggestions[0].start_at, ts(9, 0));
    }

    #[test]
    fn inactive_resource_fails() {
        let r = ResourceId::new();
        let mut ctx = base_context(r);
        if let Some(resource) = ctx.resources.get_mut(&r) {
            resource.status = ResourceStatus::Maintenance;
        }
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn blacklisted_customer_fails() {
        let r = ResourceId::new();
        let mut ctx = base_context(r);
        if let Some(customer) = ctx.customer.as_mut() {
            customer.blacklisted = true;
        }
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn concurrent_limit_fails_at_capacity() {
        let r = ResourceId::new();
        let mut ctx = base_context(r);
        ctx.active_booking_count = 3; // limit is 3
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn holiday_blocks_unless_service_allows() {
        let r = ResourceId::new();
        let mut ctx = base_context(r);
        ctx.holidays.push(Holiday {
            tenant_id: TenantId::nil(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            name: "Founders Day".into(),
        });
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(!outcome.is_ok());

        if let Some(service) = ctx.service.as_mut() {
            service.allow_holidays = true;
        }
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(outcome.is_ok());
    }

    #[test]
    fn unavailable_capacity_fails() {
        let r = ResourceId::new();
        let mut ctx = base_context(r);
        ctx.availability = vec![AvailabilityReport {
            resource_id: r,
            available: 0,
            fits: false,
        }];
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn overlap_blocks_when_double_booking_prevented() {
        let r = ResourceId::new();
        let mut ctx = base_context(r);
        ctx.overlapping.push(Booking {
            id: reservo_core::ids::BookingId::new(),
            tenant_id: TenantId::nil(),
            customer_id: CustomerId::nil(),
            service_id: ServiceId::nil(),
            start_at: ts(10, 30),
            end_at: ts(11, 30),
            status: reservo_core::domain::booking::BookingStatus::Confirmed,
            total_minor: 0,
            idempotency_key: "other".into(),
            expires_at: None,
            created_at: ts(8, 0),
            updated_at: ts(8, 0),
        });
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(!outcome.is_ok());

        ctx.policy.prevent_double_booking = false;
        let outcome = validate_request(&request(r, ts(10, 0), ts(11, 0)), &ctx);
        assert!(outcome.is_ok());
    }

    #[test]
    fn same_resource_overlapping_slots_fail() {
        let r = ResourceId::new();
        let ctx = base_context(r);
        let mut req = request(r, ts(10, 0), ts(12, 0));
        req.require_all_slots = false;
        req.items = vec![
            BookingRequestItem {
                timeslot_id: TimeslotId::new(),
                resource_id: r,
                start_at: ts(10, 0),
                end_at: ts(11, 0),
                capacity: 1,
                expected_version: 1,
            },
            BookingRequestItem {
                timeslot_id: TimeslotId::new(),
                resource_id: r,
                start_at: ts(10, 30),
                end_at: ts(11, 30),
                capacity: 1,
                expected_version: 1,
            },
        ];
        let outcome = validate_request(&req, &ctx);
        assert!(!outcome.is_ok());
    }

    #[test]
    fn long_booking_warns_but_passes() {
        let r = ResourceId::new();
        let mut ctx = base_context(r);
        ctx.policy.max_booking_duration_minutes = 600;
        ctx.business_hours[0].close_time = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let outcome = validate_request(&request(r, ts(9, 0), ts(18, 30)), &ctx);
        assert!(outcome.is_ok(), "unexpected errors: {:?}", outcome.errors);
        assert!(!outcome.warnings.is_empty());
    }
}
