// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    bad_request = { ErrorCode::BadRequest, 400, "BAD_REQUEST" },
    validation = { ErrorCode::Validation, 400, "VALIDATION_ERROR" },
    invalid_transition = { ErrorCode::InvalidStateTransition, 400, "INVALID_STATE_TRANSITION" },
    unauthorized = { ErrorCode::Unauthorized, 401, "UNAUTHORIZED" },
    forbidden = { ErrorCode::Forbidden, 403, "FORBIDDEN" },
    not_found = { ErrorCode::NotFound, 404, "NOT_FOUND" },
    conflict = { ErrorCode::Conflict, 409, "CONFLICT" },
    idempotency = { ErrorCode::IdempotencyConflict, 409, "IDEMPOTENCY_CONFLICT" },
    lock_failed = { ErrorCode::LockFailed, 409, "LOCK_FAILED" },
    rate_limited = { ErrorCode::RateLimited, 429, "RATE_LIMITED" },
    unavailable = { ErrorCode::ServiceUnavailable, 503, "SERVICE_UNAVAILABLE" },
    internal = { ErrorCode::Internal, 500, "INTERNAL" },
)]
fn code_mappings(code: ErrorCode, status: u16, name: &str) {
    assert_eq!(code.http_status(), status);
    assert_eq!(code.as_str(), name);
}

#[test]
fn display_includes_code_and_message() {
    let err = Error::conflict("ride already assigned");
    assert_eq!(err.to_string(), "CONFLICT: ride already assigned");
}

#[test]
fn not_found_names_the_resource() {
    let id = uuid::Uuid::nil();
    let err = Error::not_found("ride", id);
    assert_eq!(err.code, ErrorCode::NotFound);
    assert!(err.message.contains("ride"));
    assert!(err.message.contains(&id.to_string()));
}

#[test]
fn recoverable_codes() {
    assert!(ErrorCode::Conflict.is_recoverable());
    assert!(ErrorCode::LockFailed.is_recoverable());
    assert!(!ErrorCode::Validation.is_recoverable());
    assert!(!ErrorCode::Internal.is_recoverable());
}

#[test]
fn details_round_trip() -> anyhow::Result<()> {
    let err = Error::validation("latitude out of range")
        .with_details(serde_json::json!({"field": "pickup_lat"}));
    let json = serde_json::to_string(&err)?;
    let back: Error = serde_json::from_str(&json)?;
    assert_eq!(back.code, ErrorCode::Validation);
    assert_eq!(back.details, err.details);
    Ok(())
}
