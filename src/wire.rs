//! Conversion between [`StepResult`] and the versioned ExecResult record
//! published on the bus.
//!
//! The record is built as a `BTreeMap` so repeated conversion of the same
//! result serializes byte-identically.

use std::collections::BTreeMap;

use crate::core::{ErrorCode, StepResult, StepStatus};

/// ExecResult contract status strings.
pub fn status_to_string(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Ok => "success",
        StepStatus::Error => "error",
        StepStatus::Timeout => "timeout",
        StepStatus::Cancelled => "cancelled",
    }
}

/// Inverse of [`status_to_string`]; unknown strings map to error.
pub fn string_to_status(status: &str) -> StepStatus {
    match status {
        "success" => StepStatus::Ok,
        "error" => StepStatus::Error,
        "timeout" => StepStatus::Timeout,
        "cancelled" => StepStatus::Cancelled,
        _ => StepStatus::Error,
    }
}

/// Upper-snake machine-readable form used in the wire record.
pub fn error_code_to_string(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::None => "NONE",
        ErrorCode::InvalidInput => "INVALID_INPUT",
        ErrorCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
        ErrorCode::InvalidFormat => "INVALID_FORMAT",
        ErrorCode::ExecutionFailed => "EXECUTION_FAILED",
        ErrorCode::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
        ErrorCode::PermissionDenied => "PERMISSION_DENIED",
        ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
        ErrorCode::NetworkError => "NETWORK_ERROR",
        ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
        ErrorCode::HttpError => "HTTP_ERROR",
        ErrorCode::InternalError => "INTERNAL_ERROR",
        ErrorCode::SystemOverload => "SYSTEM_OVERLOAD",
        ErrorCode::CancelledByUser => "CANCELLED_BY_USER",
        ErrorCode::CancelledByTimeout => "CANCELLED_BY_TIMEOUT",
    }
}

/// Decimal form of the numeric code, used as the `error_code` metric label.
pub fn error_code_label(code: ErrorCode) -> String {
    code.code().to_string()
}

/// Convert a [`StepResult`] into the ExecResult mapping published on the
/// result subject.
///
/// Always present: `version`, `assignment_id`, `request_id`, `status`,
/// `provider_id`, `job`, `latency_ms`, `cost`. Correlation fields
/// (`trace_id`, `run_id`, `tenant_id`) appear only when non-empty. On error
/// status `error_code` is always present and `error_message` only when
/// non-empty.
pub fn to_exec_result(
    result: &StepResult,
    assignment_id: &str,
    request_id: &str,
    provider_id: &str,
    job_type: &str,
) -> BTreeMap<String, String> {
    let mut record = BTreeMap::new();

    record.insert("version".to_string(), "1".to_string());
    record.insert("assignment_id".to_string(), assignment_id.to_string());
    record.insert("request_id".to_string(), request_id.to_string());
    record.insert(
        "status".to_string(),
        status_to_string(result.status).to_string(),
    );
    record.insert("provider_id".to_string(), provider_id.to_string());
    record.insert(
        "job".to_string(),
        serde_json::json!({ "type": job_type }).to_string(),
    );
    record.insert("latency_ms".to_string(), result.latency_ms.to_string());
    // Cost accounting is a placeholder in this version.
    record.insert("cost".to_string(), "0.0".to_string());

    if !result.metadata.trace_id.is_empty() {
        record.insert("trace_id".to_string(), result.metadata.trace_id.clone());
    }
    if !result.metadata.run_id.is_empty() {
        record.insert("run_id".to_string(), result.metadata.run_id.clone());
    }
    if !result.metadata.tenant_id.is_empty() {
        record.insert("tenant_id".to_string(), result.metadata.tenant_id.clone());
    }

    if result.status == StepStatus::Error {
        record.insert(
            "error_code".to_string(),
            error_code_to_string(result.error_code).to_string(),
        );
        if !result.error_message.is_empty() {
            record.insert("error_message".to_string(), result.error_message.clone());
        }
    }

    record
}
