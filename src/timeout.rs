//! Timeout policy: per-operation deadlines for filesystem I/O and the
//! connect/total split for outbound HTTP.
//!
//! With the complete-timeout flag off, every function falls back to the
//! baseline: zero means "no enforcement" and HTTP uses the single request
//! timeout.

use crate::flags;

/// Per-operation filesystem timeout in milliseconds. Zero means no
/// enforcement (baseline behavior).
pub fn fs_timeout_ms(operation: &str) -> i64 {
    if !flags::complete_timeout_enabled() {
        return 0;
    }

    match operation {
        "read" | "fs.blob_get" => 5_000,
        "write" | "fs.blob_put" => 10_000,
        "delete" => 3_000,
        _ => 5_000,
    }
}

/// HTTP connection-establishment timeout in milliseconds. Zero means the
/// single total timeout applies (baseline behavior).
pub fn http_connect_timeout_ms() -> i64 {
    if !flags::complete_timeout_enabled() {
        return 0;
    }
    5_000
}

/// Total HTTP timeout: connect + request when the flag is on, the request
/// timeout alone otherwise.
pub fn http_total_timeout_ms(request_timeout_ms: i64) -> i64 {
    if !flags::complete_timeout_enabled() {
        return request_timeout_ms;
    }
    http_connect_timeout_ms() + request_timeout_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::COMPLETE_TIMEOUT_ENV;
    use serial_test::serial;

    #[test]
    #[serial]
    fn baseline_disables_enforcement() {
        std::env::remove_var(COMPLETE_TIMEOUT_ENV);
        assert_eq!(fs_timeout_ms("read"), 0);
        assert_eq!(fs_timeout_ms("write"), 0);
        assert_eq!(http_connect_timeout_ms(), 0);
        assert_eq!(http_total_timeout_ms(7_500), 7_500);
    }

    #[test]
    #[serial]
    fn per_operation_fs_timeouts() {
        std::env::set_var(COMPLETE_TIMEOUT_ENV, "true");
        assert_eq!(fs_timeout_ms("read"), 5_000);
        assert_eq!(fs_timeout_ms("fs.blob_get"), 5_000);
        assert_eq!(fs_timeout_ms("write"), 10_000);
        assert_eq!(fs_timeout_ms("fs.blob_put"), 10_000);
        assert_eq!(fs_timeout_ms("delete"), 3_000);
        assert_eq!(fs_timeout_ms("stat"), 5_000);
        std::env::remove_var(COMPLETE_TIMEOUT_ENV);
    }

    #[test]
    #[serial]
    fn http_total_adds_connect_budget() {
        std::env::set_var(COMPLETE_TIMEOUT_ENV, "true");
        assert_eq!(http_connect_timeout_ms(), 5_000);
        assert_eq!(http_total_timeout_ms(2_000), 7_000);
        std::env::remove_var(COMPLETE_TIMEOUT_ENV);
    }
}
