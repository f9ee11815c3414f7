//! Core data model for step execution.
//!
//! Every code path in the worker funnels into a [`StepResult`]: the factory
//! constructors guarantee the status/error-code invariants at the point of
//! creation, and [`StepResult::validate`] re-checks them before a result is
//! converted for the bus.

use std::collections::HashMap;

/// Resource class a step is dispatched under. Each class owns one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Cpu,
    Gpu,
    Io,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Cpu => "cpu",
            ResourceClass::Gpu => "gpu",
            ResourceClass::Io => "io",
        }
    }
}

/// Execution environment for one step: correlation IDs, sandbox flag, and
/// the authorization scopes the step was granted.
#[derive(Debug, Clone, Default)]
pub struct BlockContext {
    pub tenant_id: String,
    pub trace_id: String,
    pub run_id: String,
    pub flow_id: String,
    pub step_id: String,
    pub sandbox: bool,
    pub rbac_scopes: Vec<String>,
}

/// One unit of work handed to a block handler.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub step_type: String,
    pub inputs: HashMap<String, String>,
    pub resources: HashMap<String, String>,
    /// Total per-assignment deadline in milliseconds.
    pub timeout_ms: i64,
    /// Maximum attempts excluding the first.
    pub retry_count: i32,
    pub guardrails: HashMap<String, String>,
}

impl Default for StepRequest {
    fn default() -> Self {
        Self {
            step_type: String::new(),
            inputs: HashMap::new(),
            resources: HashMap::new(),
            timeout_ms: 30_000,
            retry_count: 3,
            guardrails: HashMap::new(),
        }
    }
}

/// Step execution status aligned with the ExecResult contract
/// (success | error | timeout | cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepStatus {
    #[default]
    Ok,
    Error,
    Timeout,
    Cancelled,
}

/// Machine-readable error codes for programmatic error handling.
///
/// Codes are grouped into ranges: 1xxx validation, 2xxx execution,
/// 3xxx network, 4xxx system, 5xxx cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    None,
    InvalidInput,
    MissingRequiredField,
    InvalidFormat,
    ExecutionFailed,
    ResourceUnavailable,
    PermissionDenied,
    QuotaExceeded,
    NetworkError,
    ConnectionTimeout,
    HttpError,
    InternalError,
    SystemOverload,
    CancelledByUser,
    CancelledByTimeout,
}

impl ErrorCode {
    /// Stable numeric code. Used as the `error_code` metric label.
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::InvalidInput => 1001,
            ErrorCode::MissingRequiredField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::ExecutionFailed => 2001,
            ErrorCode::ResourceUnavailable => 2002,
            ErrorCode::PermissionDenied => 2003,
            ErrorCode::QuotaExceeded => 2004,
            ErrorCode::NetworkError => 3001,
            ErrorCode::ConnectionTimeout => 3002,
            ErrorCode::HttpError => 3003,
            ErrorCode::InternalError => 4001,
            ErrorCode::SystemOverload => 4002,
            ErrorCode::CancelledByUser => 5001,
            ErrorCode::CancelledByTimeout => 5002,
        }
    }
}

/// Correlation metadata carried alongside every step and preserved
/// end-to-end. Any field may be empty when its context is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    pub trace_id: String,
    pub run_id: String,
    pub flow_id: String,
    pub step_id: String,
    pub tenant_id: String,
}

impl ResultMetadata {
    /// Copy the correlation fields from a [`BlockContext`]. Handlers must
    /// populate their result metadata through this.
    pub fn from_context(ctx: &BlockContext) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            run_id: ctx.run_id.clone(),
            flow_id: ctx.flow_id.clone(),
            step_id: ctx.step_id.clone(),
            tenant_id: ctx.tenant_id.clone(),
        }
    }
}

/// Unified result type for all block executions.
///
/// Invariants (enforced by the factories, checked by [`Self::validate`]):
/// - `Ok` implies `error_code == None`
/// - `Error`, `Timeout`, `Cancelled` imply `error_code != None`
/// - `Timeout` implies `error_code == CancelledByTimeout`
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub status: StepStatus,
    pub error_code: ErrorCode,
    pub outputs: HashMap<String, String>,
    pub error_message: String,
    pub metadata: ResultMetadata,
    pub latency_ms: i64,
    pub retries_used: i32,
}

impl StepResult {
    pub fn success(
        metadata: ResultMetadata,
        outputs: HashMap<String, String>,
        latency_ms: i64,
    ) -> Self {
        Self {
            status: StepStatus::Ok,
            error_code: ErrorCode::None,
            outputs,
            metadata,
            latency_ms,
            ..Default::default()
        }
    }

    pub fn error_result(
        code: ErrorCode,
        message: impl Into<String>,
        metadata: ResultMetadata,
        latency_ms: i64,
    ) -> Self {
        Self {
            status: StepStatus::Error,
            error_code: code,
            error_message: message.into(),
            metadata,
            latency_ms,
            ..Default::default()
        }
    }

    pub fn timeout_result(metadata: ResultMetadata, latency_ms: i64) -> Self {
        Self {
            status: StepStatus::Timeout,
            error_code: ErrorCode::CancelledByTimeout,
            metadata,
            latency_ms,
            ..Default::default()
        }
    }

    pub fn cancelled_result(metadata: ResultMetadata, latency_ms: i64) -> Self {
        Self {
            status: StepStatus::Cancelled,
            error_code: ErrorCode::CancelledByUser,
            metadata,
            latency_ms,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Ok
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }

    pub fn is_timeout(&self) -> bool {
        self.status == StepStatus::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == StepStatus::Cancelled
    }

    /// True iff the status/error-code pair is one of the legal combinations
    /// and the counters are non-negative.
    pub fn validate(&self) -> bool {
        let pair_ok = match self.status {
            StepStatus::Ok => self.error_code == ErrorCode::None,
            StepStatus::Error => self.error_code != ErrorCode::None,
            StepStatus::Timeout => self.error_code == ErrorCode::CancelledByTimeout,
            // Cancellation defaults to cancelled_by_user but may carry an
            // overriding code, as long as one is present.
            StepStatus::Cancelled => self.error_code != ErrorCode::None,
        };
        pair_ok && self.latency_ms >= 0 && self.retries_used >= 0
    }
}

/// Worker configuration. Constructed once at startup, immutable thereafter,
/// shared by reference to all components.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cpu_pool_size: usize,
    pub gpu_pool_size: usize,
    pub io_pool_size: usize,
    pub max_memory_per_tenant_mb: i64,
    pub max_cpu_time_per_tenant_ms: i64,
    pub sandbox_mode: bool,
    pub nats_url: String,
    /// Base `<addr>:<port>`; health serves on port+1, metrics on port+2.
    pub prometheus_endpoint: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cpu_pool_size: 4,
            gpu_pool_size: 1,
            io_pool_size: 8,
            max_memory_per_tenant_mb: 1024,
            max_cpu_time_per_tenant_ms: 3_600_000,
            sandbox_mode: false,
            nats_url: "nats://localhost:4222".to_string(),
            prometheus_endpoint: "0.0.0.0:9090".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn pool_size(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Cpu => self.cpu_pool_size,
            ResourceClass::Gpu => self.gpu_pool_size,
            ResourceClass::Io => self.io_pool_size,
        }
    }
}
