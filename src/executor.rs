//! Executor stage: wraps one handler invocation in the retry, timeout and
//! metrics loop.
//!
//! The retry budget is checked before every attempt and accounts for the
//! upcoming backoff sleep, so no attempt starts past the assignment's
//! total deadline. A handler that panics is converted into an
//! execution-failed result so the retry and metric pipeline always sees a
//! `StepResult`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::blocks::BlockHandler;
use crate::core::{BlockContext, ErrorCode, ResultMetadata, StepRequest, StepResult};
use crate::observability::Observability;
use crate::retry::RetryPolicy;
use crate::wire;

/// Run a request through its handler with retries, stamping
/// `retries_used` and recording execution metrics on the way out.
pub async fn execute_with_retry(
    handler: Arc<dyn BlockHandler>,
    req: &StepRequest,
    ctx: &BlockContext,
    obs: &Observability,
) -> StepResult {
    let meta = ResultMetadata::from_context(ctx);

    // Sandbox type guard: system-execution step types never reach a handler.
    if ctx.sandbox && (req.step_type.starts_with("exec.") || req.step_type.starts_with("system.")) {
        let result = StepResult::error_result(
            ErrorCode::PermissionDenied,
            format!("sandbox mode: step type not allowed: {}", req.step_type),
            meta,
            0,
        );
        record_terminal(obs, req, &result);
        return result;
    }

    let policy = RetryPolicy::for_request(req);
    let total_start = Instant::now();
    let mut attempt: i32 = 0;

    loop {
        let elapsed_ms = total_start.elapsed().as_millis() as i64;
        if policy.is_budget_exhausted(elapsed_ms, attempt) {
            let mut result = StepResult::timeout_result(meta.clone(), elapsed_ms);
            result.error_message = "retry budget exhausted: total timeout exceeded".to_string();
            result.retries_used = attempt;
            record_terminal(obs, req, &result);
            return result;
        }

        let mut result = run_attempt(&handler, req, ctx, &meta).await;
        result.retries_used = attempt;

        if result.is_success() {
            record_terminal(obs, req, &result);
            return result;
        }

        obs.record_step_error(
            &req.step_type,
            &wire::error_code_label(result.error_code),
            &result.metadata,
        );

        let http_status: u16 = if req.step_type == "http.request" {
            result
                .outputs
                .get("status_code")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        } else {
            0
        };

        if !policy.is_retryable(result.error_code, http_status) {
            record_terminal(obs, req, &result);
            return result;
        }

        if attempt >= policy.max_retries() {
            record_terminal(obs, req, &result);
            return result;
        }

        // The attempt itself consumed budget; re-check before sleeping so
        // the backoff delay never crosses the deadline either.
        let elapsed_ms = total_start.elapsed().as_millis() as i64;
        if policy.is_budget_exhausted(elapsed_ms, attempt) {
            let mut result = StepResult::timeout_result(meta.clone(), elapsed_ms);
            result.error_message =
                "retry budget exhausted: backoff delay would exceed total timeout".to_string();
            result.retries_used = attempt;
            record_terminal(obs, req, &result);
            return result;
        }

        let backoff_ms = policy.backoff_delay_ms(attempt);
        tokio::time::sleep(Duration::from_millis(backoff_ms.max(0) as u64)).await;
        attempt += 1;
    }
}

/// One attempt. The handler is run on its own task so a panic inside it
/// surfaces as a join error instead of tearing the executor down; the
/// measured wall clock overwrites whatever latency the handler reported.
async fn run_attempt(
    handler: &Arc<dyn BlockHandler>,
    req: &StepRequest,
    ctx: &BlockContext,
    meta: &ResultMetadata,
) -> StepResult {
    let started = Instant::now();
    let task_handler = Arc::clone(handler);
    let task_req = req.clone();
    let task_ctx = ctx.clone();

    let outcome =
        tokio::spawn(async move { task_handler.execute(&task_req, &task_ctx).await }).await;

    let latency_ms = started.elapsed().as_millis() as i64;
    let mut result = match outcome {
        Ok(result) => result,
        Err(e) => StepResult::error_result(
            ErrorCode::ExecutionFailed,
            format!("handler invocation failed: {e}"),
            meta.clone(),
            latency_ms,
        ),
    };
    result.latency_ms = latency_ms;
    result
}

fn record_terminal(obs: &Observability, req: &StepRequest, result: &StepResult) {
    let status = wire::status_to_string(result.status);
    obs.record_step_execution(&req.step_type, status, &result.metadata);
    obs.record_step_execution_duration(
        &req.step_type,
        status,
        result.latency_ms as f64 / 1000.0,
        &result.metadata,
    );
}
