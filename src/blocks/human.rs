//! Human-approval placeholder handler.
//!
//! The interface is stable; the actual approval workflow lives outside
//! this worker. In sandbox mode the handler answers with an immediate
//! synthetic approval; otherwise it registers the request and returns a
//! `pending` result, leaving the eventual decision to an external
//! collaborator.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{input_or, missing_inputs, BlockHandler};
use crate::core::{BlockContext, ErrorCode, ResourceClass, ResultMetadata, StepRequest, StepResult};

pub struct HumanApprovalHandler;

#[async_trait]
impl BlockHandler for HumanApprovalHandler {
    fn block_type(&self) -> &'static str {
        "human.approval"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Cpu
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let started = Instant::now();
        let meta = ResultMetadata::from_context(ctx);

        let missing = missing_inputs(req, &["approval_type", "description"]);
        if !missing.is_empty() {
            return StepResult::error_result(
                ErrorCode::MissingRequiredField,
                format!("missing required inputs: {}", missing.join(", ")),
                meta,
                elapsed_ms(started),
            );
        }

        let timeout_seconds: i64 = match input_or(req, "timeout_seconds", "3600").parse() {
            Ok(v) => v,
            Err(_) => {
                return StepResult::error_result(
                    ErrorCode::InvalidFormat,
                    "timeout_seconds must be an integer",
                    meta,
                    elapsed_ms(started),
                );
            }
        };
        let _approvers = input_or(req, "approvers", "");

        let approval_id = format!("approval-{}", Uuid::new_v4().simple());

        if ctx.sandbox {
            let mut outputs = HashMap::new();
            outputs.insert("approval_id".to_string(), approval_id);
            outputs.insert("decision".to_string(), "approved".to_string());
            outputs.insert("approved_by".to_string(), "sandbox_user".to_string());
            outputs.insert(
                "approved_at".to_string(),
                Utc::now().timestamp_millis().to_string(),
            );
            outputs.insert("reason".to_string(), "sandbox approval".to_string());
            return StepResult::success(meta, outputs, elapsed_ms(started));
        }

        let mut outputs = HashMap::new();
        outputs.insert("approval_id".to_string(), approval_id);
        outputs.insert("status".to_string(), "pending".to_string());
        outputs.insert(
            "message".to_string(),
            "approval request submitted; waiting for human approval".to_string(),
        );
        outputs.insert("timeout_seconds".to_string(), timeout_seconds.to_string());
        StepResult::success(meta, outputs, elapsed_ms(started))
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}
