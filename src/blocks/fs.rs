//! Filesystem blob handlers.
//!
//! Both handlers refuse paths outside a fixed allow-list of prefixes; a
//! refusal is a permission error, consistently across FS handlers. With
//! the complete-timeout flag on, each operation runs under its per-op
//! deadline and expiry surfaces as a timeout result.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Duration;

use super::{input_or, missing_inputs, BlockHandler};
use crate::core::{BlockContext, ErrorCode, ResourceClass, ResultMetadata, StepRequest, StepResult};
use crate::flags;
use crate::timeout;

const ALLOWED_PREFIXES: &[&str] = &["/tmp/beamline/", "/var/lib/beamline/data/", "./data/"];

fn path_allowed(path: &str) -> bool {
    ALLOWED_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

/// `fs.blob_put`: write bytes to an allow-listed path, creating parent
/// directories.
pub struct FsPutHandler;

#[async_trait]
impl BlockHandler for FsPutHandler {
    fn block_type(&self) -> &'static str {
        "fs.blob_put"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Io
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let started = Instant::now();
        let meta = ResultMetadata::from_context(ctx);

        let missing = missing_inputs(req, &["path", "content"]);
        if !missing.is_empty() {
            return StepResult::error_result(
                ErrorCode::MissingRequiredField,
                format!("missing required inputs: {}", missing.join(", ")),
                meta,
                elapsed_ms(started),
            );
        }

        let path = req.inputs["path"].clone();
        let content = req.inputs["content"].clone();
        let overwrite = input_or(req, "overwrite", "false") == "true";

        if !path_allowed(&path) {
            return StepResult::error_result(
                ErrorCode::PermissionDenied,
                format!("path not allowed: {path}"),
                meta,
                elapsed_ms(started),
            );
        }

        if !overwrite && Path::new(&path).exists() {
            return StepResult::error_result(
                ErrorCode::ExecutionFailed,
                format!("file already exists and overwrite is false: {path}"),
                meta,
                elapsed_ms(started),
            );
        }

        let size = content.len();
        let write_op = async {
            if let Some(parent) = Path::new(&path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content.as_bytes()).await
        };

        let per_op_ms = timeout::fs_timeout_ms("write");
        let outcome = if flags::complete_timeout_enabled() && per_op_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(per_op_ms as u64), write_op).await {
                Ok(io_result) => io_result,
                Err(_) => {
                    return StepResult::timeout_result(meta, elapsed_ms(started));
                }
            }
        } else {
            write_op.await
        };

        match outcome {
            Ok(()) => {
                let mut outputs = HashMap::new();
                outputs.insert("path".to_string(), path);
                outputs.insert("size".to_string(), size.to_string());
                outputs.insert(
                    "created".to_string(),
                    Utc::now().timestamp_millis().to_string(),
                );
                StepResult::success(meta, outputs, elapsed_ms(started))
            }
            Err(e) => StepResult::error_result(
                io_error_code(&e),
                format!("file write error: {e}"),
                meta,
                elapsed_ms(started),
            ),
        }
    }
}

/// `fs.blob_get`: read an entire allow-listed file.
pub struct FsGetHandler;

#[async_trait]
impl BlockHandler for FsGetHandler {
    fn block_type(&self) -> &'static str {
        "fs.blob_get"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Io
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let started = Instant::now();
        let meta = ResultMetadata::from_context(ctx);

        let missing = missing_inputs(req, &["path"]);
        if !missing.is_empty() {
            return StepResult::error_result(
                ErrorCode::MissingRequiredField,
                "missing required input: path",
                meta,
                elapsed_ms(started),
            );
        }

        let path = req.inputs["path"].clone();
        if !path_allowed(&path) {
            return StepResult::error_result(
                ErrorCode::PermissionDenied,
                format!("path not allowed: {path}"),
                meta,
                elapsed_ms(started),
            );
        }

        let read_op = async {
            let metadata = tokio::fs::metadata(&path).await?;
            let bytes = tokio::fs::read(&path).await?;
            Ok::<_, std::io::Error>((bytes, metadata.modified().ok()))
        };

        let per_op_ms = timeout::fs_timeout_ms("read");
        let outcome = if flags::complete_timeout_enabled() && per_op_ms > 0 {
            match tokio::time::timeout(Duration::from_millis(per_op_ms as u64), read_op).await {
                Ok(io_result) => io_result,
                Err(_) => {
                    return StepResult::timeout_result(meta, elapsed_ms(started));
                }
            }
        } else {
            read_op.await
        };

        match outcome {
            Ok((bytes, modified)) => {
                let mut outputs = HashMap::new();
                outputs.insert("path".to_string(), path);
                outputs.insert("size".to_string(), bytes.len().to_string());
                outputs.insert(
                    "content".to_string(),
                    String::from_utf8_lossy(&bytes).to_string(),
                );
                let modified_ms = modified
                    .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
                    .unwrap_or(0);
                outputs.insert("modified".to_string(), modified_ms.to_string());
                StepResult::success(meta, outputs, elapsed_ms(started))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepResult::error_result(
                ErrorCode::ResourceUnavailable,
                format!("file not found: {path}"),
                meta,
                elapsed_ms(started),
            ),
            Err(e) => StepResult::error_result(
                io_error_code(&e),
                format!("file read error: {e}"),
                meta,
                elapsed_ms(started),
            ),
        }
    }
}

fn io_error_code(e: &std::io::Error) -> ErrorCode {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ErrorCode::PermissionDenied
    } else {
        ErrorCode::ExecutionFailed
    }
}
