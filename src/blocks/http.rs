//! HTTP request handler.
//!
//! Performs one outbound request per execute call. With the
//! complete-timeout flag on, connection establishment and the total
//! exchange get independent deadlines; otherwise the request's own
//! `timeout_ms` is the single bound. Outputs are populated on every
//! completed exchange — including non-2xx — so the retry classifier can
//! read the status code.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

use super::{input_or, missing_inputs, BlockHandler};
use crate::core::{BlockContext, ErrorCode, ResourceClass, ResultMetadata, StepRequest, StepResult};
use crate::flags;
use crate::timeout;

pub struct HttpHandler;

impl HttpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockHandler for HttpHandler {
    fn block_type(&self) -> &'static str {
        "http.request"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Io
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult {
        let started = Instant::now();
        let meta = ResultMetadata::from_context(ctx);

        let missing = missing_inputs(req, &["url", "method"]);
        if !missing.is_empty() {
            return StepResult::error_result(
                ErrorCode::MissingRequiredField,
                format!("missing required inputs: {}", missing.join(", ")),
                meta,
                elapsed_ms(started),
            );
        }

        let url = &req.inputs["url"];
        let method_input = &req.inputs["method"];
        let body = input_or(req, "body", "").to_string();
        let headers_json = input_or(req, "headers", "{}");

        if ctx.sandbox && (url.starts_with("file://") || url.starts_with("ftp://")) {
            return StepResult::error_result(
                ErrorCode::PermissionDenied,
                format!("sandbox mode: url scheme not allowed: {url}"),
                meta,
                elapsed_ms(started),
            );
        }

        let header_values: serde_json::Value = match serde_json::from_str(headers_json) {
            Ok(value) => value,
            Err(e) => {
                return StepResult::error_result(
                    ErrorCode::InvalidFormat,
                    format!("invalid headers JSON: {e}"),
                    meta,
                    elapsed_ms(started),
                );
            }
        };
        let header_map = match build_header_map(&header_values) {
            Ok(map) => map,
            Err(message) => {
                return StepResult::error_result(
                    ErrorCode::InvalidFormat,
                    message,
                    meta,
                    elapsed_ms(started),
                );
            }
        };

        let method = match Method::from_str(&method_input.to_uppercase()) {
            Ok(m) => m,
            Err(_) => {
                return StepResult::error_result(
                    ErrorCode::InvalidInput,
                    format!("unsupported HTTP method: {method_input}"),
                    meta,
                    elapsed_ms(started),
                );
            }
        };

        // The client is rebuilt per call so the timeout flag is honored at
        // the decision site rather than frozen at startup.
        let mut builder = reqwest::Client::builder()
            .timeout(duration_ms(timeout::http_total_timeout_ms(req.timeout_ms)));
        if flags::complete_timeout_enabled() {
            builder = builder.connect_timeout(duration_ms(timeout::http_connect_timeout_ms()));
        }
        let client = match builder.build() {
            Ok(c) => c,
            Err(e) => {
                return StepResult::error_result(
                    ErrorCode::InternalError,
                    format!("failed to build HTTP client: {e}"),
                    meta,
                    elapsed_ms(started),
                );
            }
        };

        let mut request = client.request(method, url.as_str()).headers(header_map);
        if !body.is_empty() {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let response_headers = headers_to_json(response.headers());
                let body = match response.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        return StepResult::error_result(
                            ErrorCode::NetworkError,
                            format!("failed to read response body: {e}"),
                            meta,
                            elapsed_ms(started),
                        );
                    }
                };

                let mut outputs = HashMap::new();
                outputs.insert("status_code".to_string(), status.to_string());
                outputs.insert("body".to_string(), body);
                outputs.insert("headers".to_string(), response_headers);

                let latency = elapsed_ms(started);
                if (200..300).contains(&status) {
                    StepResult::success(meta, outputs, latency)
                } else {
                    let mut result = StepResult::error_result(
                        ErrorCode::HttpError,
                        format!("HTTP request failed with status: {status}"),
                        meta,
                        latency,
                    );
                    result.outputs = outputs;
                    result
                }
            }
            Err(e) => {
                let code = if e.is_timeout() {
                    ErrorCode::ConnectionTimeout
                } else {
                    ErrorCode::NetworkError
                };
                StepResult::error_result(
                    code,
                    format!("HTTP request error: {e}"),
                    meta,
                    elapsed_ms(started),
                )
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

fn duration_ms(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64)
}

fn build_header_map(values: &serde_json::Value) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::new();
    let Some(object) = values.as_object() else {
        if values.is_null() {
            return Ok(map);
        }
        return Err("headers must be a JSON object".to_string());
    };
    for (key, value) in object {
        let value_str = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let name = HeaderName::from_str(key).map_err(|_| format!("invalid header name: {key}"))?;
        let value = HeaderValue::from_str(&value_str)
            .map_err(|_| format!("invalid header value for {key}"))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn headers_to_json(headers: &HeaderMap) -> String {
    let mut object = serde_json::Map::new();
    for (name, value) in headers {
        object.insert(
            name.as_str().to_string(),
            serde_json::Value::String(String::from_utf8_lossy(value.as_bytes()).to_string()),
        );
    }
    serde_json::Value::Object(object).to_string()
}
