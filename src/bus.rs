//! Bus-facing records and the publish port.
//!
//! The transport client itself (NATS subscribe/publish plumbing) is an
//! external collaborator: the worker only defines the decoded assignment
//! shape it consumes and a [`Bus`] port it publishes acknowledgements and
//! results through. An in-memory implementation backs the test suite and a
//! stdout stub adapter backs the binary until a real transport is attached.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

pub const ACK_SUBJECT: &str = "exec.ack.v1";
pub const RESULT_SUBJECT: &str = "exec.result.v1";

fn default_timeout_ms() -> i64 {
    30_000
}

fn default_retry_count() -> i32 {
    3
}

/// Executor selection carried on an assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSpec {
    #[serde(default)]
    pub provider_id: String,
}

/// Job payload of an assignment: the step type plus its named inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(rename = "type", default)]
    pub job_type: String,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
}

/// One decoded step-execution assignment delivered by the bus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecAssignment {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub assignment_id: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub executor: ExecutorSpec,
    #[serde(default)]
    pub job: JobSpec,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub flow_id: String,
    #[serde(default)]
    pub step_id: String,
    #[serde(default)]
    pub resources: HashMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default = "default_retry_count")]
    pub retry_count: i32,
    #[serde(default)]
    pub guardrails: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Accepted,
    Rejected,
}

/// Acknowledgement published once per assignment, before any result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentAck {
    pub assignment_id: String,
    pub request_id: String,
    pub tenant_id: String,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AssignmentAck {
    pub fn accepted(assignment: &ExecAssignment) -> Self {
        Self {
            assignment_id: assignment.assignment_id.clone(),
            request_id: assignment.request_id.clone(),
            tenant_id: assignment.tenant_id.clone(),
            status: AckStatus::Accepted,
            reason: None,
        }
    }

    pub fn rejected(assignment: &ExecAssignment, reason: impl Into<String>) -> Self {
        Self {
            assignment_id: assignment.assignment_id.clone(),
            request_id: assignment.request_id.clone(),
            tenant_id: assignment.tenant_id.clone(),
            status: AckStatus::Rejected,
            reason: Some(reason.into()),
        }
    }
}

/// Publish port towards the bus.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish_ack(&self, ack: &AssignmentAck) -> Result<(), WorkerError>;
    async fn publish_result(&self, record: &BTreeMap<String, String>) -> Result<(), WorkerError>;
}

/// Records everything published; the test suite inspects it.
#[derive(Default)]
pub struct InMemoryBus {
    acks: Mutex<Vec<AssignmentAck>>,
    results: Mutex<Vec<BTreeMap<String, String>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acks(&self) -> Vec<AssignmentAck> {
        self.acks.lock().clone()
    }

    pub fn results(&self) -> Vec<BTreeMap<String, String>> {
        self.results.lock().clone()
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish_ack(&self, ack: &AssignmentAck) -> Result<(), WorkerError> {
        self.acks.lock().push(ack.clone());
        Ok(())
    }

    async fn publish_result(&self, record: &BTreeMap<String, String>) -> Result<(), WorkerError> {
        self.results.lock().push(record.clone());
        Ok(())
    }
}

/// Stub adapter for the binary: serializes outbound records as JSON lines
/// on stdout, tagged with their subject, until the real transport client is
/// wired in.
#[derive(Default)]
pub struct StdoutBus;

impl StdoutBus {
    pub fn new() -> Self {
        Self
    }

    fn emit<T: Serialize>(&self, subject: &str, payload: &T) -> Result<(), WorkerError> {
        let body = serde_json::to_string(payload)
            .map_err(|e| WorkerError::BusPublish(e.to_string()))?;
        println!("{{\"subject\":\"{subject}\",\"payload\":{body}}}");
        Ok(())
    }
}

#[async_trait]
impl Bus for StdoutBus {
    async fn publish_ack(&self, ack: &AssignmentAck) -> Result<(), WorkerError> {
        self.emit(ACK_SUBJECT, ack)
    }

    async fn publish_result(&self, record: &BTreeMap<String, String>) -> Result<(), WorkerError> {
        self.emit(RESULT_SUBJECT, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_decodes_with_defaults() {
        let payload = serde_json::json!({
            "version": "1",
            "assignment_id": "assign-1",
            "request_id": "req-1",
            "tenant_id": "tenant-1",
            "executor": { "provider_id": "local" },
            "job": { "type": "http.request", "inputs": { "url": "http://x", "method": "GET" } }
        });
        let assignment: ExecAssignment = serde_json::from_value(payload).unwrap();
        assert_eq!(assignment.version, "1");
        assert_eq!(assignment.job.job_type, "http.request");
        assert_eq!(assignment.job.inputs["method"], "GET");
        assert_eq!(assignment.timeout_ms, 30_000);
        assert_eq!(assignment.retry_count, 3);
        assert!(assignment.trace_id.is_empty());
        assert!(assignment.resources.is_empty());
    }

    #[test]
    fn ack_serializes_status_and_optional_reason() {
        let assignment = ExecAssignment {
            assignment_id: "a".into(),
            request_id: "r".into(),
            tenant_id: "t".into(),
            ..Default::default()
        };

        let accepted = serde_json::to_value(AssignmentAck::accepted(&assignment)).unwrap();
        assert_eq!(accepted["status"], "accepted");
        assert!(accepted.get("reason").is_none());

        let rejected =
            serde_json::to_value(AssignmentAck::rejected(&assignment, "queue_full")).unwrap();
        assert_eq!(rejected["status"], "rejected");
        assert_eq!(rejected["reason"], "queue_full");
    }

    #[tokio::test]
    async fn in_memory_bus_records_everything() {
        let bus = InMemoryBus::new();
        let assignment = ExecAssignment::default();
        bus.publish_ack(&AssignmentAck::accepted(&assignment))
            .await
            .unwrap();
        let mut record = BTreeMap::new();
        record.insert("status".to_string(), "success".to_string());
        bus.publish_result(&record).await.unwrap();

        assert_eq!(bus.acks().len(), 1);
        assert_eq!(bus.results().len(), 1);
        assert_eq!(bus.results()[0]["status"], "success");
    }
}
