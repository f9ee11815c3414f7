//! Ingress stage: validates decoded assignments and routes them to the
//! pool for their resource class.
//!
//! Invalid assignments are answered with a `rejected` acknowledgement and
//! never touch a pool. For valid assignments the accepted (or
//! `queue_full`-rejected) ack is published by the admitting pool, so each
//! assignment gets exactly one ack, always before its result.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::blocks::HandlerRegistry;
use crate::bus::{AssignmentAck, Bus, ExecAssignment};
use crate::core::{BlockContext, ResourceClass, ResultMetadata, StepRequest, WorkerConfig};
use crate::observability::Observability;
use crate::pool::{PoolClient, QueueEntry};

/// Why an assignment was rejected at ingress.
fn validate(assignment: &ExecAssignment, registry: &HandlerRegistry) -> Result<(), String> {
    if assignment.version != "1" {
        return Err("invalid_version".to_string());
    }
    for (name, value) in [
        ("assignment_id", &assignment.assignment_id),
        ("request_id", &assignment.request_id),
        ("tenant_id", &assignment.tenant_id),
    ] {
        if value.is_empty() {
            return Err(format!("missing_field:{name}"));
        }
    }
    if !registry.contains(&assignment.job.job_type) {
        return Err("unsupported_job_type".to_string());
    }
    Ok(())
}

/// Pool selection: the `resources.class` hint decides, defaulting to cpu;
/// AI/media hints land on gpu; HTTP and FS job types are always io-bound.
pub fn route_class(job_type: &str, resources: &HashMap<String, String>) -> ResourceClass {
    let mut class = match resources.get("class").map(String::as_str) {
        Some("gpu") | Some("ai") | Some("media") => ResourceClass::Gpu,
        Some("io") => ResourceClass::Io,
        _ => ResourceClass::Cpu,
    };
    if job_type.starts_with("http.") || job_type.starts_with("fs.") {
        class = ResourceClass::Io;
    }
    class
}

fn derive_request(assignment: &ExecAssignment) -> StepRequest {
    StepRequest {
        step_type: assignment.job.job_type.clone(),
        inputs: assignment.job.inputs.clone(),
        resources: assignment.resources.clone(),
        timeout_ms: assignment.timeout_ms,
        retry_count: assignment.retry_count,
        guardrails: assignment.guardrails.clone(),
    }
}

fn derive_context(assignment: &ExecAssignment, config: &WorkerConfig) -> BlockContext {
    BlockContext {
        tenant_id: assignment.tenant_id.clone(),
        trace_id: assignment.trace_id.clone(),
        run_id: assignment.run_id.clone(),
        flow_id: assignment.flow_id.clone(),
        step_id: assignment.step_id.clone(),
        sandbox: config.sandbox_mode,
        rbac_scopes: Vec::new(),
    }
}

pub struct IngressHandle {
    tx: mpsc::Sender<ExecAssignment>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl IngressHandle {
    pub fn start(
        config: Arc<WorkerConfig>,
        registry: Arc<HandlerRegistry>,
        pools: HashMap<ResourceClass, PoolClient>,
        bus: Arc<dyn Bus>,
        obs: Arc<Observability>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = IngressTask {
            config,
            registry,
            pools,
            bus,
            obs,
        };
        let handle = tokio::spawn(task.run(rx, shutdown_rx));

        Self {
            tx,
            shutdown_tx,
            handle,
        }
    }

    /// Sender the external bus client feeds decoded assignments into.
    pub fn sender(&self) -> mpsc::Sender<ExecAssignment> {
        self.tx.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        drop(self.tx);
        let _ = self.handle.await;
    }
}

struct IngressTask {
    config: Arc<WorkerConfig>,
    registry: Arc<HandlerRegistry>,
    pools: HashMap<ResourceClass, PoolClient>,
    bus: Arc<dyn Bus>,
    obs: Arc<Observability>,
}

impl IngressTask {
    async fn run(
        self,
        mut rx: mpsc::Receiver<ExecAssignment>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                assignment = rx.recv() => match assignment {
                    Some(assignment) => self.on_assignment(assignment).await,
                    None => break,
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn on_assignment(&self, assignment: ExecAssignment) {
        let meta = ResultMetadata {
            tenant_id: assignment.tenant_id.clone(),
            trace_id: assignment.trace_id.clone(),
            run_id: assignment.run_id.clone(),
            flow_id: assignment.flow_id.clone(),
            step_id: assignment.step_id.clone(),
        };

        if let Err(reason) = validate(&assignment, &self.registry) {
            self.obs.log_warn(
                "assignment rejected",
                &meta,
                json!({
                    "assignment_id": assignment.assignment_id,
                    "job_type": assignment.job.job_type,
                    "reason": reason,
                }),
            );
            let ack = AssignmentAck::rejected(&assignment, reason);
            if let Err(e) = self.bus.publish_ack(&ack).await {
                self.obs.log_error(
                    "failed to publish rejection ack",
                    &meta,
                    json!({ "error": e.to_string() }),
                );
            }
            return;
        }

        let request = derive_request(&assignment);
        let ctx = derive_context(&assignment, &self.config);
        let class = route_class(&request.step_type, &request.resources);

        self.obs.log_info(
            "assignment accepted for dispatch",
            &meta,
            json!({
                "assignment_id": assignment.assignment_id,
                "job_type": request.step_type,
                "resource_pool": class.as_str(),
            }),
        );

        let entry = QueueEntry::from_assignment(&assignment, request, ctx);
        if let Some(pool) = self.pools.get(&class) {
            pool.submit(entry).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::JobSpec;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::with_builtins()
    }

    fn assignment(job_type: &str) -> ExecAssignment {
        ExecAssignment {
            version: "1".into(),
            assignment_id: "a1".into(),
            request_id: "r1".into(),
            tenant_id: "t1".into(),
            job: JobSpec {
                job_type: job_type.into(),
                inputs: HashMap::new(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn valid_assignment_passes_validation() {
        assert!(validate(&assignment("http.request"), &registry()).is_ok());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut a = assignment("http.request");
        a.version = "2".into();
        assert_eq!(validate(&a, &registry()).unwrap_err(), "invalid_version");
    }

    #[test]
    fn empty_required_fields_are_named_in_the_reason() {
        let mut a = assignment("http.request");
        a.assignment_id.clear();
        assert_eq!(
            validate(&a, &registry()).unwrap_err(),
            "missing_field:assignment_id"
        );

        let mut a = assignment("http.request");
        a.request_id.clear();
        assert_eq!(
            validate(&a, &registry()).unwrap_err(),
            "missing_field:request_id"
        );

        let mut a = assignment("http.request");
        a.tenant_id.clear();
        assert_eq!(
            validate(&a, &registry()).unwrap_err(),
            "missing_field:tenant_id"
        );
    }

    #[test]
    fn unknown_job_type_is_rejected() {
        assert_eq!(
            validate(&assignment("exec.shell"), &registry()).unwrap_err(),
            "unsupported_job_type"
        );
    }

    #[test]
    fn routing_defaults_to_cpu_and_honors_hints() {
        let no_hint = HashMap::new();
        assert_eq!(route_class("sql.query", &no_hint), ResourceClass::Cpu);

        let mut gpu = HashMap::new();
        gpu.insert("class".to_string(), "gpu".to_string());
        assert_eq!(route_class("sql.query", &gpu), ResourceClass::Gpu);

        let mut ai = HashMap::new();
        ai.insert("class".to_string(), "ai".to_string());
        assert_eq!(route_class("model.infer", &ai), ResourceClass::Gpu);

        let mut io = HashMap::new();
        io.insert("class".to_string(), "io".to_string());
        assert_eq!(route_class("sql.query", &io), ResourceClass::Io);
    }

    #[test]
    fn http_and_fs_job_types_are_coerced_to_io() {
        let mut cpu_hint = HashMap::new();
        cpu_hint.insert("class".to_string(), "cpu".to_string());
        assert_eq!(route_class("http.request", &cpu_hint), ResourceClass::Io);
        assert_eq!(route_class("fs.blob_put", &cpu_hint), ResourceClass::Io);
        assert_eq!(route_class("fs.blob_get", &HashMap::new()), ResourceClass::Io);
    }

    #[test]
    fn derived_request_and_context_carry_assignment_fields() {
        let mut a = assignment("http.request");
        a.job.inputs.insert("url".to_string(), "http://x".to_string());
        a.trace_id = "tr".into();
        a.run_id = "run".into();
        a.timeout_ms = 1_234;
        a.retry_count = 7;

        let req = derive_request(&a);
        assert_eq!(req.step_type, "http.request");
        assert_eq!(req.inputs["url"], "http://x");
        assert_eq!(req.timeout_ms, 1_234);
        assert_eq!(req.retry_count, 7);

        let config = WorkerConfig {
            sandbox_mode: true,
            ..Default::default()
        };
        let ctx = derive_context(&a, &config);
        assert_eq!(ctx.tenant_id, "t1");
        assert_eq!(ctx.trace_id, "tr");
        assert_eq!(ctx.run_id, "run");
        assert!(ctx.sandbox);
    }
}
