//! Resource pool stage: one actor per resource class.
//!
//! The pool owns a FIFO queue of pending entries and an in-flight counter;
//! all state changes happen inside its single mailbox loop, so no locking
//! is needed. Admission is decided per submit: free capacity dispatches
//! immediately, a full bounded queue rejects with a `queue_full` ack, and
//! everything else enqueues. The ack for an assignment is published from
//! the mailbox turn before its executor task is spawned, which keeps the
//! ack-before-result ordering per assignment.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::blocks::HandlerRegistry;
use crate::bus::{AssignmentAck, Bus, ExecAssignment};
use crate::core::{
    BlockContext, ErrorCode, ResourceClass, ResultMetadata, StepRequest, StepResult,
};
use crate::executor;
use crate::flags;
use crate::observability::Observability;
use crate::wire;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;

/// One pending assignment owned by the pool until it is dispatched,
/// rejected, or cancelled.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub assignment_id: String,
    pub request_id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub request: StepRequest,
    pub ctx: BlockContext,
}

impl QueueEntry {
    pub fn from_assignment(assignment: &ExecAssignment, request: StepRequest, ctx: BlockContext) -> Self {
        Self {
            assignment_id: assignment.assignment_id.clone(),
            request_id: assignment.request_id.clone(),
            tenant_id: assignment.tenant_id.clone(),
            provider_id: assignment.executor.provider_id.clone(),
            request,
            ctx,
        }
    }

    fn ack(&self, accepted: bool, reason: Option<&str>) -> AssignmentAck {
        AssignmentAck {
            assignment_id: self.assignment_id.clone(),
            request_id: self.request_id.clone(),
            tenant_id: self.tenant_id.clone(),
            status: if accepted {
                crate::bus::AckStatus::Accepted
            } else {
                crate::bus::AckStatus::Rejected
            },
            reason: reason.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub class: ResourceClass,
    pub max_concurrency: usize,
    /// Bound applied only while the queue-management flag is on.
    pub max_queue_size: usize,
}

impl PoolConfig {
    pub fn new(class: ResourceClass, max_concurrency: usize) -> Self {
        Self {
            class,
            max_concurrency: max_concurrency.max(1),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

enum PoolMsg {
    Submit(Box<QueueEntry>),
    Cancel(String),
    Completed,
}

/// Cloneable submission side of a pool.
#[derive(Clone)]
pub struct PoolClient {
    tx: mpsc::Sender<PoolMsg>,
}

impl PoolClient {
    pub async fn submit(&self, entry: QueueEntry) {
        let _ = self.tx.send(PoolMsg::Submit(Box::new(entry))).await;
    }

    pub async fn cancel(&self, step_id: &str) {
        let _ = self.tx.send(PoolMsg::Cancel(step_id.to_string())).await;
    }
}

/// Owning handle for one pool actor.
pub struct PoolHandle {
    client: PoolClient,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PoolHandle {
    pub fn start(
        config: PoolConfig,
        registry: Arc<HandlerRegistry>,
        bus: Arc<dyn Bus>,
        obs: Arc<Observability>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = PoolClient { tx: tx.clone() };

        let task = PoolTask {
            config,
            registry,
            bus,
            obs,
            tx,
            current_load: 0,
            pending: VecDeque::new(),
        };
        let handle = tokio::spawn(task.run(rx, shutdown_rx));

        Self {
            client,
            shutdown_tx,
            handle,
        }
    }

    pub fn client(&self) -> PoolClient {
        self.client.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

struct PoolTask {
    config: PoolConfig,
    registry: Arc<HandlerRegistry>,
    bus: Arc<dyn Bus>,
    obs: Arc<Observability>,
    tx: mpsc::Sender<PoolMsg>,
    current_load: usize,
    pending: VecDeque<QueueEntry>,
}

impl PoolTask {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<PoolMsg>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(PoolMsg::Submit(entry)) => self.on_submit(*entry).await,
                    Some(PoolMsg::Cancel(step_id)) => self.on_cancel(&step_id).await,
                    Some(PoolMsg::Completed) => self.on_completed().await,
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

    async fn on_submit(&mut self, entry: QueueEntry) {
        if self.current_load < self.config.max_concurrency {
            let _ = self.bus.publish_ack(&entry.ack(true, None)).await;
            self.current_load += 1;
            self.dispatch(entry);
            self.update_queue_metrics();
            return;
        }

        if flags::queue_management_enabled() && self.pending.len() >= self.config.max_queue_size {
            let meta = ResultMetadata::from_context(&entry.ctx);
            self.obs.log_warn(
                "queue full - rejecting request",
                &meta,
                json!({
                    "resource_pool": self.config.class.as_str(),
                    "queue_depth": self.pending.len(),
                    "max_queue_size": self.config.max_queue_size,
                    "reason": "queue_full",
                }),
            );
            let _ = self
                .bus
                .publish_ack(&entry.ack(false, Some("queue_full")))
                .await;
            self.update_queue_metrics();
            return;
        }

        let _ = self.bus.publish_ack(&entry.ack(true, None)).await;
        self.pending.push_back(entry);
        self.update_queue_metrics();
    }

    async fn on_completed(&mut self) {
        self.current_load = self.current_load.saturating_sub(1);
        self.process_pending();
        self.update_queue_metrics();
    }

    async fn on_cancel(&mut self, step_id: &str) {
        let before = self.pending.len();
        let mut removed = Vec::new();
        self.pending.retain(|entry| {
            if entry.ctx.step_id == step_id {
                removed.push(entry.clone());
                false
            } else {
                true
            }
        });

        for entry in removed {
            let meta = ResultMetadata::from_context(&entry.ctx);
            let result = StepResult::cancelled_result(meta.clone(), 0);
            let record = wire::to_exec_result(
                &result,
                &entry.assignment_id,
                &entry.request_id,
                &entry.provider_id,
                &entry.request.step_type,
            );
            if let Err(e) = self.bus.publish_result(&record).await {
                self.obs.log_error(
                    "failed to publish cancelled result",
                    &meta,
                    json!({ "error": e.to_string() }),
                );
            }
        }

        if before != self.pending.len() {
            self.update_queue_metrics();
        }
        self.obs.log_info(
            "step cancellation requested",
            &ResultMetadata {
                step_id: step_id.to_string(),
                ..Default::default()
            },
            json!({ "resource_pool": self.config.class.as_str() }),
        );
    }

    fn process_pending(&mut self) {
        while self.current_load < self.config.max_concurrency {
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            self.current_load += 1;
            let meta = ResultMetadata::from_context(&entry.ctx);
            self.obs.log_info(
                "processing queued request",
                &meta,
                json!({
                    "resource_pool": self.config.class.as_str(),
                    "step_type": entry.request.step_type,
                    "queue_depth": self.pending.len(),
                }),
            );
            self.dispatch(entry);
        }
    }

    fn dispatch(&self, entry: QueueEntry) {
        let registry = Arc::clone(&self.registry);
        let bus = Arc::clone(&self.bus);
        let obs = Arc::clone(&self.obs);
        let pool_tx = self.tx.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let meta = ResultMetadata::from_context(&entry.ctx);

            let result = match registry.get(&entry.request.step_type) {
                Some(handler) => {
                    executor::execute_with_retry(handler, &entry.request, &entry.ctx, &obs).await
                }
                None => StepResult::error_result(
                    ErrorCode::ExecutionFailed,
                    format!("no handler registered for {}", entry.request.step_type),
                    meta.clone(),
                    0,
                ),
            };

            let record = wire::to_exec_result(
                &result,
                &entry.assignment_id,
                &entry.request_id,
                &entry.provider_id,
                &entry.request.step_type,
            );
            if let Err(e) = bus.publish_result(&record).await {
                obs.log_error(
                    "failed to publish step result",
                    &meta,
                    json!({ "error": e.to_string(), "assignment_id": entry.assignment_id }),
                );
            }
            obs.record_flow_execution_duration(started.elapsed().as_secs_f64(), &meta);

            let _ = pool_tx.send(PoolMsg::Completed).await;
        });
    }

    fn update_queue_metrics(&self) {
        let pool = self.config.class.as_str();
        self.obs.set_queue_depth(pool, self.pending.len() as i64);
        self.obs.set_active_tasks(pool, self.current_load as i64);
    }
}
