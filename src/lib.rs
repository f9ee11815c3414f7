//! Beamline worker - per-node step execution for a workflow platform.
//!
//! The worker consumes step-execution assignments from a message bus,
//! dispatches each step to a typed block handler, enforces retry, timeout
//! and queue-admission policies, and publishes a strictly-typed result
//! back to the bus.
//!
//! ## Pipeline
//!
//! ```text
//! bus-in -> ingress -> (ack) -> pool (admit/reject) -> executor -> handler
//!                                                         |
//!                                            result -> converter -> bus-out
//! ```
//!
//! ## Components
//!
//! - [`core`]: step request/result model, error taxonomy, worker config
//! - [`wire`]: conversion to the versioned ExecResult bus record
//! - [`flags`]: environment feature flags, read at each decision site
//! - [`retry`] / [`timeout`]: backoff, classification, budgets, deadlines
//! - [`blocks`]: HTTP / FS / SQL / human-approval handlers
//! - [`executor`]: per-handler retry loop with metrics
//! - [`pool`]: bounded FIFO admission per resource class
//! - [`ingress`]: assignment validation, acknowledgement, routing
//! - [`observability`]: metrics registry, JSON logging, health/metrics
//!   endpoints
//! - [`worker`]: the root that wires the stages together

pub mod blocks;
pub mod bus;
pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod flags;
pub mod ingress;
pub mod observability;
pub mod pool;
pub mod retry;
pub mod timeout;
pub mod wire;
pub mod worker;

pub use crate::blocks::{BlockHandler, HandlerRegistry};
pub use crate::bus::{
    AckStatus, AssignmentAck, Bus, ExecAssignment, InMemoryBus, JobSpec, StdoutBus,
};
pub use crate::core::{
    BlockContext, ErrorCode, ResourceClass, ResultMetadata, StepRequest, StepResult, StepStatus,
    WorkerConfig,
};
pub use crate::error::WorkerError;
pub use crate::observability::{EndpointServer, Observability};
pub use crate::pool::{PoolClient, PoolConfig, PoolHandle, QueueEntry};
pub use crate::retry::{RetryConfig, RetryPolicy};
pub use crate::worker::Worker;
