//! Worker root: wires ingress, pools, executors and observability
//! together, owns the shared configuration, and forwards shutdown.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::blocks::HandlerRegistry;
use crate::bus::{Bus, ExecAssignment};
use crate::config::endpoint_addrs;
use crate::core::{BlockContext, ResourceClass, ResultMetadata, WorkerConfig};
use crate::error::WorkerError;
use crate::flags;
use crate::ingress::IngressHandle;
use crate::observability::{EndpointServer, Observability};
use crate::pool::{PoolClient, PoolConfig, PoolHandle};

pub struct Worker {
    config: Arc<WorkerConfig>,
    obs: Arc<Observability>,
    pools: HashMap<ResourceClass, PoolHandle>,
    pool_clients: HashMap<ResourceClass, PoolClient>,
    ingress: IngressHandle,
    health: EndpointServer,
    metrics: Option<EndpointServer>,
}

impl Worker {
    /// Build and start every stage. Fails fast when an endpoint socket
    /// cannot be bound or a handler refuses to initialize.
    pub async fn start(config: WorkerConfig, bus: Arc<dyn Bus>) -> Result<Self, WorkerError> {
        let config = Arc::new(config);
        let obs = Arc::new(Observability::new(format!("worker-{}", std::process::id())));

        obs.log_info(
            "worker starting",
            &ResultMetadata::default(),
            json!({
                "cpu_pool_size": config.cpu_pool_size,
                "gpu_pool_size": config.gpu_pool_size,
                "io_pool_size": config.io_pool_size,
                "sandbox_mode": config.sandbox_mode,
            }),
        );

        let registry = Arc::new(HandlerRegistry::with_builtins());
        let base_ctx = BlockContext {
            sandbox: config.sandbox_mode,
            ..Default::default()
        };
        for handler in registry.handlers() {
            handler
                .init(&base_ctx)
                .await
                .map_err(|e| WorkerError::HandlerInit {
                    block_type: handler.block_type().to_string(),
                    message: e.to_string(),
                })?;
        }

        let (health_addr, metrics_addr) = endpoint_addrs(&config)?;
        let health = EndpointServer::start_health(health_addr, Arc::clone(&obs)).await?;
        obs.set_health_status("worker", 1);
        obs.log_info(
            "health endpoint started",
            &ResultMetadata::default(),
            json!({ "addr": health.addr.to_string() }),
        );

        let metrics = if flags::observability_metrics_enabled() {
            let server = EndpointServer::start_metrics(metrics_addr, Arc::clone(&obs)).await?;
            obs.log_info(
                "metrics endpoint started",
                &ResultMetadata::default(),
                json!({ "addr": server.addr.to_string() }),
            );
            Some(server)
        } else {
            None
        };

        let mut pools = HashMap::new();
        let mut pool_clients = HashMap::new();
        for class in [ResourceClass::Cpu, ResourceClass::Gpu, ResourceClass::Io] {
            let pool = PoolHandle::start(
                PoolConfig::new(class, config.pool_size(class)),
                Arc::clone(&registry),
                Arc::clone(&bus),
                Arc::clone(&obs),
            );
            pool_clients.insert(class, pool.client());
            pools.insert(class, pool);
        }

        let ingress = IngressHandle::start(
            Arc::clone(&config),
            Arc::clone(&registry),
            pool_clients.clone(),
            Arc::clone(&bus),
            Arc::clone(&obs),
        );

        obs.log_info(
            "worker started",
            &ResultMetadata::default(),
            json!({ "nats_url": config.nats_url }),
        );

        Ok(Self {
            config,
            obs,
            pools,
            pool_clients,
            ingress,
            health,
            metrics,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn observability(&self) -> Arc<Observability> {
        Arc::clone(&self.obs)
    }

    pub fn health_addr(&self) -> std::net::SocketAddr {
        self.health.addr
    }

    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics.as_ref().map(|server| server.addr)
    }

    /// Sender the external bus client feeds decoded assignments into.
    pub fn assignment_sender(&self) -> mpsc::Sender<ExecAssignment> {
        self.ingress.sender()
    }

    /// Cancel a step by id: broadcast to every pool so queued entries are
    /// removed wherever they live. In-flight handlers are not interrupted.
    pub async fn cancel(&self, step_id: &str) {
        for client in self.pool_clients.values() {
            client.cancel(step_id).await;
        }
    }

    /// Stop ingress first so no new work is admitted, then the pools, then
    /// both endpoint servers.
    pub async fn shutdown(self) {
        self.obs.log_info(
            "worker shutting down",
            &ResultMetadata::default(),
            json!({}),
        );

        self.ingress.shutdown().await;
        for (_, pool) in self.pools {
            pool.shutdown().await;
        }
        if let Some(metrics) = self.metrics {
            metrics.shutdown().await;
        }
        self.health.shutdown().await;

        self.obs.log_info(
            "worker shutdown complete",
            &ResultMetadata::default(),
            json!({}),
        );
    }
}
