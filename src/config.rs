//! Command-line surface and endpoint address derivation.
//!
//! The `--prometheus-endpoint` value is the base `<addr>:<port>`; the
//! health endpoint binds on port+1 and the metrics endpoint on port+2.

use std::net::SocketAddr;

use clap::Parser;

use crate::core::WorkerConfig;
use crate::error::WorkerError;

#[derive(Debug, Parser)]
#[command(name = "beamline-worker", version, about = "Per-node step execution worker")]
pub struct Cli {
    /// CPU pool concurrency.
    #[arg(long, default_value_t = 4)]
    pub cpu_pool_size: usize,

    /// GPU pool concurrency.
    #[arg(long, default_value_t = 1)]
    pub gpu_pool_size: usize,

    /// I/O pool concurrency.
    #[arg(long, default_value_t = 8)]
    pub io_pool_size: usize,

    /// Max memory per tenant (MB).
    #[arg(long, default_value_t = 1024)]
    pub max_memory_mb: i64,

    /// Max CPU time per tenant (ms).
    #[arg(long, default_value_t = 3_600_000)]
    pub max_cpu_time_ms: i64,

    /// Enable sandbox mode.
    #[arg(long)]
    pub sandbox: bool,

    /// NATS server URL.
    #[arg(long, default_value = "nats://localhost:4222")]
    pub nats_url: String,

    /// Base `<addr>:<port>` for observability endpoints
    /// (health = port+1, metrics = port+2).
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub prometheus_endpoint: String,
}

impl From<Cli> for WorkerConfig {
    fn from(cli: Cli) -> Self {
        WorkerConfig {
            cpu_pool_size: cli.cpu_pool_size,
            gpu_pool_size: cli.gpu_pool_size,
            io_pool_size: cli.io_pool_size,
            max_memory_per_tenant_mb: cli.max_memory_mb,
            max_cpu_time_per_tenant_ms: cli.max_cpu_time_ms,
            sandbox_mode: cli.sandbox,
            nats_url: cli.nats_url,
            prometheus_endpoint: cli.prometheus_endpoint,
        }
    }
}

/// Split the base endpoint into the health and metrics bind addresses.
pub fn endpoint_addrs(config: &WorkerConfig) -> Result<(SocketAddr, SocketAddr), WorkerError> {
    let (host, port) = config
        .prometheus_endpoint
        .rsplit_once(':')
        .ok_or_else(|| {
            WorkerError::InvalidConfig(format!(
                "prometheus endpoint must be <addr>:<port>: {}",
                config.prometheus_endpoint
            ))
        })?;
    let base: u16 = port.parse().map_err(|_| {
        WorkerError::InvalidConfig(format!("invalid endpoint port: {port}"))
    })?;

    let parse = |port: u16| -> Result<SocketAddr, WorkerError> {
        format!("{host}:{port}").parse().map_err(|_| {
            WorkerError::InvalidConfig(format!("invalid endpoint address: {host}:{port}"))
        })
    };

    Ok((parse(base + 1)?, parse(base + 2)?))
}
