//! Block handlers: one typed implementation per step type.
//!
//! A handler is a pure transformation `StepRequest -> StepResult` with an
//! explicit resource class. Handlers populate result metadata from the
//! context and return a factory-built result on every path; no failure
//! leaves a handler as anything other than a `StepResult`.

pub mod fs;
pub mod http;
pub mod human;
pub mod sql;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{BlockContext, ResourceClass, StepRequest, StepResult};

#[async_trait]
pub trait BlockHandler: Send + Sync {
    fn block_type(&self) -> &'static str;

    fn resource_class(&self) -> ResourceClass;

    /// Cheap, idempotent setup with the worker's base context.
    async fn init(&self, _ctx: &BlockContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&self, req: &StepRequest, ctx: &BlockContext) -> StepResult;
}

/// Closed set of handlers registered at startup; the ingress stage uses it
/// to recognize job types.
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn BlockHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(http::HttpHandler::new()));
        registry.register(Arc::new(fs::FsPutHandler));
        registry.register(Arc::new(fs::FsGetHandler));
        registry.register(Arc::new(sql::SqlHandler::new()));
        registry.register(Arc::new(human::HumanApprovalHandler));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn BlockHandler>) {
        self.handlers.insert(handler.block_type(), handler);
    }

    pub fn get(&self, block_type: &str) -> Option<Arc<dyn BlockHandler>> {
        self.handlers.get(block_type).cloned()
    }

    pub fn contains(&self, block_type: &str) -> bool {
        self.handlers.contains_key(block_type)
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<dyn BlockHandler>> {
        self.handlers.values()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Names of required inputs absent from the request.
pub(crate) fn missing_inputs<'a>(req: &StepRequest, required: &[&'a str]) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| !req.inputs.contains_key(**name))
        .copied()
        .collect()
}

pub(crate) fn input_or<'a>(req: &'a StepRequest, key: &str, default: &'a str) -> &'a str {
    req.inputs.get(key).map(String::as_str).unwrap_or(default)
}
