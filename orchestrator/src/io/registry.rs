//! Tool capability trait and the explicit registry that resolves it.
//!
//! A [`ToolRegistry`] is built once at process start and handed to the
//! [`crate::io::boundary::ToolBoundary`]. There is no global registration, so
//! tests and concurrent runs can each hold their own registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::debug;

use crate::core::tooling::{InvocationInput, ToolResult};
use crate::io::tools::HeuristicStructureTool;

/// An executable capability registered under a (name, version) pair.
///
/// Implementations report every failure through the returned [`ToolResult`].
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn run(&self, invocation_id: &str, inputs: &[InvocationInput]) -> ToolResult;
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<(String, String), Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.keys())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in heuristic structure tool.
    pub fn with_builtin_tools() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(HeuristicStructureTool))?;
        Ok(registry)
    }

    /// Register a capability. Registering the same (name, version) twice is an error.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let key = (tool.name().to_string(), tool.version().to_string());
        if self.tools.contains_key(&key) {
            bail!("tool {}@{} already registered", key.0, key.1);
        }
        debug!(tool = %key.0, version = %key.1, "registered tool");
        self.tools.insert(key, tool);
        Ok(())
    }

    pub fn get(&self, name: &str, version: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .get(&(name.to_string(), version.to_string()))
            .cloned()
    }

    /// Registered (name, version) pairs in sorted order.
    pub fn keys(&self) -> Vec<(String, String)> {
        self.tools.keys().cloned().collect()
    }
}
