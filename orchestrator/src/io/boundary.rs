//! Synchronous dispatcher from invocation specs to registered tools.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::core::tooling::{self, ToolError, ToolInvocationSpec, ToolResult};
use crate::io::registry::ToolRegistry;

/// Stateless lookup-and-run over a shared registry.
#[derive(Debug, Clone)]
pub struct ToolBoundary {
    registry: Arc<ToolRegistry>,
}

impl ToolBoundary {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Run the tool registered for the spec's (name, version).
    ///
    /// A missing registration yields a `missing_tool` failure and a panicking
    /// tool yields a `tool_error` failure. Otherwise the tool's result is
    /// returned unchanged.
    #[instrument(skip_all, fields(tool = %spec.tool_name, version = %spec.tool_version, invocation = %spec.invocation_id))]
    pub fn execute(&self, spec: &ToolInvocationSpec) -> ToolResult {
        let Some(tool) = self.registry.get(&spec.tool_name, &spec.tool_version) else {
            warn!("tool not registered");
            return ToolResult::failure(
                spec.invocation_id.as_str(),
                spec.tool_name.as_str(),
                ToolError::new(
                    tooling::MISSING_TOOL,
                    format!("{}@{} is not registered", spec.tool_name, spec.tool_version),
                ),
            );
        };

        match panic::catch_unwind(AssertUnwindSafe(|| {
            tool.run(&spec.invocation_id, &spec.inputs)
        })) {
            Ok(result) => {
                debug!(status = result.status.as_str(), "tool returned");
                result
            }
            Err(_) => {
                warn!("tool panicked");
                ToolResult::failure(
                    spec.invocation_id.as_str(),
                    spec.tool_name.as_str(),
                    ToolError::new(tooling::TOOL_ERROR, "tool panicked during run"),
                )
            }
        }
    }
}
