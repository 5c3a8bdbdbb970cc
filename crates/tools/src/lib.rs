//! # ironquill tools
//!
//! The bounded-parallel [`ToolExecutor`] plus the builtin tool set:
//! file read/write, shell, web fetch, and durable-memory store/recall.
//! Builtins are registered through [`register_builtins`], which applies
//! per-tool configuration overrides (enabled, timeout, confirmation).

pub mod executor;
pub mod file_read;
pub mod file_write;
pub mod memory_tools;
pub mod shell;
pub mod web_fetch;

use std::sync::{Arc, Mutex};
use tracing::debug;

use ironquill_config::AgentConfig;
use ironquill_core::error::Result;
use ironquill_core::tool::{ToolHandler, ToolRegistry, ToolSpec};
use ironquill_memory::MemoryManager;

pub use executor::{ExecutorStats, ToolExecutor};

/// Register every builtin tool, honoring the per-tool config overrides.
pub fn register_builtins(
    registry: &ToolRegistry,
    config: &AgentConfig,
    memory: Arc<Mutex<MemoryManager>>,
) -> Result<()> {
    let builtins: Vec<(ToolSpec, Arc<dyn ToolHandler>)> = vec![
        (file_read::spec(), file_read::handler()),
        (file_write::spec(), file_write::handler()),
        (shell::spec(), shell::handler()),
        (web_fetch::spec(), web_fetch::handler()),
        (
            memory_tools::store_spec(),
            memory_tools::store_handler(Arc::clone(&memory)),
        ),
        (
            memory_tools::recall_spec(),
            memory_tools::recall_handler(memory),
        ),
    ];

    for (mut spec, handler) in builtins {
        let mut enabled = true;
        if let Some(overrides) = config.tools.builtin.get(&spec.name) {
            enabled = overrides.enabled;
            spec.timeout_ms = overrides.timeout_ms;
            if overrides.require_confirm {
                spec.requires_confirmation = true;
            }
        }

        let name = spec.name.clone();
        registry.register(spec, handler, "builtin")?;
        if !enabled {
            registry.disable(&name)?;
        }
        debug!(tool = %name, enabled, "Registered builtin tool");
    }

    Ok(())
}
