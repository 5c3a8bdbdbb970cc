//! File write tool — create or overwrite a file inside the sandbox.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use ironquill_core::error::{Result, ToolError};
use ironquill_core::tool::{ParamSpec, ParamType, ToolContext, ToolHandler, ToolResult, ToolSpec};

pub struct FileWriteTool;

pub fn spec() -> ToolSpec {
    let mut spec = ToolSpec::new(
        "file_write",
        "Write content to a file, creating parent directories as needed. Overwrites existing files.",
    )
    .with_param(
        ParamSpec::new("file_path", "Path of the file to write", ParamType::String).required(),
    )
    .with_param(ParamSpec::new("content", "Content to write", ParamType::String).required())
    .with_keywords(&["write", "create", "save", "new", "file", "output", "generate"]);
    spec.requires_confirmation = true;
    spec
}

pub fn handler() -> Arc<dyn ToolHandler> {
    Arc::new(FileWriteTool)
}

#[async_trait]
impl ToolHandler for FileWriteTool {
    async fn run(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult> {
        let file_path = args["file_path"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();

        let path = Path::new(file_path);
        if ctx.sandbox_enabled {
            if let Err(e) = ironquill_security::validate_path(path, &ctx.allowed_paths) {
                return Err(ironquill_core::Error::Tool(ToolError::PermissionDenied {
                    tool: "file_write".into(),
                    reason: e.to_string(),
                }));
            }
        }

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!(
                    "Failed to create directory {}: {e}",
                    parent.display()
                )));
            }
        }

        match tokio::fs::write(path, content).await {
            Ok(()) => Ok(ToolResult::ok(format!(
                "Wrote {} bytes to {file_path}",
                content.len()
            ))),
            Err(e) => Ok(ToolResult::error(format!("Failed to write {file_path}: {e}"))),
        }
    }
}
