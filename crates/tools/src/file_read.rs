//! File read tool — windowed file reads with path validation.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use ironquill_core::error::{Result, ToolError};
use ironquill_core::tool::{ParamSpec, ParamType, ToolContext, ToolHandler, ToolResult, ToolSpec};

pub struct FileReadTool;

pub fn spec() -> ToolSpec {
    ToolSpec::new(
        "file_read",
        "Read the contents of a file, optionally a line window (offset + limit).",
    )
    .with_param(ParamSpec::new("file_path", "Path of the file to read", ParamType::String).required())
    .with_param(ParamSpec::new(
        "offset",
        "Line number to start from (0-based)",
        ParamType::Integer,
    ))
    .with_param(ParamSpec::new(
        "limit",
        "Maximum number of lines to return",
        ParamType::Integer,
    ))
    .with_keywords(&["read", "file", "content", "show", "view", "cat", "open", "text"])
}

pub fn handler() -> Arc<dyn ToolHandler> {
    Arc::new(FileReadTool)
}

#[async_trait]
impl ToolHandler for FileReadTool {
    async fn run(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult> {
        let file_path = args["file_path"].as_str().unwrap_or_default();
        let offset = args["offset"].as_u64().unwrap_or(0) as usize;
        let limit = args["limit"].as_u64().map(|l| l as usize);

        let path = Path::new(file_path);
        if ctx.sandbox_enabled {
            if let Err(e) = ironquill_security::validate_path(path, &ctx.allowed_paths) {
                return Err(ironquill_core::Error::Tool(ToolError::PermissionDenied {
                    tool: "file_read".into(),
                    reason: e.to_string(),
                }));
            }
        }

        if !path.exists() {
            return Ok(ToolResult::error(format!("File not found: {file_path}")));
        }
        if !path.is_file() {
            return Ok(ToolResult::error(format!("Not a regular file: {file_path}")));
        }
        if let Err(e) =
            ironquill_security::check_file_size(path, ctx.config.security.max_file_size_mb)
        {
            return Ok(ToolResult::error(e.to_string()));
        }

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolResult::error(format!("Failed to read {file_path}: {e}"))),
        };

        let window = limit
            .unwrap_or(ctx.max_output_lines)
            .min(ctx.max_output_lines);
        let lines: Vec<&str> = content.lines().skip(offset).take(window).collect();
        Ok(ToolResult::ok(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironquill_config::AgentConfig;

    fn ctx_for(dir: &Path) -> ToolContext {
        let mut ctx = ToolContext::new(Arc::new(AgentConfig::default()));
        ctx.allowed_paths = vec![dir.to_path_buf()];
        ctx
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "alpha\nbeta\ngamma\n").unwrap();

        let result = FileReadTool
            .run(
                serde_json::json!({"file_path": file.to_str().unwrap()}),
                &ctx_for(dir.path()),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.content, "alpha\nbeta\ngamma");
    }

    #[tokio::test]
    async fn offset_and_limit_window() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lines.txt");
        let body: String = (0..10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(&file, body).unwrap();

        let result = FileReadTool
            .run(
                serde_json::json!({
                    "file_path": file.to_str().unwrap(),
                    "offset": 3,
                    "limit": 2
                }),
                &ctx_for(dir.path()),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "line3\nline4");
    }

    #[tokio::test]
    async fn missing_file_reports_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("nope.txt");

        let result = FileReadTool
            .run(
                serde_json::json!({"file_path": absent.to_str().unwrap()}),
                &ctx_for(dir.path()),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.content.contains("File not found"));
    }

    #[tokio::test]
    async fn sandbox_rejects_outside_path() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("secret.txt");
        std::fs::write(&file, "hidden").unwrap();

        let err = FileReadTool
            .run(
                serde_json::json!({"file_path": file.to_str().unwrap()}),
                &ctx_for(allowed.path()),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ironquill_core::Error::Tool(ToolError::PermissionDenied { .. })
        ));
    }
}
