//! Shell tool — run a command through `sh -c` with policy checks.

use async_trait::async_trait;
use std::sync::Arc;

use ironquill_core::error::{Result, ToolError};
use ironquill_core::tool::{ParamSpec, ParamType, ToolContext, ToolHandler, ToolResult, ToolSpec};

pub struct ShellTool;

pub fn spec() -> ToolSpec {
    ToolSpec::new(
        "shell",
        "Execute a shell command and return its combined stdout/stderr output.",
    )
    .with_param(ParamSpec::new("command", "The command to run", ParamType::String).required())
    .with_param(ParamSpec::new(
        "working_dir",
        "Directory to run in (defaults to the session working directory)",
        ParamType::String,
    ))
    .with_keywords(&[
        "run", "execute", "command", "shell", "terminal", "script", "install", "build", "test",
    ])
}

pub fn handler() -> Arc<dyn ToolHandler> {
    Arc::new(ShellTool)
}

#[async_trait]
impl ToolHandler for ShellTool {
    async fn run(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult> {
        let command = args["command"].as_str().unwrap_or_default();

        if let Err(e) =
            ironquill_security::check_command(command, &ctx.config.security.blocked_commands)
        {
            return Err(ironquill_core::Error::Tool(ToolError::PermissionDenied {
                tool: "shell".into(),
                reason: e.to_string(),
            }));
        }

        let working_dir = args["working_dir"]
            .as_str()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| ctx.working_directory.clone());

        let output = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&working_dir)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => return Ok(ToolResult::error(format!("Failed to spawn command: {e}"))),
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        let lines: Vec<&str> = text.lines().take(ctx.max_output_lines).collect();
        let truncated = lines.join("\n");

        if output.status.success() {
            Ok(ToolResult::ok(truncated))
        } else {
            Ok(ToolResult::error(format!(
                "Command exited with {}: {truncated}",
                output.status
            )))
        }
    }
}
