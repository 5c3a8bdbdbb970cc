//! Security policy for tool execution.
//!
//! Filesystem sandboxing (paths must resolve inside allowed roots),
//! shell command blocking, and file size limits. Tool handlers call
//! these checks before touching the filesystem or spawning processes.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    #[error("Path '{0}' is outside the allowed roots")]
    PathNotAllowed(String),

    #[error("Path traversal detected in '{0}'")]
    PathTraversal(String),

    #[error("Failed to resolve path '{path}': {reason}")]
    ResolveFailed { path: String, reason: String },

    #[error("Command blocked by policy: matches '{0}'")]
    BlockedCommand(String),

    #[error("File too large: {size} bytes exceeds {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },
}

/// Validate that a path is safe to access.
///
/// The raw string is rejected on `..` traversal, then the path is
/// canonicalized (the parent, for not-yet-existing files) and checked
/// against the allowed roots. An empty root list allows everything.
/// Returns the resolved path on success.
pub fn validate_path(path: &Path, allowed_roots: &[PathBuf]) -> Result<PathBuf, SecurityError> {
    let raw = path.to_string_lossy();
    if raw.split('/').any(|part| part == "..") {
        return Err(SecurityError::PathTraversal(raw.into_owned()));
    }

    let resolved = resolve(path)?;

    if allowed_roots.is_empty() {
        return Ok(resolved);
    }

    for root in allowed_roots {
        let root = resolve(root).unwrap_or_else(|_| root.clone());
        if resolved.starts_with(&root) {
            return Ok(resolved);
        }
    }

    Err(SecurityError::PathNotAllowed(
        resolved.to_string_lossy().into_owned(),
    ))
}

fn resolve(path: &Path) -> Result<PathBuf, SecurityError> {
    if path.exists() {
        return path
            .canonicalize()
            .map_err(|e| SecurityError::ResolveFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            });
    }

    // File may not exist yet (writes): canonicalize the parent instead.
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        if parent.exists() {
            let canonical_parent =
                parent
                    .canonicalize()
                    .map_err(|e| SecurityError::ResolveFailed {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
            let file_name = path.file_name().unwrap_or_default();
            return Ok(canonical_parent.join(file_name));
        }
    }

    Ok(path.to_path_buf())
}

/// Reject commands containing any blocked pattern (case-insensitive
/// substring match, per-pattern).
pub fn check_command(command: &str, blocked: &[String]) -> Result<(), SecurityError> {
    let lowered = command.to_lowercase();
    for pattern in blocked {
        if lowered.contains(&pattern.to_lowercase()) {
            return Err(SecurityError::BlockedCommand(pattern.clone()));
        }
    }
    Ok(())
}

/// Reject files larger than the configured limit (in megabytes).
pub fn check_file_size(path: &Path, max_mb: u64) -> Result<(), SecurityError> {
    let max = max_mb * 1024 * 1024;
    if let Ok(metadata) = std::fs::metadata(path) {
        let size = metadata.len();
        if size > max {
            return Err(SecurityError::FileTooLarge { size, max });
        }
    }
    Ok(())
}
