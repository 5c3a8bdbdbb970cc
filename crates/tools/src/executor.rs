//! Tool executor — bounded-parallelism dispatch over the registry.
//!
//! `execute_batch` runs calls concurrently with at most
//! `max_parallel_tools` in flight and returns results in input order;
//! callers depend on positional alignment with the originating
//! tool-call list. Per-call timeouts bound only the caller's wait; the
//! handler itself is not cancelled.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::warn;

use ironquill_core::error::{Error, Result, ToolError};
use ironquill_core::message::ToolCall;
use ironquill_core::tool::{ToolContext, ToolRegistry, ToolResult};

/// Execution counters, guarded by their own mutex.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub total_time: Duration,
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
    stats: Mutex<ExecutorStats>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_parallel_tools: usize) -> Self {
        Self {
            registry,
            semaphore: Arc::new(Semaphore::new(max_parallel_tools.max(1))),
            stats: Mutex::new(ExecutorStats::default()),
        }
    }

    /// Single synchronous dispatch through the registry.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult> {
        let start = Instant::now();
        let outcome = self
            .registry
            .execute(&call.name, call.arguments.clone(), ctx)
            .await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(mut result) => {
                result.tool_call_id = call.id.clone();
                self.record(result.success, elapsed, false);
                Ok(result)
            }
            Err(e) => {
                self.record(false, elapsed, false);
                Err(e)
            }
        }
    }

    /// Execute a batch of calls with bounded parallelism.
    ///
    /// Results come back in input order regardless of completion order;
    /// registry-level failures are folded into failed `ToolResult`s so
    /// the output length always equals the input length.
    pub async fn execute_batch(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        let mut handles = Vec::with_capacity(calls.len());
        for call in calls {
            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&self.semaphore);
            let call = call.clone();
            let ctx = ctx.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let start = Instant::now();
                let outcome = run_call(&registry, &call, &ctx).await;
                (outcome, start.elapsed())
            }));
        }

        let mut results = Vec::with_capacity(calls.len());
        for (handle, call) in handles.into_iter().zip(calls) {
            let (result, elapsed) = match handle.await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool task failed to join");
                    (
                        failed_result(&call.id, format!("tool task failed: {e}")),
                        Duration::ZERO,
                    )
                }
            };
            self.record(result.success, elapsed, false);
            results.push(result);
        }

        results
    }

    /// Execute one call, bounding how long the caller waits.
    ///
    /// On timeout the handler keeps running in its task; only the wait
    /// is abandoned, and a timeout is recorded.
    pub async fn execute_with_timeout(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        timeout: Duration,
    ) -> Result<ToolResult> {
        let registry = Arc::clone(&self.registry);
        let task_call = call.clone();
        let task_ctx = ctx.clone();

        let start = Instant::now();
        let handle =
            tokio::spawn(async move { run_call(&registry, &task_call, &task_ctx).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => {
                self.record(result.success, start.elapsed(), false);
                Ok(result)
            }
            Ok(Err(e)) => {
                self.record(false, start.elapsed(), false);
                Err(Error::Tool(ToolError::ExecutionFailed {
                    tool: call.name.clone(),
                    reason: e.to_string(),
                }))
            }
            Err(_) => {
                self.record(false, start.elapsed(), true);
                Err(Error::Tool(ToolError::Timeout {
                    tool: call.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }))
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        *self.stats.lock().unwrap()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().unwrap() = ExecutorStats::default();
    }

    fn record(&self, success: bool, elapsed: Duration, timed_out: bool) {
        let mut stats = self.stats.lock().unwrap();
        stats.total += 1;
        if timed_out {
            stats.timeouts += 1;
            stats.failed += 1;
        } else if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        stats.total_time += elapsed;
    }
}

/// Run one call through the registry, folding errors into a failed
/// result carrying the error text.
async fn run_call(registry: &ToolRegistry, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
    match registry.execute(&call.name, call.arguments.clone(), ctx).await {
        Ok(mut result) => {
            result.tool_call_id = call.id.clone();
            result
        }
        Err(e) => failed_result(&call.id, e.to_string()),
    }
}

fn failed_result(call_id: &str, message: String) -> ToolResult {
    let mut result = ToolResult::error(message);
    result.tool_call_id = call_id.into();
    result
}
