//! The orchestrator — the turn-bounded agent loop.
//!
//! Drives one user task at a time through a state machine:
//! `Idle → Processing → (ExecutingTool → Processing)* → Responding → Idle`,
//! with `Shutdown` terminal and recommender training running on its own
//! worker. Entry is guarded by a compare-and-set on the state, so a
//! concurrent `process` call fails fast instead of interleaving.
//!
//! Ordering rule the providers depend on: the assistant message that
//! carries tool calls is appended to memory before any tool executes,
//! so every tool result references an already-recorded call.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use chrono::{DateTime, Utc};

use ironquill_config::AgentConfig;
use ironquill_core::error::{Error, Result};
use ironquill_core::event::{AgentEvent, EventBus};
use ironquill_core::id;
use ironquill_core::message::{ImageContent, Message, ToolCall};
use ironquill_core::provider::{LlmRequest, LlmResponse, StopReason};
use ironquill_core::tool::{ToolContext, ToolRegistry};
use ironquill_memory::{extract_keywords, Episode, EpisodeAction, EpisodeOutcome, MemoryManager};
use ironquill_providers::LlmGateway;
use ironquill_tools::ToolExecutor;
use ironquill_trm::{EpisodeBuffer, TrainingCallback, TrmModel, TrmTrainer};

/// Callback receiving streamed response text.
pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// The orchestrator's interactive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AgentState {
    Idle = 0,
    Processing = 1,
    ExecutingTool = 2,
    Training = 3,
    Responding = 4,
    Shutdown = 5,
}

impl AgentState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => AgentState::Processing,
            2 => AgentState::ExecutingTool,
            3 => AgentState::Training,
            4 => AgentState::Responding,
            5 => AgentState::Shutdown,
            _ => AgentState::Idle,
        }
    }
}

/// Per-task tracking accumulated across the turn loop.
struct TaskTracking {
    description: String,
    actions: Vec<EpisodeAction>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    turn: u32,
}

impl TaskTracking {
    fn reset(&mut self, description: &str) {
        self.description = description.to_string();
        self.actions.clear();
        self.started_at = Instant::now();
        self.started_wall = Utc::now();
        self.turn = 0;
    }
}

impl Default for TaskTracking {
    fn default() -> Self {
        Self {
            description: String::new(),
            actions: Vec::new(),
            started_at: Instant::now(),
            started_wall: Utc::now(),
            turn: 0,
        }
    }
}

pub struct Orchestrator {
    config: Arc<AgentConfig>,
    gateway: Arc<LlmGateway>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    memory: Arc<Mutex<MemoryManager>>,
    context: crate::context::ContextManager,
    events: Arc<EventBus>,

    trm: Arc<TrmModel>,
    buffer: Arc<EpisodeBuffer>,
    trainer: TrmTrainer,

    state: AtomicU8,
    shutdown_requested: AtomicBool,
    task: Mutex<TaskTracking>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AgentConfig>,
        gateway: Arc<LlmGateway>,
        registry: Arc<ToolRegistry>,
        executor: Arc<ToolExecutor>,
        memory: Arc<Mutex<MemoryManager>>,
        events: Arc<EventBus>,
    ) -> Self {
        let context =
            crate::context::ContextManager::new(config.context.clone(), Arc::clone(&gateway));
        let trm = Arc::new(TrmModel::new(config.trm.clone()));
        let buffer = Arc::new(EpisodeBuffer::new(&config.trm));
        let trainer = TrmTrainer::new(Arc::clone(&trm), Arc::clone(&buffer), config.trm.clone());

        Self {
            config,
            gateway,
            registry,
            executor,
            memory,
            context,
            events,
            trm,
            buffer,
            trainer,
            state: AtomicU8::new(AgentState::Idle as u8),
            shutdown_requested: AtomicBool::new(false),
            task: Mutex::new(TaskTracking::default()),
        }
    }

    /// Ensure a session exists, seed the training buffer from stored
    /// episodes, and load the recommender model if one is on disk.
    pub fn initialize(&self) -> Result<()> {
        {
            let mut memory = self.memory.lock().unwrap();
            if !memory.has_active_session() {
                memory.start_session(&id::session_id())?;
            }
            let loaded = self.buffer.load_from_memory(memory.episodic());
            debug!(episodes = loaded, "Training buffer seeded");
        }

        let model_path = &self.config.trm.model_path;
        if model_path.exists() {
            match self.trm.load(model_path) {
                Ok(()) => info!(path = %model_path.display(), "Recommender model loaded"),
                Err(e) => warn!(error = %e, "Recommender model load failed, using fallback"),
            }
        }

        self.set_state(AgentState::Idle);
        Ok(())
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn episode_buffer(&self) -> Arc<EpisodeBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn recommender(&self) -> Arc<TrmModel> {
        Arc::clone(&self.trm)
    }

    pub fn training_in_progress(&self) -> bool {
        self.trainer.training_in_progress()
    }

    /// Block until any in-flight training run finishes.
    pub fn wait_for_training(&self) {
        self.trainer.wait_for_completion();
    }

    /// Process one user input to a final response.
    pub async fn process(&self, user_input: &str) -> Result<String> {
        self.run(user_input, None).await
    }

    /// Process with streamed response text.
    pub async fn process_streaming(
        &self,
        user_input: &str,
        on_chunk: StreamCallback,
    ) -> Result<String> {
        self.run(user_input, Some(on_chunk)).await
    }

    async fn run(&self, user_input: &str, stream_cb: Option<StreamCallback>) -> Result<String> {
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("agent is shutting down".into()));
        }
        self.transition(AgentState::Idle, AgentState::Processing)?;

        self.task.lock().unwrap().reset(user_input);

        {
            let mut memory = self.memory.lock().unwrap();
            if let Err(e) = memory.append_message(Message::user(user_input)) {
                self.set_state(AgentState::Idle);
                return Err(e);
            }
            if let Ok(state) = memory.session_state_mut() {
                state.set_current_task(user_input);
            }
        }

        self.events.publish(AgentEvent::Thinking {
            message: "Processing request...".into(),
        });

        let max_turns = self.config.agent.max_turns;
        let mut final_response = String::new();
        let mut complete = false;

        while !complete && self.current_turn() < max_turns {
            self.bump_turn();

            let response = match self.call_llm(stream_cb.as_ref()).await {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "LLM call failed");
                    self.events.publish(AgentEvent::Error {
                        context: "llm".into(),
                        message: e.to_string(),
                    });
                    self.set_state(AgentState::Idle);
                    return Err(e);
                }
            };

            if response.has_tool_calls() {
                self.events.publish(AgentEvent::ToolSelected {
                    tools: response.tool_calls.iter().map(|c| c.name.clone()).collect(),
                });

                // Record the calls before anything executes.
                {
                    let assistant = Message::assistant(&response.content)
                        .with_tool_calls(response.tool_calls.clone());
                    let mut memory = self.memory.lock().unwrap();
                    if let Err(e) = memory.append_message(assistant) {
                        self.set_state(AgentState::Idle);
                        return Err(e);
                    }
                }

                self.set_state(AgentState::ExecutingTool);
                self.execute_tool_calls(&response.tool_calls).await;
                self.set_state(AgentState::Processing);
            } else {
                final_response = response.content.clone();
                complete = true;
            }

            if response.stop_reason == StopReason::EndTurn && response.tool_calls.is_empty() {
                complete = true;
            }
        }

        let turn = self.current_turn();
        if !complete {
            warn!(max_turns, "Turn limit reached, emitting best-effort response");
            if final_response.is_empty() {
                final_response = "I reached the turn limit for this task before finishing. \
                                  Please tell me how you would like to continue."
                    .to_string();
            }
        }

        {
            let mut memory = self.memory.lock().unwrap();
            if let Err(e) = memory.append_message(Message::assistant(&final_response)) {
                warn!(error = %e, "Failed to persist final response");
            }
            if let Ok(state) = memory.session_state_mut() {
                state.complete_task();
            }
        }

        self.set_state(AgentState::Responding);
        self.events.publish(AgentEvent::ResponseReady {
            content: final_response.clone(),
        });

        // A task that never touched a tool leaves no episode behind.
        let (had_actions, all_succeeded) = {
            let task = self.task.lock().unwrap();
            (
                !task.actions.is_empty(),
                task.actions.iter().all(|a| a.success),
            )
        };
        if had_actions {
            let success = complete && all_succeeded;
            let failure_reason = if !complete {
                Some(format!("turn limit of {max_turns} reached"))
            } else if !all_succeeded {
                Some("one or more tool executions failed".into())
            } else {
                None
            };
            self.finalize_episode(success, &final_response, failure_reason);
        }

        self.maybe_start_training();

        if let Err(e) = self.memory.lock().unwrap().save_all() {
            warn!(error = %e, "Failed to save memory state");
        }

        debug!(turn, complete, "Task finished");
        self.set_state(AgentState::Idle);
        Ok(final_response)
    }

    /// One LLM call: compaction check, recommendation injection,
    /// context assembly, gateway invocation.
    async fn call_llm(&self, stream_cb: Option<&StreamCallback>) -> Result<LlmResponse> {
        if let Err(e) = self.context.compact_if_needed(&self.memory).await {
            warn!(error = %e, "Compaction failed, continuing with raw history");
        }

        let task = self.task.lock().unwrap().description.clone();

        let mut system_prompt = self.config.agent.system_prompt.clone();
        if self.config.trm.enabled
            && self.config.agent.use_trm_suggestions
            && self.trm.is_ready()
        {
            system_prompt.push_str(&self.recommendation_section(&task));
        }

        let window = self.context.build_context(
            &self.memory,
            &system_prompt,
            self.registry.definitions(),
            &task,
        )?;

        let request = LlmRequest {
            system_prompt: window.system_prompt,
            messages: window.messages,
            tools: window.tools,
            max_tokens: self.config.llm.max_tokens,
            temperature: self.config.llm.temperature,
            stop_sequences: vec![],
        };

        let response = match stream_cb {
            Some(cb) => {
                let cb = Arc::clone(cb);
                self.gateway.stream(request, move |chunk| cb(chunk)).await?
            }
            None => self.gateway.complete(request).await?,
        };
        Ok(response)
    }

    /// Advisory section naming the recommended tool, injected only when
    /// the recommender is confident. The model remains free to ignore it.
    fn recommendation_section(&self, task: &str) -> String {
        let tools = self.registry.enabled_names();
        let history = {
            let guard = self.task.lock().unwrap();
            guard.actions.clone()
        };

        let Some(prediction) = self.trm.predict(task, &tools, &history) else {
            return String::new();
        };
        if prediction.confidence <= 0.5 {
            return String::new();
        }

        let mut section = format!(
            "\n\n## Tool Recommendation\nBased on similar past tasks, consider using: {} \
             (confidence: {}%)\n",
            prediction.recommended_tool,
            (prediction.confidence * 100.0) as u32
        );

        let alternates: Vec<&str> = prediction
            .ranked_tools
            .iter()
            .skip(1)
            .take(2)
            .map(|(name, _)| name.as_str())
            .collect();
        if !alternates.is_empty() {
            section.push_str(&format!("Alternative tools: {}\n", alternates.join(", ")));
        }

        section
    }

    /// Dispatch a batch of tool calls and append their results in call
    /// order. Tool failures are not fatal: the error text becomes the
    /// tool message content and the model gets a chance to recover.
    async fn execute_tool_calls(&self, calls: &[ToolCall]) {
        for call in calls {
            self.events.publish(AgentEvent::ToolExecuting {
                tool: call.name.clone(),
            });
        }

        let ctx = self.tool_context();
        let results = self.executor.execute_batch(calls, &ctx).await;

        for (call, result) in calls.iter().zip(results) {
            let mut action =
                EpisodeAction::new(&call.name, call.arguments.clone(), &result.content, result.success);
            action.error = result.error.clone();
            action.execution_time_ms = result.execution_time_ms;
            self.task.lock().unwrap().actions.push(action);

            let mut tool_msg = Message::tool_result(&call.id, &result.content);
            if result.is_image {
                if let Ok(payload) =
                    serde_json::from_str::<serde_json::Value>(&result.content)
                {
                    if let (Some(data), Some(media_type)) =
                        (payload["data"].as_str(), payload["media_type"].as_str())
                    {
                        let source = payload["file_path"].as_str().unwrap_or("unknown");
                        tool_msg = Message::tool_result(
                            &call.id,
                            format!("Image loaded from: {source}"),
                        )
                        .with_image(ImageContent {
                            data: data.to_string(),
                            media_type: media_type.to_string(),
                            source_path: Some(source.to_string()),
                        });
                    }
                }
            }

            {
                let mut memory = self.memory.lock().unwrap();
                if let Err(e) = memory.append_message(tool_msg) {
                    warn!(tool = %call.name, error = %e, "Failed to persist tool result");
                }
                if let Ok(state) = memory.session_state_mut() {
                    state.record_tool_execution(&call.name, result.success, result.error.clone());
                }
            }

            if result.success {
                self.events.publish(AgentEvent::ToolCompleted {
                    tool: call.name.clone(),
                    duration_ms: result.execution_time_ms,
                });
            } else {
                self.events.publish(AgentEvent::ToolFailed {
                    tool: call.name.clone(),
                    error: result.error.clone().unwrap_or_else(|| result.content.clone()),
                });
            }
        }
    }

    fn tool_context(&self) -> ToolContext {
        let session_id = {
            let memory = self.memory.lock().unwrap();
            memory.current_session_id().unwrap_or_default().to_string()
        };
        ToolContext::new(Arc::clone(&self.config)).with_session(session_id)
    }

    /// Mark the current task finished: persist the episode, feed the
    /// training buffer, and announce it.
    pub fn complete_task(&self, success: bool, summary: &str) {
        self.finalize_episode(success, summary, None);
        if let Err(e) = self.memory.lock().unwrap().save_all() {
            error!(error = %e, "Failed to save memory after task completion");
        }
    }

    /// Drop the in-flight task, recording it as a failed episode.
    pub fn abort_task(&self) {
        self.finalize_episode(false, "Task aborted by user", Some("aborted".into()));
        if let Ok(state) = self.memory.lock().unwrap().session_state_mut() {
            state.clear_task();
        }
    }

    fn finalize_episode(&self, success: bool, summary: &str, failure_reason: Option<String>) {
        let episode = {
            let mut task = self.task.lock().unwrap();
            if task.description.is_empty() {
                return;
            }
            let description = std::mem::take(&mut task.description);
            let actions = std::mem::take(&mut task.actions);
            let tools_used = actions.len() as u32;

            Episode {
                id: id::episode_id(),
                keywords: extract_keywords(&description),
                task_description: description,
                task_category: String::new(),
                started_at: task.started_wall,
                completed_at: Utc::now(),
                files_involved: Vec::new(),
                actions,
                outcome: EpisodeOutcome {
                    success,
                    turns_taken: task.turn,
                    tools_used,
                    duration_ms: task.started_at.elapsed().as_millis() as u64,
                    summary: summary.chars().take(200).collect(),
                    failure_reason,
                },
                learnings: Vec::new(),
            }
        };

        if let Err(e) = self.memory.lock().unwrap().store_episode(&episode) {
            warn!(error = %e, "Failed to persist episode");
        }
        self.buffer.add(episode.clone());

        info!(
            episode = %episode.id,
            success,
            actions = episode.outcome.tools_used,
            "Episode recorded"
        );
        self.events.publish(AgentEvent::EpisodeComplete {
            episode_id: episode.id,
            success,
        });
    }

    fn maybe_start_training(&self) {
        if !self.config.trm.enabled || !self.config.agent.auto_train {
            return;
        }
        if !self.trainer.should_start_training() {
            return;
        }

        info!(episodes = self.buffer.len(), "Starting recommender training");
        self.set_state(AgentState::Training);
        self.events.publish(AgentEvent::TrainingStarted);

        let events = Arc::clone(&self.events);
        let callback: TrainingCallback = Arc::new(move |progress| {
            if progress.complete {
                events.publish(AgentEvent::TrainingComplete {
                    final_loss: progress.loss,
                });
            } else {
                events.publish(AgentEvent::TrainingProgress {
                    epoch: progress.current_epoch,
                    total_epochs: progress.total_epochs,
                    loss: progress.loss,
                });
            }
        });

        if let Err(e) = self.trainer.start_training_async(callback) {
            warn!(error = %e, "Could not start training");
        }
    }

    /// Kick off a training run regardless of the auto-train setting.
    pub fn trigger_training(&self) -> Result<()> {
        let events = Arc::clone(&self.events);
        self.trainer.start_training_async(Arc::new(move |progress| {
            if progress.complete {
                events.publish(AgentEvent::TrainingComplete {
                    final_loss: progress.loss,
                });
            }
        }))
    }

    /// Refuse new work and stop background training.
    pub fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.trainer.stop_training();
        self.trainer.wait_for_completion();
        self.set_state(AgentState::Shutdown);
        info!("Orchestrator shut down");
    }

    fn transition(&self, from: AgentState, to: AgentState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::InvalidState("agent busy".into()))
    }

    fn set_state(&self, state: AgentState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn current_turn(&self) -> u32 {
        self.task.lock().unwrap().turn
    }

    fn bump_turn(&self) {
        self.task.lock().unwrap().turn += 1;
    }
}
