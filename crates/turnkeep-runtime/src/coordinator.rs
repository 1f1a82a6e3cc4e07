//! L8 Agent Run Coordinator — the turn loop and run-level state machine
//! (§4.8): build messages, stream a response, flush pre-tool content,
//! dispatch tools, decide whether to continue, and handle cancellation at
//! its three defined points.

use crate::broadcast::{BroadcastBus, DeltaEvent};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use turnkeep_core::{ContentBlock, Error, EventPayload, Result, RunId, SessionId};
use turnkeep_llm::{ProviderType, RawTokenUsage, StopReason, StreamConfig, StreamDelta};
use turnkeep_store::{DagNavigator, EventLog, SessionRegistry};
use turnkeep_tools::ToolRegistry;
use turnkeep_turn::{EventLinearizer, TokenTracker, ToolIntent, TurnContentTracker};

/// What `run` returns once a run either completes, is interrupted, or is
/// queued behind an in-flight run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { turns: u32 },
    Cancelled,
    Queued,
}

/// Identity threaded through one invocation: a fresh `runId` per call, plus
/// the parent run and nesting depth for subagent dispatch (§4.8 "Run
/// identifier"). Carried through tracing spans and delta notifications
/// rather than denormalized onto every stored event payload — reconstruction
/// and sanitization are run-agnostic, so widening those payloads would not
/// change any persisted semantics (see DESIGN.md).
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub parent_run_id: Option<RunId>,
    pub depth: u32,
    /// If a run is already active for this session, queue this prompt in the
    /// single pending-prompt slot instead of rejecting with `Busy`.
    pub queue_if_busy: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct CoordinatorConfig {
    pub provider_type: ProviderType,
    pub max_provider_retries: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { provider_type: ProviderType::Incremental, max_provider_retries: 3 }
    }
}

struct SessionRunState {
    running: bool,
    cancel: Option<CancellationToken>,
    pending_prompt: Option<Vec<ContentBlock>>,
    last_turn: u32,
}

impl Default for SessionRunState {
    fn default() -> Self {
        Self { running: false, cancel: None, pending_prompt: None, last_turn: 0 }
    }
}

pub struct AgentRunCoordinator {
    log: Arc<EventLog>,
    registry: Arc<SessionRegistry>,
    linearizer: Arc<EventLinearizer>,
    provider: Arc<dyn turnkeep_llm::Provider>,
    tools: Arc<ToolRegistry>,
    bus: Arc<BroadcastBus>,
    config: CoordinatorConfig,
    state: parking_lot::Mutex<HashMap<SessionId, SessionRunState>>,
}

impl AgentRunCoordinator {
    pub fn new(
        log: Arc<EventLog>,
        registry: Arc<SessionRegistry>,
        linearizer: Arc<EventLinearizer>,
        provider: Arc<dyn turnkeep_llm::Provider>,
        tools: Arc<ToolRegistry>,
        bus: Arc<BroadcastBus>,
        config: CoordinatorConfig,
    ) -> Self {
        Self { log, registry, linearizer, provider, tools, bus, config, state: parking_lot::Mutex::new(HashMap::new()) }
    }

    /// Append one event through the linearizer and fan it out on the
    /// persisted-event channel once the write has committed — the bus
    /// notification always lands strictly after commit (§4.10).
    async fn append(&self, session_id: &SessionId, payload: EventPayload) -> Result<turnkeep_core::Event> {
        let bus = self.bus.clone();
        self.linearizer
            .append_linearized(session_id, payload, |event| async move { bus.publish_persisted(event).await })
            .await
    }

    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.state.lock().get(session_id).map(|s| s.running).unwrap_or(false)
    }

    /// Request cancellation of the session's active run, if any. A no-op if
    /// the session is idle.
    pub fn cancel(&self, session_id: &SessionId) {
        if let Some(state) = self.state.lock().get(session_id) {
            if let Some(cancel) = &state.cancel {
                cancel.cancel();
            }
        }
    }

    pub async fn run(&self, session_id: &SessionId, user_content: Vec<ContentBlock>) -> Result<RunOutcome> {
        self.run_with(session_id, user_content, RunOptions::default()).await
    }

    /// Start a run for `session_id` with the given user content. Rejects
    /// with `Busy` if a run is already active, unless `opts.queue_if_busy`
    /// is set, in which case the prompt occupies the one pending-prompt slot
    /// and is started automatically once the active run ends (§4.8
    /// "at-most-one run per session").
    pub async fn run_with(&self, session_id: &SessionId, user_content: Vec<ContentBlock>, opts: RunOptions) -> Result<RunOutcome> {
        let cancel = CancellationToken::new();
        {
            let mut guard = self.state.lock();
            let entry = guard.entry(session_id.clone()).or_default();
            if entry.running {
                if opts.queue_if_busy {
                    entry.pending_prompt = Some(user_content);
                    return Ok(RunOutcome::Queued);
                }
                return Err(Error::Busy(session_id.clone()));
            }
            entry.running = true;
            entry.cancel = Some(cancel.clone());
        }

        let mut outcome = self.run_one(session_id, user_content, &opts, cancel.clone()).await;

        loop {
            let queued = {
                let mut guard = self.state.lock();
                let entry = guard.entry(session_id.clone()).or_default();
                if matches!(outcome, Ok(RunOutcome::Completed { .. })) {
                    entry.pending_prompt.take()
                } else {
                    None
                }
            };
            let Some(prompt) = queued else { break };
            outcome = self.run_one(session_id, prompt, &opts, cancel.clone()).await;
        }

        {
            let mut guard = self.state.lock();
            let entry = guard.entry(session_id.clone()).or_default();
            entry.running = false;
            entry.cancel = None;
        }

        outcome
    }

    async fn run_one(&self, session_id: &SessionId, user_content: Vec<ContentBlock>, opts: &RunOptions, cancel: CancellationToken) -> Result<RunOutcome> {
        let run_id = RunId::generate();
        let session = self.registry.get(session_id)?;

        self.append(session_id, EventPayload::MessageUser { content: user_content }).await?;

        let mut tracker = TurnContentTracker::new();
        tracker.on_agent_start();
        let mut token_tracker = TokenTracker::new(self.config.provider_type);

        let span = tracing::info_span!("agent_run", %run_id, %session_id, depth = opts.depth);
        let _enter = span.enter();

        self.turn_loop(&session.id, &session.current_model, run_id, cancel, &mut tracker, &mut token_tracker).await
    }

    async fn turn_loop(
        &self,
        session_id: &SessionId,
        model: &str,
        run_id: RunId,
        cancel: CancellationToken,
        tracker: &mut TurnContentTracker,
        token_tracker: &mut TokenTracker,
    ) -> Result<RunOutcome> {
        let mut turn = {
            let mut guard = self.state.lock();
            let entry = guard.entry(session_id.clone()).or_default();
            entry.last_turn + 1
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            tracker.on_turn_start(turn, Utc::now());
            self.append(session_id, EventPayload::StreamTurnStart { turn }).await?;
            self.bus.publish_delta(DeltaEvent::TurnStart { session_id: session_id.clone(), turn });

            let head = self.registry.get(session_id)?.head_event_id;
            let nav = DagNavigator::new(&self.log);
            let reconstructed = turnkeep_reconstruct::messages_at(&nav, &head).await?;
            let (messages, _fixes) = turnkeep_reconstruct::sanitize(reconstructed.messages);

            let config = StreamConfig { model: model.to_string(), tools: self.tools.get_schemas(), ..Default::default() };

            let mut retry_count = 0u32;
            let stop_reason = 'attempt: loop {
                let stream = self.provider.stream(messages.clone(), config.clone(), cancel.clone()).await?;
                match self.drive_stream(session_id, run_id, stream, cancel.clone(), tracker, token_tracker).await? {
                    DriveOutcome::Complete(stop_reason) => break 'attempt stop_reason,
                    DriveOutcome::Cancelled => return self.handle_interrupt(session_id, turn, tracker, token_tracker).await,
                    DriveOutcome::Retry { retryable, retry_after_ms } => {
                        if retryable && retry_count < self.config.max_provider_retries {
                            retry_count += 1;
                            if let Some(ms) = retry_after_ms {
                                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                            }
                            tracker.discard_turn_attempt();
                            continue 'attempt;
                        }
                        self.finish_turn_number(session_id, turn);
                        return Err(Error::ProviderFatal("provider stream exhausted retries".into()));
                    }
                }
            };

            if stop_reason.continues_turn_loop() {
                if let Some(interrupted) = self.run_tools(session_id, turn, cancel.clone(), tracker, token_tracker).await? {
                    let _ = interrupted;
                    return self.handle_interrupt(session_id, turn, tracker, token_tracker).await;
                }

                self.append(session_id, EventPayload::StreamTurnEnd { turn, interrupted: false }).await?;
                self.bus.publish_delta(DeltaEvent::TurnEnd { session_id: session_id.clone(), turn });
                self.finish_turn_number(session_id, turn);
                turn += 1;
                continue;
            }

            if !tracker.pre_tool_content_flushed() {
                if let Some(blocks) = tracker.on_turn_end() {
                    let usage = token_tracker.last_normalized();
                    self.append(session_id, EventPayload::MessageAssistant { content: blocks, turn: Some(turn), interrupted: false, usage }).await?;
                }
            }
            self.append(session_id, EventPayload::StreamTurnEnd { turn, interrupted: false }).await?;
            self.bus.publish_delta(DeltaEvent::TurnEnd { session_id: session_id.clone(), turn });
            self.finish_turn_number(session_id, turn);
            return Ok(RunOutcome::Completed { turns: turn });
        }
    }

    fn finish_turn_number(&self, session_id: &SessionId, turn: u32) {
        let mut guard = self.state.lock();
        let entry = guard.entry(session_id.clone()).or_default();
        entry.last_turn = turn;
    }

    /// Consume one provider stream to completion, cancellation, or a
    /// provider error — cancellation point (a) lives in the `select!` below.
    async fn drive_stream(
        &self,
        session_id: &SessionId,
        _run_id: RunId,
        stream: turnkeep_llm::DeltaStream,
        cancel: CancellationToken,
        tracker: &mut TurnContentTracker,
        token_tracker: &mut TokenTracker,
    ) -> Result<DriveOutcome> {
        use futures::StreamExt;
        tokio::pin!(stream);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(DriveOutcome::Cancelled),
                next = stream.next() => {
                    match next {
                        None => return Ok(DriveOutcome::Complete(StopReason::EndTurn)),
                        Some(Err(e)) => return Err(e),
                        Some(Ok(delta)) => match delta {
                            StreamDelta::TextDelta { text } => {
                                tracker.add_text_delta(&text);
                                self.bus.publish_delta(DeltaEvent::TextDelta { session_id: session_id.clone(), text });
                            }
                            StreamDelta::ThinkingDelta { text } => {
                                tracker.add_thinking_delta(&text);
                                self.bus.publish_delta(DeltaEvent::ThinkingDelta { session_id: session_id.clone(), text });
                            }
                            StreamDelta::ThinkingEnd { signature } => {
                                if let Some(sig) = signature {
                                    tracker.set_thinking_signature(sig);
                                }
                            }
                            StreamDelta::ToolUseBatch { calls } => {
                                for call in &calls {
                                    self.bus.publish_delta(DeltaEvent::ToolStart {
                                        session_id: session_id.clone(),
                                        id: call.id.clone(),
                                        name: call.name.clone(),
                                    });
                                }
                                let intents = calls.into_iter().map(|c| ToolIntent { id: c.id, name: c.name, args: c.args }).collect();
                                tracker.register_tool_intents(intents);
                            }
                            StreamDelta::ToolArgumentDelta { .. } => {
                                // Providers that stream partial tool args incrementally
                                // instead of batch-announcing are not exercised by the
                                // scripted mock; accumulation would land here once a
                                // wire adapter needs it.
                            }
                            StreamDelta::ResponseComplete { token_usage, stop_reason } => {
                                self.record_usage(session_id, token_tracker, token_usage);
                                return Ok(DriveOutcome::Complete(stop_reason));
                            }
                            StreamDelta::ProviderError { retryable, retry_after_ms, message } => {
                                self.append(session_id, EventPayload::ErrorProvider { message, retryable }).await?;
                                return Ok(DriveOutcome::Retry { retryable, retry_after_ms });
                            }
                        },
                    }
                }
            }
        }
    }

    fn record_usage(&self, _session_id: &SessionId, token_tracker: &mut TokenTracker, usage: RawTokenUsage) {
        token_tracker.record(usage);
    }

    /// Flush pre-tool content, append `tool.call` events in registration
    /// order, dispatch concurrently, and append `tool.result` events back in
    /// that same order. Returns `Some(())` if cancellation was observed
    /// before every dispatched tool finished (cancellation points (b) and
    /// during execution), in which case the caller must route to the
    /// interrupt path instead of continuing the turn loop.
    async fn run_tools(
        &self,
        session_id: &SessionId,
        turn: u32,
        cancel: CancellationToken,
        tracker: &mut TurnContentTracker,
        token_tracker: &TokenTracker,
    ) -> Result<Option<()>> {
        if let Some(blocks) = tracker.flush_pre_tool_content() {
            let usage = token_tracker.last_normalized();
            self.append(session_id, EventPayload::MessageAssistant { content: blocks, turn: Some(turn), interrupted: false, usage }).await?;
        }

        if cancel.is_cancelled() {
            return Ok(Some(()));
        }

        let pending_ids = tracker.pending_tool_ids();
        let mut dispatched = Vec::with_capacity(pending_ids.len());
        for id in &pending_ids {
            let tc = tracker.tool_call(id).expect("just registered").clone();
            self.append(session_id, EventPayload::ToolCall { tool_call_id: tc.id.clone(), name: tc.name.clone(), arguments: tc.arguments.clone() }).await?;
            tracker.start_tool_call(&tc.id, &tc.name, tc.arguments.clone(), Utc::now());
            dispatched.push(tc);
        }

        let mut handles = Vec::with_capacity(dispatched.len());
        for tc in &dispatched {
            let tools = self.tools.clone();
            let cancel = cancel.clone();
            let name = tc.name.clone();
            let args: Value = tc.arguments.clone();
            handles.push(tokio::spawn(async move { tools.execute_cancellable(&name, args, cancel).await }));
        }

        let mut was_cancelled = false;
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            if was_cancelled {
                handle.abort();
                continue;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    was_cancelled = true;
                    handle.abort();
                }
                res = handle => {
                    let result = res.unwrap_or_else(|_| turnkeep_tools::ToolResult::error("tool task panicked"));
                    results.push(result);
                }
            }
        }

        for (tc, result) in dispatched.iter().zip(results.iter()) {
            let is_error = result.is_error();
            let content = result.to_content_string();
            tracker.end_tool_call(&tc.id, content.clone(), is_error, Utc::now());
            self.bus.publish_delta(DeltaEvent::ToolEnd { session_id: session_id.clone(), id: tc.id.clone() });
            self.append(session_id, EventPayload::ToolResult { tool_call_id: tc.id.clone(), content, is_error }).await?;
        }

        if was_cancelled {
            Ok(Some(()))
        } else {
            Ok(None)
        }
    }

    /// Interrupt recovery (§4.8 "cancellation"): capture whatever the
    /// accumulated view holds, append a final `message.assistant` if nothing
    /// was flushed yet this turn, synthesize `tool.result` blocks for any
    /// tool call that started but never finished, and close the turn.
    async fn handle_interrupt(
        &self,
        session_id: &SessionId,
        turn: u32,
        tracker: &mut TurnContentTracker,
        token_tracker: &TokenTracker,
    ) -> Result<RunOutcome> {
        let interrupted = tracker.build_interrupted_content();

        if !tracker.pre_tool_content_flushed() && !interrupted.assistant_blocks.is_empty() {
            let usage = token_tracker.last_normalized();
            self.append(session_id, EventPayload::MessageAssistant { content: interrupted.assistant_blocks, turn: Some(turn), interrupted: true, usage }).await?;
        }

        for block in interrupted.tool_results {
            if let ContentBlock::ToolResult { tool_call_id, content, is_error } = block {
                self.append(session_id, EventPayload::ToolResult { tool_call_id, content, is_error }).await?;
            }
        }

        self.append(session_id, EventPayload::StreamTurnEnd { turn, interrupted: true }).await?;
        self.bus.publish_delta(DeltaEvent::TurnEnd { session_id: session_id.clone(), turn });
        self.finish_turn_number(session_id, turn);
        Ok(RunOutcome::Cancelled)
    }
}

enum DriveOutcome {
    Complete(StopReason),
    Cancelled,
    Retry { retryable: bool, retry_after_ms: Option<u64> },
}
