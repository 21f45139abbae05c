//! The streaming chat loop.
//!
//! One turn is a sequence of model rounds. Each round streams text straight
//! to the caller while tool-call fragments are assembled on the side. When a
//! round ends asking for tools, the first call that can run is executed and
//! the conversation is extended with the call and its result before the next
//! round. A round that ends without a runnable call completes the turn.

use crate::assembler::ToolCallAssembler;
use crate::prompt::SYSTEM_PROMPT;
use blocks_config::AppConfig;
use blocks_core::event::{DomainEvent, EventBus};
use blocks_core::message::{Message, MessageToolCall};
use blocks_core::payload::ToolInput;
use blocks_core::provider::{FinishReason, Provider, ProviderRequest};
use blocks_core::stream::StreamEvent;
use blocks_core::tool::{ToolContext, ToolRegistry, ToolResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 32;

/// The receiving end went away; stop producing.
#[derive(Debug)]
struct Disconnected;

/// How one model round ended.
enum RoundOutcome {
    /// The stream ended without asking for tools
    Finished,
    /// The model asked for tools
    ToolCalls {
        content: String,
        calls: Vec<MessageToolCall>,
    },
    /// Opening or reading the stream failed, or the round timed out
    Failed(String),
}

/// Drives chat turns against a provider and a tool registry.
#[derive(Clone)]
pub struct ChatOrchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    model: String,
    temperature: f32,
    round_timeout: Duration,
    max_rounds: usize,
    events: Option<Arc<EventBus>>,
}

impl ChatOrchestrator {
    pub fn new(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            provider,
            registry,
            model: model.into(),
            temperature: 0.7,
            round_timeout: Duration::from_secs(120),
            max_rounds: 8,
            events: None,
        }
    }

    /// Build from the `model`, `temperature` and `[agent]` settings.
    pub fn from_config(provider: Arc<dyn Provider>, registry: Arc<ToolRegistry>, config: &AppConfig) -> Self {
        Self::new(provider, registry, config.model.clone())
            .with_temperature(config.temperature)
            .with_round_timeout(Duration::from_secs(config.agent.round_timeout_secs))
            .with_max_rounds(config.agent.max_rounds)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Bound the time one model round may spend waiting on the model
    /// (stream open plus every chunk).
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    /// Bound the number of model rounds in one turn.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one turn over `history` (oldest first, system prompt excluded).
    ///
    /// Events arrive on the returned channel; it closes after the terminal
    /// `message_complete` or `error`. Dropping the receiver cancels the turn
    /// immediately, releasing any open model stream or running tool.
    pub fn run(&self, history: Vec<Message>, ctx: ToolContext) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();

        tokio::spawn(async move {
            if this.drive(history, &ctx, &tx).await.is_err() {
                debug!(conversation_id = %ctx.conversation_id, "Event receiver dropped, turn cancelled");
            }
        });

        rx
    }

    async fn drive(
        &self,
        mut history: Vec<Message>,
        ctx: &ToolContext,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), Disconnected> {
        let definitions = self.registry.definitions();

        for round in 1..=self.max_rounds {
            debug!(conversation_id = %ctx.conversation_id, round, "Starting model round");

            let mut messages = Vec::with_capacity(history.len() + 1);
            messages.push(Message::system(SYSTEM_PROMPT));
            messages.extend(history.iter().cloned());

            let mut request = ProviderRequest::new(self.model.clone(), messages);
            request.temperature = self.temperature;
            request.tools = definitions.clone();
            request.stream = true;

            match self.stream_round(request, tx).await? {
                RoundOutcome::Finished => return complete(tx).await,
                RoundOutcome::Failed(message) => {
                    warn!(conversation_id = %ctx.conversation_id, round, error = %message, "Model round failed");
                    return emit(tx, StreamEvent::error(message)).await;
                }
                RoundOutcome::ToolCalls { content, calls } => {
                    let Some((call_id, result)) = self.dispatch(&calls, ctx, tx).await? else {
                        return complete(tx).await;
                    };
                    // Continue with the whole batch announced and the executed call answered
                    history.push(Message::assistant_with_tool_calls(content, calls));
                    history.push(Message::tool_result(call_id, tool_message(&result)));
                }
            }
        }

        warn!(conversation_id = %ctx.conversation_id, max_rounds = self.max_rounds, "Round limit reached");
        emit(
            tx,
            StreamEvent::error(format!("Stopped after {} model rounds without a final answer", self.max_rounds)),
        )
        .await
    }

    /// Stream one model round, forwarding text as it arrives.
    async fn stream_round(
        &self,
        request: ProviderRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<RoundOutcome, Disconnected> {
        let mut remaining = self.round_timeout;

        let mut chunks = match within(&mut remaining, tx, self.provider.stream(request)).await? {
            Some(Ok(rx)) => rx,
            Some(Err(e)) => return Ok(RoundOutcome::Failed(e.to_string())),
            None => return Ok(self.timed_out()),
        };

        let mut content = String::new();
        let mut assembler = ToolCallAssembler::new();

        loop {
            let chunk = match within(&mut remaining, tx, chunks.recv()).await? {
                Some(Some(chunk)) => chunk,
                Some(None) => break,
                None => return Ok(self.timed_out()),
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Ok(RoundOutcome::Failed(e.to_string())),
            };

            if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                content.push_str(&text);
                emit(tx, StreamEvent::ContentDelta { content: text }).await?;
            }
            for delta in chunk.tool_calls {
                assembler.push(delta);
            }
            if chunk.finish_reason == Some(FinishReason::ToolCalls) {
                return Ok(RoundOutcome::ToolCalls {
                    content,
                    calls: assembler.finish(),
                });
            }
        }

        Ok(RoundOutcome::Finished)
    }

    fn timed_out(&self) -> RoundOutcome {
        RoundOutcome::Failed(format!(
            "Model did not respond within {}s",
            self.round_timeout.as_secs()
        ))
    }

    /// Visit the requested calls in order and run the first runnable one.
    ///
    /// Unknown tools and unparseable arguments get a localized error and are
    /// skipped. Calls after the executed one are left alone.
    async fn dispatch(
        &self,
        calls: &[MessageToolCall],
        ctx: &ToolContext,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Option<(String, ToolResult)>, Disconnected> {
        for (position, call) in calls.iter().enumerate() {
            let Some(tool) = self.registry.get(&call.name) else {
                warn!(tool = %call.name, "Model requested an unknown tool");
                emit(tx, StreamEvent::error(format!("Unknown tool: {}", call.name))).await?;
                continue;
            };

            let input = match ToolInput::parse(&call.name, &call.arguments) {
                Ok(input) => input,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool arguments did not parse");
                    emit(tx, StreamEvent::error(format!("Invalid tool arguments for {}", call.name))).await?;
                    continue;
                }
            };

            emit(
                tx,
                StreamEvent::ToolCallStarted {
                    tool: call.name.clone(),
                    input: input.clone(),
                },
            )
            .await?;

            let started = Instant::now();
            let result = unless_closed(tx, tool.execute(input, ctx)).await?;
            let duration_ms = started.elapsed().as_millis() as u64;
            info!(tool = %call.name, success = result.success, duration_ms, "Tool executed");

            if let Some(events) = &self.events {
                events.publish(DomainEvent::ToolExecuted {
                    conversation_id: ctx.conversation_id.clone(),
                    tool_name: call.name.clone(),
                    success: result.success,
                    duration_ms,
                    timestamp: chrono::Utc::now(),
                });
            }

            emit(
                tx,
                StreamEvent::ToolCallResult {
                    tool: call.name.clone(),
                    result: result.clone(),
                },
            )
            .await?;

            let skipped = calls.len() - position - 1;
            if skipped > 0 {
                debug!(skipped, "Later tool calls in this batch are not executed");
            }
            return Ok(Some((call.id.clone(), result)));
        }

        Ok(None)
    }
}

fn tool_message(result: &ToolResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|_| r#"{"success":false}"#.to_string())
}

/// Await `work`, abandoning it as soon as the receiver goes away.
async fn unless_closed<F: Future>(tx: &mpsc::Sender<StreamEvent>, work: F) -> Result<F::Output, Disconnected> {
    tokio::select! {
        output = work => Ok(output),
        _ = tx.closed() => Err(Disconnected),
    }
}

/// Await `work` against what is left of the round's time budget.
///
/// `Ok(None)` means the budget ran out. Only the model's own waits are
/// charged; time spent pushing events to a slow receiver is not.
async fn within<F: Future>(
    remaining: &mut Duration,
    tx: &mpsc::Sender<StreamEvent>,
    work: F,
) -> Result<Option<F::Output>, Disconnected> {
    let started = tokio::time::Instant::now();
    let output = unless_closed(tx, tokio::time::timeout(*remaining, work)).await?;
    *remaining = remaining.saturating_sub(started.elapsed());
    Ok(output.ok())
}

async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), Disconnected> {
    tx.send(event).await.map_err(|_| Disconnected)
}

async fn complete(tx: &mpsc::Sender<StreamEvent>) -> Result<(), Disconnected> {
    emit(
        tx,
        StreamEvent::MessageComplete {
            message_id: uuid::Uuid::new_v4().to_string(),
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blocks_core::error::ProviderError;
    use blocks_core::message::{Role, tool_results_are_anchored};
    use blocks_core::payload::ToolOutput;
    use blocks_core::tool::Tool;
    use blocks_providers::{ScriptedProvider, ScriptedRound, tool_call_chunks};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Returns a fixed result and remembers its inputs.
    struct StubTool {
        name: &'static str,
        result: ToolResult,
        inputs: Mutex<Vec<ToolInput>>,
    }

    impl StubTool {
        fn new(name: &'static str, result: ToolResult) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                inputs: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.inputs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "stub"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, input: ToolInput, _ctx: &ToolContext) -> ToolResult {
            self.inputs.lock().unwrap().push(input);
            self.result.clone()
        }
    }

    /// Never finishes; records when its call is dropped.
    struct HangingTool {
        started: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Tool for HangingTool {
        fn name(&self) -> &str {
            "render"
        }
        fn description(&self) -> &str {
            "hangs"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _input: ToolInput, _ctx: &ToolContext) -> ToolResult {
            let _guard = SetOnDrop(self.dropped.clone());
            self.started.store(true, Ordering::SeqCst);
            std::future::pending::<ToolResult>().await
        }
    }

    async fn eventually(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "local".into(),
            conversation_id: "c1".into(),
        }
    }

    fn orchestrator(provider: Arc<ScriptedProvider>, tools: Vec<Arc<StubTool>>) -> ChatOrchestrator {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        ChatOrchestrator::new(provider, Arc::new(registry), "gpt-4.1")
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn types(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.type_name()).collect()
    }

    fn weather_ok() -> ToolResult {
        ToolResult::ok(ToolOutput::Other(json!({"temp": 3})))
    }

    #[tokio::test]
    async fn text_only_round_completes_once() {
        let provider = Arc::new(ScriptedProvider::new().with_text_round(&["Hel", "lo", "!"]));
        let events = collect(orchestrator(provider.clone(), vec![]).run(vec![Message::user("hi")], ctx())).await;

        assert_eq!(types(&events), vec!["content_delta", "content_delta", "content_delta", "message_complete"]);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentDelta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello!");

        let request = &provider.requests()[0];
        assert!(request.stream);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].content, "hi");
    }

    #[tokio::test]
    async fn tool_call_then_continuation() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_tool_call_round("call_1", "weather", &["{\"city\":", "\"Oslo\"}"])
                .with_text_round(&["It is cold."]),
        );
        let weather = StubTool::new("weather", weather_ok());
        let events = collect(orchestrator(provider.clone(), vec![weather.clone()]).run(vec![Message::user("weather?")], ctx())).await;

        assert_eq!(
            types(&events),
            vec!["tool_call_started", "tool_call_result", "content_delta", "message_complete"]
        );
        assert_eq!(
            events[0],
            StreamEvent::ToolCallStarted {
                tool: "weather".into(),
                input: ToolInput::Other(json!({"city": "Oslo"})),
            }
        );
        assert_eq!(weather.calls(), 1);

        let continuation = &provider.requests()[1].messages;
        assert_eq!(continuation.len(), 4);
        assert_eq!(continuation[2].tool_calls[0].arguments, r#"{"city":"Oslo"}"#);
        assert_eq!(continuation[3].tool_call_id.as_deref(), Some("call_1"));
        let echoed: ToolResult = serde_json::from_str(&continuation[3].content).unwrap();
        assert_eq!(echoed, weather_ok());
        assert!(tool_results_are_anchored(&continuation[1..]));
    }

    #[tokio::test]
    async fn unknown_tool_is_localized() {
        let provider = Arc::new(ScriptedProvider::new().with_tool_call_round("call_1", "teleport", &["{}"]));
        let events = collect(orchestrator(provider, vec![]).run(vec![Message::user("go")], ctx())).await;

        assert_eq!(types(&events), vec!["error", "message_complete"]);
        assert_eq!(events[0], StreamEvent::error("Unknown tool: teleport"));
    }

    #[tokio::test]
    async fn unparseable_arguments_are_localized() {
        let provider = Arc::new(ScriptedProvider::new().with_tool_call_round("call_1", "weather", &["{\"city\":"]));
        let weather = StubTool::new("weather", weather_ok());
        let events = collect(orchestrator(provider, vec![weather.clone()]).run(vec![Message::user("go")], ctx())).await;

        assert_eq!(events[0], StreamEvent::error("Invalid tool arguments for weather"));
        assert_eq!(types(&events).last(), Some(&"message_complete"));
        assert_eq!(weather.calls(), 0);
    }

    #[tokio::test]
    async fn failed_tool_result_is_not_a_stream_error() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_tool_call_round("call_1", "weather", &["{}"])
                .with_text_round(&["Sorry."]),
        );
        let weather = StubTool::new("weather", ToolResult::failure("X"));
        let events = collect(orchestrator(provider, vec![weather]).run(vec![Message::user("go")], ctx())).await;

        assert!(!types(&events).contains(&"error"));
        assert_eq!(
            events[1],
            StreamEvent::ToolCallResult {
                tool: "weather".into(),
                result: ToolResult::failure("X"),
            }
        );
    }

    #[tokio::test]
    async fn first_runnable_call_drives_the_batch() {
        let chunks = tool_call_chunks(&[
            ("call_a", "teleport", &["{}"][..]),
            ("call_b", "weather", &["{\"city\":\"Rome\"}"][..]),
            ("call_c", "weather", &["{\"city\":\"Oslo\"}"][..]),
        ]);
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_round(ScriptedRound::Chunks(chunks))
                .with_text_round(&["Done."]),
        );
        let weather = StubTool::new("weather", weather_ok());
        let events = collect(orchestrator(provider.clone(), vec![weather.clone()]).run(vec![Message::user("go")], ctx())).await;

        assert_eq!(
            types(&events),
            vec!["error", "tool_call_started", "tool_call_result", "content_delta", "message_complete"]
        );
        assert_eq!(weather.calls(), 1);

        let continuation = &provider.requests()[1].messages;
        let announced: Vec<&str> = continuation[2].tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(announced, vec!["call_a", "call_b", "call_c"]);
        assert_eq!(continuation[3].tool_call_id.as_deref(), Some("call_b"));
    }

    #[tokio::test]
    async fn provider_failure_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new().with_failure(ProviderError::Network("connection refused".into())));
        let events = collect(orchestrator(provider, vec![]).run(vec![Message::user("hi")], ctx())).await;

        assert_eq!(events, vec![StreamEvent::error("Network error: connection refused")]);
    }

    #[tokio::test]
    async fn failure_in_continuation_ends_the_turn() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_tool_call_round("call_1", "weather", &["{}"])
                .with_failure(ProviderError::RateLimited { retry_after_secs: 5 }),
        );
        let weather = StubTool::new("weather", weather_ok());
        let events = collect(orchestrator(provider, vec![weather]).run(vec![Message::user("go")], ctx())).await;

        assert_eq!(types(&events), vec!["tool_call_started", "tool_call_result", "error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_round_times_out() {
        let provider = Arc::new(ScriptedProvider::new().with_stall());
        let orchestrator = orchestrator(provider, vec![]).with_round_timeout(Duration::from_secs(5));
        let events = collect(orchestrator.run(vec![Message::user("hi")], ctx())).await;

        assert_eq!(events, vec![StreamEvent::error("Model did not respond within 5s")]);
    }

    #[tokio::test]
    async fn round_limit_is_enforced() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_tool_call_round("call_1", "weather", &["{}"])
                .with_tool_call_round("call_2", "weather", &["{}"]),
        );
        let weather = StubTool::new("weather", weather_ok());
        let orchestrator = orchestrator(provider.clone(), vec![weather.clone()]).with_max_rounds(2);
        let events = collect(orchestrator.run(vec![Message::user("loop")], ctx())).await;

        assert_eq!(types(&events).last(), Some(&"error"));
        assert!(!types(&events).contains(&"message_complete"));
        assert_eq!(weather.calls(), 2);
        assert_eq!(provider.remaining_rounds(), 0);
    }

    #[tokio::test]
    async fn publishes_tool_events() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_tool_call_round("call_1", "weather", &["{}"])
                .with_text_round(&["ok"]),
        );
        let bus = Arc::new(EventBus::default());
        let mut sub = bus.subscribe();
        let orchestrator = orchestrator(provider, vec![StubTool::new("weather", weather_ok())]).with_events(bus);
        collect(orchestrator.run(vec![Message::user("go")], ctx())).await;

        match sub.recv().await.unwrap().as_ref() {
            DomainEvent::ToolExecuted { tool_name, success, conversation_id, .. } => {
                assert_eq!(tool_name, "weather");
                assert_eq!(conversation_id, "c1");
                assert!(*success);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_receiver_releases_model_stream() {
        let provider = Arc::new(ScriptedProvider::new().with_stall());
        let orchestrator = orchestrator(provider.clone(), vec![]).with_round_timeout(Duration::from_secs(3600));
        let rx = orchestrator.run(vec![Message::user("hi")], ctx());

        eventually(|| provider.requests().len() == 1).await;
        assert_eq!(provider.released_stalls(), 0);
        drop(rx);
        eventually(|| provider.released_stalls() == 1).await;
    }

    #[tokio::test]
    async fn dropped_receiver_abandons_running_tool() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_tool_call_round("call_1", "render", &["{}"])
                .with_text_round(&["never sent"]),
        );
        let started = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(HangingTool {
            started: started.clone(),
            dropped: dropped.clone(),
        }));
        let orchestrator = ChatOrchestrator::new(provider.clone(), Arc::new(registry), "gpt-4.1");

        let mut rx = orchestrator.run(vec![Message::user("make a page")], ctx());
        assert_eq!(rx.recv().await.map(|e| e.type_name()), Some("tool_call_started"));
        eventually(|| started.load(Ordering::SeqCst)).await;
        drop(rx);

        eventually(|| dropped.load(Ordering::SeqCst)).await;
        assert_eq!(provider.requests().len(), 1);
        assert_eq!(provider.remaining_rounds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_receiver_does_not_use_up_the_round_budget() {
        let fragments: Vec<String> = (0..40).map(|i| format!("{i} ")).collect();
        let fragments: Vec<&str> = fragments.iter().map(String::as_str).collect();
        let provider = Arc::new(ScriptedProvider::new().with_text_round(&fragments));
        let orchestrator = orchestrator(provider, vec![]).with_round_timeout(Duration::from_secs(5));

        let rx = orchestrator.run(vec![Message::user("count")], ctx());
        // Long enough for the event buffer to fill and the round to wait on us
        tokio::time::sleep(Duration::from_secs(10)).await;
        let events = collect(rx).await;

        assert_eq!(events.len(), 41);
        assert!(!types(&events).contains(&"error"));
        assert_eq!(types(&events).last(), Some(&"message_complete"));
    }
}
