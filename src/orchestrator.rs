//! Orchestrator
//!
//! Owns the operating mode and drives one batch at a time through either
//! the suggestion path or the autonomous path:
//!
//! 1. **Suggestion**: ask the generator for reply suggestions and surface
//!    them. Never acts on the conversation.
//! 2. **Autonomous**: safety pre-check, cancellable thinking delay,
//!    generator decision, then escalate / complete / wait / respond.
//!
//! Every failure in the autonomous path escalates back to suggestion mode
//! with a human-visible reason. An emergency stop always wins: it cancels
//! whatever is in flight, clears the session and forces suggestion mode.

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{ControlBus, ControlEvent, Origin};
use crate::error::{AdapterError, AutopilotError, ConfigurationError, GeneratorError, PersistenceError};
use crate::executor::{ExecutorConfig, ResponseExecutor};
use crate::generator::{
    with_deadline, AgentAction, AutonomousDecision, AutonomousRequest, ResponseGenerator,
    SuggestRequest, UserPreferences,
};
use crate::goals::GoalTracker;
use crate::model::{now_millis, ConstraintsPatch, GoalSpec, Message, Mode, Role, SafetyConstraints};
use crate::platform::PlatformAdapter;
use crate::safety::{SafetyMonitor, SafetyStatus};
use crate::store::{ActionRecord, ConversationLog, Feedback, LogPage, LogQuery, Outcome, SessionStore};
use crate::watcher::{self, WatchHandle, WatcherConfig};

/// Messages sent with a suggestion request
pub const SUGGESTION_WINDOW: usize = 10;

// ============ Configuration ============

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Platform label sent to the generator
    pub platform: String,
    /// Hard deadline on every generator call
    pub generator_timeout: Duration,
    pub thinking_min: Duration,
    pub thinking_max: Duration,
    pub suggestion_window: usize,
    pub preferences: Option<UserPreferences>,
    pub watcher: WatcherConfig,
    pub executor: ExecutorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            platform: "generic".to_string(),
            generator_timeout: Duration::from_secs(10),
            thinking_min: Duration::from_millis(2000),
            thinking_max: Duration::from_millis(3000),
            suggestion_window: SUGGESTION_WINDOW,
            preferences: None,
            watcher: WatcherConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Snapshot for display
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub mode: Mode,
    pub conversation_id: Option<String>,
    pub goal: Option<String>,
    pub progress: u8,
    pub progress_summary: String,
    pub safety: Option<SafetyStatus>,
}

// ============ Orchestrator ============

struct ModeControl {
    mode: Mode,
    /// Replaced on every entry into autonomous mode, cancelled on exit
    turn_token: CancellationToken,
}

struct Inner {
    adapter: Arc<dyn PlatformAdapter>,
    generator: Arc<dyn ResponseGenerator>,
    store: Arc<dyn SessionStore>,
    executor: ResponseExecutor,
    bus: ControlBus,
    config: OrchestratorConfig,
    tracker: Mutex<GoalTracker>,
    safety: Mutex<SafetyMonitor>,
    control: Mutex<ModeControl>,
    actions: Mutex<Vec<ActionRecord>>,
    last_context: Mutex<Vec<Message>>,
    /// Text of the last autonomous reply, to recognize its echo
    last_sent: Mutex<Option<String>>,
    /// Request id of the last surfaced suggestions
    last_request_id: Mutex<Option<String>>,
    /// Serializes batch processing
    batch_lock: tokio::sync::Mutex<()>,
}

/// Mode owner and batch driver. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build an orchestrator, restoring any persisted session and mode
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        generator: Arc<dyn ResponseGenerator>,
        store: Arc<dyn SessionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        let mut tracker = GoalTracker::new(store.clone());
        let restored = tracker.restore();
        let safety = SafetyMonitor::new(tracker.constraints().cloned().unwrap_or_default());

        let mode = match store.get_mode() {
            Ok(Mode::Autonomous) if restored => Mode::Autonomous,
            Ok(_) => Mode::Suggestion,
            Err(e) => {
                warn!("Failed to load persisted mode: {}", e);
                Mode::Suggestion
            }
        };
        info!("Orchestrator ready in {} mode", mode.as_str());

        let executor = ResponseExecutor::new(adapter.clone(), config.executor.clone());

        Self {
            inner: Arc::new(Inner {
                adapter,
                generator,
                store,
                executor,
                bus: ControlBus::new(),
                config,
                tracker: Mutex::new(tracker),
                safety: Mutex::new(safety),
                control: Mutex::new(ModeControl {
                    mode,
                    turn_token: CancellationToken::new(),
                }),
                actions: Mutex::new(vec![]),
                last_context: Mutex::new(vec![]),
                last_sent: Mutex::new(None),
                last_request_id: Mutex::new(None),
                batch_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn bus(&self) -> ControlBus {
        self.inner.bus.clone()
    }

    pub fn mode(&self) -> Mode {
        self.inner.control.lock().mode
    }

    pub fn set_preview_delay(&self, delay: Duration) {
        self.inner.executor.set_preview_delay(delay);
    }

    pub fn preview_delay(&self) -> Duration {
        self.inner.executor.get_preview_delay()
    }

    pub fn conversation_logs(&self, query: &LogQuery) -> Result<LogPage, PersistenceError> {
        self.inner.store.list_conversation_logs(query)
    }

    // ============ Mode control ============

    /// Set a new goal and enter autonomous mode
    pub fn activate_goal(
        &self,
        goal: GoalSpec,
        constraints: Option<SafetyConstraints>,
    ) -> Result<(), ConfigurationError> {
        goal.validate()?;
        if let Some(ref c) = constraints {
            c.validate()?;
        }

        {
            let mut tracker = self.inner.tracker.lock();
            tracker.set_goal(goal, constraints);
            if let Some(c) = tracker.constraints() {
                self.inner.safety.lock().set_constraints(c.clone());
            }
        }
        self.inner.actions.lock().clear();
        self.record_action("goal_activated", None);

        self.set_mode(Mode::Autonomous)
    }

    /// Switch modes. Autonomous mode requires an active goal.
    pub fn set_mode(&self, mode: Mode) -> Result<(), ConfigurationError> {
        if mode == Mode::Autonomous && !self.inner.tracker.lock().has_goal() {
            warn!("Rejected autonomous mode: no active goal");
            return Err(ConfigurationError::NoActiveGoal);
        }
        self.transition(mode, None);
        Ok(())
    }

    /// Cancel everything in flight, clear the session, force suggestion mode
    pub fn emergency_stop(&self) {
        warn!("Emergency stop");
        self.inner.control.lock().turn_token.cancel();

        if self.inner.tracker.lock().has_goal() {
            self.record_action("emergency_stop", None);
            self.write_log(Outcome::Interrupted);
        }
        self.inner.tracker.lock().clear();
        self.transition(Mode::Suggestion, Some("Emergency stop".to_string()));
        self.inner.bus.publish(ControlEvent::EmergencyStop { origin: Origin::Core });
    }

    pub fn status(&self) -> OrchestratorStatus {
        let tracker = self.inner.tracker.lock();
        let last_context = self.inner.last_context.lock();
        let safety = tracker
            .state()
            .map(|state| self.inner.safety.lock().get_safety_status(state, last_context.last()));

        OrchestratorStatus {
            mode: self.mode(),
            conversation_id: tracker.conversation_id().map(str::to_string),
            goal: tracker.goal().map(|g| g.description.clone()),
            progress: tracker.get_progress(),
            progress_summary: tracker.get_progress_summary(),
            safety,
        }
    }

    /// Patch the active constraints in both the monitor and the persisted session
    pub fn update_constraints(&self, patch: ConstraintsPatch) -> Result<(), ConfigurationError> {
        let mut tracker = self.inner.tracker.lock();
        let mut safety = self.inner.safety.lock();

        let mut constraints = safety.constraints().clone();
        constraints.apply(patch);
        constraints.validate()?;

        info!(
            "Constraints updated: max {} turns, min confidence {:.2}",
            constraints.max_turns, constraints.min_confidence
        );
        tracker.set_constraints(constraints.clone());
        safety.set_constraints(constraints);
        Ok(())
    }

    pub fn constraints(&self) -> SafetyConstraints {
        self.inner.safety.lock().constraints().clone()
    }

    /// Request id of the most recently surfaced suggestions
    pub fn last_request_id(&self) -> Option<String> {
        self.inner.last_request_id.lock().clone()
    }

    /// Record a human rating of a suggestion. Returns the feedback id.
    pub fn submit_feedback(&self, feedback: Feedback) -> Result<String, PersistenceError> {
        self.inner.store.save_feedback(&feedback)?;
        if let Some(ref text) = feedback.feedback_text {
            debug!("Feedback text: {}", text);
        }
        Ok(feedback.feedback_id)
    }

    fn transition(&self, mode: Mode, reason: Option<String>) {
        {
            let mut control = self.inner.control.lock();
            if control.mode == mode {
                return;
            }
            match mode {
                Mode::Autonomous => control.turn_token = CancellationToken::new(),
                Mode::Suggestion => control.turn_token.cancel(),
            }
            control.mode = mode;
        }

        match &reason {
            Some(r) => info!("Mode -> {} ({})", mode.as_str(), r),
            None => info!("Mode -> {}", mode.as_str()),
        }
        if let Err(e) = self.inner.store.set_mode(mode) {
            warn!("Failed to persist mode: {}", e);
        }
        self.inner.bus.publish(ControlEvent::ModeChanged { mode, reason });
    }

    // ============ Batch processing ============

    /// Process one batch of observed messages. Batches never interleave.
    pub async fn handle_batch(&self, messages: Vec<Message>) {
        let _guard = self.inner.batch_lock.lock().await;

        let Some(last) = messages.last() else {
            return;
        };
        let (mode, token) = {
            let control = self.inner.control.lock();
            (control.mode, control.turn_token.clone())
        };

        match mode {
            Mode::Suggestion if last.role != Role::Customer => {
                debug!("Batch ends with an agent message, nothing to suggest");
                return;
            }
            Mode::Autonomous if self.is_own_echo(last) => {
                debug!("Batch ends with our own reply, skipping");
                return;
            }
            _ => {}
        }
        *self.inner.last_context.lock() = messages.clone();

        match mode {
            Mode::Suggestion => self.suggest(&messages).await,
            Mode::Autonomous => self.autonomous_turn(&messages, &token).await,
        }
    }

    fn is_own_echo(&self, last: &Message) -> bool {
        last.role == Role::Agent
            && self
                .inner
                .last_sent
                .lock()
                .as_deref()
                .is_some_and(|sent| sent == last.content.trim())
    }

    async fn suggest(&self, messages: &[Message]) {
        let window = crate::context::tail(messages, self.inner.config.suggestion_window);
        let request = match SuggestRequest::new(&self.inner.config.platform, &window) {
            Ok(request) => request,
            Err(e) => {
                warn!("Suggestion request rejected: {}", e);
                self.inner
                    .bus
                    .publish(ControlEvent::SuggestionFailed { error: e.to_string() });
                return;
            }
        };
        let request = match self.inner.config.preferences.clone() {
            Some(prefs) => request.with_preferences(prefs),
            None => request,
        };

        let result = with_deadline(
            self.inner.generator.suggest(&request),
            self.inner.config.generator_timeout,
            &CancellationToken::new(),
        )
        .await;

        let event = match result {
            Ok(response) if !response.suggestions.is_empty() => {
                info!("Surfacing {} suggestion(s)", response.suggestions.len());
                *self.inner.last_request_id.lock() = Some(request.request_id.clone());
                ControlEvent::Suggestions {
                    request_id: request.request_id.clone(),
                    suggestions: response.suggestions,
                }
            }
            Ok(_) => ControlEvent::SuggestionFailed {
                error: "No suggestions returned".to_string(),
            },
            Err(e) => {
                warn!("Suggestion failed: {}", e);
                ControlEvent::SuggestionFailed { error: e.to_string() }
            }
        };
        self.inner.bus.publish(event);
    }

    async fn autonomous_turn(&self, messages: &[Message], token: &CancellationToken) {
        let Some(last) = messages.last() else {
            return;
        };

        let snapshot = {
            let tracker = self.inner.tracker.lock();
            match (tracker.goal(), tracker.state(), tracker.constraints()) {
                (Some(goal), Some(state), Some(constraints)) => {
                    Some((goal.clone(), state.clone(), constraints.clone()))
                }
                _ => None,
            }
        };
        let Some((goal, state, constraints)) = snapshot else {
            warn!("Autonomous batch without an active goal");
            self.transition(Mode::Suggestion, Some("No active goal".to_string()));
            return;
        };

        let check = self.inner.safety.lock().check_message(last, &state);
        if check.should_escalate {
            let reason = check
                .reason
                .unwrap_or_else(|| "Safety check failed".to_string());
            self.escalate(reason);
            return;
        }

        let result = async {
            self.thinking_delay(token).await?;
            let request = AutonomousRequest::new(messages, &goal, &state, &constraints)?;
            let decision = with_deadline(
                self.inner.generator.act_autonomously(&request),
                self.inner.config.generator_timeout,
                token,
            )
            .await?;
            self.apply_decision(decision, messages, token).await
        }
        .await;

        match result {
            Ok(()) => {}
            Err(_) if token.is_cancelled() => info!("Autonomous turn interrupted"),
            Err(e) => self.escalate(e.to_string()),
        }
    }

    async fn thinking_delay(&self, token: &CancellationToken) -> Result<(), GeneratorError> {
        let delay = self.pick_thinking_delay();
        debug!("Thinking for {:?}", delay);
        tokio::select! {
            _ = token.cancelled() => Err(GeneratorError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn pick_thinking_delay(&self) -> Duration {
        let min = self.inner.config.thinking_min.as_millis() as u64;
        let max = self.inner.config.thinking_max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    async fn apply_decision(
        &self,
        decision: AutonomousDecision,
        messages: &[Message],
        token: &CancellationToken,
    ) -> Result<(), AutopilotError> {
        if token.is_cancelled() {
            return Err(AdapterError::Interrupted.into());
        }
        self.record_action(decision.action.as_str(), decision.reason.clone());

        match decision.action {
            AgentAction::Escalate => {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| "Generator requested escalation".to_string());
                self.escalate(reason);
            }
            AgentAction::GoalComplete => {
                let summary = decision.reason.unwrap_or_else(|| "Goal completed".to_string());
                self.complete(summary);
            }
            AgentAction::NeedInfo => debug!("Generator is waiting for more information"),
            AgentAction::Respond => self.respond(decision, messages, token).await?,
        }
        Ok(())
    }

    async fn respond(
        &self,
        decision: AutonomousDecision,
        messages: &[Message],
        token: &CancellationToken,
    ) -> Result<(), AutopilotError> {
        let confidence = decision.confidence();
        let min_confidence = self.inner.safety.lock().constraints().min_confidence;
        match confidence {
            Some(score) if self.inner.safety.lock().check_confidence(score) => {}
            Some(score) => {
                self.escalate(format!("Low confidence ({:.2} < {:.2})", score, min_confidence));
                return Ok(());
            }
            None => {
                self.escalate("Generator returned no confidence score".to_string());
                return Ok(());
            }
        }

        let text = decision
            .response
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GeneratorError::Malformed("respond without response text".to_string()))?
            .to_string();

        let receipt = self
            .inner
            .executor
            .send_response_with_cancel(&text, true, token)
            .await?;
        self.record_action("sent", Some(receipt.content.clone()));
        *self.inner.last_sent.lock() = Some(receipt.content.trim().to_string());

        let complete = {
            let mut tracker = self.inner.tracker.lock();
            let before = tracker.state().map(|s| s.turns_taken).unwrap_or(0);
            if let Some(patch) = decision.goal_state {
                tracker.update_state(patch);
            }
            if tracker.state().map(|s| s.turns_taken).unwrap_or(0) <= before {
                tracker.increment_turn();
            }
            tracker.is_goal_complete()
        };

        let mut updated = messages.to_vec();
        let sent = Message {
            role: Role::Agent,
            content: receipt.content,
            timestamp: receipt.sent_at,
        };
        updated.push(sent);
        *self.inner.last_context.lock() = updated.clone();

        let conversation_id = self.inner.tracker.lock().conversation_id().map(str::to_string);
        self.inner.bus.publish(ControlEvent::ConversationUpdate {
            conversation_id,
            messages: updated,
        });

        if complete {
            self.complete("All required information gathered".to_string());
        }
        Ok(())
    }

    // ============ Session endings ============

    fn escalate(&self, reason: String) {
        warn!("Escalating to human: {}", reason);
        self.record_action("escalate", Some(reason.clone()));
        self.write_log(Outcome::Escalated);
        self.transition(Mode::Suggestion, Some(reason.clone()));
        self.inner.bus.publish(ControlEvent::Escalated { reason });
    }

    fn complete(&self, summary: String) {
        info!("Goal complete: {}", summary);
        self.record_action("goal_complete", Some(summary.clone()));
        self.write_log(Outcome::Completed);
        self.inner.tracker.lock().clear();
        self.transition(Mode::Suggestion, Some(summary.clone()));
        self.inner.bus.publish(ControlEvent::GoalCompleted { summary });
    }

    fn record_action(&self, action: &str, detail: Option<String>) {
        self.inner.actions.lock().push(ActionRecord {
            action: action.to_string(),
            detail,
            timestamp: now_millis(),
        });
    }

    /// Write the audit record for the current session and reset the action list
    fn write_log(&self, outcome: Outcome) {
        let (session_id, goal_description) = {
            let tracker = self.inner.tracker.lock();
            match tracker.conversation_id() {
                Some(id) => (id.to_string(), tracker.goal().map(|g| g.description.clone())),
                None => return,
            }
        };

        let mut log = ConversationLog::new(&session_id, Mode::Autonomous, outcome);
        log.goal_description = goal_description;
        log.conversation_context = self.inner.last_context.lock().clone();
        log.actions_taken = std::mem::take(&mut *self.inner.actions.lock());

        match self.inner.store.save_conversation_log(&log) {
            Ok(()) => debug!("Saved conversation log {} ({})", log.log_id, outcome.as_str()),
            Err(e) => warn!("Failed to save conversation log: {}", e),
        }
    }

    // ============ Runtime wiring ============

    /// Start observing the platform and listening on the bus
    pub fn start(&self) -> RunningOrchestrator {
        let shutdown = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Message>>();

        let watch = watcher::observe(
            self.inner.adapter.clone(),
            move |batch| {
                if tx.send(batch).is_err() {
                    debug!("Batch dropped, orchestrator stopped");
                }
            },
            self.inner.config.watcher.clone(),
        );

        let orchestrator = self.clone();
        let batch_shutdown = shutdown.clone();
        let batches = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = batch_shutdown.cancelled() => break,
                    batch = rx.recv() => match batch {
                        Some(batch) => orchestrator.handle_batch(batch).await,
                        None => break,
                    },
                }
            }
        });

        let orchestrator = self.clone();
        let control_shutdown = shutdown.clone();
        let mut events = self.inner.bus.subscribe();
        let control = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = control_shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(ControlEvent::EmergencyStop { origin: Origin::Host }) => {
                            orchestrator.emergency_stop()
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Control listener lagged by {} events", n)
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        info!("Watching {}", self.inner.adapter.platform_name());
        RunningOrchestrator {
            watch,
            shutdown,
            tasks: vec![batches, control],
        }
    }
}

/// Background tasks started by [`Orchestrator::start`]
pub struct RunningOrchestrator {
    watch: WatchHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningOrchestrator {
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.watch.shutdown().await;
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Orchestrator stopped");
    }
}
