//! Orchestrator Integration Tests
//!
//! Full loop: transcript surface -> watcher -> orchestrator -> scripted
//! generator -> executor, with a SQLite-backed session store. All timing
//! runs on a paused clock.

use async_trait::async_trait;
use chat_autopilot::store::{LogQuery, Outcome};
use chat_autopilot::{
    AutonomousDecision, AutonomousRequest, ControlEvent, GeneratorError, GoalSpec, GoalType, Mode,
    Orchestrator, OrchestratorConfig, ResponseGenerator, Role, SessionStore, SqliteSessionStore,
    SuggestRequest, SuggestResponse, Suggestion, TranscriptAdapter,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct ScriptedGenerator {
    decisions: Mutex<VecDeque<AutonomousDecision>>,
}

impl ScriptedGenerator {
    fn new(decisions: Vec<AutonomousDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
        }
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn suggest(&self, request: &SuggestRequest) -> Result<SuggestResponse, GeneratorError> {
        let last = request
            .conversation_context
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(SuggestResponse {
            suggestions: vec![Suggestion {
                id: Some("s1".into()),
                content: format!("Re: {}", last),
                confidence: 0.8,
                reasoning: None,
            }],
            metadata: serde_json::Value::Null,
        })
    }

    async fn act_autonomously(
        &self,
        _request: &AutonomousRequest,
    ) -> Result<AutonomousDecision, GeneratorError> {
        self.decisions
            .lock()
            .pop_front()
            .ok_or_else(|| GeneratorError::Malformed("script exhausted".into()))
    }
}

fn create_test_store(temp: &TempDir) -> Arc<SqliteSessionStore> {
    let db_path = temp.path().join("session.db");
    Arc::new(SqliteSessionStore::open(&db_path).expect("Failed to create store"))
}

fn fixed_thinking() -> OrchestratorConfig {
    OrchestratorConfig {
        thinking_min: Duration::from_secs(2),
        thinking_max: Duration::from_secs(2),
        ..OrchestratorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_autonomous_reply_through_full_loop() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = create_test_store(&temp);
    let adapter = Arc::new(TranscriptAdapter::default());
    let generator = Arc::new(ScriptedGenerator::new(vec![AutonomousDecision::respond(
        "Sorry about that! Your refund is on its way.",
        0.9,
    )]));

    let orchestrator = Orchestrator::new(adapter.clone(), generator, store.clone(), fixed_thinking());
    let mut events = orchestrator.bus().subscribe();
    orchestrator
        .activate_goal(GoalSpec::new(GoalType::ResolveIssue, "Process the refund", 5), None)
        .unwrap();
    let running = orchestrator.start();

    adapter.push(Role::Customer, "Where is my refund?");
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(
        adapter.agent_messages(),
        vec!["Sorry about that! Your refund is on its way."]
    );
    // Preview was shown and removed
    assert_eq!(adapter.previews_shown(), 1);
    assert!(adapter.preview().is_none());
    assert_eq!(orchestrator.mode(), Mode::Autonomous);
    assert_eq!(orchestrator.status().progress_summary, "1/5 turns");

    let persisted = store.load_session().unwrap().unwrap();
    assert_eq!(persisted.state.turns_taken, 1);

    let mut saw_update = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ControlEvent::ConversationUpdate { .. }) {
            saw_update = true;
        }
    }
    assert!(saw_update);

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_bus_emergency_stop_cancels_preview() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = create_test_store(&temp);
    let adapter = Arc::new(TranscriptAdapter::default());
    let generator = Arc::new(ScriptedGenerator::new(vec![AutonomousDecision::respond(
        "This should never be sent",
        0.95,
    )]));

    let orchestrator = Orchestrator::new(adapter.clone(), generator, store.clone(), fixed_thinking());
    orchestrator
        .activate_goal(GoalSpec::new(GoalType::ResolveIssue, "Answer the question", 5), None)
        .unwrap();
    let running = orchestrator.start();

    adapter.push(Role::Customer, "Can you help?");

    // Debounce (0.5s) + thinking (2s) puts the 3s preview well over t=4s
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(adapter.preview().is_some());

    orchestrator.bus().request_emergency_stop();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(adapter.agent_messages().is_empty());
    assert!(adapter.preview().is_none());
    assert_eq!(orchestrator.mode(), Mode::Suggestion);
    assert!(store.load_session().unwrap().is_none());
    assert_eq!(store.get_mode().unwrap(), Mode::Suggestion);

    let page = store.list_conversation_logs(&LogQuery::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.logs[0].outcome, Outcome::Interrupted);
    assert_eq!(page.logs[0].goal_description.as_deref(), Some("Answer the question"));

    running.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_suggestion_mode_through_full_loop() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = create_test_store(&temp);
    let adapter = Arc::new(TranscriptAdapter::default());
    let generator = Arc::new(ScriptedGenerator::new(vec![]));

    let orchestrator = Orchestrator::new(adapter.clone(), generator, store, fixed_thinking());
    let mut events = orchestrator.bus().subscribe();
    let running = orchestrator.start();

    adapter.push(Role::Customer, "Do you ship to Canada?");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let event = events.try_recv().unwrap();
    match event {
        ControlEvent::Suggestions {
            request_id,
            suggestions,
        } => {
            assert_eq!(suggestions[0].content, "Re: Do you ship to Canada?");
            assert_eq!(orchestrator.last_request_id(), Some(request_id));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    // Suggestion mode never touches the conversation
    assert!(adapter.agent_messages().is_empty());

    running.shutdown().await;
}

#[tokio::test]
async fn test_session_survives_restart() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let adapter = Arc::new(TranscriptAdapter::default());

    let conversation_id = {
        let store = create_test_store(&temp);
        let orchestrator = Orchestrator::new(
            adapter.clone(),
            Arc::new(ScriptedGenerator::new(vec![])),
            store,
            OrchestratorConfig::default(),
        );
        let goal = GoalSpec::new(GoalType::GatherInfo, "Collect contact details", 6)
            .with_required_info(["email", "phone"]);
        orchestrator.activate_goal(goal, None).unwrap();
        orchestrator.status().conversation_id.unwrap()
    };

    let store = create_test_store(&temp);
    let orchestrator = Orchestrator::new(
        adapter,
        Arc::new(ScriptedGenerator::new(vec![])),
        store,
        OrchestratorConfig::default(),
    );

    let status = orchestrator.status();
    assert_eq!(status.mode, Mode::Autonomous);
    assert_eq!(status.conversation_id.as_deref(), Some(conversation_id.as_str()));
    assert_eq!(status.progress_summary, "0/6 turns, 0/2 info gathered");
}
