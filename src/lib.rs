//! Chat Autopilot
//!
//! Autonomous response orchestrator for live customer-support chats.
//!
//! # Features
//!
//! - **Suggestion mode**: propose replies for a human agent to review
//! - **Autonomous mode**: pursue a goal and send replies without approval
//! - **Safety Monitor**: escalation keywords, turn limits, no-progress detection
//! - **Preview**: cancellable countdown before every autonomous send
//! - **Persistence**: session, mode flag and audit logs in SQLite
//! - **Emergency stop**: cancels everything in flight, always wins
//! - **Feedback**: 1-5 ratings on surfaced suggestions
//!
//! # Architecture
//!
//! ```text
//! Platform ──► Watcher ──► Orchestrator ──► Generator (HTTP)
//! (adapter)   (debounce)      │
//!                             ├── Goal Tracker (session + store)
//!                             ├── Safety Monitor
//!                             ├── Response Executor (preview + send)
//!                             └── Control Bus (mode, stop, updates)
//! ```

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod generator;
pub mod goals;
pub mod model;
pub mod orchestrator;
pub mod platform;
pub mod safety;
pub mod store;
pub mod transcript;
pub mod watcher;

pub use bus::{ControlBus, ControlEvent, Origin};
pub use config::Config;
pub use error::{AdapterError, AutopilotError, ConfigurationError, ContextError, GeneratorError, PersistenceError};
pub use executor::{ExecutorConfig, ResponseExecutor, SendReceipt};
pub use generator::{
    AgentAction, AutonomousDecision, AutonomousRequest, HttpGenerator, ResponseGenerator,
    SuggestRequest, SuggestResponse, Suggestion, UserPreferences,
};
pub use goals::GoalTracker;
pub use model::{
    ConstraintsPatch, GoalSpec, GoalState, GoalStatePatch, GoalType, Message, Mode, Role,
    SafetyCheckResult, SafetyConstraints, Sentiment,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorStatus, RunningOrchestrator};
pub use platform::{ElementKind, ElementRef, PlatformAdapter, PreviewNotice};
pub use safety::{SafetyMonitor, SafetyStatus};
pub use store::{ConversationLog, Feedback, LogQuery, MemorySessionStore, Outcome, SessionStore, SqliteSessionStore};
pub use transcript::TranscriptAdapter;
pub use watcher::{observe, WatchHandle, WatcherConfig};
