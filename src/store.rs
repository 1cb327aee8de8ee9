//! Persistence Store
//!
//! Holds the single live session record, the current mode flag, and the
//! conversation log audit trail. Every write is last-write-wins; callers
//! treat failures as best effort.

use parking_lot::Mutex as FastMutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ConfigurationError, PersistenceError};
use crate::model::{Message, Mode, SessionRecord};

/// How an autonomous session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Escalated,
    Interrupted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Escalated => "escalated",
            Outcome::Interrupted => "interrupted",
        }
    }
}

/// One action taken during a session, for the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub detail: Option<String>,
    pub timestamp: i64,
}

/// Audit record written when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationLog {
    pub log_id: String,
    pub session_id: String,
    pub mode: Mode,
    pub goal_description: Option<String>,
    pub conversation_context: Vec<Message>,
    pub actions_taken: Vec<ActionRecord>,
    pub outcome: Outcome,
    /// Epoch seconds
    pub timestamp: i64,
}

impl ConversationLog {
    pub fn new(session_id: &str, mode: Mode, outcome: Outcome) -> Self {
        Self {
            log_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            mode,
            goal_description: None,
            conversation_context: vec![],
            actions_taken: vec![],
            outcome,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Filters and pagination for [`SessionStore::list_conversation_logs`]
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub session_id: Option<String>,
    pub mode: Option<Mode>,
    /// 1-based
    pub page: usize,
    /// 1..=100
    pub page_size: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            session_id: None,
            mode: None,
            page: 1,
            page_size: 10,
        }
    }
}

impl LogQuery {
    fn validate(&self) -> Result<(), PersistenceError> {
        if self.page == 0 {
            return Err(PersistenceError::InvalidQuery("page must be >= 1".into()));
        }
        if !(1..=100).contains(&self.page_size) {
            return Err(PersistenceError::InvalidQuery("page_size must be 1..=100".into()));
        }
        Ok(())
    }

    fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }
}

/// A page of conversation logs, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct LogPage {
    pub logs: Vec<ConversationLog>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Human rating of a surfaced suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback_id: String,
    /// `request_id` of the suggestion request being rated
    pub request_id: String,
    /// 1..=5
    pub rating: u8,
    pub feedback_text: Option<String>,
    pub suggestion_used: bool,
    pub modified: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Epoch seconds
    pub timestamp: i64,
}

impl Feedback {
    pub fn new(request_id: &str, rating: u8, suggestion_used: bool) -> Result<Self, ConfigurationError> {
        if !(1..=5).contains(&rating) {
            return Err(ConfigurationError::InvalidRating(rating));
        }
        Ok(Self {
            feedback_id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            rating,
            feedback_text: None,
            suggestion_used,
            modified: false,
            metadata: serde_json::Value::Null,
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    pub fn with_text(mut self, text: &str) -> Self {
        let text = text.trim();
        self.feedback_text = (!text.is_empty()).then(|| text.to_string());
        self
    }

    pub fn modified(mut self, modified: bool) -> Self {
        self.modified = modified;
        self
    }
}

/// Storage backend for session state
pub trait SessionStore: Send + Sync {
    fn load_session(&self) -> Result<Option<SessionRecord>, PersistenceError>;

    fn save_session(&self, record: &SessionRecord) -> Result<(), PersistenceError>;

    fn clear_session(&self) -> Result<(), PersistenceError>;

    fn get_mode(&self) -> Result<Mode, PersistenceError>;

    fn set_mode(&self, mode: Mode) -> Result<(), PersistenceError>;

    fn save_conversation_log(&self, log: &ConversationLog) -> Result<(), PersistenceError>;

    fn list_conversation_logs(&self, query: &LogQuery) -> Result<LogPage, PersistenceError>;

    fn save_feedback(&self, feedback: &Feedback) -> Result<(), PersistenceError>;

    /// Feedback for one request, or all feedback, newest first
    fn list_feedback(&self, request_id: Option<&str>) -> Result<Vec<Feedback>, PersistenceError>;
}

/// SQLite-backed store
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;

        info!("Session store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory database, mostly for tests
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, PersistenceError> {
        self.conn
            .lock()
            .map_err(|e| PersistenceError::Lock(e.to_string()))
    }

    fn init_schema(&self) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                conversation_id TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_logs (
                log_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                mode TEXT NOT NULL,
                outcome TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                record TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feedback (
                feedback_id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                timestamp INTEGER NOT NULL,
                record TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_request ON feedback(request_id);
            CREATE INDEX IF NOT EXISTS idx_logs_session ON conversation_logs(session_id);
            CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON conversation_logs(timestamp DESC);
            "#,
        )?;
        Ok(())
    }
}

impl SessionStore for SqliteSessionStore {
    fn load_session(&self) -> Result<Option<SessionRecord>, PersistenceError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row("SELECT record FROM session WHERE id = 1", [], |row| row.get(0))
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_session(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(record)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO session (id, conversation_id, record, updated_at)
             VALUES (1, ?1, ?2, ?3)",
            params![record.conversation_id, json, record.state.last_updated],
        )?;
        debug!("Saved session {}", record.conversation_id);
        Ok(())
    }

    fn clear_session(&self) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM session", [])?;
        Ok(())
    }

    fn get_mode(&self) -> Result<Mode, PersistenceError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = 'mode'", [], |row| row.get(0))
            .optional()?;
        Ok(raw.as_deref().and_then(Mode::parse).unwrap_or_default())
    }

    fn set_mode(&self, mode: Mode) -> Result<(), PersistenceError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES ('mode', ?1)",
            params![mode.as_str()],
        )?;
        Ok(())
    }

    fn save_conversation_log(&self, log: &ConversationLog) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(log)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversation_logs
             (log_id, session_id, mode, outcome, timestamp, record)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                log.log_id,
                log.session_id,
                log.mode.as_str(),
                log.outcome.as_str(),
                log.timestamp,
                json,
            ],
        )?;
        info!(
            "Conversation log saved: {} | Session: {} | Mode: {} | Outcome: {}",
            log.log_id,
            log.session_id,
            log.mode.as_str(),
            log.outcome.as_str()
        );
        Ok(())
    }

    fn list_conversation_logs(&self, query: &LogQuery) -> Result<LogPage, PersistenceError> {
        query.validate()?;
        let conn = self.lock()?;

        let session = query.session_id.as_deref();
        let mode = query.mode.map(|m| m.as_str());

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversation_logs
             WHERE (?1 IS NULL OR session_id = ?1) AND (?2 IS NULL OR mode = ?2)",
            params![session, mode],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT record FROM conversation_logs
             WHERE (?1 IS NULL OR session_id = ?1) AND (?2 IS NULL OR mode = ?2)
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?3 OFFSET ?4",
        )?;

        let rows = stmt.query_map(
            params![session, mode, query.page_size as i64, query.offset() as i64],
            |row| row.get::<_, String>(0),
        )?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(serde_json::from_str(&row?)?);
        }

        Ok(LogPage {
            logs,
            total: total as usize,
            page: query.page,
            page_size: query.page_size,
        })
    }

    fn save_feedback(&self, feedback: &Feedback) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(feedback)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO feedback (feedback_id, request_id, rating, timestamp, record)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feedback.feedback_id,
                feedback.request_id,
                feedback.rating,
                feedback.timestamp,
                json,
            ],
        )?;
        info!(
            "Feedback saved: {} | Request: {} | Rating: {} | Used: {} | Modified: {}",
            feedback.feedback_id,
            feedback.request_id,
            feedback.rating,
            feedback.suggestion_used,
            feedback.modified
        );
        Ok(())
    }

    fn list_feedback(&self, request_id: Option<&str>) -> Result<Vec<Feedback>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT record FROM feedback
             WHERE (?1 IS NULL OR request_id = ?1)
             ORDER BY timestamp DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![request_id], |row| row.get::<_, String>(0))?;

        let mut feedback = Vec::new();
        for row in rows {
            feedback.push(serde_json::from_str(&row?)?);
        }
        Ok(feedback)
    }
}

#[derive(Default)]
struct MemoryState {
    session: Option<SessionRecord>,
    mode: Mode,
    logs: Vec<ConversationLog>,
    feedback: Vec<Feedback>,
}

/// Process-local store with no durability
#[derive(Default)]
pub struct MemorySessionStore {
    state: FastMutex<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load_session(&self) -> Result<Option<SessionRecord>, PersistenceError> {
        Ok(self.state.lock().session.clone())
    }

    fn save_session(&self, record: &SessionRecord) -> Result<(), PersistenceError> {
        self.state.lock().session = Some(record.clone());
        Ok(())
    }

    fn clear_session(&self) -> Result<(), PersistenceError> {
        self.state.lock().session = None;
        Ok(())
    }

    fn get_mode(&self) -> Result<Mode, PersistenceError> {
        Ok(self.state.lock().mode)
    }

    fn set_mode(&self, mode: Mode) -> Result<(), PersistenceError> {
        self.state.lock().mode = mode;
        Ok(())
    }

    fn save_conversation_log(&self, log: &ConversationLog) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();
        state.logs.retain(|l| l.log_id != log.log_id);
        state.logs.push(log.clone());
        Ok(())
    }

    fn list_conversation_logs(&self, query: &LogQuery) -> Result<LogPage, PersistenceError> {
        query.validate()?;
        let state = self.state.lock();

        // Newest first; ties keep the later insert first
        let mut filtered: Vec<&ConversationLog> = state
            .logs
            .iter()
            .rev()
            .filter(|l| query.session_id.as_deref().map_or(true, |s| l.session_id == s))
            .filter(|l| query.mode.map_or(true, |m| l.mode == m))
            .collect();
        filtered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = filtered.len();
        let logs = filtered
            .into_iter()
            .skip(query.offset())
            .take(query.page_size)
            .cloned()
            .collect();

        Ok(LogPage {
            logs,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    fn save_feedback(&self, feedback: &Feedback) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();
        state.feedback.retain(|f| f.feedback_id != feedback.feedback_id);
        state.feedback.push(feedback.clone());
        Ok(())
    }

    fn list_feedback(&self, request_id: Option<&str>) -> Result<Vec<Feedback>, PersistenceError> {
        let state = self.state.lock();
        let mut feedback: Vec<Feedback> = state
            .feedback
            .iter()
            .rev()
            .filter(|f| request_id.map_or(true, |r| f.request_id == r))
            .cloned()
            .collect();
        feedback.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(feedback)
    }
}
