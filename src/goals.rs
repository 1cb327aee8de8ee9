//! Goal Tracker
//!
//! Owns the single live conversation session: goal, goal state, safety
//! constraints and conversation id. Every mutation is persisted through
//! the session store on a best-effort basis.
//!
//! Invariants: `turns_taken` never decreases and `info_gathered` only
//! grows until the session is cleared.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::{
    now_millis, GoalSpec, GoalState, GoalStatePatch, SafetyConstraints, SessionRecord,
};
use crate::store::SessionStore;

/// Generate a conversation id: `conv_<millis>_<random suffix>`
pub fn generate_conversation_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("conv_{}_{}", now_millis(), suffix.to_lowercase())
}

/// Goal tracker over one session
pub struct GoalTracker {
    store: Arc<dyn SessionStore>,
    session: Option<SessionRecord>,
}

impl GoalTracker {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, session: None }
    }

    /// Reload a persisted session, if any. Returns true when one was found.
    pub fn restore(&mut self) -> bool {
        match self.store.load_session() {
            Ok(Some(record)) => {
                info!("Restored session {}", record.conversation_id);
                self.session = Some(record);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to load persisted session: {}", e);
                false
            }
        }
    }

    /// Start a fresh session for `goal`
    pub fn set_goal(&mut self, goal: GoalSpec, constraints: Option<SafetyConstraints>) {
        let constraints = constraints.unwrap_or_else(|| SafetyConstraints::for_goal(&goal));
        let record = SessionRecord {
            conversation_id: generate_conversation_id(),
            state: GoalState::initial(now_millis()),
            goal,
            constraints,
        };

        info!(
            "Goal set: {} ({}, max {} turns) [{}]",
            record.goal.description,
            record.goal.goal_type.as_str(),
            record.goal.max_turns,
            record.conversation_id
        );

        self.session = Some(record);
        self.persist();
    }

    /// Merge `patch` into the current state. No-op without a session.
    pub fn update_state(&mut self, patch: GoalStatePatch) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let state = &mut session.state;

        if let Some(turns) = patch.turns_taken {
            state.turns_taken = state.turns_taken.max(turns);
        }
        if let Some(labels) = patch.info_gathered {
            for label in labels {
                state.gather(&label);
            }
        }
        if let Some(step) = patch.current_step {
            state.current_step = step;
        }
        state.last_updated = now_millis();

        self.persist();
    }

    /// Replace the session's constraints. No-op without a session.
    pub fn set_constraints(&mut self, constraints: SafetyConstraints) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.constraints = constraints;
        session.state.last_updated = now_millis();
        self.persist();
    }

    pub fn increment_turn(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.state.turns_taken += 1;
        session.state.last_updated = now_millis();
        debug!("Turn {}/{}", session.state.turns_taken, session.goal.max_turns);
        self.persist();
    }

    pub fn add_info_gathered(&mut self, label: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state.gather(label) {
            session.state.last_updated = now_millis();
            debug!("Gathered info: {}", label);
            self.persist();
        }
    }

    pub fn is_goal_complete(&self) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        let required = &session.goal.required_info;
        !required.is_empty()
            && required
                .iter()
                .all(|label| session.state.info_gathered.contains(label))
    }

    pub fn has_reached_max_turns(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state.turns_taken >= s.goal.max_turns)
    }

    /// Progress percentage, 0..=100
    pub fn get_progress(&self) -> u8 {
        let Some(session) = self.session.as_ref() else {
            return 0;
        };

        let ratio = if session.goal.has_required_info() {
            session.state.info_gathered.len() as f64 / session.goal.required_info.len() as f64
        } else if session.goal.max_turns > 0 {
            session.state.turns_taken as f64 / session.goal.max_turns as f64
        } else {
            return 0;
        };

        (100.0 * ratio).round().min(100.0) as u8
    }

    pub fn get_progress_summary(&self) -> String {
        let Some(session) = self.session.as_ref() else {
            return "No active goal".to_string();
        };

        let mut parts = vec![format!(
            "{}/{} turns",
            session.state.turns_taken, session.goal.max_turns
        )];
        if session.goal.has_required_info() {
            parts.push(format!(
                "{}/{} info gathered",
                session.state.info_gathered.len(),
                session.goal.required_info.len()
            ));
        }
        parts.join(", ")
    }

    /// Drop the session and its persisted record
    pub fn clear(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Cleared session {}", session.conversation_id);
        }
        if let Err(e) = self.store.clear_session() {
            warn!("Failed to clear persisted session: {}", e);
        }
    }

    pub fn has_goal(&self) -> bool {
        self.session.is_some()
    }

    pub fn goal(&self) -> Option<&GoalSpec> {
        self.session.as_ref().map(|s| &s.goal)
    }

    pub fn state(&self) -> Option<&GoalState> {
        self.session.as_ref().map(|s| &s.state)
    }

    pub fn constraints(&self) -> Option<&SafetyConstraints> {
        self.session.as_ref().map(|s| &s.constraints)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.conversation_id.as_str())
    }

    fn persist(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(e) = self.store.save_session(session) {
            warn!("Failed to persist session {}: {}", session.conversation_id, e);
        }
    }
}
