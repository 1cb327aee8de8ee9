//! Core data model
//!
//! Messages, goals, goal state and safety constraints shared by every
//! component. Wire names follow the response generator's JSON contract
//! (snake_case fields, lowercase enum values).

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Escalation keywords applied when a goal is activated without constraints
pub const DEFAULT_ESCALATION_KEYWORDS: [&str; 4] = ["angry", "manager", "complaint", "lawyer"];

/// Default confidence threshold for autonomous replies
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "customer" | "user" => Some(Role::Customer),
            "agent" | "assistant" => Some(Role::Agent),
            _ => None,
        }
    }
}

/// A single observed chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_millis(),
        }
    }

    pub fn customer(content: impl Into<String>) -> Self {
        Self::new(Role::Customer, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    /// One-line transcript form, e.g. `CUSTOMER: where is my order`
    pub fn format_line(&self) -> String {
        format!("{}: {}", self.role.as_str().to_uppercase(), self.content)
    }
}

/// Kind of objective driving autonomous mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    ResolveIssue,
    GatherInfo,
    Escalate,
    Custom,
}

impl GoalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoalType::ResolveIssue => "resolve_issue",
            GoalType::GatherInfo => "gather_info",
            GoalType::Escalate => "escalate",
            GoalType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "resolve_issue" | "resolve" => Some(GoalType::ResolveIssue),
            "gather_info" | "gather" => Some(GoalType::GatherInfo),
            "escalate" => Some(GoalType::Escalate),
            "custom" => Some(GoalType::Custom),
            _ => None,
        }
    }
}

/// Goal for one autonomous activation. Immutable once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSpec {
    #[serde(rename = "type")]
    pub goal_type: GoalType,
    pub description: String,
    /// Labels that must all be gathered for the goal to complete
    #[serde(default)]
    pub required_info: Vec<String>,
    pub max_turns: u32,
}

impl GoalSpec {
    pub fn new(goal_type: GoalType, description: &str, max_turns: u32) -> Self {
        Self {
            goal_type,
            description: description.to_string(),
            required_info: vec![],
            max_turns,
        }
    }

    /// Set required labels; duplicates collapse onto their first occurrence
    pub fn with_required_info<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_info.clear();
        for label in labels {
            let label = label.into();
            if !label.trim().is_empty() && !self.required_info.contains(&label) {
                self.required_info.push(label);
            }
        }
        self
    }

    pub fn has_required_info(&self) -> bool {
        !self.required_info.is_empty()
    }

    /// Reject goals that cannot drive autonomous mode
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.description.trim().is_empty() {
            return Err(ConfigurationError::MissingDescription);
        }
        if self.max_turns == 0 {
            return Err(ConfigurationError::InvalidMaxTurns);
        }
        Ok(())
    }
}

/// Mutable progress of the active goal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalState {
    pub turns_taken: u32,
    /// Insertion-ordered, duplicate-free
    pub info_gathered: Vec<String>,
    pub current_step: String,
    pub started_at: i64,
    pub last_updated: i64,
}

impl GoalState {
    pub fn initial(now: i64) -> Self {
        Self {
            turns_taken: 0,
            info_gathered: vec![],
            current_step: "initializing".to_string(),
            started_at: now,
            last_updated: now,
        }
    }

    /// Insert a label unless already present. Returns true if inserted.
    pub fn gather(&mut self, label: &str) -> bool {
        if self.info_gathered.iter().any(|l| l == label) {
            return false;
        }
        self.info_gathered.push(label.to_string());
        true
    }
}

impl Default for GoalState {
    fn default() -> Self {
        Self::initial(now_millis())
    }
}

/// Partial goal state update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalStatePatch {
    #[serde(default, alias = "current_turn", skip_serializing_if = "Option::is_none")]
    pub turns_taken: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_gathered: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

impl From<GoalState> for GoalStatePatch {
    fn from(state: GoalState) -> Self {
        Self {
            turns_taken: Some(state.turns_taken),
            info_gathered: Some(state.info_gathered),
            current_step: Some(state.current_step),
        }
    }
}

/// Limits enforced while in autonomous mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConstraints {
    pub max_turns: u32,
    pub escalation_keywords: Vec<String>,
    pub stop_if_confused: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

impl SafetyConstraints {
    /// Standard constraints for a goal
    pub fn for_goal(goal: &GoalSpec) -> Self {
        Self {
            max_turns: goal.max_turns,
            ..Self::default()
        }
    }

    /// Merge `patch`, keeping unspecified fields
    pub fn apply(&mut self, patch: ConstraintsPatch) {
        if let Some(max_turns) = patch.max_turns {
            self.max_turns = max_turns;
        }
        if let Some(keywords) = patch.escalation_keywords {
            self.escalation_keywords = keywords;
        }
        if let Some(stop) = patch.stop_if_confused {
            self.stop_if_confused = stop;
        }
        if let Some(min) = patch.min_confidence {
            self.min_confidence = min;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_turns == 0 {
            return Err(ConfigurationError::InvalidMaxTurns);
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigurationError::InvalidConfidence(self.min_confidence.to_string()));
        }
        Ok(())
    }
}

impl Default for SafetyConstraints {
    fn default() -> Self {
        Self {
            max_turns: 10,
            escalation_keywords: DEFAULT_ESCALATION_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            stop_if_confused: true,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Partial constraints update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintsPatch {
    pub max_turns: Option<u32>,
    pub escalation_keywords: Option<Vec<String>>,
    pub stop_if_confused: Option<bool>,
    pub min_confidence: Option<f64>,
}

/// Outcome of a safety pre-check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub should_escalate: bool,
    pub reason: Option<String>,
    /// Rules that fired, in evaluation order
    pub triggers: Vec<String>,
}

impl SafetyCheckResult {
    pub fn safe() -> Self {
        Self::default()
    }

    pub fn escalate(reason: String, trigger: String) -> Self {
        Self {
            should_escalate: true,
            reason: Some(reason),
            triggers: vec![trigger],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

/// Operating mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Propose replies for human review
    #[default]
    Suggestion,
    /// Compose and send replies without per-message approval ("YOLO")
    Autonomous,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Suggestion => "suggestion",
            Mode::Autonomous => "autonomous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "suggestion" | "suggest" => Some(Mode::Suggestion),
            "autonomous" | "yolo" => Some(Mode::Autonomous),
            _ => None,
        }
    }
}

/// Persisted form of the live conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub conversation_id: String,
    pub goal: GoalSpec,
    pub state: GoalState,
    pub constraints: SafetyConstraints,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_info_dedup() {
        let goal = GoalSpec::new(GoalType::GatherInfo, "Collect details", 5)
            .with_required_info(["email", "order", "email", " "]);
        assert_eq!(goal.required_info, vec!["email", "order"]);
    }

    #[test]
    fn test_goal_spec_wire_format() {
        let goal = GoalSpec::new(GoalType::ResolveIssue, "Fix shipping", 8);
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["type"], "resolve_issue");
        assert_eq!(json["max_turns"], 8);

        let parsed: GoalSpec =
            serde_json::from_str(r#"{"type":"custom","description":"x","max_turns":3}"#).unwrap();
        assert!(parsed.required_info.is_empty());
        assert_eq!(parsed.goal_type, GoalType::Custom);
    }

    #[test]
    fn test_constraints_for_goal() {
        let goal = GoalSpec::new(GoalType::GatherInfo, "Collect", 6);
        let constraints = SafetyConstraints::for_goal(&goal);
        assert_eq!(constraints.max_turns, 6);
        assert_eq!(constraints.escalation_keywords, DEFAULT_ESCALATION_KEYWORDS);
        assert!(constraints.stop_if_confused);
        assert_eq!(constraints.min_confidence, 0.7);
    }

    #[test]
    fn test_goal_validation() {
        assert!(GoalSpec::new(GoalType::Custom, "Help", 3).validate().is_ok());
        assert_eq!(
            GoalSpec::new(GoalType::Custom, "  ", 3).validate(),
            Err(ConfigurationError::MissingDescription)
        );
        assert_eq!(
            GoalSpec::new(GoalType::Custom, "Help", 0).validate(),
            Err(ConfigurationError::InvalidMaxTurns)
        );

        let mut constraints = SafetyConstraints::default();
        constraints.min_confidence = 1.5;
        assert!(constraints.validate().is_err());
    }

    #[test]
    fn test_mode_and_role_parsing() {
        assert_eq!(Mode::parse("YOLO"), Some(Mode::Autonomous));
        assert_eq!(Mode::parse("suggestion"), Some(Mode::Suggestion));
        assert_eq!(Mode::parse("other"), None);
        assert_eq!(Role::parse("Customer"), Some(Role::Customer));
        assert_eq!(Role::parse("assistant"), Some(Role::Agent));
    }
}
