//! Safety Monitor
//!
//! Stateless policy evaluation over the latest message and goal state.
//! The only held state is the current constraint set.

use serde::Serialize;
use tracing::{debug, info};

use crate::model::{ConstraintsPatch, GoalState, Message, SafetyCheckResult, SafetyConstraints, Sentiment};

/// Turns beyond which a session counts as stalled when nothing was gathered
const NO_PROGRESS_TURNS: u32 = 3;

/// Remaining-turn count at which a warning is raised
const LOW_TURNS_WARNING: u32 = 2;

const NEGATIVE_WORDS: &[&str] = &[
    "angry",
    "frustrated",
    "upset",
    "terrible",
    "awful",
    "horrible",
    "worst",
    "hate",
    "disappointed",
    "unacceptable",
    "ridiculous",
    "annoyed",
    "furious",
    "useless",
];

const POSITIVE_WORDS: &[&str] = &[
    "thank",
    "great",
    "excellent",
    "appreciate",
    "perfect",
    "awesome",
    "happy",
    "wonderful",
    "helpful",
    "love",
];

/// Numbers behind a safety status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyStats {
    pub turns_taken: u32,
    pub max_turns: u32,
    pub turns_remaining: u32,
    pub info_gathered: usize,
    pub sentiment: Option<Sentiment>,
}

/// Accumulated, non-exclusive warnings for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyStatus {
    pub safe: bool,
    pub warnings: Vec<String>,
    pub stats: SafetyStats,
}

/// Safety policy evaluator
#[derive(Debug, Clone, Default)]
pub struct SafetyMonitor {
    constraints: SafetyConstraints,
}

impl SafetyMonitor {
    pub fn new(constraints: SafetyConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &SafetyConstraints {
        &self.constraints
    }

    pub fn set_constraints(&mut self, constraints: SafetyConstraints) {
        self.constraints = constraints;
    }

    /// Merge `patch`, keeping unspecified fields
    pub fn update_constraints(&mut self, patch: ConstraintsPatch) {
        self.constraints.apply(patch);
    }

    /// Decide whether `message` forces an escalation.
    ///
    /// Rules run in priority order and the first match wins: escalation
    /// keyword, max turns, no progress. Sentiment never escalates.
    pub fn check_message(&self, message: &Message, state: &GoalState) -> SafetyCheckResult {
        let content = message.content.to_lowercase();

        let keyword = self
            .constraints
            .escalation_keywords
            .iter()
            .find(|k| !k.is_empty() && content.contains(&k.to_lowercase()));
        if let Some(keyword) = keyword {
            info!("Escalation keyword matched: {}", keyword);
            return SafetyCheckResult::escalate(
                format!("Escalation keyword detected: \"{}\"", keyword),
                format!("keyword: \"{}\"", keyword),
            );
        }

        if state.turns_taken >= self.constraints.max_turns {
            info!("Max turns reached ({}/{})", state.turns_taken, self.constraints.max_turns);
            return SafetyCheckResult::escalate(
                format!(
                    "Maximum turns reached ({}/{})",
                    state.turns_taken, self.constraints.max_turns
                ),
                "max turns reached".to_string(),
            );
        }

        if self.constraints.stop_if_confused
            && state.turns_taken > NO_PROGRESS_TURNS
            && state.info_gathered.is_empty()
        {
            info!("No progress after {} turns", state.turns_taken);
            return SafetyCheckResult::escalate(
                format!("No progress after {} turns", state.turns_taken),
                "no progress".to_string(),
            );
        }

        let sentiment = analyze_sentiment(&message.content);
        debug!("Message sentiment: {}", sentiment.as_str());

        SafetyCheckResult::safe()
    }

    pub fn check_confidence(&self, score: f64) -> bool {
        score >= self.constraints.min_confidence
    }

    pub fn get_safety_status(&self, state: &GoalState, last_message: Option<&Message>) -> SafetyStatus {
        let mut warnings = Vec::new();
        let turns_remaining = self.constraints.max_turns.saturating_sub(state.turns_taken);

        if turns_remaining <= LOW_TURNS_WARNING {
            warnings.push(format!("Only {} turns remaining", turns_remaining));
        }

        if state.turns_taken > NO_PROGRESS_TURNS && state.info_gathered.is_empty() {
            warnings.push("No information gathered yet".to_string());
        }

        let sentiment = last_message.map(|m| analyze_sentiment(&m.content));
        if sentiment == Some(Sentiment::Negative) {
            warnings.push("Negative sentiment detected".to_string());
        }

        SafetyStatus {
            safe: warnings.is_empty(),
            warnings,
            stats: SafetyStats {
                turns_taken: state.turns_taken,
                max_turns: self.constraints.max_turns,
                turns_remaining,
                info_gathered: state.info_gathered.len(),
                sentiment,
            },
        }
    }
}

/// Keyword-list sentiment. Mixed messages are neutral.
pub fn analyze_sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let negative = NEGATIVE_WORDS.iter().any(|w| lower.contains(w));
    let positive = POSITIVE_WORDS.iter().any(|w| lower.contains(w));

    match (negative, positive) {
        (true, false) => Sentiment::Negative,
        (false, true) => Sentiment::Positive,
        _ => Sentiment::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(turns: u32, info: &[&str]) -> GoalState {
        let mut state = GoalState::initial(0);
        state.turns_taken = turns;
        for label in info {
            state.gather(label);
        }
        state
    }

    fn monitor(keywords: &[&str]) -> SafetyMonitor {
        SafetyMonitor::new(SafetyConstraints {
            max_turns: 10,
            escalation_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            stop_if_confused: true,
            min_confidence: 0.7,
        })
    }

    #[test]
    fn test_keyword_escalation_is_case_insensitive() {
        let monitor = monitor(&["angry", "manager"]);
        let result = monitor.check_message(
            &Message::customer("I want to speak to your MANAGER"),
            &state(1, &[]),
        );

        assert!(result.should_escalate);
        assert_eq!(result.triggers, vec!["keyword: \"manager\""]);
    }

    #[test]
    fn test_first_configured_keyword_wins() {
        let monitor = monitor(&["manager", "angry"]);
        let result = monitor.check_message(
            &Message::customer("I'm angry, get me a manager"),
            &state(0, &[]),
        );
        assert_eq!(result.triggers, vec!["keyword: \"manager\""]);
    }

    #[test]
    fn test_keyword_outranks_max_turns() {
        let monitor = monitor(&["lawyer"]);
        let result = monitor.check_message(&Message::customer("my lawyer"), &state(10, &[]));
        assert_eq!(result.triggers, vec!["keyword: \"lawyer\""]);

        let result = monitor.check_message(&Message::customer("ok"), &state(10, &[]));
        assert_eq!(result.triggers, vec!["max turns reached"]);
    }

    #[test]
    fn test_no_progress_rule() {
        let monitor = monitor(&[]);
        let result = monitor.check_message(&Message::customer("hello"), &state(4, &[]));
        assert!(result.should_escalate);
        assert!(result.reason.unwrap().contains("No progress"));
        assert_eq!(result.triggers, vec!["no progress"]);

        let result = monitor.check_message(&Message::customer("hello"), &state(2, &[]));
        assert!(!result.should_escalate);

        // Strictly beyond the threshold
        let result = monitor.check_message(&Message::customer("hello"), &state(3, &[]));
        assert!(!result.should_escalate);

        let result = monitor.check_message(&Message::customer("hello"), &state(4, &["email"]));
        assert!(!result.should_escalate);
    }

    #[test]
    fn test_no_progress_disabled() {
        let mut monitor = monitor(&[]);
        monitor.update_constraints(ConstraintsPatch {
            stop_if_confused: Some(false),
            ..Default::default()
        });
        let result = monitor.check_message(&Message::customer("hello"), &state(5, &[]));
        assert!(!result.should_escalate);
        assert_eq!(monitor.constraints().max_turns, 10);
    }

    #[test]
    fn test_negative_sentiment_alone_does_not_escalate() {
        let monitor = monitor(&[]);
        let result = monitor.check_message(&Message::customer("This is terrible"), &state(1, &[]));
        assert_eq!(result, SafetyCheckResult::safe());
    }

    #[test]
    fn test_confidence_gate() {
        let monitor = monitor(&[]);
        assert!(!monitor.check_confidence(0.69));
        assert!(monitor.check_confidence(0.70));
        assert!(monitor.check_confidence(0.95));
    }

    #[test]
    fn test_sentiment_tie_break() {
        assert_eq!(analyze_sentiment("This is TERRIBLE"), Sentiment::Negative);
        assert_eq!(analyze_sentiment("Thanks, that was great"), Sentiment::Positive);
        assert_eq!(analyze_sentiment("Terrible delay, but thank you"), Sentiment::Neutral);
        assert_eq!(analyze_sentiment("Order #123"), Sentiment::Neutral);
    }

    #[test]
    fn test_safety_status_accumulates_warnings() {
        let monitor = monitor(&[]);
        let status = monitor.get_safety_status(
            &state(8, &[]),
            Some(&Message::customer("This is awful")),
        );

        assert!(!status.safe);
        assert_eq!(
            status.warnings,
            vec![
                "Only 2 turns remaining",
                "No information gathered yet",
                "Negative sentiment detected",
            ]
        );
        assert_eq!(status.stats.turns_remaining, 2);

        let status = monitor.get_safety_status(&state(1, &["email"]), None);
        assert!(status.safe);
        assert!(status.warnings.is_empty());
        assert_eq!(status.stats.sentiment, None);
    }
}
