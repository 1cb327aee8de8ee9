//! Conversation context analysis
//!
//! Lightweight hints attached to generator requests: trimmed transcript,
//! coarse intent, and entities (order numbers, e-mail addresses).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::model::Message;

/// Most messages a generator request may carry
pub const MAX_CONTEXT_MESSAGES: usize = 50;

static ORDER_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\d+").expect("valid regex"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    OrderInquiry,
    RefundRequest,
    GeneralInquiry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    pub order_numbers: Vec<String>,
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub intent: Intent,
    pub entities: Entities,
    pub message_count: usize,
}

/// Analyze a conversation window
pub fn analyze(messages: &[Message]) -> Result<ContextAnalysis, ContextError> {
    if messages.is_empty() {
        return Err(ContextError::Empty);
    }
    if messages.len() > MAX_CONTEXT_MESSAGES {
        return Err(ContextError::TooLong(messages.len()));
    }

    let mut entities = Entities::default();
    let mut all_content = String::new();

    for message in messages {
        let content = message.content.trim();
        for m in ORDER_NUMBER.find_iter(content) {
            push_unique(&mut entities.order_numbers, m.as_str());
        }
        for m in EMAIL.find_iter(content) {
            push_unique(&mut entities.emails, m.as_str());
        }
        all_content.push_str(&content.to_lowercase());
        all_content.push(' ');
    }

    Ok(ContextAnalysis {
        intent: detect_intent(&all_content),
        entities,
        message_count: messages.len(),
    })
}

/// Last `limit` messages, oldest first
pub fn tail(messages: &[Message], limit: usize) -> Vec<Message> {
    messages[messages.len().saturating_sub(limit)..].to_vec()
}

fn detect_intent(lower: &str) -> Intent {
    if ["order", "shipping", "delivery"].iter().any(|w| lower.contains(w)) {
        Intent::OrderInquiry
    } else if ["refund", "return", "cancel"].iter().any(|w| lower.contains(w)) {
        Intent::RefundRequest
    } else {
        Intent::GeneralInquiry
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entities_and_order_intent() {
        let messages = vec![
            Message::customer("My order hasn't arrived yet"),
            Message::agent("Could you share the order number?"),
            Message::customer("It's #12345, email me at jo@example.com. Also #12345 again"),
        ];
        let analysis = analyze(&messages).unwrap();

        assert_eq!(analysis.intent, Intent::OrderInquiry);
        assert_eq!(analysis.entities.order_numbers, vec!["#12345"]);
        assert_eq!(analysis.entities.emails, vec!["jo@example.com"]);
        assert_eq!(analysis.message_count, 3);
    }

    #[test]
    fn test_intent_priority() {
        let refund = analyze(&[Message::customer("I want a refund")]).unwrap();
        assert_eq!(refund.intent, Intent::RefundRequest);

        // Order keywords win over refund keywords
        let both = analyze(&[Message::customer("Cancel my order please")]).unwrap();
        assert_eq!(both.intent, Intent::OrderInquiry);

        let general = analyze(&[Message::customer("Hi there")]).unwrap();
        assert_eq!(general.intent, Intent::GeneralInquiry);
    }

    #[test]
    fn test_context_bounds() {
        assert_eq!(analyze(&[]), Err(ContextError::Empty));

        let many: Vec<_> = (0..51).map(|i| Message::customer(format!("m{}", i))).collect();
        assert_eq!(analyze(&many), Err(ContextError::TooLong(51)));

        let last = tail(&many, 10);
        assert_eq!(last.len(), 10);
        assert_eq!(last[0].content, "m41");
    }
}
