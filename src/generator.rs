//! Response Generator
//!
//! The reply backend is an opaque, possibly slow, possibly failing black
//! box. Every call goes through [`with_deadline`], which enforces a
//! timeout and aborts early on cancellation. Failures are never retried
//! within a turn.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::{self, ContextAnalysis, MAX_CONTEXT_MESSAGES};
use crate::error::GeneratorError;
use crate::model::{GoalSpec, GoalState, GoalStatePatch, Message, SafetyConstraints};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Professional,
    Friendly,
    Empathetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
    Short,
    Medium,
    Long,
}

/// Style hints for suggestions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<ResponseLength>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_greeting: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestRequest {
    /// Echoed back in response metadata; feedback refers to it
    pub request_id: String,
    pub platform: String,
    pub conversation_context: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_preferences: Option<UserPreferences>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_hints: Option<ContextAnalysis>,
}

impl SuggestRequest {
    /// Build a request over the trailing `MAX_CONTEXT_MESSAGES` messages
    pub fn new(platform: &str, messages: &[Message]) -> Result<Self, GeneratorError> {
        let conversation_context = context::tail(messages, MAX_CONTEXT_MESSAGES);
        let hints = context::analyze(&conversation_context)?;
        Ok(Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            platform: platform.to_string(),
            conversation_context,
            user_preferences: None,
            context_hints: Some(hints),
        })
    }

    pub fn with_preferences(mut self, preferences: UserPreferences) -> Self {
        self.user_preferences = Some(preferences);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "text")]
    pub content: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutonomousRequest {
    pub conversation_context: Vec<Message>,
    pub goal: GoalSpec,
    pub goal_state: GoalState,
    pub safety_constraints: SafetyConstraints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_hints: Option<ContextAnalysis>,
}

impl AutonomousRequest {
    pub fn new(
        messages: &[Message],
        goal: &GoalSpec,
        goal_state: &GoalState,
        safety_constraints: &SafetyConstraints,
    ) -> Result<Self, GeneratorError> {
        let conversation_context = context::tail(messages, MAX_CONTEXT_MESSAGES);
        let hints = context::analyze(&conversation_context)?;
        Ok(Self {
            conversation_context,
            goal: goal.clone(),
            goal_state: goal_state.clone(),
            safety_constraints: safety_constraints.clone(),
            context_hints: Some(hints),
        })
    }
}

/// What the generator wants the orchestrator to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    Respond,
    Escalate,
    GoalComplete,
    NeedInfo,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentAction::Respond => "respond",
            AgentAction::Escalate => "escalate",
            AgentAction::GoalComplete => "goal_complete",
            AgentAction::NeedInfo => "need_info",
        }
    }
}

/// Generator decision for one autonomous turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousDecision {
    pub action: AgentAction,
    #[serde(default, alias = "response_text")]
    pub response: Option<String>,
    #[serde(default, alias = "reasoning")]
    pub reason: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "updated_state")]
    pub goal_state: Option<GoalStatePatch>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AutonomousDecision {
    pub fn new(action: AgentAction) -> Self {
        Self {
            action,
            response: None,
            reason: None,
            confidence: None,
            goal_state: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn respond(text: &str, confidence: f64) -> Self {
        Self {
            response: Some(text.to_string()),
            confidence: Some(confidence),
            ..Self::new(AgentAction::Respond)
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_goal_state(mut self, patch: GoalStatePatch) -> Self {
        self.goal_state = Some(patch);
        self
    }

    /// Declared confidence, falling back to `metadata.confidence`
    pub fn confidence(&self) -> Option<f64> {
        self.confidence
            .or_else(|| self.metadata.get("confidence").and_then(|v| v.as_f64()))
    }
}

/// Reply generation backend
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn suggest(&self, request: &SuggestRequest) -> Result<SuggestResponse, GeneratorError>;

    async fn act_autonomously(
        &self,
        request: &AutonomousRequest,
    ) -> Result<AutonomousDecision, GeneratorError>;
}

/// Run a generator call with a hard deadline, aborting early on `cancel`
pub async fn with_deadline<T, F>(
    call: F,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<T, GeneratorError>
where
    F: Future<Output = Result<T, GeneratorError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(GeneratorError::Cancelled),
        result = tokio::time::timeout(deadline, call) => match result {
            Ok(inner) => inner,
            Err(_) => Err(GeneratorError::Timeout(deadline)),
        },
    }
}

/// HTTP client for the reply backend
#[derive(Clone)]
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerator {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|s| s.to_string()),
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(&config.api_url, config.api_key.as_deref())
    }

    /// Whether the backend answers its health check
    pub async fn health(&self) -> Result<bool, GeneratorError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, GeneratorError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(GeneratorError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| GeneratorError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ResponseGenerator for HttpGenerator {
    async fn suggest(&self, request: &SuggestRequest) -> Result<SuggestResponse, GeneratorError> {
        let response: SuggestResponse = self.post("/api/suggest-response", request).await?;
        info!("Received {} suggestion(s)", response.suggestions.len());
        Ok(response)
    }

    async fn act_autonomously(
        &self,
        request: &AutonomousRequest,
    ) -> Result<AutonomousDecision, GeneratorError> {
        let decision: AutonomousDecision = self.post("/api/autonomous-response", request).await?;
        info!("Generator decided: {}", decision.action.as_str());
        Ok(decision)
    }
}
