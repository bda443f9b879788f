// Qualibot Engine — Agent Runtime (C4)
// A thin contract over the underlying LLM. Side-effect-free: every tool
// invocation the model proposes comes back through the Turn for the
// orchestrator (C6) to apply; this module never touches the store.

pub mod tools;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Message, Stage};
use crate::engine::http::{is_retryable_status, retry_delay, CircuitBreaker};
use async_trait::async_trait;
use log::{error, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tools::ToolDefinition;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

/// What a single advance() call produces. No field here has been persisted
/// anywhere — the orchestrator owns applying these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Turn {
    pub assistant_text: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub proposed_stage: Option<Stage>,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn advance(&self, history: &[Message], stage: Stage, available_tools: &[ToolDefinition]) -> EngineResult<Turn>;
}

/// Type-erased runtime so the orchestrator can hold one without knowing the
/// concrete LLM backend.
pub struct AnyAgentRuntime(Box<dyn AgentRuntime>);

impl AnyAgentRuntime {
    pub fn new(inner: Box<dyn AgentRuntime>) -> Self {
        Self(inner)
    }
}

#[async_trait]
impl AgentRuntime for AnyAgentRuntime {
    async fn advance(&self, history: &[Message], stage: Stage, available_tools: &[ToolDefinition]) -> EngineResult<Turn> {
        self.0.advance(history, stage, available_tools).await
    }
}

const AGENT_BASE_DELAY_MS: u64 = 1_000;
const AGENT_MAX_DELAY_MS: u64 = 20_000;
const AGENT_MAX_RETRIES: u32 = 2;

fn system_preamble(stage: Stage) -> String {
    format!(
        "You are a lead-qualification assistant for a software consultancy. \
         The conversation is currently at stage `{}`. Collect only what that stage \
         requires, use the available tools to record data, and keep replies brief.",
        stage.as_str()
    )
}

/// Non-streaming OpenAI-compatible chat-completions client (grounded on the
/// streaming provider this was adapted from; the agent loop here needs only
/// the final message, not incremental deltas).
pub struct HttpAgentRuntime {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    breaker: CircuitBreaker,
}

impl HttpAgentRuntime {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            breaker: CircuitBreaker::new(5, 60),
        }
    }

    fn format_messages(stage: Stage, history: &[Message]) -> Vec<Value> {
        let mut out = vec![json!({ "role": "system", "content": system_preamble(stage) })];
        out.extend(history.iter().map(|m| {
            json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        }));
        out
    }

    fn format_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn advance(&self, history: &[Message], stage: Stage, available_tools: &[ToolDefinition]) -> EngineResult<Turn> {
        self.breaker.check().map_err(|e| EngineError::transient("agent", e))?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": self.model,
            "messages": Self::format_messages(stage, history),
        });
        if !available_tools.is_empty() {
            body["tools"] = json!(Self::format_tools(available_tools));
        }

        let mut attempt = 0;
        loop {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let resp = match response {
                Ok(r) => r,
                Err(err) if attempt < AGENT_MAX_RETRIES => {
                    self.breaker.record_failure();
                    warn!("[agent] network error, attempt {attempt}: {err}");
                    retry_delay(attempt, AGENT_BASE_DELAY_MS, AGENT_MAX_DELAY_MS, None).await;
                    attempt += 1;
                    continue;
                }
                Err(err) => {
                    self.breaker.record_failure();
                    return Err(EngineError::from_reqwest("agent", err));
                }
            };

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(crate::engine::http::parse_retry_after);
                let text = resp.text().await.unwrap_or_default();
                error!("[agent] api error {status}: {text}");
                self.breaker.record_failure();

                if status == 401 || status == 403 {
                    return Err(EngineError::permanent("agent", format!("auth rejected: {status}")));
                }
                if is_retryable_status(status) && attempt < AGENT_MAX_RETRIES {
                    retry_delay(attempt, AGENT_BASE_DELAY_MS, AGENT_MAX_DELAY_MS, retry_after).await;
                    attempt += 1;
                    continue;
                }
                return Err(EngineError::transient("agent", format!("status {status}: {text}")));
            }

            self.breaker.record_success();
            let wire: ChatCompletionWire = resp.json().await.map_err(|e| EngineError::from_reqwest("agent", e))?;
            return Ok(parse_turn(wire));
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionWire {
    choices: Vec<ChoiceWire>,
}

#[derive(Debug, Deserialize)]
struct ChoiceWire {
    message: ChoiceMessageWire,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessageWire {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallWire>,
}

#[derive(Debug, Deserialize)]
struct ToolCallWire {
    function: ToolCallFunctionWire,
}

#[derive(Debug, Deserialize)]
struct ToolCallFunctionWire {
    name: String,
    arguments: String,
}

fn parse_turn(wire: ChatCompletionWire) -> Turn {
    let Some(choice) = wire.choices.into_iter().next() else {
        return Turn::default();
    };

    let tool_invocations = choice
        .message
        .tool_calls
        .into_iter()
        .filter_map(|tc| {
            let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or(Value::Null);
            Some(ToolInvocation { name: tc.function.name, arguments })
        })
        .collect();

    Turn {
        assistant_text: choice.message.content.unwrap_or_default(),
        tool_invocations,
        proposed_stage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_turn_extracts_tool_calls() {
        let wire = ChatCompletionWire {
            choices: vec![ChoiceWire {
                message: ChoiceMessageWire {
                    content: Some("Thanks!".into()),
                    tool_calls: vec![ToolCallWire {
                        function: ToolCallFunctionWire {
                            name: "record_consent".into(),
                            arguments: "{\"consent\":true}".into(),
                        },
                    }],
                },
            }],
        };
        let turn = parse_turn(wire);
        assert_eq!(turn.assistant_text, "Thanks!");
        assert_eq!(turn.tool_invocations.len(), 1);
        assert_eq!(turn.tool_invocations[0].name, "record_consent");
    }

    #[test]
    fn parse_turn_handles_empty_choices() {
        let turn = parse_turn(ChatCompletionWire { choices: vec![] });
        assert!(turn.assistant_text.is_empty());
        assert!(turn.tool_invocations.is_empty());
    }
}
