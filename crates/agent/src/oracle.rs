//! The oracle adapter: renders the phase instruction, runs the optional tool
//! round trip and turns whatever comes back into a reply and a verdict.
//! Oracle problems never escape as errors; they degrade to canned replies.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use intake_core::flows::VehicleIdentity;
use intake_core::interpret::{rules, Authority, OracleVerdict, ESCALATION_MARKER};

use crate::conversation::{MALFORMED_REPLY, ORACLE_FAILURE_REPLY};
use crate::guardrails::{ToolDecision, ToolPolicy};
use crate::llm::{ChatMessage, ChatRequest, LlmClient, LlmError, ToolChoice};
use crate::prompts::{render_instruction, OracleRequest};
use crate::tools::{
    argument_year, failure, ToolExecution, ToolRegistry, INSPIRATIONAL_QUOTE,
    VALIDATE_VEHICLE_INFO, VALIDATE_VIN,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleReply {
    /// User-facing text.
    pub content: String,
    pub verdict: OracleVerdict,
}

#[derive(Debug, Error)]
pub enum OracleFailure {
    #[error("oracle unavailable: {0}")]
    Unavailable(#[from] LlmError),
    #[error("oracle returned no content")]
    Empty,
    #[error("oracle output is not the reply contract: {0}")]
    Malformed(String),
}

impl OracleFailure {
    pub fn reply(&self) -> OracleReply {
        let content = match self {
            Self::Unavailable(_) | Self::Empty => ORACLE_FAILURE_REPLY,
            Self::Malformed(_) => MALFORMED_REPLY,
        };
        OracleReply { content: content.to_string(), verdict: OracleVerdict::invalid() }
    }
}

#[async_trait]
pub trait OracleAdapter: Send + Sync {
    async fn respond(&self, request: &OracleRequest, correlation_id: &str) -> OracleReply;
}

pub struct LlmOracle {
    client: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    policy: ToolPolicy,
}

impl LlmOracle {
    pub fn new(client: Arc<dyn LlmClient>, tools: ToolRegistry, policy: ToolPolicy) -> Self {
        Self { client, tools, policy }
    }

    async fn exchange(&self, request: &OracleRequest) -> Result<OracleReply, OracleFailure> {
        let offered = self.policy.offered_tools(request.phase);
        let definitions = self.tools.definitions(&offered);
        let mut messages = vec![ChatMessage::system(render_instruction(request, &offered))];

        let first = self
            .client
            .complete(&ChatRequest {
                messages: messages.clone(),
                tools: definitions.clone(),
                tool_choice: ToolChoice::Auto,
            })
            .await?;

        if first.tool_calls.is_empty() {
            return parse_reply(first.content.as_deref());
        }

        messages.push(first.clone());
        let mut executions = Vec::new();
        for call in &first.tool_calls {
            let execution = match self.policy.evaluate(request.phase, &call.function.name) {
                ToolDecision::Allow => self.tools.invoke(call).await,
                ToolDecision::Deny { reason_code, user_message } => {
                    warn!(
                        event_name = "agent.tool_denied",
                        tool = %call.function.name,
                        reason_code,
                        "tool call refused"
                    );
                    ToolExecution {
                        call_id: call.id.clone(),
                        name: call.function.name.clone(),
                        arguments: Value::Null,
                        result: failure(user_message),
                    }
                }
            };
            messages
                .push(ChatMessage::tool_result(&execution.call_id, execution.result.to_string()));
            executions.push(execution);
        }

        messages.push(ChatMessage::system(format!(
            "Based on the tool result: {} Now respond in valid JSON format. Use double quoted keys \
             and values. Exact format: {{\"content\": \"<your reply>\", \"valid\": true|false, \
             \"extracted\": \"<the data you extracted if valid, if not, then none>\"}}",
            tool_summary(&executions)
        )));

        let second = self
            .client
            .complete(&ChatRequest { messages, tools: definitions, tool_choice: ToolChoice::None })
            .await?;
        let mut reply = parse_reply(second.content.as_deref())?;
        if let Some(verdict) = verdict_from_tools(&executions) {
            reply.verdict = verdict;
        }
        Ok(reply)
    }
}

#[async_trait]
impl OracleAdapter for LlmOracle {
    async fn respond(&self, request: &OracleRequest, correlation_id: &str) -> OracleReply {
        match self.exchange(request).await {
            Ok(reply) => {
                info!(
                    event_name = "oracle.replied",
                    correlation_id,
                    phase = request.phase.label(),
                    valid = reply.verdict.valid,
                    authority = ?reply.verdict.authority,
                    "oracle replied"
                );
                reply
            }
            Err(error) => {
                warn!(
                    event_name = "oracle.degraded",
                    correlation_id,
                    phase = request.phase.label(),
                    error = %error,
                    "oracle reply replaced with canned content"
                );
                error.reply()
            }
        }
    }
}

#[derive(Deserialize)]
struct ReplyPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    valid: Value,
    #[serde(default)]
    extracted: Value,
}

/// Parses the `{content, valid, extracted}` contract, tolerating a surrounding
/// code fence with an optional `json` tag.
pub fn parse_reply(raw: Option<&str>) -> Result<OracleReply, OracleFailure> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty()).ok_or(OracleFailure::Empty)?;
    let payload: ReplyPayload = serde_json::from_str(strip_code_fence(raw))
        .map_err(|error| OracleFailure::Malformed(error.to_string()))?;
    if payload.content.trim().is_empty() {
        return Err(OracleFailure::Empty);
    }

    let valid = match &payload.valid {
        Value::Bool(valid) => *valid,
        Value::String(valid) => valid.trim().eq_ignore_ascii_case("true"),
        _ => false,
    };
    let extracted = match payload.extracted {
        Value::String(value) => Some(value),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    };

    Ok(OracleReply {
        content: payload.content,
        verdict: OracleVerdict::from_oracle(valid, extracted),
    })
}

fn strip_code_fence(raw: &str) -> &str {
    if !raw.starts_with("```") {
        return raw;
    }
    let inner = raw.split("```").nth(1).unwrap_or_default();
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

fn is_valid(result: &Value) -> bool {
    result.get("valid").and_then(Value::as_bool).unwrap_or(false)
}

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).map(str::trim).filter(|text| !text.is_empty())
}

/// The verdict implied by the executed tools. An escalation wins; otherwise the
/// last vehicle lookup decides. Refused calls carry no arguments and are skipped.
pub fn verdict_from_tools(executions: &[ToolExecution]) -> Option<OracleVerdict> {
    let mut verdict = None;
    for execution in executions.iter().filter(|execution| !execution.arguments.is_null()) {
        match execution.name.as_str() {
            INSPIRATIONAL_QUOTE => {
                return Some(tool_verdict(true, Some(ESCALATION_MARKER.to_string()), None));
            }
            VALIDATE_VIN => verdict = Some(vin_verdict(execution)),
            VALIDATE_VEHICLE_INFO => verdict = Some(vehicle_info_verdict(execution)),
            _ => {}
        }
    }
    verdict
}

fn tool_verdict(
    valid: bool,
    extracted: Option<String>,
    vehicle: Option<VehicleIdentity>,
) -> OracleVerdict {
    OracleVerdict { valid, extracted, authority: Authority::Tool, vehicle }
}

fn vin_verdict(execution: &ToolExecution) -> OracleVerdict {
    let vin = text(&execution.arguments, "vin").and_then(rules::normalize_vin);
    let (true, Some(vin)) = (is_valid(&execution.result), vin) else {
        return tool_verdict(false, None, None);
    };
    let known = |key: &str| {
        text(&execution.result, key).filter(|value| !value.eq_ignore_ascii_case("unknown"))
    };
    let identity = VehicleIdentity {
        vin: Some(vin.clone()),
        year: known("year").and_then(|year| year.parse::<i32>().ok()),
        make: known("make").map(str::to_string),
        body_type: known("body_type").map(str::to_string),
    };
    tool_verdict(true, Some(vin), Some(identity))
}

fn vehicle_info_verdict(execution: &ToolExecution) -> OracleVerdict {
    let arguments = &execution.arguments;
    let described = (
        argument_year(arguments),
        text(arguments, "make"),
        text(arguments, "body_type"),
    );
    let (true, (Some(year), Some(make), Some(body_type))) = (is_valid(&execution.result), described)
    else {
        return tool_verdict(false, None, None);
    };
    let identity = VehicleIdentity::from_description(year, make, body_type);
    tool_verdict(true, Some(identity.canonical()), Some(identity))
}

/// Plain-language account of the tool results for the second oracle pass.
fn tool_summary(executions: &[ToolExecution]) -> String {
    let mut summary = String::new();
    for execution in executions {
        let result = &execution.result;
        let error = text(result, "error").unwrap_or("Unknown error");
        let line = match execution.name.as_str() {
            _ if execution.arguments.is_null() => format!(
                "The {} call could not be used: {error}. Set valid: false and extracted: 'none'. ",
                execution.name
            ),
            VALIDATE_VIN => {
                let vin = text(&execution.arguments, "vin").unwrap_or_default();
                if is_valid(result) {
                    format!(
                        "The VIN {vin} is VALID. Vehicle: {} {} {}. Set valid: true and \
                         extracted: '{vin}'. ",
                        text(result, "year").unwrap_or("Unknown"),
                        text(result, "make").unwrap_or("Unknown"),
                        text(result, "body_type").unwrap_or("Unknown"),
                    )
                } else {
                    format!(
                        "The VIN {vin} is INVALID. Error: {error}. Set valid: false and \
                         extracted: 'none'. Inform the user immediately why the VIN is invalid. "
                    )
                }
            }
            VALIDATE_VEHICLE_INFO => {
                let description = format!(
                    "{} {} {}",
                    argument_year(&execution.arguments)
                        .map(|year| year.to_string())
                        .unwrap_or_default(),
                    text(&execution.arguments, "make").unwrap_or_default(),
                    text(&execution.arguments, "body_type").unwrap_or_default(),
                );
                if is_valid(result) {
                    format!(
                        "The vehicle {description} is VALID. Set valid: true and extracted: \
                         '{description}'. "
                    )
                } else {
                    format!(
                        "The vehicle {description} is INVALID. Error: {error}. Set valid: false \
                         and extracted: 'none'. Inform the user immediately why it is invalid. "
                    )
                }
            }
            INSPIRATIONAL_QUOTE => format!(
                "An inspirational quote was fetched: '{}' by {}. Share this quote with the user, \
                 acknowledge their request, and let them know you're connecting them to an agent. \
                 Set valid: true and extracted: '{ESCALATION_MARKER}'. ",
                text(result, "quote").unwrap_or_default(),
                text(result, "author").unwrap_or("Unknown"),
            ),
            other => format!("The tool {other} returned: {result}. "),
        };
        summary.push_str(&line);
    }
    summary
}
