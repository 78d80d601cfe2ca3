//! Tool dispatch
//!
//! One fixed pipeline for every call: lookup, phase gate, input
//! normalisation, policy, handler invocation under a deadline, session
//! append, uniform response. Handlers never raise past this layer; every
//! outcome becomes `{ is_error, output }`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ToolsConfig;
use crate::error::{EngineError, Result};
use crate::mcp::phase::PhaseGate;
use crate::mcp::session::{SessionStore, TurnRecord};
use crate::mcp::tool::{ToolContext, ToolDef, ToolRegistry};

fn default_session() -> String {
    "default".to_string()
}

/// Incoming typed request (transport framing is a collaborator concern).
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Confirmation tokens supplied for this turn
    #[serde(default)]
    pub confirmations: Vec<String>,
}

/// Uniform response shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub is_error: bool,
    pub output: Value,
}

impl ToolResponse {
    fn ok(output: Value) -> Self {
        ToolResponse {
            is_error: false,
            output,
        }
    }

    fn error(err: &EngineError) -> Self {
        ToolResponse {
            is_error: true,
            output: json!({
                "error_message": err.to_string(),
                "kind": err.kind(),
            }),
        }
    }

    /// Informational non-error text (phase-gated tools), so clients that
    /// probe the catalogue stay stable.
    fn info(text: String) -> Self {
        ToolResponse {
            is_error: false,
            output: json!({ "message": text }),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    gate: Arc<PhaseGate>,
    sessions: Arc<dyn SessionStore>,
    config: ToolsConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        gate: Arc<PhaseGate>,
        sessions: Arc<dyn SessionStore>,
        config: ToolsConfig,
    ) -> Self {
        Self {
            registry,
            gate,
            sessions,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &PhaseGate {
        &self.gate
    }

    /// Names exposed to clients right now.
    pub fn exposed_tools(&self) -> Vec<&'static str> {
        self.gate.exposed(&self.registry)
    }

    /// Run one tool call end to end.
    pub async fn dispatch(&self, request: ToolRequest) -> ToolResponse {
        let started = Instant::now();
        let user_id = request.user_id.clone().unwrap_or_else(|| "me".to_string());

        let Some(tool) = self.registry.get(&request.tool_name) else {
            return ToolResponse::error(&EngineError::ToolNotFound(request.tool_name.clone()));
        };

        if !self.gate.is_exposed(&self.registry, tool.name) {
            debug!(tool = tool.name, phase = self.gate.current_phase(), "tool gated");
            return ToolResponse::info(format!(
                "Tool '{}' is not available in the current phase",
                tool.name
            ));
        }

        let response = match self.run_tool(tool, &request, &user_id).await {
            Ok(output) => ToolResponse::ok(output),
            Err(err) => {
                warn!(tool = tool.name, error = %err, "tool call failed");
                ToolResponse::error(&err)
            }
        };

        self.record_turn(tool, &request, &user_id, &response).await;
        self.check_phase_target(tool, started.elapsed());

        response
    }

    async fn run_tool(
        &self,
        tool: &ToolDef,
        request: &ToolRequest,
        user_id: &str,
    ) -> Result<Value> {
        let input = normalize_input(request.input.clone(), &tool.input_schema)?;
        self.enforce_policy(tool, &input, &request.confirmations)?;

        let timeout =
            Duration::from_millis(tool.timeout_ms.unwrap_or(self.config.default_timeout_ms));
        let context = ToolContext {
            user_id: user_id.to_string(),
            session_id: request.session_id.clone(),
            tool_name: tool.name.to_string(),
            turn_index: self
                .sessions
                .next_turn_index(user_id, &request.session_id)
                .await
                .unwrap_or(0),
            timestamp: Utc::now(),
            deadline: Instant::now() + timeout,
        };

        match tokio::time::timeout(timeout, (tool.handler)(input, context)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Cancelled(format!(
                "tool '{}' exceeded its {}ms deadline",
                tool.name,
                timeout.as_millis()
            ))),
        }
    }

    fn enforce_policy(&self, tool: &ToolDef, input: &Value, confirmations: &[String]) -> Result<()> {
        if !self.config.require_confirmation_for_destructive {
            return Ok(());
        }

        let distinct: BTreeSet<&str> = confirmations
            .iter()
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
            .collect();

        if tool.policy.double_confirm {
            // Permanent deletion is unrecoverable: two distinct tokens in the
            // same turn, dry_run does not substitute
            if distinct.len() < 2 {
                return Err(EngineError::PolicyDenied(format!(
                    "confirmation required: '{}' needs two distinct confirmation tokens",
                    tool.name
                )));
            }
            return Ok(());
        }

        if tool.policy.destructive {
            let dry_run = input
                .get("dry_run")
                .and_then(Value::as_bool)
                .unwrap_or(tool.policy.dry_run_default);
            if !dry_run && distinct.is_empty() {
                return Err(EngineError::PolicyDenied(format!(
                    "confirmation required: '{}' is destructive; pass a confirmation token or dry_run=true",
                    tool.name
                )));
            }
            return Ok(());
        }

        if tool.policy.write_settings && distinct.is_empty() {
            return Err(EngineError::PolicyDenied(format!(
                "confirmation required: '{}' modifies account settings",
                tool.name
            )));
        }

        Ok(())
    }

    async fn record_turn(
        &self,
        tool: &ToolDef,
        request: &ToolRequest,
        user_id: &str,
        response: &ToolResponse,
    ) {
        let turn_index = self
            .sessions
            .next_turn_index(user_id, &request.session_id)
            .await
            .unwrap_or(0);

        let record = TurnRecord {
            turn_index,
            tool_name: tool.name.to_string(),
            input: request.input.clone(),
            output_or_error: response.output.clone(),
            is_error: response.is_error,
            confirmations: request.confirmations.clone(),
            timestamp: Utc::now(),
        };

        // Fire-and-forget: session history is best-effort context, never a
        // reason to fail the call
        if let Err(e) = self
            .sessions
            .append(user_id, &request.session_id, record)
            .await
        {
            warn!(error = %e, "session append failed; continuing without history");
        }
    }

    fn check_phase_target(&self, tool: &ToolDef, elapsed: Duration) {
        for target in &self.config.phase_targets {
            if target.phase == tool.phase && elapsed.as_millis() as u64 > target.max_response_ms {
                warn!(
                    tool = tool.name,
                    phase = tool.phase,
                    elapsed_ms = elapsed.as_millis() as u64,
                    target_ms = target.max_response_ms,
                    "phase response-time target exceeded"
                );
            }
        }
    }
}

/// Normalisation step: array parameters that arrive as JSON-encoded strings
/// are parsed into arrays. That is the only coercion; anything else must
/// already have the declared type.
fn normalize_input(mut input: Value, schema: &Value) -> Result<Value> {
    // A missing input body means "no parameters"
    if input.is_null() {
        input = json!({});
    }
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(input);
    };
    let Some(object) = input.as_object_mut() else {
        return Ok(input);
    };

    for (name, spec) in properties {
        if spec.get("type").and_then(Value::as_str) != Some("array") {
            continue;
        }
        let Some(value) = object.get(name) else {
            continue;
        };
        if let Value::String(text) = value {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => {
                    object.insert(name.clone(), Value::Array(items));
                }
                _ => {
                    return Err(EngineError::InvalidInput(format!(
                        "parameter '{name}' must be an array (or a JSON-encoded array string)"
                    )));
                }
            }
        }
    }

    Ok(input)
}
