//! Tool definitions and the registry
//!
//! A tool is a named operation with an input schema, a phase number, policy
//! flags, and a uniform async handler `(input, context) -> Result<Value>`.
//! Dynamic dispatch is a name-keyed map built once at startup; registering
//! two tools with the same name is a programmer error and panics there.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{EngineError, Result};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(Value, ToolContext) -> HandlerFuture + Send + Sync>;

/// Policy classification enforced by the dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolPolicy {
    /// Requires `dry_run=true` or one confirmation token
    pub destructive: bool,
    /// Permanent deletion: requires two distinct confirmation tokens
    pub double_confirm: bool,
    /// Settings writes: requires one confirmation token
    pub write_settings: bool,
    /// What an absent `dry_run` input means for this tool
    pub dry_run_default: bool,
}

#[derive(Clone)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    /// Exposed when `phase <= current_phase`
    pub phase: u8,
    pub policy: ToolPolicy,
    pub input_schema: Value,
    /// Per-call deadline override in ms (defaults to the dispatcher's)
    pub timeout_ms: Option<u64>,
    pub handler: Handler,
}

impl std::fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .finish()
    }
}

/// Per-invocation context passed to handlers.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub turn_index: u64,
    pub timestamp: DateTime<Utc>,
    pub deadline: Instant,
}

/// The fixed tool catalogue.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, ToolDef>,
    max_phase: u8,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ToolDef) {
        assert!(
            def.phase >= 1,
            "tool '{}' must have a phase of at least 1",
            def.name
        );
        self.max_phase = self.max_phase.max(def.phase);
        let name = def.name;
        if self.tools.insert(name, def).is_some() {
            panic!("duplicate tool registered: {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDef> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Highest phase any registered tool carries.
    pub fn max_phase(&self) -> u8 {
        self.max_phase
    }

    /// Names exposed at a given phase, sorted.
    pub fn names_for_phase(&self, phase: u8) -> Vec<&'static str> {
        self.tools
            .values()
            .filter(|t| t.phase <= phase)
            .map(|t| t.name)
            .collect()
    }
}

/// Deserialize a tool input into its typed request, mapping failures to
/// parameter-specific `InvalidInput` messages.
pub fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T> {
    serde_json::from_value(input).map_err(|e| EngineError::InvalidInput(e.to_string()))
}

/// Wrap a typed async closure into the uniform handler shape.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |input, ctx| Box::pin(f(input, ctx)))
}
