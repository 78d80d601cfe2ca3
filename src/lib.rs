//! Gmail MCP Automation Engine
//!
//! The core email-automation engine of a Gmail-management platform that
//! exposes high-level mailbox operations to AI assistants through MCP-style
//! tool calls.
//!
//! # Overview
//!
//! Three subsystems carry the weight:
//! - **Rule engine**: declarative rules compile into server-side Gmail
//!   queries plus client-side residual predicates, then apply aggregated
//!   actions in batches
//! - **Gmail operation layer**: a batched, rate-limited, retry-capable
//!   abstraction over the Gmail REST surface (messages, threads, drafts,
//!   labels, settings)
//! - **Tool dispatch & session layer**: a fixed tool catalogue with input
//!   validation, policy enforcement (confirmations, dry-run, phase gating),
//!   and cross-turn session context
//!
//! # Example
//!
//! ```no_run
//! use gmail_mcp_engine::auth;
//! use gmail_mcp_engine::client::HubGmailApi;
//! use gmail_mcp_engine::config::EngineConfig;
//! use gmail_mcp_engine::mcp::{build_registry, Dispatcher, InMemorySessionStore, PhaseGate, Services};
//! use gmail_mcp_engine::rate_limiter::RateLimiter;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::load("engine.toml".as_ref()).await?;
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         "token.json".as_ref(),
//!     ).await?;
//!
//!     let limiter = RateLimiter::new(&config.rate_limit);
//!     let api = Arc::new(HubGmailApi::new(hub, limiter, &config.gmail));
//!     let services = Arc::new(Services::new(api, &config));
//!     let registry = Arc::new(build_registry(services, &config));
//!     let gate = Arc::new(PhaseGate::new(config.tools.current_phase, registry.max_phase())?);
//!     let sessions = Arc::new(InMemorySessionStore::new(
//!         Duration::from_secs(config.session.ttl_hours * 3600),
//!     ));
//!     let _dispatcher = Dispatcher::new(registry, gate, sessions, config.tools.clone());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 hub construction (token acquisition is a collaborator)
//! - [`client`] - Rate-limited, retrying Gmail client behind the `GmailApi` seam
//! - [`batch`] - Per-item batched execution with ordered outcomes
//! - [`rate_limiter`] - Token buckets per operation class
//! - [`labels`] - Label name→id resolution with caching
//! - [`models`] - Mailbox data model (stubs, details, threads, drafts, settings)
//! - [`rules`] - Rule model, store, query translation, residual predicates, engine
//! - [`ops`] - Thin per-resource operation layers
//! - [`mcp`] - Tool catalogue, dispatcher, phase gate, session store
//! - [`config`] - Engine configuration
//! - [`error`] - Error taxonomy and result alias

pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod labels;
pub mod mcp;
pub mod models;
pub mod ops;
pub mod rate_limiter;
pub mod rules;

pub mod cli;

// Re-export commonly used types for convenience
pub use error::{EngineError, ErrorKind, Result};

// Core data models
pub use models::{
    AttachmentInfo, DraftView, EmailDetails, EmailStub, LabelInfo, MessageFormat, ThreadStub,
    ThreadView,
};

// Client seam
pub use client::{GmailApi, HubGmailApi, ListParams};

// Batching
pub use batch::{BatchExecutor, ItemFailure, ItemOutcome};

// Rules
pub use rules::{
    Action, ApplyRulesRequest, ApplyRulesSummary, Condition, ConditionField, ConditionOperator,
    Conjunction, Rule, RuleDefinition, RuleEngine, RuleStore,
};

// Dispatch plane
pub use mcp::{
    build_registry, Dispatcher, InMemorySessionStore, PhaseGate, Services, SessionStore,
    ToolRegistry, ToolRequest, ToolResponse,
};

// Configuration
pub use config::EngineConfig;
