//! Command-line interface
//!
//! The binary stays thin: `auth` warms the OAuth token cache, `serve` pumps
//! line-delimited JSON tool requests through the dispatcher (a demonstration
//! channel; real MCP transport framing is a collaborator), and `tools`
//! prints the catalogue exposed at the configured phase.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use crate::auth;
use crate::client::{DraftPage, GmailApi, HubGmailApi, ListParams};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::mcp::{build_registry, Dispatcher, InMemorySessionStore, PhaseGate, Services, ToolRequest};
use crate::models::{
    DraftView, EmailDetails, ImapSettingsView, LabelInfo, MessageFormat, MessagePage,
    PopSettingsView, ThreadPage, ThreadView, VacationSettingsView,
};
use crate::rate_limiter::RateLimiter;

#[derive(Parser, Debug)]
#[command(name = "gmail-mcp-engine")]
#[command(about = "Gmail automation engine driven over MCP tool calls", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "engine.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = "token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with the Gmail API and cache the token
    Auth {
        /// Force re-authentication even if a token exists
        #[arg(long)]
        force: bool,
    },

    /// Serve tool requests as line-delimited JSON on stdin/stdout
    Serve,

    /// Print the tool catalogue exposed at the configured phase
    Tools,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = EngineConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Auth { force } => {
            if force && cli.token_cache.exists() {
                tokio::fs::remove_file(&cli.token_cache).await?;
                info!("removed cached token for re-authentication");
            }
            auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
            println!("authenticated; token cached at {}", cli.token_cache.display());
            Ok(())
        }
        Commands::Serve => {
            let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
            let limiter = RateLimiter::new(&config.rate_limit);
            let api: Arc<dyn GmailApi> = Arc::new(HubGmailApi::new(hub, limiter, &config.gmail));
            let dispatcher = build_dispatcher(api, &config)?;
            serve(dispatcher).await
        }
        Commands::Tools => {
            // Listing needs no live mailbox; an unconnected client suffices
            let api: Arc<dyn GmailApi> = Arc::new(OfflineGmailApi);
            let dispatcher = build_dispatcher(api, &config)?;
            let registry = dispatcher.registry();
            println!(
                "phase {} exposes {} tool(s):",
                dispatcher.gate().current_phase(),
                dispatcher.exposed_tools().len()
            );
            for name in dispatcher.exposed_tools() {
                let tool = registry.get(name).expect("exposed tool registered");
                println!("  {:<28} {}", tool.name, tool.description);
            }
            Ok(())
        }
    }
}

fn build_dispatcher(api: Arc<dyn GmailApi>, config: &EngineConfig) -> anyhow::Result<Dispatcher> {
    let services = Arc::new(Services::new(api, config));
    let registry = Arc::new(build_registry(services, config));
    let gate = Arc::new(PhaseGate::new(
        config.tools.current_phase,
        registry.max_phase(),
    )?);
    let sessions = Arc::new(InMemorySessionStore::new(Duration::from_secs(
        config.session.ttl_hours * 3600,
    )));
    Ok(Dispatcher::new(registry, gate, sessions, config.tools.clone()))
}

/// Pump requests until stdin closes. One JSON object per line in, one per
/// line out; `tools/list` answers with the exposed catalogue.
async fn serve(dispatcher: Dispatcher) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!(
        tools = dispatcher.exposed_tools().len(),
        phase = dispatcher.gate().current_phase(),
        "serving tool requests"
    );

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ToolRequest>(&line) {
            Ok(request) if request.tool_name == "tools/list" => {
                let registry = dispatcher.registry();
                let tools: Vec<_> = dispatcher
                    .exposed_tools()
                    .into_iter()
                    .filter_map(|name| registry.get(name))
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.input_schema,
                        })
                    })
                    .collect();
                json!({ "is_error": false, "output": { "tools": tools } })
            }
            Ok(request) => serde_json::to_value(dispatcher.dispatch(request).await)?,
            Err(e) => {
                error!(error = %e, "unparseable request line");
                json!({
                    "is_error": true,
                    "output": { "error_message": format!("invalid request: {e}"), "kind": "InvalidInput" }
                })
            }
        };

        let mut bytes = serde_json::to_vec(&response)?;
        bytes.push(b'\n');
        stdout.write_all(&bytes).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Client used for offline catalogue listing; every call fails with an auth
/// error because nothing is connected.
struct OfflineGmailApi;

macro_rules! offline {
    () => {
        Err(EngineError::Auth("not connected; run `serve`".to_string()))
    };
}

#[async_trait]
impl GmailApi for OfflineGmailApi {
    async fn list_messages(&self, _params: ListParams) -> Result<MessagePage> {
        offline!()
    }
    async fn get_message(
        &self,
        _id: &str,
        _format: MessageFormat,
        _metadata_headers: &[String],
    ) -> Result<EmailDetails> {
        offline!()
    }
    async fn modify_message(&self, _id: &str, _add: &[String], _remove: &[String]) -> Result<()> {
        offline!()
    }
    async fn trash_message(&self, _id: &str) -> Result<()> {
        offline!()
    }
    async fn delete_message(&self, _id: &str) -> Result<()> {
        offline!()
    }
    async fn batch_modify_messages(
        &self,
        _ids: &[String],
        _add: &[String],
        _remove: &[String],
    ) -> Result<()> {
        offline!()
    }
    async fn batch_delete_messages(&self, _ids: &[String]) -> Result<()> {
        offline!()
    }
    async fn list_threads(&self, _params: ListParams) -> Result<ThreadPage> {
        offline!()
    }
    async fn get_thread(
        &self,
        _id: &str,
        _format: MessageFormat,
        _metadata_headers: &[String],
    ) -> Result<ThreadView> {
        offline!()
    }
    async fn modify_thread(&self, _id: &str, _add: &[String], _remove: &[String]) -> Result<()> {
        offline!()
    }
    async fn trash_thread(&self, _id: &str) -> Result<()> {
        offline!()
    }
    async fn delete_thread(&self, _id: &str) -> Result<()> {
        offline!()
    }
    async fn create_draft(&self, _raw: Vec<u8>, _thread_id: Option<String>) -> Result<DraftView> {
        offline!()
    }
    async fn update_draft(
        &self,
        _draft_id: &str,
        _raw: Vec<u8>,
        _thread_id: Option<String>,
    ) -> Result<DraftView> {
        offline!()
    }
    async fn send_draft(&self, _draft_id: &str) -> Result<String> {
        offline!()
    }
    async fn list_drafts(&self, _max_results: u32, _page_token: Option<String>) -> Result<DraftPage> {
        offline!()
    }
    async fn get_draft(&self, _draft_id: &str) -> Result<DraftView> {
        offline!()
    }
    async fn delete_draft(&self, _draft_id: &str) -> Result<()> {
        offline!()
    }
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        offline!()
    }
    async fn create_label(&self, _name: &str) -> Result<LabelInfo> {
        offline!()
    }
    async fn get_vacation(&self) -> Result<VacationSettingsView> {
        offline!()
    }
    async fn update_vacation(
        &self,
        _settings: VacationSettingsView,
    ) -> Result<VacationSettingsView> {
        offline!()
    }
    async fn get_imap(&self) -> Result<ImapSettingsView> {
        offline!()
    }
    async fn update_imap(&self, _settings: ImapSettingsView) -> Result<ImapSettingsView> {
        offline!()
    }
    async fn get_pop(&self) -> Result<PopSettingsView> {
        offline!()
    }
    async fn update_pop(&self, _settings: PopSettingsView) -> Result<PopSettingsView> {
        offline!()
    }
}
