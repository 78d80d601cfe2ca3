//! Gmail API client with rate limiting and retry logic
//!
//! `GmailApi` is the seam the rest of the engine talks through; `HubGmailApi`
//! is the production implementation over the `google-gmail1` hub. Every
//! outbound call is billed against the rate limiter, bounded by the global
//! concurrency semaphore, wrapped in a per-operation timeout, and retried on
//! transient failures. Permanent deletion is the one exception to retry: an
//! ambiguous outcome is surfaced rather than re-issued.

use async_trait::async_trait;
use google_gmail1::api::{
    BatchDeleteMessagesRequest, BatchModifyMessagesRequest, Draft, Label, Message,
    ModifyMessageRequest, ModifyThreadRequest,
};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::auth::GmailHub;
use crate::config::GmailConfig;
use crate::error::{EngineError, Result};
use crate::models::{
    DraftView, EmailDetails, EmailStub, ImapSettingsView, LabelInfo, MessageFormat, MessagePage,
    PopSettingsView, ThreadPage, ThreadStub, ThreadView, VacationSettingsView,
};
use crate::rate_limiter::{write_cost, OpClass, RateLimiter};

const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const GMAIL_LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";
const GMAIL_SETTINGS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.settings.basic";
const GMAIL_FULL_SCOPE: &str = "https://mail.google.com/";

/// Parameters for message and thread listings.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub query: Option<String>,
    pub max_results: u32,
    pub page_token: Option<String>,
    pub include_spam_trash: bool,
}

/// Page of drafts.
#[derive(Debug, Clone, Default)]
pub struct DraftPage {
    pub drafts: Vec<DraftView>,
    pub next_page_token: Option<String>,
}

/// Operations the engine needs from the Gmail surface.
///
/// Listing returns bare stubs (id/thread id only); header enrichment is an
/// explicit follow-up fetch so quota cost stays visible to callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GmailApi: Send + Sync {
    // -- messages --
    async fn list_messages(&self, params: ListParams) -> Result<MessagePage>;
    async fn get_message(
        &self,
        id: &str,
        format: MessageFormat,
        metadata_headers: &[String],
    ) -> Result<EmailDetails>;
    async fn modify_message(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
    async fn trash_message(&self, id: &str) -> Result<()>;
    /// Permanent, unrecoverable, never retried
    async fn delete_message(&self, id: &str) -> Result<()>;
    async fn batch_modify_messages(
        &self,
        ids: &[String],
        add: &[String],
        remove: &[String],
    ) -> Result<()>;
    async fn batch_delete_messages(&self, ids: &[String]) -> Result<()>;

    // -- threads --
    async fn list_threads(&self, params: ListParams) -> Result<ThreadPage>;
    async fn get_thread(
        &self,
        id: &str,
        format: MessageFormat,
        metadata_headers: &[String],
    ) -> Result<ThreadView>;
    async fn modify_thread(&self, id: &str, add: &[String], remove: &[String]) -> Result<()>;
    async fn trash_thread(&self, id: &str) -> Result<()>;
    async fn delete_thread(&self, id: &str) -> Result<()>;

    // -- drafts --
    async fn create_draft(&self, raw: Vec<u8>, thread_id: Option<String>) -> Result<DraftView>;
    async fn update_draft(
        &self,
        draft_id: &str,
        raw: Vec<u8>,
        thread_id: Option<String>,
    ) -> Result<DraftView>;
    /// Returns the id of the sent message
    async fn send_draft(&self, draft_id: &str) -> Result<String>;
    async fn list_drafts(&self, max_results: u32, page_token: Option<String>) -> Result<DraftPage>;
    async fn get_draft(&self, draft_id: &str) -> Result<DraftView>;
    async fn delete_draft(&self, draft_id: &str) -> Result<()>;

    // -- labels --
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
    async fn create_label(&self, name: &str) -> Result<LabelInfo>;

    // -- settings --
    async fn get_vacation(&self) -> Result<VacationSettingsView>;
    async fn update_vacation(&self, settings: VacationSettingsView)
        -> Result<VacationSettingsView>;
    async fn get_imap(&self) -> Result<ImapSettingsView>;
    async fn update_imap(&self, settings: ImapSettingsView) -> Result<ImapSettingsView>;
    async fn get_pop(&self) -> Result<PopSettingsView>;
    async fn update_pop(&self, settings: PopSettingsView) -> Result<PopSettingsView>;
}

/// Production Gmail client over the authenticated hub.
pub struct HubGmailApi {
    hub: GmailHub,
    limiter: RateLimiter,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    max_retries: u32,
}

impl HubGmailApi {
    pub fn new(hub: GmailHub, limiter: RateLimiter, config: &GmailConfig) -> Self {
        Self {
            hub,
            limiter,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            timeout: Duration::from_millis(config.default_timeout_ms),
            max_retries: config.max_retries,
        }
    }

    /// Backoff schedule: min(2^k * 250ms + U[0, 250ms), 8s)
    fn backoff_delay(attempt: u32) -> Duration {
        let base = 250u64.saturating_mul(1u64 << attempt.min(6));
        let jitter = rand::thread_rng().gen_range(0..250);
        Duration::from_millis((base + jitter).min(8_000))
    }

    /// Run one Gmail call under the limiter, semaphore, and timeout, retrying
    /// transient failures with exponential backoff.
    async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        class: OpClass,
        cost: f64,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, google_gmail1::Error>> + Send,
        T: Send,
    {
        let mut attempts: u32 = 0;

        loop {
            self.limiter.acquire(class, cost).await;
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| EngineError::Internal(format!("semaphore closed: {e}")))?;

            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(api_err)) => EngineError::from(api_err),
                Err(_) => EngineError::Network(format!(
                    "{operation} timed out after {:?}",
                    self.timeout
                )),
            };

            if outcome.is_transient() && attempts < self.max_retries {
                let delay = match &outcome {
                    EngineError::RateLimited { retry_after } => {
                        Duration::from_secs(*retry_after).max(Self::backoff_delay(attempts))
                    }
                    _ => Self::backoff_delay(attempts),
                };
                attempts += 1;
                warn!(
                    operation,
                    attempt = attempts,
                    max = self.max_retries,
                    error = %outcome,
                    delay_ms = delay.as_millis() as u64,
                    "transient Gmail error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(outcome);
        }
    }

    /// Run a permanent deletion: no retry after dispatch, timeout surfaces as
    /// an ambiguous outcome.
    async fn execute_delete<T, Fut>(&self, operation: &str, cost: f64, call: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, google_gmail1::Error>> + Send,
        T: Send,
    {
        self.limiter.acquire(OpClass::Write, cost).await;
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| EngineError::Internal(format!("semaphore closed: {e}")))?;

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(api_err)) => Err(EngineError::from(api_err)),
            Err(_) => Err(EngineError::AmbiguousDeletion(format!(
                "{operation} timed out after {:?}; outcome unknown",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl GmailApi for HubGmailApi {
    async fn list_messages(&self, params: ListParams) -> Result<MessagePage> {
        let response = self
            .execute("messages.list", OpClass::Read, 1.0, || {
                let mut call = self
                    .hub
                    .users()
                    .messages_list("me")
                    .max_results(params.max_results)
                    .include_spam_trash(params.include_spam_trash);
                if let Some(q) = params.query.as_deref() {
                    call = call.q(q);
                }
                if let Some(token) = params.page_token.as_deref() {
                    call = call.page_token(token);
                }
                async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|(_, r)| r) }
            })
            .await?;

        let messages = response
            .messages
            .unwrap_or_default()
            .iter()
            .map(EmailStub::from_message)
            .collect();

        Ok(MessagePage {
            messages,
            next_page_token: response.next_page_token,
        })
    }

    async fn get_message(
        &self,
        id: &str,
        format: MessageFormat,
        metadata_headers: &[String],
    ) -> Result<EmailDetails> {
        let message = self
            .execute("messages.get", OpClass::Read, 1.0, || {
                let mut call = self
                    .hub
                    .users()
                    .messages_get("me", id)
                    .format(format.as_str());
                if format == MessageFormat::Metadata {
                    for header in metadata_headers {
                        call = call.add_metadata_headers(header);
                    }
                }
                async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|(_, m)| m) }
            })
            .await?;

        Ok(EmailDetails::from_message(message))
    }

    async fn modify_message(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        self.execute("messages.modify", OpClass::Write, 1.0, || {
            let request = ModifyMessageRequest {
                add_label_ids: non_empty(add),
                remove_label_ids: non_empty(remove),
            };
            let call = self.hub.users().messages_modify(request, "me", id);
            async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|_| ()) }
        })
        .await
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        self.execute("messages.trash", OpClass::Write, 1.0, || {
            let call = self.hub.users().messages_trash("me", id);
            async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|_| ()) }
        })
        .await
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .messages_delete("me", id)
            .add_scope(GMAIL_FULL_SCOPE)
            .doit();
        self.execute_delete("messages.delete", 1.0, async move { call.await.map(|_| ()) })
            .await
    }

    async fn batch_modify_messages(
        &self,
        ids: &[String],
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        let cost = write_cost(ids.len());
        self.execute("messages.batchModify", OpClass::Write, cost, || {
            let request = BatchModifyMessagesRequest {
                ids: Some(ids.to_vec()),
                add_label_ids: non_empty(add),
                remove_label_ids: non_empty(remove),
            };
            let call = self.hub.users().messages_batch_modify(request, "me");
            async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|_| ()) }
        })
        .await
    }

    async fn batch_delete_messages(&self, ids: &[String]) -> Result<()> {
        let request = BatchDeleteMessagesRequest {
            ids: Some(ids.to_vec()),
        };
        let call = self
            .hub
            .users()
            .messages_batch_delete(request, "me")
            .add_scope(GMAIL_FULL_SCOPE)
            .doit();
        self.execute_delete(
            "messages.batchDelete",
            write_cost(ids.len()),
            async move { call.await.map(|_| ()) },
        )
        .await
    }

    async fn list_threads(&self, params: ListParams) -> Result<ThreadPage> {
        let response = self
            .execute("threads.list", OpClass::Read, 1.0, || {
                let mut call = self
                    .hub
                    .users()
                    .threads_list("me")
                    .max_results(params.max_results)
                    .include_spam_trash(params.include_spam_trash);
                if let Some(q) = params.query.as_deref() {
                    call = call.q(q);
                }
                if let Some(token) = params.page_token.as_deref() {
                    call = call.page_token(token);
                }
                async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|(_, r)| r) }
            })
            .await?;

        let threads = response
            .threads
            .unwrap_or_default()
            .into_iter()
            .map(|t| ThreadStub {
                id: t.id.unwrap_or_default(),
                snippet: t.snippet,
            })
            .collect();

        Ok(ThreadPage {
            threads,
            next_page_token: response.next_page_token,
        })
    }

    async fn get_thread(
        &self,
        id: &str,
        format: MessageFormat,
        metadata_headers: &[String],
    ) -> Result<ThreadView> {
        let thread = self
            .execute("threads.get", OpClass::Read, 1.0, || {
                let mut call = self.hub.users().threads_get("me", id).format(format.as_str());
                if format == MessageFormat::Metadata {
                    for header in metadata_headers {
                        call = call.add_metadata_headers(header);
                    }
                }
                async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|(_, t)| t) }
            })
            .await?;

        Ok(ThreadView::from_thread(thread))
    }

    async fn modify_thread(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        self.execute("threads.modify", OpClass::Write, 1.0, || {
            let request = ModifyThreadRequest {
                add_label_ids: non_empty(add),
                remove_label_ids: non_empty(remove),
            };
            let call = self.hub.users().threads_modify(request, "me", id);
            async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|_| ()) }
        })
        .await
    }

    async fn trash_thread(&self, id: &str) -> Result<()> {
        self.execute("threads.trash", OpClass::Write, 1.0, || {
            let call = self.hub.users().threads_trash("me", id);
            async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|_| ()) }
        })
        .await
    }

    async fn delete_thread(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .threads_delete("me", id)
            .add_scope(GMAIL_FULL_SCOPE)
            .doit();
        self.execute_delete("threads.delete", 1.0, async move { call.await.map(|_| ()) })
            .await
    }

    async fn create_draft(&self, raw: Vec<u8>, thread_id: Option<String>) -> Result<DraftView> {
        let draft = self
            .execute("drafts.create", OpClass::Write, 1.0, || {
                let draft = Draft {
                    message: Some(Message {
                        raw: Some(raw.clone()),
                        thread_id: thread_id.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                };
                let call = self.hub.users().drafts_create(draft, "me");
                async move {
                    call.add_scope(GMAIL_MODIFY_SCOPE)
                        .upload(std::io::Cursor::new(Vec::new()), "message/rfc822".parse().unwrap())
                        .await
                        .map(|(_, d)| d)
                }
            })
            .await?;

        Ok(DraftView::from_draft(draft))
    }

    async fn update_draft(
        &self,
        draft_id: &str,
        raw: Vec<u8>,
        thread_id: Option<String>,
    ) -> Result<DraftView> {
        let draft = self
            .execute("drafts.update", OpClass::Write, 1.0, || {
                let draft = Draft {
                    id: Some(draft_id.to_string()),
                    message: Some(Message {
                        raw: Some(raw.clone()),
                        thread_id: thread_id.clone(),
                        ..Default::default()
                    }),
                };
                let call = self.hub.users().drafts_update(draft, "me", draft_id);
                async move {
                    call.add_scope(GMAIL_MODIFY_SCOPE)
                        .upload(std::io::Cursor::new(Vec::new()), "message/rfc822".parse().unwrap())
                        .await
                        .map(|(_, d)| d)
                }
            })
            .await?;

        Ok(DraftView::from_draft(draft))
    }

    async fn send_draft(&self, draft_id: &str) -> Result<String> {
        let message = self
            .execute("drafts.send", OpClass::Write, 1.0, || {
                let draft = Draft {
                    id: Some(draft_id.to_string()),
                    ..Default::default()
                };
                let call = self.hub.users().drafts_send(draft, "me");
                async move {
                    call.add_scope(GMAIL_MODIFY_SCOPE)
                        .upload(std::io::Cursor::new(Vec::new()), "message/rfc822".parse().unwrap())
                        .await
                        .map(|(_, m)| m)
                }
            })
            .await?;

        message
            .id
            .ok_or_else(|| EngineError::Internal("sent draft has no message id".to_string()))
    }

    async fn list_drafts(&self, max_results: u32, page_token: Option<String>) -> Result<DraftPage> {
        let response = self
            .execute("drafts.list", OpClass::Read, 1.0, || {
                let mut call = self.hub.users().drafts_list("me").max_results(max_results);
                if let Some(token) = page_token.as_deref() {
                    call = call.page_token(token);
                }
                async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|(_, r)| r) }
            })
            .await?;

        Ok(DraftPage {
            drafts: response
                .drafts
                .unwrap_or_default()
                .into_iter()
                .map(DraftView::from_draft)
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn get_draft(&self, draft_id: &str) -> Result<DraftView> {
        let draft = self
            .execute("drafts.get", OpClass::Read, 1.0, || {
                let call = self.hub.users().drafts_get("me", draft_id).format("full");
                async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|(_, d)| d) }
            })
            .await?;

        Ok(DraftView::from_draft(draft))
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<()> {
        // Draft deletion discards an unsent composition; ordinary retry rules
        // apply because a lost draft is recoverable by recreating it
        self.execute("drafts.delete", OpClass::Write, 1.0, || {
            let call = self.hub.users().drafts_delete("me", draft_id);
            async move { call.add_scope(GMAIL_MODIFY_SCOPE).doit().await.map(|_| ()) }
        })
        .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let response = self
            .execute("labels.list", OpClass::Read, 1.0, || {
                let call = self.hub.users().labels_list("me");
                async move { call.add_scope(GMAIL_LABELS_SCOPE).doit().await.map(|(_, r)| r) }
            })
            .await?;

        Ok(response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| match (label.id, label.name) {
                (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                _ => None,
            })
            .collect())
    }

    async fn create_label(&self, name: &str) -> Result<LabelInfo> {
        let created = self
            .execute("labels.create", OpClass::Write, 1.0, || {
                let label = Label {
                    name: Some(name.to_string()),
                    message_list_visibility: Some("show".to_string()),
                    label_list_visibility: Some("labelShow".to_string()),
                    ..Default::default()
                };
                let call = self.hub.users().labels_create(label, "me");
                async move { call.add_scope(GMAIL_LABELS_SCOPE).doit().await.map(|(_, l)| l) }
            })
            .await?;

        match (created.id, created.name) {
            (Some(id), Some(name)) => Ok(LabelInfo { id, name }),
            _ => Err(EngineError::Internal(
                "created label missing id or name".to_string(),
            )),
        }
    }

    async fn get_vacation(&self) -> Result<VacationSettingsView> {
        let settings = self
            .execute("settings.getVacation", OpClass::Read, 1.0, || {
                let call = self.hub.users().settings_get_vacation("me");
                async move { call.add_scope(GMAIL_SETTINGS_SCOPE).doit().await.map(|(_, s)| s) }
            })
            .await?;
        Ok(VacationSettingsView::from_api(settings))
    }

    async fn update_vacation(
        &self,
        settings: VacationSettingsView,
    ) -> Result<VacationSettingsView> {
        let updated = self
            .execute("settings.updateVacation", OpClass::Write, 1.0, || {
                let call = self
                    .hub
                    .users()
                    .settings_update_vacation(settings.clone().into_api(), "me");
                async move { call.add_scope(GMAIL_SETTINGS_SCOPE).doit().await.map(|(_, s)| s) }
            })
            .await?;
        Ok(VacationSettingsView::from_api(updated))
    }

    async fn get_imap(&self) -> Result<ImapSettingsView> {
        let settings = self
            .execute("settings.getImap", OpClass::Read, 1.0, || {
                let call = self.hub.users().settings_get_imap("me");
                async move { call.add_scope(GMAIL_SETTINGS_SCOPE).doit().await.map(|(_, s)| s) }
            })
            .await?;
        Ok(ImapSettingsView::from_api(settings))
    }

    async fn update_imap(&self, settings: ImapSettingsView) -> Result<ImapSettingsView> {
        let updated = self
            .execute("settings.updateImap", OpClass::Write, 1.0, || {
                let call = self
                    .hub
                    .users()
                    .settings_update_imap(settings.clone().into_api(), "me");
                async move { call.add_scope(GMAIL_SETTINGS_SCOPE).doit().await.map(|(_, s)| s) }
            })
            .await?;
        Ok(ImapSettingsView::from_api(updated))
    }

    async fn get_pop(&self) -> Result<PopSettingsView> {
        let settings = self
            .execute("settings.getPop", OpClass::Read, 1.0, || {
                let call = self.hub.users().settings_get_pop("me");
                async move { call.add_scope(GMAIL_SETTINGS_SCOPE).doit().await.map(|(_, s)| s) }
            })
            .await?;
        Ok(PopSettingsView::from_api(settings))
    }

    async fn update_pop(&self, settings: PopSettingsView) -> Result<PopSettingsView> {
        let updated = self
            .execute("settings.updatePop", OpClass::Write, 1.0, || {
                let call = self
                    .hub
                    .users()
                    .settings_update_pop(settings.clone().into_api(), "me");
                async move { call.add_scope(GMAIL_SETTINGS_SCOPE).doit().await.map(|(_, s)| s) }
            })
            .await?;
        Ok(PopSettingsView::from_api(updated))
    }
}

fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.to_vec())
    }
}
