//! Message-granularity operations
//!
//! Batched mutations report per-item outcomes; one missing message never
//! fails its siblings. Listing optionally enriches stubs with requested
//! headers via follow-up metadata fetches.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::batch::{summarize, BatchExecutor, ItemFailure};
use crate::client::{GmailApi, ListParams};
use crate::error::{EngineError, Result};
use crate::labels::LabelResolver;
use crate::models::{EmailDetails, EmailStub, MessageFormat};

const MAX_RESULTS_CAP: u32 = 500;
const UNREAD_LABEL: &str = "UNREAD";

fn default_max_results() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListEmailsRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub include_headers: Vec<String>,
    #[serde(default)]
    pub include_spam_trash: bool,
}

#[derive(Debug, Serialize)]
pub struct ListEmailsResponse {
    pub email_summaries: Vec<EmailStub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetEmailDetailsRequest {
    pub message_id: String,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default)]
    pub include_headers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageIdsRequest {
    pub message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TrashSummary {
    pub trashed_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
    pub status_message: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteSummary {
    pub deleted_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
    pub status_message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelEmailsRequest {
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub add_label_names: Vec<String>,
    #[serde(default)]
    pub remove_label_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkAs {
    Read,
    Unread,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkEmailsRequest {
    pub message_ids: Vec<String>,
    pub mark_as: MarkAs,
}

#[derive(Debug, Serialize)]
pub struct ModifiedSummary {
    pub modified_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
}

pub struct MessageOps {
    api: Arc<dyn GmailApi>,
    labels: Arc<LabelResolver>,
    batch: BatchExecutor,
}

impl MessageOps {
    pub fn new(api: Arc<dyn GmailApi>, labels: Arc<LabelResolver>, batch: BatchExecutor) -> Self {
        Self { api, labels, batch }
    }

    pub async fn list_emails(&self, request: ListEmailsRequest) -> Result<ListEmailsResponse> {
        if request.max_results == 0 || request.max_results > MAX_RESULTS_CAP {
            return Err(EngineError::InvalidInput(format!(
                "max_results must be in 1..={MAX_RESULTS_CAP}"
            )));
        }

        let page = self
            .api
            .list_messages(ListParams {
                query: request.query.clone(),
                max_results: request.max_results,
                page_token: request.page_token.clone(),
                include_spam_trash: request.include_spam_trash,
            })
            .await?;

        let email_summaries = if request.include_headers.is_empty() {
            page.messages
        } else {
            self.enrich_stubs(page.messages, &request.include_headers)
                .await
        };

        Ok(ListEmailsResponse {
            email_summaries,
            next_page_token: page.next_page_token,
        })
    }

    /// Fill in requested header fields with batched metadata fetches.
    /// A stub whose fetch fails is returned bare rather than dropped.
    async fn enrich_stubs(&self, stubs: Vec<EmailStub>, headers: &[String]) -> Vec<EmailStub> {
        let ids: Vec<String> = stubs.iter().map(|s| s.id.clone()).collect();
        let api = Arc::clone(&self.api);
        let headers_owned: Vec<String> = headers.to_vec();

        let outcomes = self
            .batch
            .run(ids, |id| {
                let api = Arc::clone(&api);
                let headers = headers_owned.clone();
                async move { api.get_message(&id, MessageFormat::Metadata, &headers).await }
            })
            .await;

        let mut enriched = Vec::with_capacity(stubs.len());
        for (stub, item) in stubs.into_iter().zip(outcomes) {
            match item.outcome {
                Ok(details) => enriched.push(stub_from_details(&stub, &details)),
                Err(_) => enriched.push(stub),
            }
        }
        enriched
    }

    pub async fn get_email_details(&self, request: GetEmailDetailsRequest) -> Result<EmailDetails> {
        if request.message_id.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "message_id must not be empty".to_string(),
            ));
        }
        self.api
            .get_message(&request.message_id, request.format, &request.include_headers)
            .await
    }

    pub async fn trash_emails(&self, request: MessageIdsRequest) -> Result<TrashSummary> {
        let ids = require_ids(request.message_ids)?;
        let api = Arc::clone(&self.api);
        let outcomes = self
            .batch
            .run(ids.clone(), |id| {
                let api = Arc::clone(&api);
                async move { api.trash_message(&id).await }
            })
            .await;

        let (trashed_count, failures) = summarize(&outcomes);
        Ok(TrashSummary {
            trashed_count,
            status_message: format!(
                "moved {trashed_count} of {} message(s) to trash",
                ids.len()
            ),
            failures,
        })
    }

    pub async fn delete_emails_permanently(
        &self,
        request: MessageIdsRequest,
    ) -> Result<DeleteSummary> {
        let ids = require_ids(request.message_ids)?;
        let api = Arc::clone(&self.api);
        let outcomes = self
            .batch
            .run(ids.clone(), |id| {
                let api = Arc::clone(&api);
                async move { api.delete_message(&id).await }
            })
            .await;

        let (deleted_count, failures) = summarize(&outcomes);
        Ok(DeleteSummary {
            deleted_count,
            status_message: format!(
                "permanently deleted {deleted_count} of {} message(s)",
                ids.len()
            ),
            failures,
        })
    }

    pub async fn label_emails(&self, request: LabelEmailsRequest) -> Result<ModifiedSummary> {
        let ids = require_ids(request.message_ids)?;
        if request.add_label_names.is_empty() && request.remove_label_names.is_empty() {
            return Err(EngineError::InvalidInput(
                "at least one of add_label_names or remove_label_names is required".to_string(),
            ));
        }

        let add = self.labels.resolve_many(&request.add_label_names, false).await?;
        let remove = self
            .labels
            .resolve_many(&request.remove_label_names, false)
            .await?;

        self.modify_each(ids, add, remove).await
    }

    pub async fn mark_emails(&self, request: MarkEmailsRequest) -> Result<ModifiedSummary> {
        let ids = require_ids(request.message_ids)?;
        // Read state is the UNREAD system label in Gmail's data model
        let (add, remove) = match request.mark_as {
            MarkAs::Read => (Vec::new(), vec![UNREAD_LABEL.to_string()]),
            MarkAs::Unread => (vec![UNREAD_LABEL.to_string()], Vec::new()),
        };
        self.modify_each(ids, add, remove).await
    }

    async fn modify_each(
        &self,
        ids: Vec<String>,
        add: Vec<String>,
        remove: Vec<String>,
    ) -> Result<ModifiedSummary> {
        let api = Arc::clone(&self.api);
        let outcomes = self
            .batch
            .run(ids, |id| {
                let api = Arc::clone(&api);
                let add = add.clone();
                let remove = remove.clone();
                async move { api.modify_message(&id, &add, &remove).await }
            })
            .await;

        let (modified_count, failures) = summarize(&outcomes);
        Ok(ModifiedSummary {
            modified_count,
            failures,
        })
    }
}

fn require_ids(ids: Vec<String>) -> Result<Vec<String>> {
    if ids.is_empty() {
        return Err(EngineError::InvalidInput(
            "message_ids must not be empty".to_string(),
        ));
    }
    Ok(ids)
}

fn stub_from_details(stub: &EmailStub, details: &EmailDetails) -> EmailStub {
    EmailStub {
        id: stub.id.clone(),
        thread_id: if details.thread_id.is_empty() {
            stub.thread_id.clone()
        } else {
            details.thread_id.clone()
        },
        snippet: details.snippet.clone().or_else(|| stub.snippet.clone()),
        from: details.header("from").map(str::to_string),
        to: details.header("to").map(str::to_string),
        cc: details.header("cc").map(str::to_string),
        subject: details.header("subject").map(str::to_string),
        date: details.header("date").map(str::to_string),
        reply_to: details.header("reply-to").map(str::to_string),
        message_id: details.header("message-id").map(str::to_string),
    }
}
