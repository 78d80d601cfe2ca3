//! Draft operations
//!
//! Drafts are composed as RFC 2822 plain-text parts; the wire base64url
//! encoding of the raw message is handled by the Gmail client layer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::client::{DraftPage, GmailApi};
use crate::error::{EngineError, Result};
use crate::models::DraftView;

fn default_max_results() -> u32 {
    100
}

/// Composition inputs shared by create and update.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftContent {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    /// Reply target; Gmail threads the draft under it
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateDraftRequest {
    pub draft_id: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl UpdateDraftRequest {
    fn content(&self) -> DraftContent {
        DraftContent {
            to: self.to.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            cc: self.cc.clone(),
            bcc: self.bcc.clone(),
            thread_id: self.thread_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftIdRequest {
    pub draft_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListDraftsRequest {
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListDraftsResponse {
    pub drafts: Vec<DraftView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendDraftResponse {
    pub message_id: String,
    pub status_message: String,
}

pub struct DraftOps {
    api: Arc<dyn GmailApi>,
}

impl DraftOps {
    pub fn new(api: Arc<dyn GmailApi>) -> Self {
        Self { api }
    }

    pub async fn create_draft(&self, content: DraftContent) -> Result<DraftView> {
        let raw = compose_rfc822(&content)?;
        self.api.create_draft(raw, content.thread_id.clone()).await
    }

    pub async fn update_draft(&self, request: UpdateDraftRequest) -> Result<DraftView> {
        let id = require_draft_id(&request.draft_id)?;
        let content = request.content();
        let raw = compose_rfc822(&content)?;
        self.api.update_draft(id, raw, content.thread_id).await
    }

    pub async fn send_draft(&self, request: DraftIdRequest) -> Result<SendDraftResponse> {
        let id = require_draft_id(&request.draft_id)?;
        let message_id = self.api.send_draft(id).await?;
        Ok(SendDraftResponse {
            status_message: format!("draft {id} sent"),
            message_id,
        })
    }

    pub async fn list_drafts(&self, request: ListDraftsRequest) -> Result<ListDraftsResponse> {
        let page: DraftPage = self
            .api
            .list_drafts(request.max_results, request.page_token)
            .await?;
        Ok(ListDraftsResponse {
            drafts: page.drafts,
            next_page_token: page.next_page_token,
        })
    }

    pub async fn get_draft_details(&self, request: DraftIdRequest) -> Result<DraftView> {
        let id = require_draft_id(&request.draft_id)?;
        self.api.get_draft(id).await
    }

    pub async fn delete_draft(&self, request: DraftIdRequest) -> Result<()> {
        let id = require_draft_id(&request.draft_id)?;
        self.api.delete_draft(id).await
    }
}

fn require_draft_id(id: &str) -> Result<&str> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidInput(
            "draft_id must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Build the RFC 2822 text for a draft.
///
/// Header values are folded onto one line; recipients are comma-joined.
/// CRLF line endings throughout, body separated by a blank line.
pub fn compose_rfc822(content: &DraftContent) -> Result<Vec<u8>> {
    if content.to.is_empty() {
        return Err(EngineError::InvalidInput(
            "draft requires at least one recipient in 'to'".to_string(),
        ));
    }
    for recipient in content.to.iter().chain(&content.cc).chain(&content.bcc) {
        if !recipient.contains('@') {
            return Err(EngineError::InvalidInput(format!(
                "recipient '{recipient}' is not an email address"
            )));
        }
    }

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("To: {}", content.to.join(", ")));
    if !content.cc.is_empty() {
        lines.push(format!("Cc: {}", content.cc.join(", ")));
    }
    if !content.bcc.is_empty() {
        lines.push(format!("Bcc: {}", content.bcc.join(", ")));
    }
    lines.push(format!("Subject: {}", sanitize_header(&content.subject)));
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/plain; charset=\"UTF-8\"".to_string());
    lines.push("Content-Transfer-Encoding: 7bit".to_string());

    let mut message = lines.join("\r\n");
    message.push_str("\r\n\r\n");
    message.push_str(&content.body);

    Ok(message.into_bytes())
}

/// Strip CR/LF so caller-supplied values cannot inject headers.
fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
