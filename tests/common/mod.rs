//! Common test utilities: fixture messages and an in-memory Gmail fake with
//! a small search-operator evaluator, enough to drive the engine end to end.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use gmail_mcp_engine::client::{DraftPage, GmailApi, ListParams};
use gmail_mcp_engine::error::{EngineError, Result};
use gmail_mcp_engine::models::{
    AttachmentInfo, DraftView, EmailDetails, EmailStub, ImapSettingsView, LabelInfo,
    MessageFormat, MessagePage, PopSettingsView, ThreadPage, ThreadStub, ThreadView,
    VacationSettingsView,
};

/// One message in the fake mailbox.
#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub snippet: String,
    pub body: String,
    pub labels: Vec<String>,
    pub internal_date: DateTime<Utc>,
    pub size: u64,
    pub attachments: Vec<String>,
}

impl FakeMessage {
    pub fn new(id: &str, from: &str, subject: &str) -> Self {
        FakeMessage {
            id: id.to_string(),
            thread_id: format!("t-{id}"),
            from: from.to_string(),
            to: "me@example.com".to_string(),
            subject: subject.to_string(),
            snippet: String::new(),
            body: String::new(),
            labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
            internal_date: Utc::now(),
            size: 4 * 1024,
            attachments: Vec::new(),
        }
    }

    pub fn aged_days(mut self, days: i64) -> Self {
        self.internal_date = Utc::now() - Duration::days(days);
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self.snippet = body.chars().take(40).collect();
        self
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    fn details(&self) -> EmailDetails {
        let mut headers = BTreeMap::new();
        headers.insert("from".to_string(), self.from.clone());
        headers.insert("to".to_string(), self.to.clone());
        headers.insert("subject".to_string(), self.subject.clone());
        EmailDetails {
            id: self.id.clone(),
            thread_id: self.thread_id.clone(),
            snippet: Some(self.snippet.clone()),
            headers,
            label_ids: self.labels.clone(),
            internal_date: Some(self.internal_date),
            size_estimate: Some(self.size),
            body_text: Some(self.body.clone()),
            attachments: self
                .attachments
                .iter()
                .map(|name| AttachmentInfo {
                    filename: name.clone(),
                    mime_type: "application/octet-stream".to_string(),
                    size: 128,
                })
                .collect(),
            raw: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MailboxState {
    pub messages: Vec<FakeMessage>,
    pub labels: Vec<LabelInfo>,
    pub drafts: Vec<DraftView>,
    pub vacation: VacationSettingsView,
    pub imap: ImapSettingsView,
    pub pop: PopSettingsView,
    /// Every Gmail call, for asserting what was (not) issued
    pub calls: Vec<String>,
    next_draft: usize,
}

/// In-memory `GmailApi` implementation for integration tests.
pub struct FakeGmail {
    pub state: Mutex<MailboxState>,
}

impl FakeGmail {
    pub fn new(messages: Vec<FakeMessage>) -> Self {
        FakeGmail {
            state: Mutex::new(MailboxState {
                messages,
                labels: vec![LabelInfo {
                    id: "Label_1".to_string(),
                    name: "Newsletters".to_string(),
                }],
                ..Default::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn message(&self, id: &str) -> Option<FakeMessage> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }
}

/// Evaluate the supported Gmail search-operator subset against a message.
/// Trashed messages are excluded unless the query asks for TRASH.
pub fn query_matches(query: &str, msg: &FakeMessage) -> bool {
    if msg.labels.iter().any(|l| l == "TRASH") && !query.contains("in:trash") {
        return false;
    }
    tokens(query).iter().all(|t| token_matches(t, msg))
}

/// Split a query into top-level tokens, keeping `{...}` groups and quoted
/// values intact.
fn tokens(query: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;

    for ch in query.chars() {
        match ch {
            '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            '{' if !quoted => {
                depth += 1;
                current.push(ch);
            }
            '}' if !quoted => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c.is_whitespace() && depth == 0 && !quoted => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn token_matches(token: &str, msg: &FakeMessage) -> bool {
    if let Some(inner) = token.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
        return inner.split(" OR ").any(|part| {
            let part = part.trim();
            !part.is_empty() && tokens(part).iter().all(|t| token_matches(t, msg))
        });
    }

    if token == "has:attachment" {
        return !msg.attachments.is_empty();
    }
    if token == "-has:attachment" {
        return msg.attachments.is_empty();
    }

    let Some((operator, value)) = token.split_once(':') else {
        // Bare terms match against subject + body
        let term = unquote(token).to_lowercase();
        return msg.subject.to_lowercase().contains(&term)
            || msg.body.to_lowercase().contains(&term);
    };
    let value = unquote(value);

    match operator {
        "from" => msg.from.to_lowercase().contains(&value.to_lowercase()),
        "to" | "cc" => msg.to.to_lowercase().contains(&value.to_lowercase()),
        "subject" => msg.subject.to_lowercase().contains(&value.to_lowercase()),
        "label" | "in" => msg
            .labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&value)),
        "filename" => msg
            .attachments
            .iter()
            .any(|a| a.to_lowercase().contains(&value.to_lowercase())),
        "larger" => parse_size(&value).is_some_and(|bytes| msg.size > bytes),
        "smaller" => parse_size(&value).is_some_and(|bytes| msg.size < bytes),
        "older_than" => {
            parse_age_days(&value).is_some_and(|days| msg.internal_date < Utc::now() - Duration::days(days))
        }
        "newer_than" => {
            parse_age_days(&value).is_some_and(|days| msg.internal_date >= Utc::now() - Duration::days(days))
        }
        "after" => parse_date(&value).is_some_and(|d| msg.internal_date >= d),
        "before" => parse_date(&value).is_some_and(|d| msg.internal_date < d),
        _ => true, // unsupported operators select everything in the fake
    }
}

fn unquote(value: &str) -> String {
    value
        .trim()
        .trim_matches('"')
        .replace("\\\"", "\"")
}

fn parse_size(value: &str) -> Option<u64> {
    let (digits, suffix) = value.split_at(value.len().saturating_sub(1));
    match suffix {
        "K" | "k" => digits.parse::<u64>().ok().map(|n| n * 1024),
        "M" | "m" => digits.parse::<u64>().ok().map(|n| n * 1024 * 1024),
        _ => value.parse::<u64>().ok(),
    }
}

fn parse_age_days(value: &str) -> Option<i64> {
    let (digits, suffix) = value.split_at(value.len().saturating_sub(1));
    let n: i64 = digits.parse().ok()?;
    match suffix {
        "d" => Some(n),
        "m" => Some(n * 30),
        "y" => Some(n * 365),
        _ => None,
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = value.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let date = chrono::NaiveDate::from_ymd_opt(
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
    )?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

#[async_trait]
impl GmailApi for FakeGmail {
    async fn list_messages(&self, params: ListParams) -> Result<MessagePage> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("messages.list".to_string());

        let query = params.query.unwrap_or_default();
        let matching: Vec<&FakeMessage> = state
            .messages
            .iter()
            .filter(|m| query_matches(&query, m))
            .collect();

        let offset: usize = params
            .page_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let page: Vec<EmailStub> = matching
            .iter()
            .skip(offset)
            .take(params.max_results as usize)
            .map(|m| EmailStub {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
                ..Default::default()
            })
            .collect();

        let consumed = offset + page.len();
        let next_page_token = (consumed < matching.len()).then(|| consumed.to_string());

        Ok(MessagePage {
            messages: page,
            next_page_token,
        })
    }

    async fn get_message(
        &self,
        id: &str,
        _format: MessageFormat,
        _metadata_headers: &[String],
    ) -> Result<EmailDetails> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("messages.get:{id}"));
        state
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.details())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn modify_message(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("messages.modify:{id}"));
        let msg = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        apply_labels(msg, add, remove);
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("messages.trash:{id}"));
        let msg = state
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        apply_labels(msg, &["TRASH".to_string()], &["INBOX".to_string()]);
        Ok(())
    }

    async fn delete_message(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("messages.delete:{id}"));
        let before = state.messages.len();
        state.messages.retain(|m| m.id != id);
        if state.messages.len() == before {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn batch_modify_messages(
        &self,
        ids: &[String],
        add: &[String],
        remove: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("messages.batchModify:{}", ids.len()));
        for id in ids {
            if let Some(msg) = state.messages.iter_mut().find(|m| &m.id == id) {
                apply_labels(msg, add, remove);
            }
        }
        Ok(())
    }

    async fn batch_delete_messages(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("messages.batchDelete:{}", ids.len()));
        state.messages.retain(|m| !ids.contains(&m.id));
        Ok(())
    }

    async fn list_threads(&self, params: ListParams) -> Result<ThreadPage> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("threads.list".to_string());
        let query = params.query.unwrap_or_default();
        let mut seen = Vec::new();
        for msg in state.messages.iter().filter(|m| query_matches(&query, m)) {
            if !seen.iter().any(|s: &ThreadStub| s.id == msg.thread_id) {
                seen.push(ThreadStub {
                    id: msg.thread_id.clone(),
                    snippet: Some(msg.snippet.clone()),
                });
            }
        }
        seen.truncate(params.max_results as usize);
        Ok(ThreadPage {
            threads: seen,
            next_page_token: None,
        })
    }

    async fn get_thread(
        &self,
        id: &str,
        _format: MessageFormat,
        _metadata_headers: &[String],
    ) -> Result<ThreadView> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("threads.get:{id}"));
        let messages: Vec<EmailDetails> = state
            .messages
            .iter()
            .filter(|m| m.thread_id == id)
            .map(|m| m.details())
            .collect();
        if messages.is_empty() {
            return Err(EngineError::NotFound(id.to_string()));
        }
        let mut label_ids: Vec<String> = Vec::new();
        for m in &messages {
            for l in &m.label_ids {
                if !label_ids.contains(l) {
                    label_ids.push(l.clone());
                }
            }
        }
        Ok(ThreadView {
            id: id.to_string(),
            messages,
            label_ids,
        })
    }

    async fn modify_thread(&self, id: &str, add: &[String], remove: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("threads.modify:{id}"));
        let mut touched = false;
        for msg in state.messages.iter_mut().filter(|m| m.thread_id == id) {
            apply_labels(msg, add, remove);
            touched = true;
        }
        if !touched {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn trash_thread(&self, id: &str) -> Result<()> {
        self.modify_thread(id, &["TRASH".to_string()], &["INBOX".to_string()])
            .await
    }

    async fn delete_thread(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("threads.delete:{id}"));
        let before = state.messages.len();
        state.messages.retain(|m| m.thread_id != id);
        if state.messages.len() == before {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create_draft(&self, _raw: Vec<u8>, _thread_id: Option<String>) -> Result<DraftView> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("drafts.create".to_string());
        state.next_draft += 1;
        let draft = DraftView {
            id: format!("d{}", state.next_draft),
            message: Some(EmailStub::default()),
        };
        state.drafts.push(draft.clone());
        Ok(draft)
    }

    async fn update_draft(
        &self,
        draft_id: &str,
        _raw: Vec<u8>,
        _thread_id: Option<String>,
    ) -> Result<DraftView> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("drafts.update:{draft_id}"));
        state
            .drafts
            .iter()
            .find(|d| d.id == draft_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(draft_id.to_string()))
    }

    async fn send_draft(&self, draft_id: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("drafts.send:{draft_id}"));
        let before = state.drafts.len();
        state.drafts.retain(|d| d.id != draft_id);
        if state.drafts.len() == before {
            return Err(EngineError::NotFound(draft_id.to_string()));
        }
        Ok(format!("sent-{draft_id}"))
    }

    async fn list_drafts(&self, max_results: u32, _page_token: Option<String>) -> Result<DraftPage> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("drafts.list".to_string());
        let mut drafts = state.drafts.clone();
        drafts.truncate(max_results as usize);
        Ok(DraftPage {
            drafts,
            next_page_token: None,
        })
    }

    async fn get_draft(&self, draft_id: &str) -> Result<DraftView> {
        let state = self.state.lock().unwrap();
        state
            .drafts
            .iter()
            .find(|d| d.id == draft_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(draft_id.to_string()))
    }

    async fn delete_draft(&self, draft_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("drafts.delete:{draft_id}"));
        let before = state.drafts.len();
        state.drafts.retain(|d| d.id != draft_id);
        if state.drafts.len() == before {
            return Err(EngineError::NotFound(draft_id.to_string()));
        }
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("labels.list".to_string());
        Ok(state.labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<LabelInfo> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("labels.create:{name}"));
        let label = LabelInfo {
            id: format!("Label_{}", state.labels.len() + 1),
            name: name.to_string(),
        };
        state.labels.push(label.clone());
        Ok(label)
    }

    async fn get_vacation(&self) -> Result<VacationSettingsView> {
        Ok(self.state.lock().unwrap().vacation.clone())
    }

    async fn update_vacation(
        &self,
        settings: VacationSettingsView,
    ) -> Result<VacationSettingsView> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("settings.updateVacation".to_string());
        state.vacation = settings.clone();
        Ok(settings)
    }

    async fn get_imap(&self) -> Result<ImapSettingsView> {
        Ok(self.state.lock().unwrap().imap.clone())
    }

    async fn update_imap(&self, settings: ImapSettingsView) -> Result<ImapSettingsView> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("settings.updateImap".to_string());
        state.imap = settings.clone();
        Ok(settings)
    }

    async fn get_pop(&self) -> Result<PopSettingsView> {
        Ok(self.state.lock().unwrap().pop.clone())
    }

    async fn update_pop(&self, settings: PopSettingsView) -> Result<PopSettingsView> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("settings.updatePop".to_string());
        state.pop = settings.clone();
        Ok(settings)
    }
}

fn apply_labels(msg: &mut FakeMessage, add: &[String], remove: &[String]) {
    for label in add {
        if !msg.labels.contains(label) {
            msg.labels.push(label.clone());
        }
    }
    msg.labels.retain(|l| !remove.contains(l));
}
