//! Mailbox data model: lazy stubs from listings, materialised details, and
//! the thread/draft/label views the tool surface returns.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use google_gmail1::api::{Message, MessagePart};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message format options for Gmail API fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Only message ID and thread ID
    Minimal,
    /// Headers, labels, snippet, internal date, size estimate
    #[default]
    Metadata,
    /// Full payload including body parts
    Full,
    /// RFC 2822 wire form, base64url-encoded
    Raw,
}

impl MessageFormat {
    /// Format string for the API call
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Minimal => "minimal",
            MessageFormat::Metadata => "metadata",
            MessageFormat::Full => "full",
            MessageFormat::Raw => "raw",
        }
    }
}

/// Headers populated on listing stubs when the caller asks for them.
pub const STUB_HEADERS: &[&str] = &[
    "From",
    "To",
    "Cc",
    "Subject",
    "Date",
    "Reply-To",
    "Message-ID",
];

/// Lazy handle returned by listings.
///
/// Header fields are populated only when the listing requested them via
/// `include_headers`; everything else stays `None` so callers can tell
/// "absent" from "not fetched".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailStub {
    pub id: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Fully materialised message view. Produced only when needed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailDetails {
    pub id: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Full header map, names lowercased
    pub headers: BTreeMap<String, String>,
    pub label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_estimate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentInfo>,
    /// Present only for `format=raw`, base64url-encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// Thread view: ordered messages plus the union of their label sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadView {
    pub id: String,
    pub messages: Vec<EmailDetails>,
    pub label_ids: Vec<String>,
}

/// Thread handle from listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadStub {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Draft view returned by draft operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<EmailStub>,
}

/// Label info returned from Gmail API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// One page of a message listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<EmailStub>,
    pub next_page_token: Option<String>,
}

/// One page of a thread listing.
#[derive(Debug, Clone, Default)]
pub struct ThreadPage {
    pub threads: Vec<ThreadStub>,
    pub next_page_token: Option<String>,
}

impl EmailStub {
    /// Build a stub from a listing entry, lifting the requested headers.
    pub fn from_message(msg: &Message) -> Self {
        let mut stub = EmailStub {
            id: msg.id.clone().unwrap_or_default(),
            thread_id: msg.thread_id.clone().unwrap_or_default(),
            snippet: msg.snippet.clone(),
            ..Default::default()
        };

        if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
            for header in headers {
                let (Some(name), Some(value)) = (&header.name, &header.value) else {
                    continue;
                };
                match name.to_ascii_lowercase().as_str() {
                    "from" => stub.from = Some(value.clone()),
                    "to" => stub.to = Some(value.clone()),
                    "cc" => stub.cc = Some(value.clone()),
                    "subject" => stub.subject = Some(value.clone()),
                    "date" => stub.date = Some(value.clone()),
                    "reply-to" => stub.reply_to = Some(value.clone()),
                    "message-id" => stub.message_id = Some(value.clone()),
                    _ => {}
                }
            }
        }

        stub
    }
}

impl EmailDetails {
    /// Materialise from a fetched message of any format.
    pub fn from_message(msg: Message) -> Self {
        let mut headers = BTreeMap::new();
        if let Some(hs) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
            for header in hs {
                if let (Some(name), Some(value)) = (&header.name, &header.value) {
                    headers.insert(name.to_ascii_lowercase(), value.clone());
                }
            }
        }

        let body_text = msg.payload.as_ref().and_then(extract_plain_text);
        let attachments = msg
            .payload
            .as_ref()
            .map(collect_attachments)
            .unwrap_or_default();

        EmailDetails {
            id: msg.id.unwrap_or_default(),
            thread_id: msg.thread_id.unwrap_or_default(),
            snippet: msg.snippet,
            headers,
            label_ids: msg.label_ids.unwrap_or_default(),
            internal_date: msg
                .internal_date
                .and_then(DateTime::from_timestamp_millis),
            size_estimate: msg.size_estimate.map(|s| s.max(0) as u64),
            body_text,
            attachments,
            raw: msg.raw.map(|bytes| URL_SAFE_NO_PAD.encode(bytes)),
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    /// Snippet plus plain-text body, for snippet-style matching.
    pub fn snippet_and_body(&self) -> String {
        let mut text = self.snippet.clone().unwrap_or_default();
        if let Some(body) = &self.body_text {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(body);
        }
        text
    }
}

impl ThreadView {
    /// Build from a fetched thread, aggregating the message label sets.
    pub fn from_thread(thread: google_gmail1::api::Thread) -> Self {
        let id = thread.id.unwrap_or_default();
        let messages: Vec<EmailDetails> = thread
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(EmailDetails::from_message)
            .collect();

        let mut label_ids: Vec<String> = Vec::new();
        for message in &messages {
            for label in &message.label_ids {
                if !label_ids.contains(label) {
                    label_ids.push(label.clone());
                }
            }
        }

        ThreadView {
            id,
            messages,
            label_ids,
        }
    }
}

impl DraftView {
    pub fn from_draft(draft: google_gmail1::api::Draft) -> Self {
        DraftView {
            id: draft.id.unwrap_or_default(),
            message: draft.message.as_ref().map(EmailStub::from_message),
        }
    }
}

/// Recursively find the first `text/plain` part's decoded body.
fn extract_plain_text(part: &MessagePart) -> Option<String> {
    if part.mime_type.as_deref() == Some("text/plain") {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            if let Ok(text) = String::from_utf8(data.clone()) {
                return Some(text);
            }
        }
    }

    // Top-level body without an explicit text/plain mime (single-part messages)
    if part.parts.is_none() {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            if let Ok(text) = String::from_utf8(data.clone()) {
                return Some(text);
            }
        }
    }

    for child in part.parts.as_deref().unwrap_or_default() {
        if let Some(text) = extract_plain_text(child) {
            return Some(text);
        }
    }
    None
}

/// Walk the part tree collecting named attachments.
fn collect_attachments(part: &MessagePart) -> Vec<AttachmentInfo> {
    let mut found = Vec::new();
    walk_attachments(part, &mut found);
    found
}

fn walk_attachments(part: &MessagePart, found: &mut Vec<AttachmentInfo>) {
    if let Some(filename) = part.filename.as_deref() {
        if !filename.is_empty() {
            found.push(AttachmentInfo {
                filename: filename.to_string(),
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size: part
                    .body
                    .as_ref()
                    .and_then(|b| b.size)
                    .map(|s| s.max(0) as u64)
                    .unwrap_or(0),
            });
        }
    }
    for child in part.parts.as_deref().unwrap_or_default() {
        walk_attachments(child, found);
    }
}

/// Vacation responder settings, mirrored from the Gmail resource.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VacationSettingsView {
    #[serde(default)]
    pub enable_auto_reply: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body_plain_text: Option<String>,
    #[serde(default)]
    pub restrict_to_contacts: bool,
    #[serde(default)]
    pub restrict_to_domain: bool,
    /// Epoch milliseconds, per the wire format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl VacationSettingsView {
    pub fn from_api(v: google_gmail1::api::VacationSettings) -> Self {
        Self {
            enable_auto_reply: v.enable_auto_reply.unwrap_or(false),
            response_subject: v.response_subject,
            response_body_plain_text: v.response_body_plain_text,
            restrict_to_contacts: v.restrict_to_contacts.unwrap_or(false),
            restrict_to_domain: v.restrict_to_domain.unwrap_or(false),
            start_time: v.start_time,
            end_time: v.end_time,
        }
    }

    pub fn into_api(self) -> google_gmail1::api::VacationSettings {
        google_gmail1::api::VacationSettings {
            enable_auto_reply: Some(self.enable_auto_reply),
            response_subject: self.response_subject,
            response_body_plain_text: self.response_body_plain_text,
            response_body_html: None,
            restrict_to_contacts: Some(self.restrict_to_contacts),
            restrict_to_domain: Some(self.restrict_to_domain),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// IMAP settings, mirrored from the Gmail resource.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImapSettingsView {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_expunge: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expunge_behavior: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_folder_size: Option<i32>,
}

impl ImapSettingsView {
    pub fn from_api(v: google_gmail1::api::ImapSettings) -> Self {
        Self {
            enabled: v.enabled.unwrap_or(false),
            auto_expunge: v.auto_expunge.unwrap_or(false),
            expunge_behavior: v.expunge_behavior,
            max_folder_size: v.max_folder_size,
        }
    }

    pub fn into_api(self) -> google_gmail1::api::ImapSettings {
        google_gmail1::api::ImapSettings {
            enabled: Some(self.enabled),
            auto_expunge: Some(self.auto_expunge),
            expunge_behavior: self.expunge_behavior,
            max_folder_size: self.max_folder_size,
        }
    }
}

/// POP settings, mirrored from the Gmail resource.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PopSettingsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
}

impl PopSettingsView {
    pub fn from_api(v: google_gmail1::api::PopSettings) -> Self {
        Self {
            access_window: v.access_window,
            disposition: v.disposition,
        }
    }

    pub fn into_api(self) -> google_gmail1::api::PopSettings {
        google_gmail1::api::PopSettings {
            access_window: self.access_window,
            disposition: self.disposition,
        }
    }
}

/// Parse an address header in "Name <email@example.com>" format
pub fn parse_mailbox(header: &str) -> Option<(String, String)> {
    let start = header.find('<')?;
    let end = header.find('>')?;
    if end < start {
        return None;
    }
    let name = header[..start].trim().trim_matches('"').to_string();
    let email = header[start + 1..end].trim().to_string();
    Some((name, email))
}

/// Parse an RFC 2822 date header, falling back to RFC 3339
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(date_str)
        .or_else(|_| DateTime::parse_from_rfc3339(date_str))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn message_with_headers(id: &str, headers: Vec<MessagePartHeader>) -> Message {
        Message {
            id: Some(id.to_string()),
            thread_id: Some(format!("t-{id}")),
            snippet: Some("snippet text".to_string()),
            payload: Some(MessagePart {
                headers: Some(headers),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_stub_lifts_requested_headers() {
        let msg = message_with_headers(
            "m1",
            vec![
                header("From", "Alice <alice@example.com>"),
                header("Subject", "Hello"),
                header("Reply-To", "reply@example.com"),
                header("X-Custom", "ignored"),
            ],
        );

        let stub = EmailStub::from_message(&msg);
        assert_eq!(stub.id, "m1");
        assert_eq!(stub.thread_id, "t-m1");
        assert_eq!(stub.from.as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(stub.subject.as_deref(), Some("Hello"));
        assert_eq!(stub.reply_to.as_deref(), Some("reply@example.com"));
        assert!(stub.to.is_none());
    }

    #[test]
    fn test_details_lowercases_headers() {
        let msg = message_with_headers("m2", vec![header("Subject", "Case Test")]);
        let details = EmailDetails::from_message(msg);
        assert_eq!(details.header("subject"), Some("Case Test"));
        assert_eq!(details.header("SUBJECT"), Some("Case Test"));
    }

    #[test]
    fn test_details_internal_date_and_size() {
        let msg = Message {
            id: Some("m3".to_string()),
            thread_id: Some("t3".to_string()),
            internal_date: Some(1_700_000_000_000),
            size_estimate: Some(2048),
            ..Default::default()
        };
        let details = EmailDetails::from_message(msg);
        assert!(details.internal_date.is_some());
        assert_eq!(details.size_estimate, Some(2048));
    }

    #[test]
    fn test_extract_plain_text_from_parts() {
        let msg = Message {
            id: Some("m4".to_string()),
            payload: Some(MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                parts: Some(vec![
                    MessagePart {
                        mime_type: Some("text/html".to_string()),
                        body: Some(MessagePartBody {
                            data: Some(b"<b>html</b>".to_vec()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    MessagePart {
                        mime_type: Some("text/plain".to_string()),
                        body: Some(MessagePartBody {
                            data: Some(b"plain body".to_vec()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = EmailDetails::from_message(msg);
        assert_eq!(details.body_text.as_deref(), Some("plain body"));
    }

    #[test]
    fn test_collect_attachments() {
        let msg = Message {
            id: Some("m5".to_string()),
            payload: Some(MessagePart {
                parts: Some(vec![
                    MessagePart {
                        mime_type: Some("text/plain".to_string()),
                        filename: Some(String::new()),
                        ..Default::default()
                    },
                    MessagePart {
                        mime_type: Some("application/pdf".to_string()),
                        filename: Some("invoice.pdf".to_string()),
                        body: Some(MessagePartBody {
                            size: Some(512),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let details = EmailDetails::from_message(msg);
        assert_eq!(details.attachments.len(), 1);
        assert_eq!(details.attachments[0].filename, "invoice.pdf");
        assert_eq!(details.attachments[0].size, 512);
    }

    #[test]
    fn test_thread_view_aggregates_labels() {
        let thread = google_gmail1::api::Thread {
            id: Some("t1".to_string()),
            messages: Some(vec![
                Message {
                    id: Some("m1".to_string()),
                    label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
                    ..Default::default()
                },
                Message {
                    id: Some("m2".to_string()),
                    label_ids: Some(vec!["INBOX".to_string(), "STARRED".to_string()]),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let view = ThreadView::from_thread(thread);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.label_ids, vec!["INBOX", "UNREAD", "STARRED"]);
    }

    #[test]
    fn test_parse_mailbox() {
        let result = parse_mailbox("John Doe <john@example.com>");
        assert_eq!(
            result,
            Some(("John Doe".to_string(), "john@example.com".to_string()))
        );

        let result = parse_mailbox("\"Jane Smith\" <jane@example.com>");
        assert_eq!(
            result,
            Some(("Jane Smith".to_string(), "jane@example.com".to_string()))
        );

        assert_eq!(parse_mailbox("plain@example.com"), None);
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("Mon, 24 Nov 2025 10:30:00 +0000").is_some());
        assert!(parse_date("2025-11-24T10:30:00Z").is_some());
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn test_format_strings() {
        assert_eq!(MessageFormat::Metadata.as_str(), "metadata");
        assert_eq!(MessageFormat::Raw.as_str(), "raw");
    }

    #[test]
    fn test_snippet_and_body() {
        let details = EmailDetails {
            snippet: Some("short".to_string()),
            body_text: Some("long body".to_string()),
            ..Default::default()
        };
        assert_eq!(details.snippet_and_body(), "short\nlong body");
    }
}
