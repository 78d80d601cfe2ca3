//! The fixed tool catalogue
//!
//! Builds the registry from the assembled engine services. Names follow
//! `<verb>_<object>`; each definition carries its phase, policy flags, and a
//! JSON schema used for catalogue listing and array-parameter normalisation.
//! Input validation itself happens in the typed request structs.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::batch::BatchExecutor;
use crate::client::GmailApi;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::labels::LabelResolver;
use crate::mcp::tool::{handler, parse_input, ToolDef, ToolPolicy, ToolRegistry};
use crate::models::{ImapSettingsView, PopSettingsView, VacationSettingsView};
use crate::ops::drafts::{DraftContent, DraftIdRequest, DraftOps, ListDraftsRequest, UpdateDraftRequest};
use crate::ops::messages::{
    GetEmailDetailsRequest, LabelEmailsRequest, ListEmailsRequest, MarkEmailsRequest, MessageIdsRequest,
    MessageOps,
};
use crate::ops::settings::SettingsOps;
use crate::ops::threads::{
    GetThreadDetailsRequest, ListThreadsRequest, ModifyThreadLabelsRequest, ThreadIdRequest, ThreadOps,
};
use crate::rules::engine::{ApplyRulesRequest, RuleEngine};
use crate::rules::rule::RuleDefinition;
use crate::rules::store::RuleStore;

/// Assembled engine services shared by every tool handler.
pub struct Services {
    pub messages: MessageOps,
    pub threads: ThreadOps,
    pub drafts: DraftOps,
    pub settings: SettingsOps,
    pub rules: Arc<RuleStore>,
    pub engine: RuleEngine,
}

impl Services {
    pub fn new(api: Arc<dyn GmailApi>, config: &EngineConfig) -> Self {
        let labels = Arc::new(LabelResolver::new(Arc::clone(&api)));
        let batch = BatchExecutor::new(config.gmail.batch_size, config.gmail.max_in_flight);
        let rules = Arc::new(RuleStore::new(config.rules.path.clone()));

        Services {
            messages: MessageOps::new(Arc::clone(&api), Arc::clone(&labels), batch.clone()),
            threads: ThreadOps::new(Arc::clone(&api), Arc::clone(&labels)),
            drafts: DraftOps::new(Arc::clone(&api)),
            settings: SettingsOps::new(Arc::clone(&api)),
            rules: Arc::clone(&rules),
            engine: RuleEngine::new(api, rules, labels, batch, config.rules.clone()),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListRulesRequest {
    #[serde(default = "default_true")]
    summary_view: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleLookupRequest {
    rule_id_or_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteRuleRequest {
    rule_identifier: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddRuleRequest {
    rule_definition: RuleDefinition,
}

fn to_output<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Build the complete catalogue over the given services.
pub fn build_registry(services: Arc<Services>, config: &EngineConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let destructive = ToolPolicy {
        destructive: true,
        ..Default::default()
    };
    let permanent = ToolPolicy {
        destructive: true,
        double_confirm: true,
        ..Default::default()
    };
    let settings_write = ToolPolicy {
        write_settings: true,
        ..Default::default()
    };

    // ----- email operations -----

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "list_emails",
        description: "List email stubs matching an optional Gmail query, with pagination",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 500},
                "page_token": {"type": "string"},
                "include_headers": {"type": "array", "items": {"type": "string"}},
                "include_spam_trash": {"type": "boolean"}
            }
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ListEmailsRequest>(input)?;
                to_output(svc.messages.list_emails(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "get_email_details",
        description: "Fetch one message in full, metadata, or raw form",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "message_id": {"type": "string"},
                "format": {"type": "string", "enum": ["full", "metadata", "raw"]},
                "include_headers": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["message_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<GetEmailDetailsRequest>(input)?;
                to_output(svc.messages.get_email_details(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "trash_emails",
        description: "Move messages to trash (recoverable for 30 days)",
        phase: 2,
        policy: destructive,
        input_schema: json!({
            "type": "object",
            "properties": {
                "message_ids": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["message_ids"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<MessageIdsRequest>(input)?;
                to_output(svc.messages.trash_emails(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "delete_emails_permanently",
        description: "Permanently delete messages, bypassing trash; unrecoverable",
        phase: 3,
        policy: permanent,
        input_schema: json!({
            "type": "object",
            "properties": {
                "message_ids": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["message_ids"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<MessageIdsRequest>(input)?;
                to_output(svc.messages.delete_emails_permanently(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "label_emails",
        description: "Add and/or remove labels on messages by label name",
        phase: 2,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "message_ids": {"type": "array", "items": {"type": "string"}},
                "add_label_names": {"type": "array", "items": {"type": "string"}},
                "remove_label_names": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["message_ids"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<LabelEmailsRequest>(input)?;
                to_output(svc.messages.label_emails(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "mark_emails",
        description: "Mark messages read or unread",
        phase: 2,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "message_ids": {"type": "array", "items": {"type": "string"}},
                "mark_as": {"type": "string", "enum": ["read", "unread"]}
            },
            "required": ["message_ids", "mark_as"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<MarkEmailsRequest>(input)?;
                to_output(svc.messages.mark_emails(request).await?)
            }
        }),
    });

    // ----- thread operations -----

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "list_threads",
        description: "List thread stubs matching an optional Gmail query",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 500},
                "page_token": {"type": "string"},
                "include_spam_trash": {"type": "boolean"}
            }
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ListThreadsRequest>(input)?;
                to_output(svc.threads.list_threads(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "get_thread_details",
        description: "Fetch a thread with its messages and aggregated labels",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "thread_id": {"type": "string"},
                "format": {"type": "string", "enum": ["full", "metadata", "raw"]},
                "include_headers": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["thread_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<GetThreadDetailsRequest>(input)?;
                to_output(svc.threads.get_thread_details(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "modify_thread_labels",
        description: "Add and/or remove labels on every message in a thread",
        phase: 2,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "thread_id": {"type": "string"},
                "add_label_names": {"type": "array", "items": {"type": "string"}},
                "remove_label_names": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["thread_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ModifyThreadLabelsRequest>(input)?;
                to_output(svc.threads.modify_thread_labels(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "trash_thread",
        description: "Move a whole thread to trash",
        phase: 2,
        policy: destructive,
        input_schema: json!({
            "type": "object",
            "properties": {"thread_id": {"type": "string"}},
            "required": ["thread_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ThreadIdRequest>(input)?;
                to_output(svc.threads.trash_thread(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "delete_thread_permanently",
        description: "Permanently delete a whole thread; unrecoverable",
        phase: 3,
        policy: permanent,
        input_schema: json!({
            "type": "object",
            "properties": {"thread_id": {"type": "string"}},
            "required": ["thread_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ThreadIdRequest>(input)?;
                to_output(svc.threads.delete_thread_permanently(request).await?)
            }
        }),
    });

    // ----- draft operations -----

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "create_draft",
        description: "Compose a plain-text draft, optionally threaded as a reply",
        phase: 2,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "to": {"type": "array", "items": {"type": "string"}},
                "subject": {"type": "string"},
                "body": {"type": "string"},
                "cc": {"type": "array", "items": {"type": "string"}},
                "bcc": {"type": "array", "items": {"type": "string"}},
                "thread_id": {"type": "string"}
            },
            "required": ["to", "subject", "body"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let content = parse_input::<DraftContent>(input)?;
                to_output(svc.drafts.create_draft(content).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "update_draft",
        description: "Replace a draft's content",
        phase: 2,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "draft_id": {"type": "string"},
                "to": {"type": "array", "items": {"type": "string"}},
                "subject": {"type": "string"},
                "body": {"type": "string"},
                "cc": {"type": "array", "items": {"type": "string"}},
                "bcc": {"type": "array", "items": {"type": "string"}},
                "thread_id": {"type": "string"}
            },
            "required": ["draft_id", "to", "subject", "body"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<UpdateDraftRequest>(input)?;
                to_output(svc.drafts.update_draft(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "send_draft",
        description: "Send an existing draft",
        phase: 2,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {"draft_id": {"type": "string"}},
            "required": ["draft_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<DraftIdRequest>(input)?;
                to_output(svc.drafts.send_draft(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "list_drafts",
        description: "List drafts with pagination",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "max_results": {"type": "integer", "minimum": 1, "maximum": 500},
                "page_token": {"type": "string"}
            }
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ListDraftsRequest>(input)?;
                to_output(svc.drafts.list_drafts(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "get_draft_details",
        description: "Fetch one draft",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {"draft_id": {"type": "string"}},
            "required": ["draft_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<DraftIdRequest>(input)?;
                to_output(svc.drafts.get_draft_details(request).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "delete_draft",
        description: "Discard a draft",
        phase: 2,
        policy: destructive,
        input_schema: json!({
            "type": "object",
            "properties": {"draft_id": {"type": "string"}},
            "required": ["draft_id"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<DraftIdRequest>(input)?;
                svc.drafts.delete_draft(request.clone()).await?;
                Ok(json!({
                    "draft_id": request.draft_id,
                    "status_message": "draft deleted"
                }))
            }
        }),
    });

    // ----- rule operations -----

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "list_rules",
        description: "List stored rules, condensed by default",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {"summary_view": {"type": "boolean"}}
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ListRulesRequest>(input)?;
                let rules = svc.rules.list().await?;
                if request.summary_view {
                    let summaries: Vec<_> = rules.iter().map(|r| r.summary()).collect();
                    Ok(json!({ "rules": summaries }))
                } else {
                    Ok(json!({ "rules": rules }))
                }
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "get_rule_details",
        description: "Fetch one rule by id or name",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {"rule_id_or_name": {"type": "string"}},
            "required": ["rule_id_or_name"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<RuleLookupRequest>(input)?;
                let rule = svc
                    .rules
                    .find(&request.rule_id_or_name)
                    .await?
                    .ok_or_else(|| {
                        EngineError::NotFound(format!(
                            "rule '{}' not found",
                            request.rule_id_or_name
                        ))
                    })?;
                to_output(rule)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "add_rule",
        description: "Create a rule; the name must be unique",
        phase: 2,
        policy: ToolPolicy::default(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "rule_definition": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "description": {"type": "string"},
                        "is_enabled": {"type": "boolean"},
                        "conditions": {"type": "array"},
                        "condition_conjunction": {"type": "string", "enum": ["AND", "OR"]},
                        "actions": {"type": "array"}
                    },
                    "required": ["name", "conditions", "actions"]
                }
            },
            "required": ["rule_definition"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<AddRuleRequest>(input)?;
                to_output(svc.rules.add(request.rule_definition).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "delete_rule",
        description: "Delete a rule by id or name",
        phase: 2,
        policy: destructive,
        input_schema: json!({
            "type": "object",
            "properties": {"rule_identifier": {"type": "string"}},
            "required": ["rule_identifier"]
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<DeleteRuleRequest>(input)?;
                let removed = svc.rules.delete(&request.rule_identifier).await?;
                Ok(json!({
                    "deleted_rule_id": removed.id,
                    "deleted_rule_name": removed.name
                }))
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "apply_rules",
        description: "Run stored rules against the mailbox, simulating unless dry_run=false",
        phase: 3,
        policy: ToolPolicy {
            destructive: true,
            // An absent dry_run means simulation for this tool
            dry_run_default: true,
            ..Default::default()
        },
        input_schema: json!({
            "type": "object",
            "properties": {
                "global_query": {"type": "string"},
                "rule_ids": {"type": "array", "items": {"type": "string"}},
                "dry_run": {"type": "boolean"},
                "scan_limit": {"type": "integer", "minimum": 1},
                "date_after": {"type": "string"},
                "date_before": {"type": "string"},
                "all_mail": {"type": "boolean"},
                "include_detailed_ids": {"type": "boolean"}
            }
        }),
        timeout_ms: Some(config.rules.apply_rules_timeout_ms),
        handler: handler(move |input, ctx| {
            let svc = Arc::clone(&svc);
            async move {
                let request = parse_input::<ApplyRulesRequest>(input)?;
                to_output(svc.engine.apply(request, ctx.deadline).await?)
            }
        }),
    });

    // ----- settings operations -----

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "get_vacation_settings",
        description: "Read the vacation auto-reply settings",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({"type": "object", "properties": {}}),
        timeout_ms: None,
        handler: handler(move |_, _| {
            let svc = Arc::clone(&svc);
            async move { to_output(svc.settings.get_vacation_settings().await?) }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "update_vacation_settings",
        description: "Replace the vacation auto-reply settings",
        phase: 2,
        policy: settings_write,
        input_schema: json!({
            "type": "object",
            "properties": {
                "enableAutoReply": {"type": "boolean"},
                "responseSubject": {"type": "string"},
                "responseBodyPlainText": {"type": "string"},
                "restrictToContacts": {"type": "boolean"},
                "restrictToDomain": {"type": "boolean"},
                "startTime": {"type": "integer"},
                "endTime": {"type": "integer"}
            }
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let settings = parse_input::<VacationSettingsView>(input)?;
                to_output(svc.settings.update_vacation_settings(settings).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "get_imap_settings",
        description: "Read the IMAP settings",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({"type": "object", "properties": {}}),
        timeout_ms: None,
        handler: handler(move |_, _| {
            let svc = Arc::clone(&svc);
            async move { to_output(svc.settings.get_imap_settings().await?) }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "update_imap_settings",
        description: "Replace the IMAP settings",
        phase: 2,
        policy: settings_write,
        input_schema: json!({
            "type": "object",
            "properties": {
                "enabled": {"type": "boolean"},
                "autoExpunge": {"type": "boolean"},
                "expungeBehavior": {"type": "string"},
                "maxFolderSize": {"type": "integer"}
            }
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let settings = parse_input::<ImapSettingsView>(input)?;
                to_output(svc.settings.update_imap_settings(settings).await?)
            }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "get_pop_settings",
        description: "Read the POP settings",
        phase: 1,
        policy: ToolPolicy::default(),
        input_schema: json!({"type": "object", "properties": {}}),
        timeout_ms: None,
        handler: handler(move |_, _| {
            let svc = Arc::clone(&svc);
            async move { to_output(svc.settings.get_pop_settings().await?) }
        }),
    });

    let svc = Arc::clone(&services);
    registry.register(ToolDef {
        name: "update_pop_settings",
        description: "Replace the POP settings",
        phase: 2,
        policy: settings_write,
        input_schema: json!({
            "type": "object",
            "properties": {
                "accessWindow": {"type": "string"},
                "disposition": {"type": "string"}
            }
        }),
        timeout_ms: None,
        handler: handler(move |input, _| {
            let svc = Arc::clone(&svc);
            async move {
                let settings = parse_input::<PopSettingsView>(input)?;
                to_output(svc.settings.update_pop_settings(settings).await?)
            }
        }),
    });

    registry
}
