//! Dispatcher contract: policy enforcement, phase gating, normalisation,
//! and session recording, driven through the full catalogue.

mod common;

use common::{FakeGmail, FakeMessage};
use gmail_mcp_engine::client::GmailApi;
use gmail_mcp_engine::config::EngineConfig;
use gmail_mcp_engine::mcp::{
    build_registry, Dispatcher, InMemorySessionStore, PhaseGate, Services, SessionStore,
    ToolRequest,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    fake: Arc<FakeGmail>,
    dispatcher: Dispatcher,
    sessions: Arc<InMemorySessionStore>,
    _dir: TempDir,
}

fn harness_at_phase(messages: Vec<FakeMessage>, phase: u8) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.rules.path = dir.path().join("rules.json");
    config.tools.current_phase = phase;

    let fake = Arc::new(FakeGmail::new(messages));
    let api: Arc<dyn GmailApi> = Arc::clone(&fake) as Arc<dyn GmailApi>;
    let services = Arc::new(Services::new(api, &config));
    let registry = Arc::new(build_registry(services, &config));
    let gate = Arc::new(PhaseGate::new(config.tools.current_phase, registry.max_phase()).unwrap());
    let sessions = Arc::new(InMemorySessionStore::new(Duration::from_secs(3600)));

    Harness {
        fake,
        dispatcher: Dispatcher::new(
            registry,
            gate,
            Arc::clone(&sessions) as Arc<dyn SessionStore>,
            config.tools.clone(),
        ),
        sessions,
        _dir: dir,
    }
}

fn request(tool: &str, input: Value, confirmations: Vec<&str>) -> ToolRequest {
    ToolRequest {
        tool_name: tool.to_string(),
        input,
        session_id: "s1".to_string(),
        user_id: Some("u1".to_string()),
        confirmations: confirmations.into_iter().map(String::from).collect(),
    }
}

/// Scenario: permanent deletion needs two distinct confirmations; until then
/// no Gmail call is issued at all.
#[tokio::test]
async fn permanent_delete_requires_double_confirmation() {
    let h = harness_at_phase(vec![FakeMessage::new("m1", "a@b.com", "Bye")], 3);

    let denied = h
        .dispatcher
        .dispatch(request(
            "delete_emails_permanently",
            json!({"message_ids": ["m1"]}),
            vec![],
        ))
        .await;
    assert!(denied.is_error);
    assert!(denied.output["error_message"]
        .as_str()
        .unwrap()
        .contains("confirmation required"));

    let one = h
        .dispatcher
        .dispatch(request(
            "delete_emails_permanently",
            json!({"message_ids": ["m1"]}),
            vec!["token-a"],
        ))
        .await;
    assert!(one.is_error);

    // Nothing reached Gmail while policy was denying
    assert!(h.fake.calls().is_empty());
    assert!(h.fake.message("m1").is_some());

    let two = h
        .dispatcher
        .dispatch(request(
            "delete_emails_permanently",
            json!({"message_ids": ["m1"]}),
            vec!["token-a", "token-b"],
        ))
        .await;
    assert!(!two.is_error, "{:?}", two.output);
    assert_eq!(two.output["deleted_count"], 1);
    assert!(h.fake.message("m1").is_none());
    assert!(h
        .fake
        .calls()
        .iter()
        .any(|c| c == "messages.delete:m1"));
}

/// Scenario: batch partial failure surfaces per-item outcomes.
#[tokio::test]
async fn label_emails_partial_failure_reports_missing_item() {
    let h = harness_at_phase(
        vec![
            FakeMessage::new("good1", "a@b.com", "One"),
            FakeMessage::new("good2", "a@b.com", "Two"),
        ],
        3,
    );

    let response = h
        .dispatcher
        .dispatch(request(
            "label_emails",
            json!({
                "message_ids": ["good1", "missing", "good2"],
                "add_label_names": ["Newsletters"]
            }),
            vec![],
        ))
        .await;

    assert!(!response.is_error, "{:?}", response.output);
    assert_eq!(response.output["modified_count"], 2);
    let failures = response.output["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["id"], "missing");
    assert_eq!(failures[0]["kind"], "NotFound");
}

/// Scenario: phase gating returns informational text, not an error, and the
/// exposed catalogue omits the gated tool.
#[tokio::test]
async fn phase_gate_hides_apply_rules() {
    let h = harness_at_phase(vec![], 1);

    let response = h
        .dispatcher
        .dispatch(request("apply_rules", json!({}), vec![]))
        .await;
    assert!(!response.is_error);
    assert!(response.output["message"]
        .as_str()
        .unwrap()
        .contains("not available in current phase")
        || response.output["message"]
            .as_str()
            .unwrap()
            .contains("not available in the current phase"));

    let exposed = h.dispatcher.exposed_tools();
    assert!(!exposed.contains(&"apply_rules"));
    assert!(!exposed.contains(&"delete_emails_permanently"));
    assert!(exposed.contains(&"list_emails"));
    assert!(exposed.contains(&"list_rules"));
}

/// Array parameters may arrive as JSON-encoded strings; the dispatcher
/// normalises them before validation.
#[tokio::test]
async fn json_string_arrays_normalised_end_to_end() {
    let h = harness_at_phase(vec![FakeMessage::new("m1", "a@b.com", "One")], 3);

    let response = h
        .dispatcher
        .dispatch(request(
            "trash_emails",
            json!({"message_ids": "[\"m1\"]"}),
            vec!["ok"],
        ))
        .await;

    assert!(!response.is_error, "{:?}", response.output);
    assert_eq!(response.output["trashed_count"], 1);
    assert!(h
        .fake
        .message("m1")
        .unwrap()
        .labels
        .contains(&"TRASH".to_string()));
}

/// Empty message_ids is a schema-level mistake, surfaced as InvalidInput.
#[tokio::test]
async fn empty_message_ids_rejected() {
    let h = harness_at_phase(vec![], 3);

    let response = h
        .dispatcher
        .dispatch(request(
            "trash_emails",
            json!({"message_ids": []}),
            vec!["ok"],
        ))
        .await;

    assert!(response.is_error);
    assert_eq!(response.output["kind"], "InvalidInput");
}

/// Rule lifecycle through the tool surface: add, fetch, list, delete.
#[tokio::test]
async fn rule_roundtrip_via_tools() {
    let h = harness_at_phase(vec![], 3);
    let definition = json!({
        "rule_definition": {
            "name": "invoices",
            "conditions": [
                {"field": "subject", "operator": "contains", "value": "invoice"}
            ],
            "actions": [
                {"type": "add_label", "parameters": {"label_name": "Billing"}}
            ]
        }
    });

    let added = h
        .dispatcher
        .dispatch(request("add_rule", definition, vec![]))
        .await;
    assert!(!added.is_error, "{:?}", added.output);
    let rule_id = added.output["id"].as_str().unwrap().to_string();
    assert!(added.output["created_at"].is_string());

    // Duplicate name conflicts
    let duplicate = h
        .dispatcher
        .dispatch(request(
            "add_rule",
            json!({
                "rule_definition": {
                    "name": "invoices",
                    "conditions": [
                        {"field": "subject", "operator": "contains", "value": "x"}
                    ],
                    "actions": [{"type": "trash"}]
                }
            }),
            vec![],
        ))
        .await;
    assert!(duplicate.is_error);
    assert_eq!(duplicate.output["kind"], "RuleConflict");

    // Full view returns the stored definition intact
    let listed = h
        .dispatcher
        .dispatch(request("list_rules", json!({"summary_view": false}), vec![]))
        .await;
    let rules = listed.output["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["id"], rule_id.as_str());
    assert_eq!(rules[0]["conditions"][0]["field"], "subject");

    // Lookup works by name and by id
    let by_name = h
        .dispatcher
        .dispatch(request(
            "get_rule_details",
            json!({"rule_id_or_name": "invoices"}),
            vec![],
        ))
        .await;
    assert_eq!(by_name.output["id"], rule_id.as_str());

    // delete_rule is destructive: denied without confirmation
    let denied = h
        .dispatcher
        .dispatch(request(
            "delete_rule",
            json!({"rule_identifier": "invoices"}),
            vec![],
        ))
        .await;
    assert!(denied.is_error);
    assert_eq!(denied.output["kind"], "PolicyDenied");

    let deleted = h
        .dispatcher
        .dispatch(request(
            "delete_rule",
            json!({"rule_identifier": "invoices"}),
            vec!["confirmed"],
        ))
        .await;
    assert!(!deleted.is_error);

    let listed = h
        .dispatcher
        .dispatch(request("list_rules", json!({}), vec![]))
        .await;
    assert!(listed.output["rules"].as_array().unwrap().is_empty());
}

/// apply_rules defaults to dry run, which satisfies the destructive policy
/// without a confirmation token.
#[tokio::test]
async fn apply_rules_dry_run_default_passes_policy() {
    let h = harness_at_phase(vec![], 3);

    let response = h
        .dispatcher
        .dispatch(request("apply_rules", json!({"dry_run": true}), vec![]))
        .await;
    assert!(!response.is_error, "{:?}", response.output);
    assert_eq!(response.output["dry_run"], true);

    // Omitting dry_run means simulation, which also satisfies policy
    let implicit = h
        .dispatcher
        .dispatch(request("apply_rules", json!({}), vec![]))
        .await;
    assert!(!implicit.is_error, "{:?}", implicit.output);
    assert_eq!(implicit.output["dry_run"], true);

    // Without dry_run and without confirmation, policy denies
    let denied = h
        .dispatcher
        .dispatch(request("apply_rules", json!({"dry_run": false}), vec![]))
        .await;
    assert!(denied.is_error);
    assert_eq!(denied.output["kind"], "PolicyDenied");
}

/// Settings writes require one confirmation; reads never do.
#[tokio::test]
async fn settings_policy_and_passthrough() {
    let h = harness_at_phase(vec![], 3);

    let read = h
        .dispatcher
        .dispatch(request("get_vacation_settings", json!({}), vec![]))
        .await;
    assert!(!read.is_error);

    let denied = h
        .dispatcher
        .dispatch(request(
            "update_vacation_settings",
            json!({"enableAutoReply": true, "responseSubject": "Away"}),
            vec![],
        ))
        .await;
    assert!(denied.is_error);
    assert_eq!(denied.output["kind"], "PolicyDenied");

    let updated = h
        .dispatcher
        .dispatch(request(
            "update_vacation_settings",
            json!({"enableAutoReply": true, "responseSubject": "Away"}),
            vec!["go"],
        ))
        .await;
    assert!(!updated.is_error, "{:?}", updated.output);
    assert_eq!(updated.output["enableAutoReply"], true);

    let read = h
        .dispatcher
        .dispatch(request("get_vacation_settings", json!({}), vec![]))
        .await;
    assert_eq!(read.output["responseSubject"], "Away");
}

/// Every dispatched turn lands in the session history with its confirmations.
#[tokio::test]
async fn session_records_turns_in_order() {
    let h = harness_at_phase(vec![FakeMessage::new("m1", "a@b.com", "One")], 3);

    h.dispatcher
        .dispatch(request("list_emails", json!({"max_results": 10}), vec![]))
        .await;
    h.dispatcher
        .dispatch(request(
            "trash_emails",
            json!({"message_ids": ["m1"]}),
            vec!["yes"],
        ))
        .await;

    let history = h.sessions.history("u1", "s1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].turn_index, 0);
    assert_eq!(history[0].tool_name, "list_emails");
    assert!(!history[0].is_error);
    assert_eq!(history[1].tool_name, "trash_emails");
    assert_eq!(history[1].confirmations, vec!["yes"]);
}

/// Unknown fields in tool input are rejected, naming the problem.
#[tokio::test]
async fn unknown_input_field_rejected() {
    let h = harness_at_phase(vec![], 3);

    let response = h
        .dispatcher
        .dispatch(request(
            "get_email_details",
            json!({"message_id": "m1", "bogus_field": 1}),
            vec![],
        ))
        .await;

    assert!(response.is_error);
    assert_eq!(response.output["kind"], "InvalidInput");
    assert!(response.output["error_message"]
        .as_str()
        .unwrap()
        .contains("bogus_field"));
}

/// Draft lifecycle through the tool surface.
#[tokio::test]
async fn draft_lifecycle_via_tools() {
    let h = harness_at_phase(vec![], 3);

    let created = h
        .dispatcher
        .dispatch(request(
            "create_draft",
            json!({
                "to": ["alice@example.com"],
                "subject": "Plan",
                "body": "Tomorrow at 9."
            }),
            vec![],
        ))
        .await;
    assert!(!created.is_error, "{:?}", created.output);
    let draft_id = created.output["id"].as_str().unwrap().to_string();

    let listed = h
        .dispatcher
        .dispatch(request("list_drafts", json!({}), vec![]))
        .await;
    assert_eq!(listed.output["drafts"].as_array().unwrap().len(), 1);

    let sent = h
        .dispatcher
        .dispatch(request("send_draft", json!({"draft_id": draft_id}), vec![]))
        .await;
    assert!(!sent.is_error);
    assert!(sent.output["message_id"].as_str().unwrap().starts_with("sent-"));

    let listed = h
        .dispatcher
        .dispatch(request("list_drafts", json!({}), vec![]))
        .await;
    assert!(listed.output["drafts"].as_array().unwrap().is_empty());
}
