//! End-to-end rule-engine behaviour over the in-memory mailbox fake.

mod common;

use common::{FakeGmail, FakeMessage};
use gmail_mcp_engine::batch::BatchExecutor;
use gmail_mcp_engine::client::GmailApi;
use gmail_mcp_engine::config::RulesConfig;
use gmail_mcp_engine::labels::LabelResolver;
use gmail_mcp_engine::rules::engine::ApplyRulesRequest;
use gmail_mcp_engine::rules::rule::{
    Action, ActionKind, ActionParameters, Condition, ConditionField, ConditionOperator,
    Conjunction, RuleDefinition,
};
use gmail_mcp_engine::rules::{RuleEngine, RuleStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Harness {
    fake: Arc<FakeGmail>,
    engine: RuleEngine,
    _dir: TempDir,
}

async fn harness(messages: Vec<FakeMessage>, rules: Vec<RuleDefinition>) -> Harness {
    let dir = TempDir::new().unwrap();
    let fake = Arc::new(FakeGmail::new(messages));
    let api: Arc<dyn GmailApi> = Arc::clone(&fake) as Arc<dyn GmailApi>;

    let store = Arc::new(RuleStore::new(dir.path().join("rules.json")));
    for rule in rules {
        store.add(rule).await.unwrap();
    }

    let engine = RuleEngine::new(
        Arc::clone(&api),
        store,
        Arc::new(LabelResolver::new(api)),
        BatchExecutor::new(100, 8),
        RulesConfig::default(),
    );

    Harness {
        fake,
        engine,
        _dir: dir,
    }
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(60)
}

fn rule(name: &str, conditions: Vec<Condition>, conjunction: Conjunction, actions: Vec<Action>) -> RuleDefinition {
    RuleDefinition {
        name: name.to_string(),
        description: None,
        is_enabled: true,
        conditions,
        condition_conjunction: conjunction,
        actions,
    }
}

/// Scenario: trash older newsletters, dry run first, then for real, then
/// observe the re-run finds nothing.
#[tokio::test]
async fn trash_older_newsletters_end_to_end() {
    let messages = vec![
        FakeMessage::new("m1", "news@x.com", "Weekly update").aged_days(40),
        FakeMessage::new("m2", "news@x.com", "Daily digest").aged_days(60),
        FakeMessage::new("m3", "news@x.com", "Promotions").aged_days(35),
        FakeMessage::new("m4", "news@x.com", "Fresh news").aged_days(5),
        FakeMessage::new("m5", "friend@y.com", "Lunch?").aged_days(45),
    ];
    let h = harness(
        messages,
        vec![rule(
            "old-newsletters",
            vec![
                Condition::new(ConditionField::From, ConditionOperator::Contains, "news@x.com"),
                Condition::new(ConditionField::DateAge, ConditionOperator::OlderThan, "30d"),
            ],
            Conjunction::And,
            vec![Action::trash()],
        )],
    )
    .await;

    // Dry run: everything planned, nothing touched
    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                all_mail: true,
                include_detailed_ids: true,
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.total_messages_scanned, 3);
    assert_eq!(summary.emails_matching_any_rule, 3);
    let trash = &summary.actions_planned_or_taken["trash"];
    assert_eq!(trash.planned, 3);
    assert_eq!(
        trash.ids.as_deref(),
        Some(&["m1".to_string(), "m2".to_string(), "m3".to_string()][..])
    );
    assert!(h
        .fake
        .calls()
        .iter()
        .all(|c| !c.starts_with("messages.trash")));

    // Real run: all three land in trash in one batch pass
    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                all_mail: true,
                dry_run: false,
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();
    assert_eq!(summary.actions_planned_or_taken["trash"].executed, 3);
    for id in ["m1", "m2", "m3"] {
        let msg = h.fake.message(id).unwrap();
        assert!(msg.labels.contains(&"TRASH".to_string()), "{id}");
    }
    assert!(h.fake.message("m4").unwrap().labels.contains(&"INBOX".to_string()));

    // Trashed messages fall out of the listing, so nothing is planned now
    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                all_mail: true,
                include_detailed_ids: true,
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();
    assert_eq!(summary.emails_matching_any_rule, 0);
    let planned: usize = summary
        .actions_planned_or_taken
        .values()
        .map(|r| r.planned)
        .sum();
    assert_eq!(planned, 0);
}

/// Scenario: OR with an untranslatable disjunct must not under-select; the
/// engine widens candidate listing and the residual decides.
#[tokio::test]
async fn or_with_untranslatable_disjunct_matches_union() {
    let messages = vec![
        FakeMessage::new("a", "billing@corp.com", "Invoice 12"),
        FakeMessage::new("b", "bank@corp.com", "Notice").with_body("please wire transfer funds"),
        FakeMessage::new("c", "friend@y.com", "Hello").with_body("see you tomorrow"),
    ];
    let h = harness(
        messages,
        vec![rule(
            "payments",
            vec![
                Condition::new(ConditionField::Subject, ConditionOperator::Contains, "invoice"),
                Condition::new(
                    ConditionField::BodySnippet,
                    ConditionOperator::Contains,
                    "wire transfer",
                ),
            ],
            Conjunction::Or,
            vec![Action::add_label("Newsletters")],
        )],
    )
    .await;

    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                all_mail: true,
                include_detailed_ids: true,
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();

    // All three candidates were scanned (broadened listing), details fetched,
    // and the union of both disjuncts matched
    assert_eq!(summary.total_messages_scanned, 3);
    assert_eq!(summary.emails_matching_any_rule, 2);
    let report = &summary.actions_planned_or_taken["add_label:Newsletters"];
    assert_eq!(
        report.ids.as_deref(),
        Some(&["a".to_string(), "b".to_string()][..])
    );
    // Residual evaluation required detail fetches for every candidate
    let gets = h
        .fake
        .calls()
        .iter()
        .filter(|c| c.starts_with("messages.get"))
        .count();
    assert_eq!(gets, 3);
}

/// Scenario: scan limit is a cross-rule budget; once exhausted, remaining
/// rules are skipped and say so.
#[tokio::test]
async fn scan_limit_enforced_across_rules() {
    let messages: Vec<FakeMessage> = (0..30)
        .map(|i| FakeMessage::new(&format!("m{i:02}"), "news@x.com", "Bulk").aged_days(40))
        .collect();
    let conditions = || {
        vec![Condition::new(
            ConditionField::From,
            ConditionOperator::Contains,
            "news@x.com",
        )]
    };
    let h = harness(
        messages,
        vec![
            rule("first", conditions(), Conjunction::And, vec![Action::trash()]),
            rule(
                "second",
                conditions(),
                Conjunction::And,
                vec![Action {
                    kind: ActionKind::MarkRead,
                    parameters: ActionParameters::default(),
                }],
            ),
        ],
    )
    .await;

    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                all_mail: true,
                scan_limit: Some(10),
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();

    assert_eq!(summary.total_messages_scanned, 10);
    assert!(summary.scan_limit_reached);
    assert_eq!(summary.rules_evaluated.len(), 2);
    assert_eq!(summary.rules_evaluated[0].rule_name, "first");
    assert_eq!(summary.rules_evaluated[0].scanned, 10);
    assert!(!summary.rules_evaluated[0].skipped_due_to_scan_limit);
    assert!(summary.rules_evaluated[1].skipped_due_to_scan_limit);
    assert_eq!(summary.rules_evaluated[1].scanned, 0);
}

/// Label actions resolve names to ids once and batch-modify; missing labels
/// fail the action unless it opted into creation.
#[tokio::test]
async fn add_label_missing_fails_unless_creation_requested() {
    let messages = vec![FakeMessage::new("m1", "news@x.com", "Update").aged_days(2)];
    let h = harness(
        messages,
        vec![rule(
            "labeler",
            vec![Condition::new(
                ConditionField::From,
                ConditionOperator::Contains,
                "news@x.com",
            )],
            Conjunction::And,
            vec![Action::add_label("DoesNotExist")],
        )],
    )
    .await;

    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                dry_run: false,
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();

    let report = &summary.actions_planned_or_taken["add_label:DoesNotExist"];
    assert_eq!(report.executed, 0);
    assert!(report.error.as_deref().unwrap().contains("not found"));

    // Same rule with create_if_missing set creates the label and applies it
    let messages = vec![FakeMessage::new("m1", "news@x.com", "Update").aged_days(2)];
    let h = harness(
        messages,
        vec![rule(
            "labeler",
            vec![Condition::new(
                ConditionField::From,
                ConditionOperator::Contains,
                "news@x.com",
            )],
            Conjunction::And,
            vec![Action {
                kind: ActionKind::AddLabel,
                parameters: ActionParameters {
                    label_name: Some("FreshLabel".to_string()),
                    create_if_missing: true,
                },
            }],
        )],
    )
    .await;

    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                dry_run: false,
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();

    assert_eq!(
        summary.actions_planned_or_taken["add_label:FreshLabel"].executed,
        1
    );
    assert!(h
        .fake
        .calls()
        .iter()
        .any(|c| c == "labels.create:FreshLabel"));
    assert!(h
        .fake
        .message("m1")
        .unwrap()
        .labels
        .iter()
        .any(|l| l.starts_with("Label_")));
}

/// mark_read collapses to removing the UNREAD label in one batch modify.
#[tokio::test]
async fn mark_read_uses_unread_label() {
    let messages = vec![
        FakeMessage::new("m1", "news@x.com", "One").aged_days(1),
        FakeMessage::new("m2", "news@x.com", "Two").aged_days(1),
    ];
    let h = harness(
        messages,
        vec![rule(
            "reader",
            vec![Condition::new(
                ConditionField::From,
                ConditionOperator::Contains,
                "news@x.com",
            )],
            Conjunction::And,
            vec![Action {
                kind: ActionKind::MarkRead,
                parameters: ActionParameters::default(),
            }],
        )],
    )
    .await;

    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                dry_run: false,
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();

    assert_eq!(summary.actions_planned_or_taken["mark_read"].executed, 2);
    assert!(h.fake.calls().iter().any(|c| c == "messages.batchModify:2"));
    for id in ["m1", "m2"] {
        assert!(!h.fake.message(id).unwrap().labels.contains(&"UNREAD".to_string()));
    }
}

/// Disabled rules are never evaluated; selection by name works.
#[tokio::test]
async fn rule_selection_and_enablement() {
    let messages = vec![FakeMessage::new("m1", "news@x.com", "One").aged_days(1)];
    let mut disabled = rule(
        "disabled-rule",
        vec![Condition::new(
            ConditionField::From,
            ConditionOperator::Contains,
            "news@x.com",
        )],
        Conjunction::And,
        vec![Action::trash()],
    );
    disabled.is_enabled = false;
    let h = harness(
        messages,
        vec![
            disabled,
            rule(
                "enabled-rule",
                vec![Condition::new(
                    ConditionField::From,
                    ConditionOperator::Contains,
                    "news@x.com",
                )],
                Conjunction::And,
                vec![Action::trash()],
            ),
        ],
    )
    .await;

    let summary = h
        .engine
        .apply(
            ApplyRulesRequest {
                rule_ids: Some(vec![
                    "enabled-rule".to_string(),
                    "disabled-rule".to_string(),
                    "ghost".to_string(),
                ]),
                ..Default::default()
            },
            deadline(),
        )
        .await
        .unwrap();

    assert_eq!(summary.rules_evaluated.len(), 1);
    assert_eq!(summary.rules_evaluated[0].rule_name, "enabled-rule");
    assert!(summary.warnings.iter().any(|w| w.contains("disabled")));
    assert!(summary.warnings.iter().any(|w| w.contains("ghost")));
}

/// An expired deadline stops new Gmail calls; the summary reports the
/// cancellation instead of silently succeeding.
#[tokio::test]
async fn expired_deadline_cancels_evaluation() {
    let messages = vec![FakeMessage::new("m1", "news@x.com", "One").aged_days(1)];
    let h = harness(
        messages,
        vec![rule(
            "late",
            vec![Condition::new(
                ConditionField::From,
                ConditionOperator::Contains,
                "news@x.com",
            )],
            Conjunction::And,
            vec![Action::trash()],
        )],
    )
    .await;

    let summary = h
        .engine
        .apply(ApplyRulesRequest::default(), Instant::now())
        .await
        .unwrap();

    assert_eq!(summary.total_messages_scanned, 0);
    assert!(summary.rules_evaluated[0]
        .error
        .as_deref()
        .unwrap()
        .contains("cancelled"));
    assert!(h.fake.calls().is_empty());
}
