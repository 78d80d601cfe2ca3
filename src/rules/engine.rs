//! Rule application against the live mailbox
//!
//! For each active rule: translate, page candidates through the combined
//! server query, evaluate any residual predicate on fetched details, and
//! accumulate actions into a deduplicated plan. The plan collapses into
//! batched Gmail mutations, executed unless the invocation is a dry run.
//! One rule failing never aborts its siblings; a deadline stops new Gmail
//! calls but already-executed mutations stay reported.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::{summarize, BatchExecutor, ItemFailure};
use crate::client::{GmailApi, ListParams};
use crate::config::RulesConfig;
use crate::error::{EngineError, ErrorKind, Result};
use crate::labels::LabelResolver;
use crate::models::MessageFormat;
use crate::rules::query::compile;
use crate::rules::rule::{ActionKind, Rule};
use crate::rules::store::RuleStore;

const UNREAD_LABEL: &str = "UNREAD";
const PAGE_SIZE: u32 = 100;

static DATE_BOUND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}/\d{2}/\d{2}$").unwrap());

fn default_true() -> bool {
    true
}

/// Inputs to `apply_rules`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApplyRulesRequest {
    /// Extra Gmail query ANDed with every rule's own query
    #[serde(default)]
    pub global_query: Option<String>,
    /// Restrict to these rules (ids or names); default is every enabled rule
    #[serde(default)]
    pub rule_ids: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Cap on messages scanned, counted across rules
    #[serde(default)]
    pub scan_limit: Option<usize>,
    /// `YYYY/MM/DD`, emitted as `after:`
    #[serde(default)]
    pub date_after: Option<String>,
    /// `YYYY/MM/DD`, emitted as `before:`
    #[serde(default)]
    pub date_before: Option<String>,
    /// Suppress the default date window
    #[serde(default)]
    pub all_mail: bool,
    /// Report affected message ids, not just counts
    #[serde(default)]
    pub include_detailed_ids: bool,
}

impl Default for ApplyRulesRequest {
    fn default() -> Self {
        ApplyRulesRequest {
            global_query: None,
            rule_ids: None,
            // Simulation unless the caller explicitly opts out
            dry_run: true,
            scan_limit: None,
            date_after: None,
            date_before: None,
            all_mail: false,
            include_detailed_ids: false,
        }
    }
}

/// Per-rule outcome inside the summary.
#[derive(Debug, Clone, Serialize)]
pub struct RuleApplication {
    pub rule_id: String,
    pub rule_name: String,
    pub scanned: usize,
    pub matched: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped_due_to_scan_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Outcome of one action key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionReport {
    pub planned: usize,
    pub executed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one `apply_rules` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyRulesSummary {
    pub total_messages_scanned: usize,
    pub emails_matching_any_rule: usize,
    pub rules_evaluated: Vec<RuleApplication>,
    pub actions_planned_or_taken: BTreeMap<String, ActionReport>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub scan_limit_reached: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Accumulator key: one batched mutation kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ActionKey {
    Trash,
    DeletePermanently,
    AddLabel(String),
    RemoveLabel(String),
    MarkRead,
    MarkUnread,
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKey::Trash => write!(f, "trash"),
            ActionKey::DeletePermanently => write!(f, "delete_permanently"),
            ActionKey::AddLabel(name) => write!(f, "add_label:{name}"),
            ActionKey::RemoveLabel(name) => write!(f, "remove_label:{name}"),
            ActionKey::MarkRead => write!(f, "mark_read"),
            ActionKey::MarkUnread => write!(f, "mark_unread"),
        }
    }
}

#[derive(Debug, Default)]
struct PlanEntry {
    ids: BTreeSet<String>,
    create_if_missing: bool,
}

pub struct RuleEngine {
    api: Arc<dyn GmailApi>,
    store: Arc<RuleStore>,
    labels: Arc<LabelResolver>,
    batch: BatchExecutor,
    config: RulesConfig,
}

impl RuleEngine {
    pub fn new(
        api: Arc<dyn GmailApi>,
        store: Arc<RuleStore>,
        labels: Arc<LabelResolver>,
        batch: BatchExecutor,
        config: RulesConfig,
    ) -> Self {
        Self {
            api,
            store,
            labels,
            batch,
            config,
        }
    }

    /// Apply the active rule set to the mailbox.
    pub async fn apply(
        &self,
        request: ApplyRulesRequest,
        deadline: Instant,
    ) -> Result<ApplyRulesSummary> {
        let now = Utc::now();
        let window = self.date_window(&request)?;
        let rules = self.resolve_rules(&request).await?;
        let mut warnings = rules.1;
        let rules = rules.0;

        let scan_limit = request.scan_limit.or(self.config.default_scan_limit);
        let mut scanned_total: usize = 0;
        let mut matched_any: BTreeSet<String> = BTreeSet::new();
        let mut plan: BTreeMap<ActionKey, PlanEntry> = BTreeMap::new();
        let mut rules_evaluated: Vec<RuleApplication> = Vec::new();
        let mut scan_limit_reached = false;

        for rule in &rules {
            let budget_left = scan_limit.map(|limit| limit.saturating_sub(scanned_total));
            if budget_left == Some(0) {
                scan_limit_reached = true;
                rules_evaluated.push(RuleApplication {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    scanned: 0,
                    matched: 0,
                    skipped_due_to_scan_limit: true,
                    error: None,
                    warnings: Vec::new(),
                });
                continue;
            }

            if Instant::now() >= deadline {
                rules_evaluated.push(RuleApplication {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    scanned: 0,
                    matched: 0,
                    skipped_due_to_scan_limit: false,
                    error: Some("cancelled: deadline reached before rule evaluation".to_string()),
                    warnings: Vec::new(),
                });
                continue;
            }

            let outcome = self
                .evaluate_rule(
                    rule,
                    &request,
                    &window,
                    budget_left,
                    deadline,
                    now,
                    &mut matched_any,
                    &mut plan,
                )
                .await;

            match outcome {
                Ok(application) => {
                    scanned_total += application.scanned;
                    if scan_limit.is_some_and(|limit| scanned_total >= limit) {
                        scan_limit_reached = true;
                    }
                    rules_evaluated.push(application);
                }
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "rule evaluation failed");
                    rules_evaluated.push(RuleApplication {
                        rule_id: rule.id.clone(),
                        rule_name: rule.name.clone(),
                        scanned: 0,
                        matched: 0,
                        skipped_due_to_scan_limit: false,
                        error: Some(e.to_string()),
                        warnings: Vec::new(),
                    });
                }
            }
        }

        let mut reports: BTreeMap<String, ActionReport> = BTreeMap::new();
        for (key, entry) in &plan {
            let mut report = ActionReport {
                planned: entry.ids.len(),
                ..Default::default()
            };
            if request.include_detailed_ids {
                report.ids = Some(entry.ids.iter().cloned().collect());
            }
            reports.insert(key.to_string(), report);
        }

        if !request.dry_run {
            self.execute_plan(&plan, &mut reports, deadline).await;
        }

        if scan_limit_reached {
            warnings.push("scan limit reached; remaining candidates were not examined".to_string());
        }

        info!(
            scanned = scanned_total,
            matched = matched_any.len(),
            rules = rules_evaluated.len(),
            dry_run = request.dry_run,
            "apply_rules finished"
        );

        Ok(ApplyRulesSummary {
            total_messages_scanned: scanned_total,
            emails_matching_any_rule: matched_any.len(),
            rules_evaluated,
            actions_planned_or_taken: reports,
            dry_run: request.dry_run,
            scan_limit_reached,
            warnings,
        })
    }

    /// Enabled rules, optionally filtered by id/name, in store order.
    async fn resolve_rules(
        &self,
        request: &ApplyRulesRequest,
    ) -> Result<(Vec<Rule>, Vec<String>)> {
        let all = self.store.list().await?;
        let mut warnings = Vec::new();

        let selected: Vec<Rule> = match &request.rule_ids {
            None => all.into_iter().filter(|r| r.is_enabled).collect(),
            Some(wanted) => {
                let mut picked = Vec::new();
                for key in wanted {
                    match all.iter().find(|r| &r.id == key || &r.name == key) {
                        Some(rule) if rule.is_enabled => picked.push(rule.clone()),
                        Some(rule) => warnings.push(format!(
                            "rule '{}' is disabled and was skipped",
                            rule.name
                        )),
                        None => warnings.push(format!("rule '{key}' not found")),
                    }
                }
                picked
            }
        };

        Ok((selected, warnings))
    }

    /// Date-window query parts for this invocation.
    ///
    /// Explicit bounds are additive constraints independent of `all_mail`;
    /// either suppresses the default window.
    fn date_window(&self, request: &ApplyRulesRequest) -> Result<Vec<String>> {
        let mut parts = Vec::new();

        for (value, operator) in [
            (&request.date_after, "after"),
            (&request.date_before, "before"),
        ] {
            if let Some(bound) = value {
                if !DATE_BOUND_RE.is_match(bound) {
                    return Err(EngineError::InvalidInput(format!(
                        "date bound '{bound}' must be YYYY/MM/DD"
                    )));
                }
                parts.push(format!("{operator}:{bound}"));
            }
        }

        if parts.is_empty() && !request.all_mail {
            parts.push(format!(
                "newer_than:{}d",
                self.config.default_date_window_days
            ));
        }

        Ok(parts)
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_rule(
        &self,
        rule: &Rule,
        request: &ApplyRulesRequest,
        window: &[String],
        budget: Option<usize>,
        deadline: Instant,
        now: DateTime<Utc>,
        matched_any: &mut BTreeSet<String>,
        plan: &mut BTreeMap<ActionKey, PlanEntry>,
    ) -> Result<RuleApplication> {
        let compiled = compile(rule);
        let mut rule_warnings = compiled.warnings.clone();

        let mut query_parts: Vec<String> = Vec::new();
        if let Some(global) = request.global_query.as_deref() {
            if !global.trim().is_empty() {
                query_parts.push(global.trim().to_string());
            }
        }
        query_parts.extend(window.iter().cloned());
        if !compiled.server_query.is_empty() && !compiled.broaden_candidates {
            query_parts.push(compiled.server_query.clone());
        }
        let combined = query_parts.join(" ");
        debug!(rule = %rule.name, query = %combined, "rule query");

        let required_headers = compiled
            .residual
            .as_ref()
            .map(|p| p.required_headers())
            .unwrap_or_default();
        let fetch_format = if compiled.needs_full_message {
            MessageFormat::Full
        } else {
            MessageFormat::Metadata
        };

        let mut scanned = 0usize;
        let mut matched: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            if Instant::now() >= deadline {
                rule_warnings.push("deadline reached; candidate listing stopped".to_string());
                break;
            }

            let remaining = budget.map(|b| b.saturating_sub(scanned));
            if remaining == Some(0) {
                break;
            }
            let page_size = remaining
                .map(|r| (r.min(PAGE_SIZE as usize)) as u32)
                .unwrap_or(PAGE_SIZE);

            let page = self
                .api
                .list_messages(ListParams {
                    query: (!combined.is_empty()).then(|| combined.clone()),
                    max_results: page_size,
                    page_token: page_token.clone(),
                    include_spam_trash: false,
                })
                .await?;

            let candidates: Vec<String> = page
                .messages
                .iter()
                .map(|stub| stub.id.clone())
                .take(remaining.unwrap_or(usize::MAX))
                .collect();
            scanned += candidates.len();

            match &compiled.residual {
                None => matched.extend(candidates),
                Some(predicate) if predicate.is_empty() => matched.extend(candidates),
                Some(predicate) => {
                    let api = Arc::clone(&self.api);
                    let headers = required_headers.clone();
                    let outcomes = self
                        .batch
                        .run(candidates, |id| {
                            let api = Arc::clone(&api);
                            let headers = headers.clone();
                            async move { api.get_message(&id, fetch_format, &headers).await }
                        })
                        .await;

                    let mut fetch_failures = 0usize;
                    for item in outcomes {
                        match item.outcome {
                            Ok(details) => {
                                if predicate.eval(&details, now) {
                                    matched.push(item.id);
                                }
                            }
                            Err(_) => fetch_failures += 1,
                        }
                    }
                    if fetch_failures > 0 {
                        rule_warnings.push(format!(
                            "{fetch_failures} candidate(s) could not be fetched for evaluation"
                        ));
                    }
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        for id in &matched {
            matched_any.insert(id.clone());
        }
        for action in &rule.actions {
            let key = match action.kind {
                ActionKind::Trash => ActionKey::Trash,
                ActionKind::DeletePermanently => ActionKey::DeletePermanently,
                ActionKind::AddLabel => ActionKey::AddLabel(
                    action.parameters.label_name.clone().unwrap_or_default(),
                ),
                ActionKind::RemoveLabel => ActionKey::RemoveLabel(
                    action.parameters.label_name.clone().unwrap_or_default(),
                ),
                ActionKind::MarkRead => ActionKey::MarkRead,
                ActionKind::MarkUnread => ActionKey::MarkUnread,
            };
            let entry = plan.entry(key).or_default();
            entry.create_if_missing |= action.parameters.create_if_missing;
            for id in &matched {
                entry.ids.insert(id.clone());
            }
        }

        Ok(RuleApplication {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            scanned,
            matched: matched.len(),
            skipped_due_to_scan_limit: false,
            error: None,
            warnings: rule_warnings,
        })
    }

    /// Collapse the plan into batched Gmail mutations.
    ///
    /// Execution order is (action kind, chunk index); no ordering across
    /// rules is promised. The deadline is checked before every chunk.
    async fn execute_plan(
        &self,
        plan: &BTreeMap<ActionKey, PlanEntry>,
        reports: &mut BTreeMap<String, ActionReport>,
        deadline: Instant,
    ) {
        for (key, entry) in plan {
            let ids: Vec<String> = entry.ids.iter().cloned().collect();
            let report = reports.get_mut(&key.to_string()).expect("report exists");

            match key {
                ActionKey::Trash => {
                    self.run_per_item(&ids, report, deadline, |api, id| async move {
                        api.trash_message(&id).await
                    })
                    .await;
                }
                ActionKey::DeletePermanently => {
                    self.run_chunked(&ids, report, deadline, |api, chunk| async move {
                        api.batch_delete_messages(&chunk).await
                    })
                    .await;
                }
                ActionKey::AddLabel(name) => {
                    match self.labels.resolve(name, entry.create_if_missing).await {
                        Ok(label_id) => {
                            self.run_chunked(&ids, report, deadline, move |api, chunk| {
                                let add = vec![label_id.clone()];
                                async move { api.batch_modify_messages(&chunk, &add, &[]).await }
                            })
                            .await;
                        }
                        Err(e) => report.error = Some(e.to_string()),
                    }
                }
                ActionKey::RemoveLabel(name) => {
                    match self.labels.resolve(name, false).await {
                        Ok(label_id) => {
                            self.run_chunked(&ids, report, deadline, move |api, chunk| {
                                let remove = vec![label_id.clone()];
                                async move { api.batch_modify_messages(&chunk, &[], &remove).await }
                            })
                            .await;
                        }
                        Err(e) => report.error = Some(e.to_string()),
                    }
                }
                ActionKey::MarkRead => {
                    self.run_chunked(&ids, report, deadline, |api, chunk| async move {
                        api.batch_modify_messages(&chunk, &[], &[UNREAD_LABEL.to_string()])
                            .await
                    })
                    .await;
                }
                ActionKey::MarkUnread => {
                    self.run_chunked(&ids, report, deadline, |api, chunk| async move {
                        api.batch_modify_messages(&chunk, &[UNREAD_LABEL.to_string()], &[])
                            .await
                    })
                    .await;
                }
            }
        }
    }

    /// Per-item execution with per-item outcomes (trash has no aggregate
    /// endpoint).
    async fn run_per_item<F, Fut>(
        &self,
        ids: &[String],
        report: &mut ActionReport,
        deadline: Instant,
        op: F,
    ) where
        F: Fn(Arc<dyn GmailApi>, String) -> Fut + Copy,
        Fut: std::future::Future<Output = Result<()>>,
    {
        for chunk in ids.chunks(self.batch.batch_size()) {
            if Instant::now() >= deadline {
                report.cancelled = true;
                break;
            }
            let api = Arc::clone(&self.api);
            let outcomes = self
                .batch
                .run(chunk.to_vec(), |id| op(Arc::clone(&api), id))
                .await;
            let (ok, failures) = summarize(&outcomes);
            report.executed += ok;
            report.failures.extend(failures);
        }
    }

    /// Aggregate-endpoint execution; a chunk failure marks every id in it
    async fn run_chunked<F, Fut>(
        &self,
        ids: &[String],
        report: &mut ActionReport,
        deadline: Instant,
        op: F,
    ) where
        F: Fn(Arc<dyn GmailApi>, Vec<String>) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        for chunk in ids.chunks(self.batch.batch_size()) {
            if Instant::now() >= deadline {
                report.cancelled = true;
                break;
            }
            match op(Arc::clone(&self.api), chunk.to_vec()).await {
                Ok(()) => report.executed += chunk.len(),
                Err(e) => {
                    let kind: ErrorKind = e.kind();
                    let message = e.to_string();
                    report.failures.extend(chunk.iter().map(|id| ItemFailure {
                        id: id.clone(),
                        kind,
                        message: message.clone(),
                    }));
                }
            }
        }
    }
}
