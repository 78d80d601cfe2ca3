//! Rule, condition, and action model
//!
//! Conditions and actions are tagged variants over closed sets; extending a
//! set is a compile-time event, never a stringly-typed fallthrough.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Field a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    From,
    To,
    Cc,
    Subject,
    BodySnippet,
    Label,
    HasAttachment,
    AttachmentFilename,
    MessageSize,
    DateAge,
}

/// Comparison applied to the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    MatchesRegex,
    Is,
    OlderThan,
    NewerThan,
    GreaterThan,
    LessThan,
}

/// How a rule's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Conjunction {
    #[default]
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: String,
}

/// What a matched rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Trash,
    DeletePermanently,
    AddLabel,
    RemoveLabel,
    MarkRead,
    MarkUnread,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_name: Option<String>,
    /// add_label only: create the label instead of failing when missing
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub create_if_missing: bool,
}

impl ActionParameters {
    pub fn is_empty(&self) -> bool {
        self.label_name.is_none() && !self.create_if_missing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "ActionParameters::is_empty")]
    pub parameters: ActionParameters,
}

impl Action {
    pub fn trash() -> Self {
        Action {
            kind: ActionKind::Trash,
            parameters: ActionParameters::default(),
        }
    }

    pub fn add_label(name: &str) -> Self {
        Action {
            kind: ActionKind::AddLabel,
            parameters: ActionParameters {
                label_name: Some(name.to_string()),
                create_if_missing: false,
            },
        }
    }

    pub fn remove_label(name: &str) -> Self {
        Action {
            kind: ActionKind::RemoveLabel,
            parameters: ActionParameters {
                label_name: Some(name.to_string()),
                create_if_missing: false,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        match self.kind {
            ActionKind::AddLabel | ActionKind::RemoveLabel => {
                match self.parameters.label_name.as_deref() {
                    Some(name) if !name.trim().is_empty() => Ok(()),
                    _ => Err(EngineError::InvalidInput(format!(
                        "action '{}' requires parameters.label_name",
                        serde_json::to_string(&self.kind).unwrap_or_default()
                    ))),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Persisted rule. Identity is server-assigned and immutable; mutation is
/// full replacement only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_conjunction: Conjunction,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// Caller-supplied shape for `add_rule`: everything but identity/timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_conjunction: Conjunction,
    pub actions: Vec<Action>,
}

impl RuleDefinition {
    pub fn into_rule(self) -> Rule {
        let now = Utc::now();
        Rule {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            description: self.description,
            is_enabled: self.is_enabled,
            conditions: self.conditions,
            condition_conjunction: self.condition_conjunction,
            actions: self.actions,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Condensed view for `list_rules(summary_view=true)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_enabled: bool,
    pub condition_count: usize,
    pub action_count: usize,
}

impl Rule {
    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            is_enabled: self.is_enabled,
            condition_count: self.conditions.len(),
            action_count: self.actions.len(),
        }
    }

    /// Enforce the structural invariants before a rule enters the store.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "rule name must not be empty".to_string(),
            ));
        }
        if self.conditions.is_empty() {
            return Err(EngineError::InvalidInput(
                "rule must have at least one condition".to_string(),
            ));
        }
        if self.actions.is_empty() {
            return Err(EngineError::InvalidInput(
                "rule must have at least one action".to_string(),
            ));
        }
        for condition in &self.conditions {
            condition.validate()?;
        }
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}

/// Operators each field admits.
pub fn allowed_operators(field: ConditionField) -> &'static [ConditionOperator] {
    use ConditionOperator::*;
    match field {
        ConditionField::From
        | ConditionField::To
        | ConditionField::Cc
        | ConditionField::Subject
        | ConditionField::BodySnippet
        | ConditionField::AttachmentFilename => &[
            Contains,
            NotContains,
            Equals,
            NotEquals,
            StartsWith,
            EndsWith,
            MatchesRegex,
        ],
        ConditionField::Label => &[Contains, NotContains, Equals, NotEquals],
        ConditionField::HasAttachment => &[Is],
        ConditionField::MessageSize => &[GreaterThan, LessThan],
        ConditionField::DateAge => &[OlderThan, NewerThan],
    }
}

static SIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*([KkMm])$").unwrap());
static AGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\s*([dmy])$").unwrap());

/// Age magnitude with its calendar unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeValue {
    pub count: u32,
    pub unit: AgeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeUnit {
    Days,
    Months,
    Years,
}

impl AgeValue {
    /// Gmail operator suffix for this unit.
    pub fn suffix(&self) -> char {
        match self.unit {
            AgeUnit::Days => 'd',
            AgeUnit::Months => 'm',
            AgeUnit::Years => 'y',
        }
    }

    /// The instant this far in the past from `now`.
    pub fn cutoff_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.unit {
            AgeUnit::Days => now - chrono::Duration::days(self.count as i64),
            AgeUnit::Months => now
                .checked_sub_months(chrono::Months::new(self.count))
                .unwrap_or(now),
            AgeUnit::Years => now
                .checked_sub_months(chrono::Months::new(self.count.saturating_mul(12)))
                .unwrap_or(now),
        }
    }
}

/// Parse `"500K"` / `"5M"` into bytes. Bare numbers are not accepted.
pub fn parse_size(value: &str) -> Option<u64> {
    let caps = SIZE_RE.captures(value.trim())?;
    let n: u64 = caps[1].parse().ok()?;
    let multiplier = match &caps[2] {
        "K" | "k" => 1024,
        _ => 1024 * 1024,
    };
    Some(n * multiplier)
}

/// Parse `"30d"` / `"2m"` / `"1y"`. Spelled-out units are not accepted.
pub fn parse_age(value: &str) -> Option<AgeValue> {
    let caps = AGE_RE.captures(value.trim())?;
    let count: u32 = caps[1].parse().ok()?;
    let unit = match &caps[2] {
        "d" => AgeUnit::Days,
        "m" => AgeUnit::Months,
        _ => AgeUnit::Years,
    };
    Some(AgeValue { count, unit })
}

impl Condition {
    pub fn new(field: ConditionField, operator: ConditionOperator, value: &str) -> Self {
        Condition {
            field,
            operator,
            value: value.to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !allowed_operators(self.field).contains(&self.operator) {
            return Err(EngineError::InvalidInput(format!(
                "operator {:?} is not valid for field {:?}",
                self.operator, self.field
            )));
        }

        match self.field {
            ConditionField::HasAttachment => {
                let v = self.value.to_ascii_lowercase();
                if v != "true" && v != "false" {
                    return Err(EngineError::InvalidInput(
                        "has_attachment value must be \"true\" or \"false\"".to_string(),
                    ));
                }
            }
            _ => {
                if self.value.trim().is_empty() {
                    return Err(EngineError::InvalidInput(format!(
                        "condition on {:?} requires a value",
                        self.field
                    )));
                }
            }
        }

        // Regexes must compile before the rule is accepted; size/age values
        // with bad syntax only warn at translation time
        if self.operator == ConditionOperator::MatchesRegex {
            Regex::new(&self.value).map_err(|e| {
                EngineError::InvalidInput(format!("invalid regex '{}': {e}", self.value))
            })?;
        }

        Ok(())
    }
}
