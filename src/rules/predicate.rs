//! Client-side residual predicate
//!
//! When a rule's conditions cannot be fully pushed down to Gmail's search
//! operators, the full condition set is re-checked here against fetched
//! message details. Regexes are compiled once at predicate build time;
//! size/age conditions with unparseable values were warned about during
//! translation and are skipped (they contribute nothing on either side).

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::models::EmailDetails;
use crate::rules::rule::{
    parse_age, parse_size, AgeValue, Condition, ConditionField, ConditionOperator, Conjunction,
};

#[derive(Debug)]
struct Check {
    field: ConditionField,
    operator: ConditionOperator,
    value: String,
    regex: Option<Regex>,
    size: Option<u64>,
    age: Option<AgeValue>,
}

/// Compiled residual predicate over a rule's full condition set.
#[derive(Debug)]
pub struct Predicate {
    conjunction: Conjunction,
    checks: Vec<Check>,
}

impl Predicate {
    /// Build from conditions, skipping ones whose values cannot be parsed.
    /// Returns the predicate plus warnings for the skipped conditions.
    pub fn compile(conditions: &[Condition], conjunction: Conjunction) -> (Self, Vec<String>) {
        let mut checks = Vec::with_capacity(conditions.len());
        let mut warnings = Vec::new();

        for condition in conditions {
            let mut regex = None;
            let mut size = None;
            let mut age = None;

            match (condition.field, condition.operator) {
                (_, ConditionOperator::MatchesRegex) => {
                    match Regex::new(&condition.value) {
                        Ok(re) => regex = Some(re),
                        Err(e) => {
                            warnings.push(format!(
                                "skipping condition: invalid regex '{}': {e}",
                                condition.value
                            ));
                            continue;
                        }
                    }
                }
                (ConditionField::MessageSize, _) => match parse_size(&condition.value) {
                    Some(bytes) => size = Some(bytes),
                    None => {
                        warnings.push(format!(
                            "skipping condition: invalid size value '{}' (use e.g. \"500K\", \"5M\")",
                            condition.value
                        ));
                        continue;
                    }
                },
                (ConditionField::DateAge, _) => match parse_age(&condition.value) {
                    Some(parsed) => age = Some(parsed),
                    None => {
                        warnings.push(format!(
                            "skipping condition: invalid age value '{}' (use e.g. \"7d\", \"2m\", \"1y\")",
                            condition.value
                        ));
                        continue;
                    }
                },
                _ => {}
            }

            checks.push(Check {
                field: condition.field,
                operator: condition.operator,
                value: condition.value.clone(),
                regex,
                size,
                age,
            });
        }

        (
            Predicate {
                conjunction,
                checks,
            },
            warnings,
        )
    }

    /// True when nothing survived compilation; callers treat this as
    /// match-everything under AND and match-nothing-extra under OR.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Headers a metadata fetch must request for this predicate.
    pub fn required_headers(&self) -> Vec<String> {
        let mut headers: Vec<String> = Vec::new();
        for check in &self.checks {
            let name = match check.field {
                ConditionField::From => "From",
                ConditionField::To => "To",
                ConditionField::Cc => "Cc",
                ConditionField::Subject => "Subject",
                _ => continue,
            };
            if !headers.iter().any(|h| h == name) {
                headers.push(name.to_string());
            }
        }
        headers
    }

    /// True when evaluation needs the full payload (body or part structure),
    /// not just metadata headers.
    pub fn needs_full_message(&self) -> bool {
        self.checks.iter().any(|c| {
            matches!(
                c.field,
                ConditionField::BodySnippet
                    | ConditionField::AttachmentFilename
                    | ConditionField::HasAttachment
            )
        })
    }

    /// Evaluate against fetched details.
    pub fn eval(&self, details: &EmailDetails, now: DateTime<Utc>) -> bool {
        match self.conjunction {
            Conjunction::And => self.checks.iter().all(|c| eval_check(c, details, now)),
            Conjunction::Or => self.checks.iter().any(|c| eval_check(c, details, now)),
        }
    }
}

fn eval_check(check: &Check, details: &EmailDetails, now: DateTime<Utc>) -> bool {
    match check.field {
        ConditionField::From => text_op(check, details.header("from").unwrap_or_default()),
        ConditionField::To => text_op(check, details.header("to").unwrap_or_default()),
        ConditionField::Cc => text_op(check, details.header("cc").unwrap_or_default()),
        ConditionField::Subject => text_op(check, details.header("subject").unwrap_or_default()),
        ConditionField::BodySnippet => text_op(check, &details.snippet_and_body()),
        ConditionField::Label => {
            let matched = details
                .label_ids
                .iter()
                .any(|label| positive_text_op(check, label));
            match check.operator {
                ConditionOperator::NotContains | ConditionOperator::NotEquals => !matched,
                _ => matched,
            }
        }
        ConditionField::AttachmentFilename => {
            let matched = details
                .attachments
                .iter()
                .any(|a| positive_text_op(check, &a.filename));
            match check.operator {
                ConditionOperator::NotContains | ConditionOperator::NotEquals => !matched,
                _ => matched,
            }
        }
        ConditionField::HasAttachment => {
            let want = check.value.eq_ignore_ascii_case("true");
            details.attachments.is_empty() != want
        }
        ConditionField::MessageSize => {
            let Some(threshold) = check.size else {
                return true; // unparseable values are dropped at compile
            };
            let Some(size) = details.size_estimate else {
                return false;
            };
            match check.operator {
                ConditionOperator::GreaterThan => size > threshold,
                ConditionOperator::LessThan => size < threshold,
                _ => false,
            }
        }
        ConditionField::DateAge => {
            let Some(age) = check.age else {
                return true;
            };
            let Some(date) = details.internal_date else {
                return false;
            };
            let cutoff = age.cutoff_from(now);
            match check.operator {
                ConditionOperator::OlderThan => date < cutoff,
                ConditionOperator::NewerThan => date >= cutoff,
                _ => false,
            }
        }
    }
}

/// Apply the operator to one text value, honouring negation.
fn text_op(check: &Check, actual: &str) -> bool {
    match check.operator {
        ConditionOperator::NotContains => !positive_text_op(check, actual),
        ConditionOperator::NotEquals => !positive_text_op(check, actual),
        _ => positive_text_op(check, actual),
    }
}

/// The positive form of a text operator (negation handled by callers so
/// any-of-many fields negate over the whole set, not per element).
fn positive_text_op(check: &Check, actual: &str) -> bool {
    let actual_lower = actual.to_lowercase();
    let expected_lower = check.value.to_lowercase();

    match check.operator {
        ConditionOperator::Contains | ConditionOperator::NotContains => {
            actual_lower.contains(&expected_lower)
        }
        ConditionOperator::Equals | ConditionOperator::NotEquals => actual_lower == expected_lower,
        ConditionOperator::StartsWith => actual_lower.starts_with(&expected_lower),
        ConditionOperator::EndsWith => actual_lower.ends_with(&expected_lower),
        ConditionOperator::MatchesRegex => check
            .regex
            .as_ref()
            .map(|re| re.is_match(actual))
            .unwrap_or(false),
        _ => false,
    }
}
