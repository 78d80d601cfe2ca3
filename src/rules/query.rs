//! Rule → Gmail search-operator translation
//!
//! Each condition either becomes a server-side operator, stays behind as a
//! client-side residual, or (for malformed size/age values) contributes
//! nothing beyond a warning. Composition differs by conjunction: AND can
//! push translatable conditions down and re-check the rest client-side,
//! but OR must evaluate the full predicate client-side as soon as any
//! disjunct fails to translate, since omitting a disjunct under-selects.

use crate::rules::predicate::Predicate;
use crate::rules::rule::{
    parse_age, parse_size, Condition, ConditionField, ConditionOperator, Conjunction, Rule,
};

/// Result of translating one rule.
#[derive(Debug)]
pub struct CompiledQuery {
    /// Space-joined Gmail operators; empty when nothing translated
    pub server_query: String,
    /// Client-side re-check over the full condition set, when needed
    pub residual: Option<Predicate>,
    /// True when residual evaluation needs the full payload
    pub needs_full_message: bool,
    /// OR with an untranslatable disjunct: the partial server query
    /// under-selects, so candidate listing must fall back to the global
    /// filter and let the residual decide
    pub broaden_candidates: bool,
    pub warnings: Vec<String>,
}

enum Translation {
    Query(String),
    Residual,
    Invalid(String),
}

pub fn compile(rule: &Rule) -> CompiledQuery {
    let mut parts: Vec<String> = Vec::new();
    let mut untranslatable = false;
    let mut warnings: Vec<String> = Vec::new();

    for condition in &rule.conditions {
        match translate_condition(condition) {
            Translation::Query(q) => parts.push(q),
            Translation::Residual => untranslatable = true,
            Translation::Invalid(w) => warnings.push(w),
        }
    }

    let mut broaden_candidates = false;
    let (server_query, residual) = match rule.condition_conjunction {
        Conjunction::And => {
            // Operators joined by space AND together on the server
            let query = parts.join(" ");
            if untranslatable {
                let (predicate, _dups) =
                    Predicate::compile(&rule.conditions, rule.condition_conjunction);
                (query, Some(predicate))
            } else {
                (query, None)
            }
        }
        Conjunction::Or => {
            let query = match parts.len() {
                0 => String::new(),
                1 => parts.remove(0),
                _ => format!("{{{}}}", parts.join(" OR ")),
            };
            if untranslatable {
                // An omitted disjunct would silently drop matches, so the
                // whole predicate moves client-side and candidate listing
                // widens to the surrounding filters
                broaden_candidates = true;
                let (predicate, _dups) =
                    Predicate::compile(&rule.conditions, rule.condition_conjunction);
                (query, Some(predicate))
            } else {
                (query, None)
            }
        }
    };

    let needs_full_message = residual
        .as_ref()
        .map(Predicate::needs_full_message)
        .unwrap_or(false);

    CompiledQuery {
        server_query,
        residual,
        needs_full_message,
        broaden_candidates,
        warnings,
    }
}

fn translate_condition(c: &Condition) -> Translation {
    use ConditionField as F;
    use ConditionOperator as Op;

    match (c.field, c.operator) {
        (F::From, Op::Contains) => Translation::Query(format!("from:{}", escape(&c.value))),
        (F::From, Op::Equals) => Translation::Query(format!("from:{}", quote(&c.value))),
        (F::To, Op::Contains) => Translation::Query(format!("to:{}", escape(&c.value))),
        (F::To, Op::Equals) => Translation::Query(format!("to:{}", quote(&c.value))),
        (F::Cc, Op::Contains) => Translation::Query(format!("cc:{}", escape(&c.value))),
        (F::Cc, Op::Equals) => Translation::Query(format!("cc:{}", quote(&c.value))),
        (F::Subject, Op::Contains) => Translation::Query(format!("subject:{}", escape(&c.value))),
        (F::Subject, Op::Equals) => Translation::Query(format!("subject:{}", quote(&c.value))),
        (F::Label, Op::Contains) => Translation::Query(format!("label:{}", escape(&c.value))),
        (F::HasAttachment, Op::Is) => match c.value.to_ascii_lowercase().as_str() {
            "true" => Translation::Query("has:attachment".to_string()),
            "false" => Translation::Query("-has:attachment".to_string()),
            other => Translation::Invalid(format!(
                "has_attachment value '{other}' is not \"true\" or \"false\"; condition ignored"
            )),
        },
        (F::AttachmentFilename, Op::Contains) => {
            Translation::Query(format!("filename:{}", escape(&c.value)))
        }
        (F::AttachmentFilename, Op::Equals) => {
            Translation::Query(format!("filename:{}", quote(&c.value)))
        }
        (F::MessageSize, Op::GreaterThan) => size_operator("larger", &c.value),
        (F::MessageSize, Op::LessThan) => size_operator("smaller", &c.value),
        (F::DateAge, Op::OlderThan) => age_operator("older_than", &c.value),
        (F::DateAge, Op::NewerThan) => age_operator("newer_than", &c.value),
        // Negations, regexes, prefix/suffix matching, and snippet inspection
        // have no server operator
        _ => Translation::Residual,
    }
}

fn size_operator(operator: &str, value: &str) -> Translation {
    match parse_size(value) {
        Some(_) => {
            let normalized = value.trim().to_ascii_uppercase().replace(' ', "");
            Translation::Query(format!("{operator}:{normalized}"))
        }
        None => Translation::Invalid(format!(
            "invalid size value '{value}' (use e.g. \"500K\", \"5M\"); condition ignored"
        )),
    }
}

fn age_operator(operator: &str, value: &str) -> Translation {
    match parse_age(value) {
        Some(age) => {
            let caps = value.trim().trim_end_matches(char::is_alphabetic);
            Translation::Query(format!("{operator}:{}{}", caps.trim(), age.suffix()))
        }
        None => Translation::Invalid(format!(
            "invalid age value '{value}' (use e.g. \"7d\", \"2m\", \"1y\"); condition ignored"
        )),
    }
}

/// Quote only when the value needs it (spaces or quotes).
fn escape(value: &str) -> String {
    if value.contains(char::is_whitespace) || value.contains('"') {
        quote(value)
    } else {
        value.to_string()
    }
}

/// Always-quoted form; embedded quotes are backslash-escaped.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}
