//! Declarative filtering: rule model, persistence, query translation,
//! residual evaluation, and batched application.

pub mod engine;
pub mod predicate;
pub mod query;
pub mod rule;
pub mod store;

pub use engine::{ApplyRulesRequest, ApplyRulesSummary, RuleEngine};
pub use predicate::Predicate;
pub use query::{compile, CompiledQuery};
pub use rule::{
    Action, ActionKind, Condition, ConditionField, ConditionOperator, Conjunction, Rule,
    RuleDefinition, RuleSummary,
};
pub use store::RuleStore;
