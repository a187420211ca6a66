//! Data-driven classification and risk tables.

mod classify;
mod risk;

pub use classify::{ClassificationRule, Classifier, Matcher, builtin_rules};
pub use risk::{NO_MATCHING_RULE, Predicate, RISK_RULES, RiskRule, score, score_with};
