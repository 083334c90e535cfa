//! Per-record business rule evaluation.
//!
//! A [`RuleManager`] holds an ordered list of severity-tagged predicates.
//! Evaluating a record runs every rule and collects an [`Issue`] for each
//! one that fires. Detection is decoupled from exclusion: a report may flag
//! a record as problematic without removing it from the result set.

use crate::pipeline::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ranked severity of a fired rule: `Info < Warning < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Produced when a rule fires against a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub rule: String,
    pub severity: Severity,
    /// Rule-specific payload returned by the predicate.
    pub detail: Value,
}

/// Result of evaluating every registered rule against one record.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub issues: Vec<Issue>,
    /// Highest severity among fired rules, `None` when none fired.
    pub severity: Option<Severity>,
}

type Predicate = Box<dyn Fn(&Record) -> Option<Value> + Send + Sync>;

struct Rule {
    id: String,
    severity: Severity,
    predicate: Predicate,
}

/// Ordered predicate evaluator.
#[derive(Default)]
pub struct RuleManager {
    rules: Vec<Rule>,
}

impl RuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Rules run in registration order.
    ///
    /// The predicate returns `Some(detail)` when the rule fires and `None`
    /// otherwise.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        severity: Severity,
        predicate: impl Fn(&Record) -> Option<Value> + Send + Sync + 'static,
    ) -> &mut Self {
        self.rules.push(Rule {
            id: id.into(),
            severity,
            predicate: Box::new(predicate),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule against the record.
    pub fn evaluate(&self, record: &Record) -> Evaluation {
        let mut issues = Vec::new();
        let mut max: Option<Severity> = None;

        for rule in &self.rules {
            let Some(detail) = (rule.predicate)(record) else {
                continue;
            };

            if max.map_or(true, |current| rule.severity > current) {
                max = Some(rule.severity);
            }

            issues.push(Issue {
                rule: rule.id.clone(),
                severity: rule.severity,
                detail,
            });
        }

        Evaluation {
            issues,
            severity: max,
        }
    }
}
