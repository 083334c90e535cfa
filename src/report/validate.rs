//! Per-field filter validation.
//!
//! A report declares a [`Schema`]: field name to [`FieldRule`] pairs. The
//! engine checks the whole schema exhaustively, collecting every
//! violation instead of stopping at the first, before any upstream or
//! database access.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap());
static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// One validation violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validation rule for a single filter field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    required: bool,
    kind: RuleKind,
}

#[derive(Debug, Clone)]
enum RuleKind {
    /// Calendar date in `YYYY-MM-DD`, must actually exist.
    Date,
    /// Integer within an inclusive range.
    IntRange(i64, i64),
    /// String length within an inclusive range.
    StrLength(usize, usize),
    /// Exact membership in a fixed set.
    OneOf(Vec<&'static str>),
    /// Lowercase slug (letters, digits, `-`, `_`).
    Slug,
    /// Any non-empty value.
    Any,
}

impl FieldRule {
    pub fn date() -> Self {
        Self {
            required: true,
            kind: RuleKind::Date,
        }
    }

    pub fn int_range(min: i64, max: i64) -> Self {
        Self {
            required: true,
            kind: RuleKind::IntRange(min, max),
        }
    }

    pub fn str_length(min: usize, max: usize) -> Self {
        Self {
            required: true,
            kind: RuleKind::StrLength(min, max),
        }
    }

    pub fn one_of(options: &[&'static str]) -> Self {
        Self {
            required: true,
            kind: RuleKind::OneOf(options.to_vec()),
        }
    }

    pub fn slug() -> Self {
        Self {
            required: true,
            kind: RuleKind::Slug,
        }
    }

    pub fn any() -> Self {
        Self {
            required: true,
            kind: RuleKind::Any,
        }
    }

    /// Absent values pass; present values still must satisfy the rule.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Check a raw value against the rule.
    pub fn check(&self, value: Option<&str>) -> Result<(), String> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());

        let Some(value) = value else {
            return if self.required {
                Err("value is required".into())
            } else {
                Ok(())
            };
        };

        match &self.kind {
            RuleKind::Date => {
                if !DATE.is_match(value) {
                    return Err("must be a date in YYYY-MM-DD format".into());
                }
                chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .map(|_| ())
                    .map_err(|_| "must be a valid calendar date".into())
            }
            RuleKind::IntRange(min, max) => match value.parse::<i64>() {
                Ok(n) if (*min..=*max).contains(&n) => Ok(()),
                Ok(_) => Err(format!("must be between {min} and {max}")),
                Err(_) => Err("must be an integer".into()),
            },
            RuleKind::StrLength(min, max) => {
                let len = value.chars().count();
                if (*min..=*max).contains(&len) {
                    Ok(())
                } else {
                    Err(format!("length must be between {min} and {max}"))
                }
            }
            RuleKind::OneOf(options) => {
                if options.iter().any(|opt| *opt == value) {
                    Ok(())
                } else {
                    Err(format!("must be one of: {}", options.join(", ")))
                }
            }
            RuleKind::Slug => {
                if SLUG.is_match(value) {
                    Ok(())
                } else {
                    Err("must be a lowercase slug".into())
                }
            }
            RuleKind::Any => Ok(()),
        }
    }
}

/// A report's filter schema, in declaration order.
pub type Schema = Vec<(String, FieldRule)>;

/// Convenience constructor for schema literals.
pub fn schema(fields: &[(&str, FieldRule)]) -> Schema {
    fields
        .iter()
        .map(|(name, rule)| (name.to_string(), rule.clone()))
        .collect()
}

/// Check every schema field against the raw query, collecting all
/// violations.
pub fn validate(query: &BTreeMap<String, String>, schema: &Schema) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for (field, rule) in schema {
        if let Err(message) = rule.check(query.get(field).map(String::as_str)) {
            errors.push(FieldError::new(field, message));
        }
    }

    errors
}
