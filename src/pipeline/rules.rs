//! Rule definitions and the JSON rule loader.
//!
//! Rules are read from a JSON document with a top-level `rules` array and
//! validated as a whole before the first message is touched. Every field
//! name, predicate, group predicate and action type is checked against the
//! closed vocabulary in [`crate::pipeline::types`]; any mistake aborts the
//! load with a [`RuleDefinitionError`] naming the offending rule.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{RuleDefinitionError, TypeMismatchError};
use crate::pipeline::types::{ActionKind, FieldKind, FieldName, GroupKind, PredicateKind};

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawRuleFile {
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    #[serde(default)]
    description: String,
    conditions: RawConditionGroup,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RawConditionGroup {
    predicate: String,
    rules: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    field: String,
    predicate: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

// ── Validated model ─────────────────────────────────────────────────

/// Right-hand side of a condition, prepared once at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Lower-cased text for case-insensitive comparison.
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Why a single condition is invalid, before rule context is attached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionFault {
    #[error("empty value")]
    EmptyValue,
    #[error("'{0}' is not a valid date")]
    InvalidDate(String),
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
}

/// A single `(field, predicate, value)` test.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: FieldName,
    pub predicate: PredicateKind,
    /// Value as written in the rule file.
    pub value: String,
    operand: Operand,
}

impl FieldCondition {
    /// Build a condition, rejecting predicates the field's type cannot take.
    pub fn new(
        field: FieldName,
        predicate: PredicateKind,
        value: impl Into<String>,
    ) -> Result<Self, ConditionFault> {
        let value = value.into();
        if !predicate.applies_to(field.kind()) {
            return Err(TypeMismatchError { field, predicate }.into());
        }

        let operand = match field.kind() {
            FieldKind::Text => {
                if value.is_empty() {
                    return Err(ConditionFault::EmptyValue);
                }
                Operand::Text(value.to_lowercase())
            }
            FieldKind::Temporal => match parse_rule_date(&value) {
                Some(ts) => Operand::Timestamp(ts),
                None => return Err(ConditionFault::InvalidDate(value)),
            },
        };

        Ok(Self {
            field,
            predicate,
            value,
            operand,
        })
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }
}

/// One group predicate over a flat list of conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionGroup {
    pub kind: GroupKind,
    /// Never empty.
    pub conditions: Vec<FieldCondition>,
}

/// A requested mailbox action with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub params: BTreeMap<String, String>,
}

impl ActionSpec {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Target label, present for `move_message`.
    pub fn label(&self) -> Option<&str> {
        self.params.get("label").map(String::as_str)
    }
}

/// A condition group paired with the actions to run when it matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub conditions: ConditionGroup,
    pub actions: Vec<ActionSpec>,
}

/// Ordered, validated, immutable rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Wrap already-validated rules.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Read and validate a rules file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleDefinitionError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RuleDefinitionError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let set = Self::from_json_str(&text)?;
        info!(path = %path.display(), rules = set.len(), "Rules loaded");
        Ok(set)
    }

    /// Parse and validate a rules document.
    pub fn from_json_str(json: &str) -> Result<Self, RuleDefinitionError> {
        let file: RawRuleFile = serde_json::from_str(json)?;
        if file.rules.is_empty() {
            return Err(RuleDefinitionError::EmptyRuleSet);
        }

        let rules = file
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, raw)| validate_rule(index, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

fn validate_rule(index: usize, raw: RawRule) -> Result<Rule, RuleDefinitionError> {
    let rule = raw.name;

    let kind: GroupKind = raw.conditions.predicate.parse().map_err(|predicate| {
        RuleDefinitionError::UnknownGroupPredicate {
            index,
            rule: rule.clone(),
            predicate,
        }
    })?;

    if raw.conditions.rules.is_empty() {
        return Err(RuleDefinitionError::EmptyConditions { index, rule });
    }

    let mut conditions = Vec::with_capacity(raw.conditions.rules.len());
    for cond in raw.conditions.rules {
        let field: FieldName =
            cond.field
                .parse()
                .map_err(|field| RuleDefinitionError::UnknownField {
                    index,
                    rule: rule.clone(),
                    field,
                })?;
        let predicate: PredicateKind =
            cond.predicate
                .parse()
                .map_err(|predicate| RuleDefinitionError::UnknownPredicate {
                    index,
                    rule: rule.clone(),
                    predicate,
                })?;

        let condition =
            FieldCondition::new(field, predicate, cond.value).map_err(|fault| match fault {
                ConditionFault::EmptyValue => RuleDefinitionError::EmptyValue {
                    index,
                    rule: rule.clone(),
                    field,
                    predicate,
                },
                ConditionFault::InvalidDate(value) => RuleDefinitionError::InvalidDate {
                    index,
                    rule: rule.clone(),
                    value,
                },
                ConditionFault::TypeMismatch(source) => RuleDefinitionError::TypeMismatch {
                    index,
                    rule: rule.clone(),
                    source,
                },
            })?;
        conditions.push(condition);
    }

    let mut actions = Vec::with_capacity(raw.actions.len());
    for action in raw.actions {
        let kind: ActionKind =
            action
                .kind
                .parse()
                .map_err(|action| RuleDefinitionError::UnknownAction {
                    index,
                    rule: rule.clone(),
                    action,
                })?;

        for param in kind.required_params() {
            let present = action.params.get(*param).is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(RuleDefinitionError::MissingParam {
                    index,
                    rule: rule.clone(),
                    action: kind.to_string(),
                    param: param.to_string(),
                });
            }
        }

        actions.push(ActionSpec {
            kind,
            params: action.params,
        });
    }

    debug!(
        rule = %rule,
        group = %kind,
        conditions = conditions.len(),
        actions = actions.len(),
        "Rule validated"
    );

    Ok(Rule {
        name: rule,
        description: raw.description,
        conditions: ConditionGroup { kind, conditions },
        actions,
    })
}

/// Parse a `Received` rule value. Zone-less inputs are taken as UTC.
pub fn parse_rule_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}
