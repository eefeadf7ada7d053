//! Condition-group evaluation and rule matching.

use tracing::info;

use crate::error::TypeMismatchError;
use crate::pipeline::rules::{ConditionGroup, Rule, RuleSet};
use crate::pipeline::types::{GroupKind, MessageRecord};

impl ConditionGroup {
    /// `All` is true iff every condition holds; `Any` iff at least one does.
    /// Both short-circuit.
    pub fn evaluate(&self, message: &MessageRecord) -> Result<bool, TypeMismatchError> {
        match self.kind {
            GroupKind::All => {
                for condition in &self.conditions {
                    if !condition.matches(message)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            GroupKind::Any => {
                for condition in &self.conditions {
                    if condition.matches(message)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Rules that matched one message, in rule-list order.
#[derive(Debug, Clone)]
pub struct MatchResult<'r> {
    pub message_id: String,
    pub matched_rules: Vec<&'r Rule>,
}

impl MatchResult<'_> {
    pub fn is_empty(&self) -> bool {
        self.matched_rules.is_empty()
    }
}

impl RuleSet {
    /// Evaluate every rule against `message`.
    ///
    /// All matching rules are returned; a match never suppresses later rules.
    pub fn matching<'r>(
        &'r self,
        message: &MessageRecord,
    ) -> Result<MatchResult<'r>, TypeMismatchError> {
        let mut matched_rules = Vec::new();
        for rule in self {
            if rule.conditions.evaluate(message)? {
                info!(message_id = %message.id, rule = %rule.name, "Rule matched");
                matched_rules.push(rule);
            }
        }
        Ok(MatchResult {
            message_id: message.id.clone(),
            matched_rules,
        })
    }
}
