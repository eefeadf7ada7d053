//! Shared types for the rule pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Vocabulary ──────────────────────────────────────────────────────

/// Message attribute a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldName {
    From,
    Subject,
    Message,
    Received,
}

/// Value type of a field, which decides the predicates it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Temporal,
}

impl FieldName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::From => "From",
            Self::Subject => "Subject",
            Self::Message => "Message",
            Self::Received => "Received",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Received => FieldKind::Temporal,
            Self::From | Self::Subject | Self::Message => FieldKind::Text,
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "From" => Ok(Self::From),
            "Subject" => Ok(Self::Subject),
            "Message" => Ok(Self::Message),
            "Received" => Ok(Self::Received),
            other => Err(other.to_string()),
        }
    }
}

/// Comparison applied by a single field condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateKind {
    Contains,
    #[serde(rename = "Does not Contain")]
    DoesNotContain,
    Equals,
    #[serde(rename = "Does not Equal")]
    DoesNotEqual,
    #[serde(rename = "Less Than")]
    LessThan,
    #[serde(rename = "Greater Than")]
    GreaterThan,
}

impl PredicateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "Contains",
            Self::DoesNotContain => "Does not Contain",
            Self::Equals => "Equals",
            Self::DoesNotEqual => "Does not Equal",
            Self::LessThan => "Less Than",
            Self::GreaterThan => "Greater Than",
        }
    }

    /// Whether this predicate is defined for fields of the given kind.
    pub fn applies_to(&self, kind: FieldKind) -> bool {
        match self {
            Self::Contains | Self::DoesNotContain => kind == FieldKind::Text,
            Self::LessThan | Self::GreaterThan => kind == FieldKind::Temporal,
            Self::Equals | Self::DoesNotEqual => true,
        }
    }
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredicateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Contains" => Ok(Self::Contains),
            "Does not Contain" => Ok(Self::DoesNotContain),
            "Equals" => Ok(Self::Equals),
            "Does not Equal" => Ok(Self::DoesNotEqual),
            "Less Than" => Ok(Self::LessThan),
            "Greater Than" => Ok(Self::GreaterThan),
            other => Err(other.to_string()),
        }
    }
}

/// How a condition group combines its conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// Logical AND.
    All,
    /// Logical OR.
    Any,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Any => "Any",
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "All" => Ok(Self::All),
            "Any" => Ok(Self::Any),
            other => Err(other.to_string()),
        }
    }
}

/// Mailbox mutation requested by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MarkAsRead,
    MarkAsUnread,
    AddStar,
    RemoveStar,
    MoveMessage,
    MoveToTrash,
    ArchiveMessage,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkAsRead => "mark_as_read",
            Self::MarkAsUnread => "mark_as_unread",
            Self::AddStar => "add_star",
            Self::RemoveStar => "remove_star",
            Self::MoveMessage => "move_message",
            Self::MoveToTrash => "move_to_trash",
            Self::ArchiveMessage => "archive_message",
        }
    }

    /// Params that must be present in the action's `params` map.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::MoveMessage => &["label"],
            _ => &[],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark_as_read" => Ok(Self::MarkAsRead),
            "mark_as_unread" => Ok(Self::MarkAsUnread),
            "add_star" => Ok(Self::AddStar),
            "remove_star" => Ok(Self::RemoveStar),
            "move_message" => Ok(Self::MoveMessage),
            "move_to_trash" => Ok(Self::MoveToTrash),
            "archive_message" => Ok(Self::ArchiveMessage),
            other => Err(other.to_string()),
        }
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// A stored email as seen by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Provider message id, used when calling the mailbox port.
    pub id: String,
    /// `From` address.
    pub sender: String,
    /// First `To` address, if any.
    pub recipient: Option<String>,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
}

/// Value extracted from a message for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Timestamp(DateTime<Utc>),
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Result of a single port call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed { error: String },
}

/// One dispatched action and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub message_id: String,
    /// Name of the rule that requested the action.
    pub rule: String,
    pub action: ActionKind,
    /// Target label for `move_message`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Everything that happened to one message during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageReport {
    pub message_id: String,
    /// Names of the matched rules, in rule-list order.
    pub matched_rules: Vec<String>,
    pub outcomes: Vec<ActionOutcome>,
    /// True when cancellation was observed before the message was started.
    pub skipped: bool,
}

/// Aggregate result of one processing run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Messages handed to the run.
    pub messages_seen: usize,
    /// Messages actually evaluated (less than `messages_seen` after cancellation).
    pub messages_processed: usize,
    /// Total rule matches across all messages.
    pub matched_count: usize,
    pub action_success_count: usize,
    pub action_failure_count: usize,
    /// Failed actions, with enough detail to retry by hand.
    pub failures: Vec<ActionOutcome>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn new(messages_seen: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            messages_seen,
            messages_processed: 0,
            matched_count: 0,
            action_success_count: 0,
            action_failure_count: 0,
            failures: Vec::new(),
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Fold one message's report into the totals.
    pub fn record(&mut self, report: MessageReport) {
        if report.skipped {
            self.cancelled = true;
            return;
        }
        self.messages_processed += 1;
        self.matched_count += report.matched_rules.len();
        for outcome in report.outcomes {
            if outcome.succeeded() {
                self.action_success_count += 1;
            } else {
                self.action_failure_count += 1;
                self.failures.push(outcome);
            }
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        writeln!(
            f,
            "  Messages:        {}/{}{}",
            self.messages_processed,
            self.messages_seen,
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        writeln!(f, "  Matched rules:   {}", self.matched_count)?;
        writeln!(f, "  Actions applied: {}", self.action_success_count)?;
        write!(f, "  Actions failed:  {}", self.action_failure_count)?;
        for failure in &self.failures {
            let error = match &failure.status {
                OutcomeStatus::Failed { error } => error.as_str(),
                OutcomeStatus::Succeeded => "",
            };
            write!(
                f,
                "\n    - message {} [{}] {}",
                failure.message_id, failure.rule, failure.action
            )?;
            if let Some(ref label) = failure.label {
                write!(f, " (label: {label})")?;
            }
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_outcome(status: OutcomeStatus) -> ActionOutcome {
        ActionOutcome {
            message_id: "m1".into(),
            rule: "Work".into(),
            action: ActionKind::MoveMessage,
            label: Some("Work".into()),
            status,
        }
    }

    #[test]
    fn vocabulary_parses_exact_strings() {
        assert_eq!("From".parse::<FieldName>(), Ok(FieldName::From));
        assert_eq!(
            "Does not Contain".parse::<PredicateKind>(),
            Ok(PredicateKind::DoesNotContain)
        );
        assert_eq!(
            "archive_message".parse::<ActionKind>(),
            Ok(ActionKind::ArchiveMessage)
        );
        assert_eq!("Any".parse::<GroupKind>(), Ok(GroupKind::Any));
    }

    #[test]
    fn vocabulary_is_case_sensitive() {
        assert!("from".parse::<FieldName>().is_err());
        assert!("does not contain".parse::<PredicateKind>().is_err());
        assert!("Mark_As_Read".parse::<ActionKind>().is_err());
        assert!("all".parse::<GroupKind>().is_err());
        assert!("To".parse::<FieldName>().is_err());
    }

    #[test]
    fn as_str_matches_from_str() {
        for p in [
            PredicateKind::Contains,
            PredicateKind::DoesNotContain,
            PredicateKind::Equals,
            PredicateKind::DoesNotEqual,
            PredicateKind::LessThan,
            PredicateKind::GreaterThan,
        ] {
            assert_eq!(p.as_str().parse::<PredicateKind>(), Ok(p));
        }
    }

    #[test]
    fn predicate_applicability_follows_field_kind() {
        assert!(PredicateKind::Contains.applies_to(FieldKind::Text));
        assert!(!PredicateKind::Contains.applies_to(FieldKind::Temporal));
        assert!(PredicateKind::LessThan.applies_to(FieldKind::Temporal));
        assert!(!PredicateKind::GreaterThan.applies_to(FieldKind::Text));
        assert!(PredicateKind::Equals.applies_to(FieldKind::Text));
        assert!(PredicateKind::DoesNotEqual.applies_to(FieldKind::Temporal));
        assert_eq!(FieldName::Received.kind(), FieldKind::Temporal);
        assert_eq!(FieldName::Message.kind(), FieldKind::Text);
    }

    #[test]
    fn only_move_message_requires_label() {
        assert_eq!(ActionKind::MoveMessage.required_params(), &["label"]);
        assert!(ActionKind::AddStar.required_params().is_empty());
    }

    #[test]
    fn summary_counts_and_collects_failures() {
        let mut summary = RunSummary::new(3);
        summary.record(MessageReport {
            message_id: "m1".into(),
            matched_rules: vec!["A".into(), "B".into()],
            outcomes: vec![
                make_outcome(OutcomeStatus::Succeeded),
                make_outcome(OutcomeStatus::Failed {
                    error: "rate limited".into(),
                }),
            ],
            skipped: false,
        });
        summary.record(MessageReport {
            message_id: "m2".into(),
            ..Default::default()
        });
        summary.finish();

        assert_eq!(summary.messages_processed, 2);
        assert_eq!(summary.matched_count, 2);
        assert_eq!(summary.action_success_count, 1);
        assert_eq!(summary.action_failure_count, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(!summary.cancelled);
        assert!(summary.finished_at.is_some());
    }

    #[test]
    fn skipped_report_marks_cancelled() {
        let mut summary = RunSummary::new(1);
        summary.record(MessageReport {
            message_id: "m1".into(),
            skipped: true,
            ..Default::default()
        });
        assert!(summary.cancelled);
        assert_eq!(summary.messages_processed, 0);
    }

    #[test]
    fn summary_display_lists_failure_detail() {
        let mut summary = RunSummary::new(1);
        summary.record(MessageReport {
            message_id: "m1".into(),
            matched_rules: vec!["Work".into()],
            outcomes: vec![make_outcome(OutcomeStatus::Failed {
                error: "label forbidden".into(),
            })],
            skipped: false,
        });
        let text = summary.to_string();
        assert!(text.contains("Actions failed:  1"));
        assert!(text.contains("message m1 [Work] move_message (label: Work): label forbidden"));
    }

    #[test]
    fn outcome_serialization_flattens_status() {
        let json = serde_json::to_value(make_outcome(OutcomeStatus::Failed {
            error: "boom".into(),
        }))
        .unwrap();
        assert_eq!(json["action"], "move_message");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["label"], "Work");
    }
}
