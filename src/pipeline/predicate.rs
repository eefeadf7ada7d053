//! Field extraction and single-condition evaluation.

use crate::error::TypeMismatchError;
use crate::pipeline::rules::{FieldCondition, Operand};
use crate::pipeline::types::{FieldName, FieldValue, MessageRecord, PredicateKind};

impl MessageRecord {
    /// Value of `field` for this message. Text is returned as stored.
    pub fn field(&self, field: FieldName) -> FieldValue<'_> {
        match field {
            FieldName::From => FieldValue::Text(&self.sender),
            FieldName::Subject => FieldValue::Text(&self.subject),
            FieldName::Message => FieldValue::Text(&self.body),
            FieldName::Received => FieldValue::Timestamp(self.received_at),
        }
    }
}

/// Apply `predicate` to an extracted field value and a prepared operand.
///
/// Text comparisons are case-insensitive (`operand` is already lower-cased).
/// A predicate applied to the wrong value type is an error, never `false`.
pub fn evaluate(
    field: FieldName,
    value: FieldValue<'_>,
    predicate: PredicateKind,
    operand: &Operand,
) -> Result<bool, TypeMismatchError> {
    let mismatch = || TypeMismatchError { field, predicate };

    match (value, operand) {
        (FieldValue::Text(text), Operand::Text(needle)) => {
            let haystack = text.to_lowercase();
            match predicate {
                PredicateKind::Contains => Ok(haystack.contains(needle.as_str())),
                PredicateKind::DoesNotContain => Ok(!haystack.contains(needle.as_str())),
                PredicateKind::Equals => Ok(haystack == *needle),
                PredicateKind::DoesNotEqual => Ok(haystack != *needle),
                PredicateKind::LessThan | PredicateKind::GreaterThan => Err(mismatch()),
            }
        }
        (FieldValue::Timestamp(ts), Operand::Timestamp(bound)) => match predicate {
            PredicateKind::Equals => Ok(ts == *bound),
            PredicateKind::DoesNotEqual => Ok(ts != *bound),
            PredicateKind::LessThan => Ok(ts < *bound),
            PredicateKind::GreaterThan => Ok(ts > *bound),
            PredicateKind::Contains | PredicateKind::DoesNotContain => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

impl FieldCondition {
    /// Evaluate this condition against one message.
    pub fn matches(&self, message: &MessageRecord) -> Result<bool, TypeMismatchError> {
        evaluate(
            self.field,
            message.field(self.field),
            self.predicate,
            self.operand(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_message() -> MessageRecord {
        MessageRecord {
            id: "test123".into(),
            sender: "test@example.com".into(),
            recipient: Some("me@example.com".into()),
            subject: "Test Subject".into(),
            body: "Test message body".into(),
            received_at: Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap(),
            is_read: false,
        }
    }

    fn cond(field: FieldName, predicate: PredicateKind, value: &str) -> FieldCondition {
        FieldCondition::new(field, predicate, value).unwrap()
    }

    #[test]
    fn extractor_returns_case_preserved_text() {
        let msg = make_message();
        assert_eq!(msg.field(FieldName::Subject), FieldValue::Text("Test Subject"));
        assert_eq!(msg.field(FieldName::From), FieldValue::Text("test@example.com"));
        assert_eq!(msg.field(FieldName::Message), FieldValue::Text("Test message body"));
        assert_eq!(
            msg.field(FieldName::Received),
            FieldValue::Timestamp(msg.received_at)
        );
    }

    #[test]
    fn contains_is_case_insensitive() {
        let msg = make_message();
        assert!(cond(FieldName::Subject, PredicateKind::Contains, "Test").matches(&msg).unwrap());
        assert!(cond(FieldName::Subject, PredicateKind::Contains, "SUBJECT").matches(&msg).unwrap());
        assert!(!cond(FieldName::Subject, PredicateKind::Contains, "Newsletter").matches(&msg).unwrap());
    }

    #[test]
    fn from_contains_mixed_case_address() {
        let mut msg = make_message();
        msg.sender = "Foo@Bar.com".into();
        assert!(cond(FieldName::From, PredicateKind::Contains, "foo@bar.com").matches(&msg).unwrap());
    }

    #[test]
    fn subject_without_substring_is_true_negative() {
        let mut msg = make_message();
        msg.subject = "Re: meeting notes".into();
        assert!(!cond(FieldName::Subject, PredicateKind::Contains, "Important").matches(&msg).unwrap());
    }

    #[test]
    fn does_not_contain_negates_contains() {
        let msg = make_message();
        assert!(cond(FieldName::Subject, PredicateKind::DoesNotContain, "Newsletter").matches(&msg).unwrap());
        assert!(!cond(FieldName::Message, PredicateKind::DoesNotContain, "BODY").matches(&msg).unwrap());
    }

    #[test]
    fn equals_is_whole_value_case_insensitive() {
        let msg = make_message();
        assert!(cond(FieldName::Subject, PredicateKind::Equals, "test subject").matches(&msg).unwrap());
        assert!(!cond(FieldName::Subject, PredicateKind::Equals, "Test").matches(&msg).unwrap());
        assert!(cond(FieldName::Subject, PredicateKind::DoesNotEqual, "Test").matches(&msg).unwrap());
        assert!(!cond(FieldName::Subject, PredicateKind::DoesNotEqual, "TEST SUBJECT").matches(&msg).unwrap());
    }

    #[test]
    fn received_ordering() {
        let msg = make_message();
        assert!(cond(FieldName::Received, PredicateKind::GreaterThan, "2022-12-31T00:00:00Z").matches(&msg).unwrap());
        assert!(!cond(FieldName::Received, PredicateKind::LessThan, "2022-12-31T00:00:00Z").matches(&msg).unwrap());
        assert!(cond(FieldName::Received, PredicateKind::LessThan, "2023-01-02").matches(&msg).unwrap());
    }

    #[test]
    fn received_equality_is_exact() {
        let msg = make_message();
        assert!(cond(FieldName::Received, PredicateKind::Equals, "2023-01-01T12:00:00Z").matches(&msg).unwrap());
        assert!(!cond(FieldName::Received, PredicateKind::Equals, "2023-01-01T12:00:01Z").matches(&msg).unwrap());
        assert!(cond(FieldName::Received, PredicateKind::DoesNotEqual, "2023-01-01").matches(&msg).unwrap());
    }

    #[test]
    fn received_boundary_is_strict() {
        let msg = make_message();
        let at = "2023-01-01T12:00:00Z";
        assert!(!cond(FieldName::Received, PredicateKind::LessThan, at).matches(&msg).unwrap());
        assert!(!cond(FieldName::Received, PredicateKind::GreaterThan, at).matches(&msg).unwrap());
    }

    #[test]
    fn evaluator_rejects_text_predicate_on_timestamp() {
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let err = evaluate(
            FieldName::Received,
            FieldValue::Timestamp(ts),
            PredicateKind::Contains,
            &Operand::Timestamp(ts),
        )
        .unwrap_err();
        assert_eq!(err.field, FieldName::Received);
        assert_eq!(err.predicate, PredicateKind::Contains);
    }

    #[test]
    fn evaluator_rejects_ordering_on_text() {
        let result = evaluate(
            FieldName::Subject,
            FieldValue::Text("abc"),
            PredicateKind::LessThan,
            &Operand::Text("b".into()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn evaluator_rejects_mixed_value_and_operand() {
        let ts = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        assert!(
            evaluate(
                FieldName::Subject,
                FieldValue::Text("abc"),
                PredicateKind::Equals,
                &Operand::Timestamp(ts),
            )
            .is_err()
        );
    }

    #[test]
    fn constructor_rejects_invalid_pairs() {
        assert!(FieldCondition::new(FieldName::Received, PredicateKind::DoesNotContain, "2023").is_err());
        assert!(FieldCondition::new(FieldName::From, PredicateKind::GreaterThan, "a").is_err());
    }
}
