//! Rule evaluation pipeline.
//!
//! Every stored message flows through:
//! 1. `RuleSet::load()` — parse and validate the whole rule file up front
//! 2. `RuleSet::matching()` — condition groups evaluated against the message
//! 3. `ActionDispatcher::apply()` — matched actions sent to the mailbox port
//! 4. `RuleProcessor::run()` — batching, cancellation, run summary
//!
//! Malformed rules never reach step 2: every load-time problem is a
//! `RuleDefinitionError`.

pub mod dispatcher;
pub mod matcher;
pub mod predicate;
pub mod processor;
pub mod rules;
pub mod types;

pub use dispatcher::ActionDispatcher;
pub use matcher::MatchResult;
pub use processor::RuleProcessor;
pub use rules::{ActionSpec, ConditionGroup, FieldCondition, Rule, RuleSet};
pub use types::{ActionKind, FieldName, GroupKind, MessageRecord, PredicateKind, RunSummary};
