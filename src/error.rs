//! Error types for inbox-rules.

use crate::pipeline::types::{FieldName, MessageReport, PredicateKind, RunSummary};

/// Errors that stop an inbox sync.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// A predicate was applied to a field whose type it cannot compare.
///
/// Text predicates (`Contains`, `Does not Contain`) are invalid on
/// `Received`; ordering predicates (`Less Than`, `Greater Than`) are only
/// valid on `Received`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Predicate '{predicate}' cannot be applied to field '{field}'")]
pub struct TypeMismatchError {
    pub field: FieldName,
    pub predicate: PredicateKind,
}

/// Malformed rule definitions. Always raised before any message is processed.
#[derive(Debug, thiserror::Error)]
pub enum RuleDefinitionError {
    #[error("Failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rules JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule set contains no rules")]
    EmptyRuleSet,

    #[error("Rule #{index} ({rule}): unknown field '{field}'")]
    UnknownField {
        index: usize,
        rule: String,
        field: String,
    },

    #[error("Rule #{index} ({rule}): unknown predicate '{predicate}'")]
    UnknownPredicate {
        index: usize,
        rule: String,
        predicate: String,
    },

    #[error("Rule #{index} ({rule}): unknown group predicate '{predicate}' (expected All or Any)")]
    UnknownGroupPredicate {
        index: usize,
        rule: String,
        predicate: String,
    },

    #[error("Rule #{index} ({rule}): unknown action type '{action}'")]
    UnknownAction {
        index: usize,
        rule: String,
        action: String,
    },

    #[error("Rule #{index} ({rule}): condition group has no conditions")]
    EmptyConditions { index: usize, rule: String },

    #[error("Rule #{index} ({rule}): empty value for {field} {predicate}")]
    EmptyValue {
        index: usize,
        rule: String,
        field: FieldName,
        predicate: PredicateKind,
    },

    #[error("Rule #{index} ({rule}): '{value}' is not a valid date")]
    InvalidDate {
        index: usize,
        rule: String,
        value: String,
    },

    #[error("Rule #{index} ({rule}): action '{action}' requires param '{param}'")]
    MissingParam {
        index: usize,
        rule: String,
        action: String,
        param: String,
    },

    #[error("Rule #{index} ({rule}): {source}")]
    TypeMismatch {
        index: usize,
        rule: String,
        #[source]
        source: TypeMismatchError,
    },
}

/// Errors returned by a mailbox provider.
///
/// `AuthFailed` and `ConnectionLost` are fatal to a processing run; every
/// other variant is scoped to the single action that produced it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Label '{label}' could not be resolved: {reason}")]
    Label { label: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Connection to provider {provider} lost: {reason}")]
    ConnectionLost { provider: String, reason: String },
}

impl ProviderError {
    /// Whether this error invalidates the whole provider connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailed { .. } | Self::ConnectionLost { .. })
    }
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors that stop a processing run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// `report` holds what the failing message got through before the
    /// error. `summary` is filled in by `RuleProcessor::run` with everything
    /// recorded up to and including that message.
    #[error("Fatal provider error while handling message {message_id}: {source}")]
    FatalProvider {
        message_id: String,
        #[source]
        source: ProviderError,
        report: Box<MessageReport>,
        summary: Option<Box<RunSummary>>,
    },

    #[error("Rule evaluation failed: {0}")]
    Evaluation(#[from] TypeMismatchError),

    #[error("Message store error: {0}")]
    Store(#[from] DatabaseError),
}
