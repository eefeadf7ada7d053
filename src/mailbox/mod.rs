//! Mailbox action port — the boundary between the rule engine and a mail provider.
//!
//! Every method sets state rather than toggling it, so repeating a call
//! leaves the message in the same state. Implementations create missing
//! labels themselves.

pub mod gmail;

pub use gmail::{GmailClient, GmailMailbox};

use async_trait::async_trait;

use crate::error::ProviderError;

/// Remote mailbox mutations used by the action dispatcher.
#[async_trait]
pub trait MailboxPort: Send + Sync {
    /// Provider name (e.g. "gmail").
    fn name(&self) -> &str;

    /// Mark a message read (`true`) or unread (`false`).
    async fn set_read_state(&self, message_id: &str, read: bool) -> Result<(), ProviderError>;

    /// Star or unstar a message.
    async fn set_starred(&self, message_id: &str, starred: bool) -> Result<(), ProviderError>;

    /// Attach a label by name, creating it if the provider does not have it.
    async fn apply_label(&self, message_id: &str, label: &str) -> Result<(), ProviderError>;

    /// Move a message to the trash.
    async fn trash(&self, message_id: &str) -> Result<(), ProviderError>;

    /// Add the message to (`true`) or remove it from (`false`) the inbox.
    async fn set_inbox_presence(&self, message_id: &str, present: bool)
    -> Result<(), ProviderError>;
}
