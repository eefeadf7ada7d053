//! `MessageStore` trait — the ordered message source the rule engine reads.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::pipeline::types::MessageRecord;

/// Backend-agnostic store of fetched messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message, or refresh its fields if the id is already stored.
    /// Returns `true` when the message was new.
    async fn upsert_message(&self, message: &MessageRecord) -> Result<bool, DatabaseError>;

    /// Look up a message by provider id.
    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, DatabaseError>;

    /// Messages ordered most recent first. `None` returns every message.
    async fn recent_messages(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRecord>, DatabaseError>;

    /// Mirror a read-state change made on the provider.
    async fn set_read_state(&self, id: &str, read: bool) -> Result<(), DatabaseError>;

    /// Total number of stored messages.
    async fn count(&self) -> Result<usize, DatabaseError>;
}
