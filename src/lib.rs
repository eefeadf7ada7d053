//! Inbox Rules — rule-based actions over a Gmail inbox.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod pipeline;
pub mod store;
pub mod sync;
