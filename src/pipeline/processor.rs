//! Processing loop — runs every message through the matcher and dispatcher.
//!
//! Flow per message:
//! 1. `RuleSet::matching()` — every rule whose conditions hold, in rule order
//! 2. `ActionDispatcher::apply()` — each matched rule's actions, in order
//! 3. Read-state mirror into the local store (best-effort)
//!
//! Cancellation is checked before a message starts, never between its
//! actions. With `concurrency > 1` messages overlap, but reports are folded
//! into the summary in input order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream;
use tracing::{debug, error, info, warn};

use crate::config::ProcessorConfig;
use crate::error::PipelineError;
use crate::mailbox::MailboxPort;
use crate::pipeline::dispatcher::ActionDispatcher;
use crate::pipeline::rules::RuleSet;
use crate::pipeline::types::{ActionKind, ActionOutcome, MessageRecord, MessageReport, RunSummary};
use crate::store::MessageStore;

/// Applies a validated rule set to batches of messages.
pub struct RuleProcessor {
    rules: Arc<RuleSet>,
    dispatcher: ActionDispatcher,
    store: Option<Arc<dyn MessageStore>>,
    config: ProcessorConfig,
}

impl RuleProcessor {
    pub fn new(rules: Arc<RuleSet>, port: Arc<dyn MailboxPort>, config: ProcessorConfig) -> Self {
        Self {
            rules,
            dispatcher: ActionDispatcher::new(port),
            store: None,
            config,
        }
    }

    /// Mirror successful read/unread actions into `store`.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Match and dispatch a single message.
    pub async fn process_one(&self, message: &MessageRecord) -> Result<MessageReport, PipelineError> {
        let matched = self.rules.matching(message)?;
        let mut report = MessageReport {
            message_id: message.id.clone(),
            matched_rules: matched.matched_rules.iter().map(|r| r.name.clone()).collect(),
            ..Default::default()
        };

        if matched.is_empty() {
            debug!(message_id = %message.id, "No rules matched");
            return Ok(report);
        }

        for rule in matched.matched_rules {
            match self.dispatcher.apply(&message.id, &rule.name, &rule.actions).await {
                Ok(outcomes) => {
                    self.mirror_read_state(&outcomes).await;
                    report.outcomes.extend(outcomes);
                }
                Err(fatal) => {
                    error!(
                        message_id = %message.id,
                        rule = %rule.name,
                        provider = self.dispatcher.port_name(),
                        error = %fatal.error,
                        "Fatal provider error, stopping run"
                    );
                    self.mirror_read_state(&fatal.outcomes).await;
                    report.outcomes.extend(fatal.outcomes);
                    return Err(PipelineError::FatalProvider {
                        message_id: message.id.clone(),
                        source: fatal.error,
                        report: Box::new(report),
                        summary: None,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Process `messages` in order until done, cancelled, or a fatal error.
    ///
    /// A fatal error stops new messages from starting; messages already in
    /// flight finish their action sequences before the error is returned.
    /// The returned `FatalProvider` error carries the partial summary.
    pub async fn run(
        &self,
        messages: Vec<MessageRecord>,
        shutdown: &AtomicBool,
    ) -> Result<RunSummary, PipelineError> {
        let total = messages.len();
        let mut summary = RunSummary::new(total);
        info!(
            run_id = %summary.run_id,
            messages = total,
            rules = self.rules.len(),
            concurrency = self.config.concurrency,
            "Processing run started"
        );

        let aborted = AtomicBool::new(false);
        let aborted = &aborted;
        let mut reports = stream::iter(messages.iter())
            .map(|message| async move {
                if shutdown.load(Ordering::Relaxed) || aborted.load(Ordering::Relaxed) {
                    return Ok(MessageReport {
                        message_id: message.id.clone(),
                        skipped: true,
                        ..Default::default()
                    });
                }
                self.process_one(message).await
            })
            .buffered(self.config.concurrency.max(1));

        let mut first_error = None;
        let mut done = 0usize;
        while let Some(result) = reports.next().await {
            match result {
                Ok(report) => {
                    let skipped = report.skipped;
                    summary.record(report);
                    if skipped {
                        continue;
                    }
                    done += 1;
                    if self.config.progress_every > 0 && done % self.config.progress_every == 0 {
                        info!(processed = done, total, "Progress");
                    }
                }
                Err(e) => {
                    aborted.store(true, Ordering::Relaxed);
                    if let PipelineError::FatalProvider { report, .. } = &e {
                        summary.record(report.as_ref().clone());
                    }
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(mut e) = first_error {
            summary.finish();
            if let PipelineError::FatalProvider { summary: slot, .. } = &mut e {
                *slot = Some(Box::new(summary));
            }
            return Err(e);
        }

        summary.finish();
        if summary.cancelled {
            warn!(
                run_id = %summary.run_id,
                processed = summary.messages_processed,
                total,
                "Run cancelled at message boundary"
            );
        } else {
            info!(
                run_id = %summary.run_id,
                processed = summary.messages_processed,
                matched = summary.matched_count,
                succeeded = summary.action_success_count,
                failed = summary.action_failure_count,
                "Processing run complete"
            );
        }
        Ok(summary)
    }

    /// Load messages from `store` (most recent first) and run over them.
    pub async fn run_stored(
        &self,
        store: &dyn MessageStore,
        limit: Option<usize>,
        shutdown: &AtomicBool,
    ) -> Result<RunSummary, PipelineError> {
        let messages = store.recent_messages(limit).await?;
        self.run(messages, shutdown).await
    }

    async fn mirror_read_state(&self, outcomes: &[ActionOutcome]) {
        let Some(store) = &self.store else {
            return;
        };
        for outcome in outcomes.iter().filter(|o| o.succeeded()) {
            let read = match outcome.action {
                ActionKind::MarkAsRead => true,
                ActionKind::MarkAsUnread => false,
                _ => continue,
            };
            if let Err(e) = store.set_read_state(&outcome.message_id, read).await {
                warn!(
                    message_id = %outcome.message_id,
                    error = %e,
                    "Failed to mirror read state locally"
                );
            }
        }
    }
}
