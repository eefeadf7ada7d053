//! Action dispatcher — maps rule actions onto mailbox port calls.
//!
//! Actions run strictly in the order given. A recoverable provider error is
//! recorded against its action and the next action still runs; only a fatal
//! provider error (lost auth or connection) stops dispatch.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::ProviderError;
use crate::mailbox::MailboxPort;
use crate::pipeline::rules::ActionSpec;
use crate::pipeline::types::{ActionKind, ActionOutcome, OutcomeStatus};

/// Dispatch failed because the provider connection is no longer usable.
#[derive(Debug)]
pub struct FatalDispatch {
    /// Outcomes recorded before the fatal call, including its own failure.
    pub outcomes: Vec<ActionOutcome>,
    pub error: ProviderError,
}

/// Applies `ActionSpec`s through a [`MailboxPort`].
#[derive(Clone)]
pub struct ActionDispatcher {
    port: Arc<dyn MailboxPort>,
}

impl ActionDispatcher {
    pub fn new(port: Arc<dyn MailboxPort>) -> Self {
        Self { port }
    }

    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// Apply `actions` to `message_id` in declared order.
    pub async fn apply(
        &self,
        message_id: &str,
        rule: &str,
        actions: &[ActionSpec],
    ) -> Result<Vec<ActionOutcome>, FatalDispatch> {
        let mut outcomes = Vec::with_capacity(actions.len());

        for action in actions {
            let result = self.call(message_id, action).await;
            let label = action.label().map(String::from);

            match result {
                Ok(()) => {
                    info!(
                        message_id,
                        rule,
                        action = %action.kind,
                        label = label.as_deref().unwrap_or(""),
                        "Action applied"
                    );
                    outcomes.push(ActionOutcome {
                        message_id: message_id.to_string(),
                        rule: rule.to_string(),
                        action: action.kind,
                        label,
                        status: OutcomeStatus::Succeeded,
                    });
                }
                Err(e) => {
                    error!(
                        message_id,
                        rule,
                        action = %action.kind,
                        error = %e,
                        "Action failed"
                    );
                    outcomes.push(ActionOutcome {
                        message_id: message_id.to_string(),
                        rule: rule.to_string(),
                        action: action.kind,
                        label,
                        status: OutcomeStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                    if e.is_fatal() {
                        return Err(FatalDispatch { outcomes, error: e });
                    }
                }
            }
        }

        Ok(outcomes)
    }

    /// Exactly one port call per action.
    async fn call(&self, message_id: &str, action: &ActionSpec) -> Result<(), ProviderError> {
        match action.kind {
            ActionKind::MarkAsRead => self.port.set_read_state(message_id, true).await,
            ActionKind::MarkAsUnread => self.port.set_read_state(message_id, false).await,
            ActionKind::AddStar => self.port.set_starred(message_id, true).await,
            ActionKind::RemoveStar => self.port.set_starred(message_id, false).await,
            ActionKind::MoveMessage => match action.label() {
                Some(label) => self.port.apply_label(message_id, label).await,
                // Unreachable for loaded rules; kept as a per-action failure.
                None => Err(ProviderError::Label {
                    label: String::new(),
                    reason: "move_message without a label param".into(),
                }),
            },
            ActionKind::MoveToTrash => self.port.trash(message_id).await,
            ActionKind::ArchiveMessage => self.port.set_inbox_presence(message_id, false).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Records every call; fails calls whose rendering is listed in `fail`.
    #[derive(Default)]
    struct RecordingPort {
        calls: Mutex<Vec<String>>,
        fail: Vec<(String, ProviderError)>,
    }

    impl RecordingPort {
        fn failing(fail: Vec<(&str, ProviderError)>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: fail.into_iter().map(|(c, e)| (c.to_string(), e)).collect(),
            }
        }

        fn record(&self, call: String) -> Result<(), ProviderError> {
            self.calls.lock().unwrap().push(call.clone());
            match self.fail.iter().find(|(c, _)| *c == call) {
                Some((_, e)) => Err(e.clone()),
                None => Ok(()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailboxPort for RecordingPort {
        fn name(&self) -> &str {
            "recording"
        }
        async fn set_read_state(&self, id: &str, read: bool) -> Result<(), ProviderError> {
            self.record(format!("set_read_state({id},{read})"))
        }
        async fn set_starred(&self, id: &str, starred: bool) -> Result<(), ProviderError> {
            self.record(format!("set_starred({id},{starred})"))
        }
        async fn apply_label(&self, id: &str, label: &str) -> Result<(), ProviderError> {
            self.record(format!("apply_label({id},{label})"))
        }
        async fn trash(&self, id: &str) -> Result<(), ProviderError> {
            self.record(format!("trash({id})"))
        }
        async fn set_inbox_presence(&self, id: &str, present: bool) -> Result<(), ProviderError> {
            self.record(format!("set_inbox_presence({id},{present})"))
        }
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimited {
            provider: "recording".into(),
        }
    }

    #[tokio::test]
    async fn maps_each_action_to_one_call() {
        let port = Arc::new(RecordingPort::default());
        let dispatcher = ActionDispatcher::new(port.clone());
        let actions = vec![
            ActionSpec::new(ActionKind::MarkAsRead),
            ActionSpec::new(ActionKind::MarkAsUnread),
            ActionSpec::new(ActionKind::AddStar),
            ActionSpec::new(ActionKind::RemoveStar),
            ActionSpec::new(ActionKind::MoveMessage).with_param("label", "Work"),
            ActionSpec::new(ActionKind::MoveToTrash),
            ActionSpec::new(ActionKind::ArchiveMessage),
        ];

        let outcomes = dispatcher.apply("m1", "all", &actions).await.unwrap();

        assert_eq!(
            port.calls(),
            [
                "set_read_state(m1,true)",
                "set_read_state(m1,false)",
                "set_starred(m1,true)",
                "set_starred(m1,false)",
                "apply_label(m1,Work)",
                "trash(m1)",
                "set_inbox_presence(m1,false)",
            ]
        );
        assert_eq!(outcomes.len(), 7);
        assert!(outcomes.iter().all(ActionOutcome::succeeded));
        assert_eq!(outcomes[4].label.as_deref(), Some("Work"));
    }

    #[tokio::test]
    async fn failure_does_not_stop_following_actions() {
        let port = Arc::new(RecordingPort::failing(vec![(
            "set_starred(m1,true)",
            rate_limited(),
        )]));
        let dispatcher = ActionDispatcher::new(port.clone());
        let actions = vec![
            ActionSpec::new(ActionKind::AddStar),
            ActionSpec::new(ActionKind::ArchiveMessage),
        ];

        let outcomes = dispatcher.apply("m1", "r", &actions).await.unwrap();

        assert_eq!(port.calls().len(), 2);
        assert!(!outcomes[0].succeeded());
        assert!(outcomes[1].succeeded());
        match &outcomes[0].status {
            OutcomeStatus::Failed { error } => assert!(error.contains("rate limited")),
            OutcomeStatus::Succeeded => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn fatal_error_stops_dispatch() {
        let port = Arc::new(RecordingPort::failing(vec![(
            "set_read_state(m1,true)",
            ProviderError::AuthFailed {
                provider: "recording".into(),
            },
        )]));
        let dispatcher = ActionDispatcher::new(port.clone());
        let actions = vec![
            ActionSpec::new(ActionKind::MarkAsRead),
            ActionSpec::new(ActionKind::ArchiveMessage),
        ];

        let fatal = dispatcher.apply("m1", "r", &actions).await.unwrap_err();

        assert_eq!(port.calls(), ["set_read_state(m1,true)"]);
        assert_eq!(fatal.outcomes.len(), 1);
        assert!(fatal.error.is_fatal());
    }

    #[tokio::test]
    async fn repeated_action_issues_same_state_setting_call() {
        let port = Arc::new(RecordingPort::default());
        let dispatcher = ActionDispatcher::new(port.clone());
        let actions = vec![
            ActionSpec::new(ActionKind::AddStar),
            ActionSpec::new(ActionKind::AddStar),
        ];

        dispatcher.apply("m1", "r", &actions).await.unwrap();

        assert_eq!(port.calls(), ["set_starred(m1,true)", "set_starred(m1,true)"]);
    }

    #[tokio::test]
    async fn move_without_label_fails_that_action_only() {
        let port = Arc::new(RecordingPort::default());
        let dispatcher = ActionDispatcher::new(port.clone());
        let actions = vec![
            ActionSpec::new(ActionKind::MoveMessage),
            ActionSpec::new(ActionKind::MoveToTrash),
        ];

        let outcomes = dispatcher.apply("m1", "r", &actions).await.unwrap();

        assert!(!outcomes[0].succeeded());
        assert!(outcomes[1].succeeded());
        assert_eq!(port.calls(), ["trash(m1)"]);
    }
}
