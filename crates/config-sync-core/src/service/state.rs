//! Values produced by the sync loop and the loop's own bookkeeping.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::http::{BackoffConfig, BackoffState, HttpError, NotificationRecord, RetryDecision};
use crate::namespace::Namespace;

/// Published on the change channel after every successful store update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub namespace: String,
    pub release_key: String,
    pub configurations: BTreeMap<String, String>,
}

impl ConfigChange {
    pub(crate) fn from_namespace(namespace: &Arc<Namespace>) -> Self {
        Self {
            namespace: namespace.name().to_string(),
            release_key: namespace.release_key().to_string(),
            configurations: namespace.configurations().clone(),
        }
    }
}

/// Result of one long-poll iteration that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 304 or no namespace with a new id.
    Unchanged,
    /// Number of namespaces fetched and installed.
    Applied(usize),
    /// The long-poll hit its client-side timeout; not a failure.
    TimedOut,
}

/// Result of the startup fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// Every watched namespace was fetched.
    Synced,
    /// Some fetches failed; namespaces missing from the store were filled from
    /// the local snapshot.
    RestoredFromSnapshot {
        failed: Vec<String>,
        restored: Vec<String>,
    },
    /// Some fetches failed and nothing could be restored.
    Degraded { failed: Vec<String> },
}

impl InitOutcome {
    pub fn failed_namespaces(&self) -> &[String] {
        match self {
            InitOutcome::Synced => &[],
            InitOutcome::RestoredFromSnapshot { failed, .. } | InitOutcome::Degraded { failed } => {
                failed
            }
        }
    }
}

/// Retry bookkeeping owned by the running loop.
#[derive(Debug)]
pub(crate) struct LoopState {
    backoff: BackoffState,
}

impl LoopState {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Self {
            backoff: BackoffState::new(config),
        }
    }

    pub(crate) fn on_success(&mut self) {
        self.backoff.register_success();
    }

    pub(crate) fn on_failure(&mut self) -> RetryDecision {
        self.backoff.register_failure()
    }

    pub(crate) fn failures(&self) -> u32 {
        self.backoff.failures()
    }
}

/// Collapses a long-poll response to one entry per namespace, keeping the
/// first position and the last id reported for it.
pub(crate) fn dedupe_notifications(changes: Vec<NotificationRecord>) -> Vec<NotificationRecord> {
    let mut unique: Vec<NotificationRecord> = Vec::with_capacity(changes.len());
    for change in changes {
        match unique
            .iter_mut()
            .find(|seen| seen.namespace_name == change.namespace_name)
        {
            Some(seen) => seen.notification_id = change.notification_id,
            None => unique.push(change),
        }
    }
    unique
}

/// Short label used in logs for a failed iteration.
pub(crate) fn failure_label(err: &HttpError) -> &'static str {
    match err {
        HttpError::Timeout => "timeout",
        HttpError::Status { .. } => "status",
        HttpError::UnexpectedContentType { .. } => "content-type",
        HttpError::Transport(_) => "transport",
        HttpError::Decode(_) => "decode",
        HttpError::InvalidUrl(_) | HttpError::InvalidHeader(_) => "request",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn duplicate_notifications_collapse_to_one_entry() {
        let changes = vec![
            NotificationRecord::new("application", 5),
            NotificationRecord::new("flags.json", 2),
            NotificationRecord::new("application", 6),
        ];
        assert_eq!(
            dedupe_notifications(changes),
            vec![
                NotificationRecord::new("application", 6),
                NotificationRecord::new("flags.json", 2),
            ]
        );
    }

    #[test]
    fn loop_state_resets_after_success() {
        let mut state = LoopState::new(BackoffConfig::default());
        assert_eq!(
            state.on_failure(),
            RetryDecision::RetryAfter(Duration::from_millis(1_000))
        );
        assert_eq!(
            state.on_failure(),
            RetryDecision::RetryAfter(Duration::from_millis(2_000))
        );
        assert_eq!(state.failures(), 2);
        state.on_success();
        assert_eq!(state.failures(), 0);
        assert_eq!(
            state.on_failure(),
            RetryDecision::RetryAfter(Duration::from_millis(1_000))
        );
    }

    #[test]
    fn init_outcome_lists_failures() {
        assert!(InitOutcome::Synced.failed_namespaces().is_empty());
        let outcome = InitOutcome::Degraded {
            failed: vec!["application".into()],
        };
        assert_eq!(outcome.failed_namespaces(), ["application".to_string()]);
    }
}
