//! Event-driven cache invalidation.
//!
//! Domain events map to fixed key sets:
//!
//! | Event | Keys removed |
//! |-------|--------------|
//! | [`DomainEvent::Logout`] | session, progress, dashboard, profile of the user |
//! | [`DomainEvent::ProfileUpdated`] | profile, dashboard of the user |
//! | [`DomainEvent::InterviewCompleted`] | interview-state of the session; progress, dashboard of the user |
//! | [`DomainEvent::AdminPurge`] | every key in the namespace |
//!
//! Invalidation runs inline at the event site. It is idempotent: a key that is
//! already gone is reported as missing, not as an error. A key that cannot be
//! deleted is reported in [`InvalidationReport::failed`] and the remaining keys
//! are still processed.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{CacheKey, Namespace, StoreHandle};
use crate::Result;

const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Logout {
        user_id: String,
    },
    ProfileUpdated {
        user_id: String,
    },
    InterviewCompleted {
        session_id: String,
        user_id: String,
    },
    AdminPurge {
        namespace: Namespace,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::Logout { .. } => "logout",
            DomainEvent::ProfileUpdated { .. } => "profile_updated",
            DomainEvent::InterviewCompleted { .. } => "interview_completed",
            DomainEvent::AdminPurge { .. } => "admin_purge",
        }
    }
}

/// What an event removes: individual keys or a whole namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    Key(CacheKey),
    Namespace(Namespace),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationFailure {
    /// Encoded key, or `<namespace>:*` when listing the namespace failed.
    pub target: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub event: &'static str,
    pub deleted: Vec<CacheKey>,
    /// Keys that were already absent.
    pub missing: Vec<CacheKey>,
    pub failed: Vec<InvalidationFailure>,
}

impl InvalidationReport {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            deleted: Vec::new(),
            missing: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct InvalidationCoordinator {
    store: StoreHandle,
    concurrency: usize,
}

impl InvalidationCoordinator {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Maximum deletes in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Targets for an event. Fails only when an identifier is not a valid key.
    pub fn plan(&self, event: &DomainEvent) -> Result<Vec<InvalidationTarget>> {
        match event {
            DomainEvent::Logout { user_id } => key_targets(&[
                (Namespace::Session, user_id.as_str()),
                (Namespace::Progress, user_id.as_str()),
                (Namespace::Dashboard, user_id.as_str()),
                (Namespace::Profile, user_id.as_str()),
            ]),
            DomainEvent::ProfileUpdated { user_id } => key_targets(&[
                (Namespace::Profile, user_id.as_str()),
                (Namespace::Dashboard, user_id.as_str()),
            ]),
            DomainEvent::InterviewCompleted {
                session_id,
                user_id,
            } => key_targets(&[
                (Namespace::InterviewState, session_id.as_str()),
                (Namespace::Progress, user_id.as_str()),
                (Namespace::Dashboard, user_id.as_str()),
            ]),
            DomainEvent::AdminPurge { namespace } => {
                Ok(vec![InvalidationTarget::Namespace(*namespace)])
            }
        }
    }

    pub async fn invalidate(&self, event: &DomainEvent) -> Result<InvalidationReport> {
        let targets = self.plan(event)?;
        let mut report = InvalidationReport::new(event.name());

        let mut keys = Vec::new();
        for target in targets {
            match target {
                InvalidationTarget::Key(key) => keys.push(key),
                InvalidationTarget::Namespace(namespace) => {
                    match self.store.scan(namespace).await {
                        Ok(found) => keys.extend(found),
                        Err(err) => {
                            warn!(
                                namespace = %namespace,
                                error = %err,
                                "namespace listing failed"
                            );
                            report.failed.push(InvalidationFailure {
                                target: format!("{}*", namespace.prefix()),
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        let outcomes: Vec<(CacheKey, Result<bool>)> = futures::stream::iter(keys)
            .map(|key| async move {
                let outcome = self.store.delete(&key).await;
                (key, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (key, outcome) in outcomes {
            match outcome {
                Ok(true) => report.deleted.push(key),
                Ok(false) => report.missing.push(key),
                Err(err) => {
                    warn!(key = %key, error = %err, "invalidation delete failed");
                    report.failed.push(InvalidationFailure {
                        target: key.encode(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            event = report.event,
            deleted = report.deleted.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "cache invalidated"
        );
        Ok(report)
    }
}

fn key_targets(pairs: &[(Namespace, &str)]) -> Result<Vec<InvalidationTarget>> {
    pairs
        .iter()
        .map(|(ns, id)| CacheKey::new(*ns, *id).map(InvalidationTarget::Key))
        .collect()
}
