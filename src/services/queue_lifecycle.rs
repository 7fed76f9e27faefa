//! Scan queue state machine.
//!
//! queued -> processing -> completed | queued (retry) | failed.
//! The functions here are pure; `scan_queue` applies their decisions inside
//! transactions, so tests can drive every transition without a clock or a
//! database.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::config::RetryPriority;
use crate::errors::AppError;
use crate::models::scan_queue::{QueueStatus, ScanQueueEntry, MIN_PRIORITY};

/// Check whether a status transition is an edge of the queue graph.
pub fn is_valid_transition(from: QueueStatus, to: QueueStatus) -> bool {
    matches!(
        (from, to),
        (QueueStatus::Queued, QueueStatus::Processing)
            | (QueueStatus::Processing, QueueStatus::Completed)
            | (QueueStatus::Processing, QueueStatus::Queued)
            | (QueueStatus::Processing, QueueStatus::Failed)
    )
}

fn require_transition(entry: &ScanQueueEntry, to: QueueStatus) -> Result<(), AppError> {
    if is_valid_transition(entry.status, to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(format!(
            "Scan queue entry {} cannot move from {:?} to {:?}",
            entry.id, entry.status, to
        )))
    }
}

/// What a failed attempt does to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Back in the queue for another attempt.
    Retry { attempts: i32, priority: i32 },
    /// Reached `max_attempts`; the entry is terminally failed.
    Exhausted { attempts: i32 },
}

impl FailureOutcome {
    pub fn attempts(&self) -> i32 {
        match self {
            Self::Retry { attempts, .. } | Self::Exhausted { attempts } => *attempts,
        }
    }

    pub fn next_status(&self) -> QueueStatus {
        match self {
            Self::Retry { .. } => QueueStatus::Queued,
            Self::Exhausted { .. } => QueueStatus::Failed,
        }
    }
}

/// Validate a claim of a queued entry.
pub fn claim(entry: &ScanQueueEntry) -> Result<(), AppError> {
    require_transition(entry, QueueStatus::Processing)
}

/// Validate a successful completion.
pub fn succeed(entry: &ScanQueueEntry) -> Result<(), AppError> {
    require_transition(entry, QueueStatus::Completed)
}

/// Decide the outcome of a failed attempt.
pub fn fail(entry: &ScanQueueEntry, policy: RetryPriority) -> Result<FailureOutcome, AppError> {
    if entry.status != QueueStatus::Processing {
        return Err(AppError::InvalidTransition(format!(
            "Scan queue entry {} is {:?}, only processing entries can fail",
            entry.id, entry.status
        )));
    }

    let attempts = (entry.attempts + 1).min(entry.max_attempts);
    if attempts >= entry.max_attempts {
        return Ok(FailureOutcome::Exhausted { attempts });
    }

    let priority = match policy {
        RetryPriority::Keep => entry.priority,
        RetryPriority::Lower { step } => entry.priority.saturating_sub(step).max(MIN_PRIORITY),
    };
    Ok(FailureOutcome::Retry { attempts, priority })
}

/// Whether a processing entry has outlived its lease at `now`.
pub fn is_lease_expired(entry: &ScanQueueEntry, now: DateTime<Utc>, lease: Duration) -> bool {
    let Some(started_at) = entry.started_at else {
        return false;
    };
    let Ok(lease) = chrono::Duration::from_std(lease) else {
        return false;
    };
    entry.status == QueueStatus::Processing && started_at + lease <= now
}

/// Seconds between the start of an attempt and `finished_at`.
pub fn attempt_duration(entry: &ScanQueueEntry, finished_at: DateTime<Utc>) -> Option<i64> {
    entry
        .started_at
        .map(|started| (finished_at - started).num_seconds().max(0))
}

static JOB_NAME_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]+").expect("job name pattern is valid"));

const JOB_NAME_PREFIX_MAX: usize = 54;

/// External execution handle for an attempt: `{worker}-scan-{owner}-{name}-a{attempt}-{id8}`.
///
/// The attempt number makes every lease of the same entry distinct, even when
/// the same worker claims it again after a reclaim.
pub fn job_name(worker_id: &str, owner: &str, name: &str, entry_id: Uuid, attempt: i32) -> String {
    let raw = format!("{worker_id}-scan-{owner}-{name}").to_ascii_lowercase();
    let collapsed = JOB_NAME_INVALID.replace_all(&raw, "-");
    let mut prefix: String = collapsed
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    prefix.truncate(JOB_NAME_PREFIX_MAX);
    let prefix = prefix.trim_end_matches('-');

    let id = entry_id.simple().to_string();
    let suffix = &id[id.len() - 8..];
    format!("{prefix}-a{attempt}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: QueueStatus, attempts: i32, max_attempts: i32) -> ScanQueueEntry {
        ScanQueueEntry {
            id: Uuid::now_v7(),
            repository_id: Uuid::now_v7(),
            priority: 5,
            status,
            attempts,
            max_attempts,
            error_message: None,
            job_name: (status == QueueStatus::Processing).then(|| "w-scan-a-b-1".to_string()),
            queued_at: Utc::now(),
            started_at: (status == QueueStatus::Processing).then(Utc::now),
            completed_at: status.is_terminal().then(Utc::now),
        }
    }

    // -- Graph --

    #[test]
    fn valid_edges() {
        assert!(is_valid_transition(QueueStatus::Queued, QueueStatus::Processing));
        assert!(is_valid_transition(QueueStatus::Processing, QueueStatus::Completed));
        assert!(is_valid_transition(QueueStatus::Processing, QueueStatus::Queued));
        assert!(is_valid_transition(QueueStatus::Processing, QueueStatus::Failed));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [QueueStatus::Completed, QueueStatus::Failed] {
            for to in [
                QueueStatus::Queued,
                QueueStatus::Processing,
                QueueStatus::Completed,
                QueueStatus::Failed,
            ] {
                assert!(!is_valid_transition(from, to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn queued_cannot_complete_directly() {
        assert!(!is_valid_transition(QueueStatus::Queued, QueueStatus::Completed));
        assert!(!is_valid_transition(QueueStatus::Queued, QueueStatus::Failed));
        assert!(succeed(&entry(QueueStatus::Queued, 0, 3)).is_err());
    }

    #[test]
    fn claim_requires_queued() {
        assert!(claim(&entry(QueueStatus::Queued, 0, 3)).is_ok());
        assert!(claim(&entry(QueueStatus::Processing, 0, 3)).is_err());
        assert!(claim(&entry(QueueStatus::Completed, 0, 3)).is_err());
    }

    // -- Retry --

    #[test]
    fn failure_below_max_retries() {
        let e = entry(QueueStatus::Processing, 0, 3);
        let outcome = fail(&e, RetryPriority::Keep).unwrap();
        assert_eq!(outcome, FailureOutcome::Retry { attempts: 1, priority: 5 });
        assert_eq!(outcome.next_status(), QueueStatus::Queued);
    }

    #[test]
    fn three_failures_exhaust_three_attempts() {
        let mut e = entry(QueueStatus::Processing, 0, 3);
        let mut outcomes = Vec::new();
        loop {
            let outcome = fail(&e, RetryPriority::Keep).unwrap();
            outcomes.push(outcome.clone());
            e.attempts = outcome.attempts();
            e.status = outcome.next_status();
            if e.status == QueueStatus::Failed {
                break;
            }
            // Reclaimed by a worker for the next attempt.
            e.status = QueueStatus::Processing;
        }
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[2], FailureOutcome::Exhausted { attempts: 3 });

        // A fourth failure is never applied.
        assert!(fail(&e, RetryPriority::Keep).is_err());
        assert!(claim(&e).is_err());
    }

    #[test]
    fn attempts_never_exceed_max() {
        let e = entry(QueueStatus::Processing, 5, 5);
        let outcome = fail(&e, RetryPriority::Keep).unwrap();
        assert_eq!(outcome, FailureOutcome::Exhausted { attempts: 5 });
    }

    #[test]
    fn single_attempt_entry_fails_immediately() {
        let e = entry(QueueStatus::Processing, 0, 1);
        assert_eq!(
            fail(&e, RetryPriority::Keep).unwrap(),
            FailureOutcome::Exhausted { attempts: 1 }
        );
    }

    #[test]
    fn lower_policy_decrements_priority() {
        let e = entry(QueueStatus::Processing, 0, 3);
        let outcome = fail(&e, RetryPriority::Lower { step: 2 }).unwrap();
        assert_eq!(outcome, FailureOutcome::Retry { attempts: 1, priority: 3 });
    }

    #[test]
    fn lower_policy_clamps_to_minimum() {
        let mut e = entry(QueueStatus::Processing, 0, 3);
        e.priority = MIN_PRIORITY + 1;
        let outcome = fail(&e, RetryPriority::Lower { step: 50 }).unwrap();
        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                attempts: 1,
                priority: MIN_PRIORITY
            }
        );
    }

    #[test]
    fn completed_entry_cannot_fail() {
        let e = entry(QueueStatus::Completed, 1, 3);
        assert!(matches!(
            fail(&e, RetryPriority::Keep),
            Err(AppError::InvalidTransition(_))
        ));
    }

    // -- Lease --

    #[test]
    fn lease_expiry() {
        let mut e = entry(QueueStatus::Processing, 0, 3);
        let started = Utc::now() - chrono::Duration::seconds(120);
        e.started_at = Some(started);
        let lease = Duration::from_secs(60);
        assert!(is_lease_expired(&e, Utc::now(), lease));
        assert!(!is_lease_expired(&e, started + chrono::Duration::seconds(30), lease));
    }

    #[test]
    fn queued_entry_has_no_lease() {
        let e = entry(QueueStatus::Queued, 0, 3);
        assert!(!is_lease_expired(&e, Utc::now(), Duration::from_secs(0)));
    }

    #[test]
    fn duration_is_non_negative() {
        let mut e = entry(QueueStatus::Processing, 0, 3);
        let started = Utc::now();
        e.started_at = Some(started);
        assert_eq!(attempt_duration(&e, started + chrono::Duration::seconds(42)), Some(42));
        assert_eq!(attempt_duration(&e, started - chrono::Duration::seconds(5)), Some(0));
        e.started_at = None;
        assert_eq!(attempt_duration(&e, started), None);
    }

    // -- Job naming --

    #[test]
    fn job_name_differs_per_attempt() {
        let id = Uuid::now_v7();
        let first = job_name("worker-a", "acme", "y", id, 1);
        let second = job_name("worker-a", "acme", "y", id, 2);
        assert_ne!(first, second);
        assert!(second.contains("-a2-"));
    }

    #[test]
    fn job_name_is_sanitized() {
        let id = Uuid::parse_str("0190aa11-2233-7445-8667-8899aabbccdd").unwrap();
        let name = job_name("Worker_1", "Acme.Corp", "Widgets--Repo", id, 1);
        assert_eq!(name, "worker-1-scan-acme-corp-widgets-repo-a1-aabbccdd");
    }

    #[test]
    fn job_name_is_bounded() {
        let id = Uuid::now_v7();
        let name = job_name(&"w".repeat(64), &"o".repeat(100), &"n".repeat(100), id, 10);
        assert!(name.len() <= JOB_NAME_PREFIX_MAX + 13);
        assert!(!name.contains("--"));
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
