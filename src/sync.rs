//! Secondary copy of the state shared with other contexts.
//!
//! Both channels carry a sequence number that is bumped on every mutation.
//! Reconciliation compares sequence numbers only; wall-clock timestamps are
//! kept for diagnostics.

use crate::errors::{Error, Result};
use crate::models::State;
use crate::storage::{KeyValueStore, LoadedState, STORAGE_VERSION, sanitize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const SYNC_KEY: &str = "app-sync";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRecordRef<'a> {
    version: &'a str,
    timestamp: i64,
    sequence: u64,
    browser_context: &'a str,
    data: &'a State,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncRecord {
    version: String,
    timestamp: i64,
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    browser_context: String,
    data: State,
}

#[derive(Clone)]
pub struct CrossSyncChannel {
    store: Arc<dyn KeyValueStore>,
    key: String,
    context: String,
}

impl CrossSyncChannel {
    pub fn new(store: Arc<dyn KeyValueStore>, context: impl Into<String>) -> Self {
        Self {
            store,
            key: SYNC_KEY.to_string(),
            context: context.into(),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn publish(&self, state: &State, sequence: u64) -> Result<()> {
        let record = SyncRecordRef {
            version: STORAGE_VERSION,
            timestamp: Utc::now().timestamp_millis(),
            sequence,
            browser_context: &self.context,
            data: state,
        };
        let payload = serde_json::to_string(&record)?;
        self.store
            .set(&self.key, &payload)
            .map_err(|err| Error::Persistence(format!("writing `{}`: {err}", self.key)))?;
        debug!(sequence, context = %self.context, "sync copy published");
        Ok(())
    }

    pub fn read(&self) -> Option<LoadedState> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                error!("failed to read sync copy: {err}");
                return None;
            }
        };

        let record: SyncRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                error!("failed to parse sync copy: {err}");
                return None;
            }
        };

        if record.version != STORAGE_VERSION {
            warn!(found = %record.version, "sync copy version mismatch, ignoring");
            return None;
        }

        debug!(
            sequence = record.sequence,
            context = %record.browser_context,
            "sync copy read"
        );
        Some(LoadedState {
            sequence: record.sequence,
            written_at: DateTime::from_timestamp_millis(record.timestamp).unwrap_or_default(),
            state: sanitize(record.data),
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Primary,
    Secondary,
}

/// Outcome of comparing the two durable copies.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    NoData,
    PrimaryOnly(LoadedState),
    SecondaryOnly(LoadedState),
    BothAgree(LoadedState),
    BothConflict {
        winner: Source,
        primary_sequence: u64,
        secondary_sequence: u64,
        state: LoadedState,
    },
}

impl Reconciliation {
    pub fn winner(&self) -> Option<Source> {
        match self {
            Self::NoData => None,
            Self::PrimaryOnly(_) | Self::BothAgree(_) => Some(Source::Primary),
            Self::SecondaryOnly(_) => Some(Source::Secondary),
            Self::BothConflict { winner, .. } => Some(*winner),
        }
    }

    pub fn loaded(&self) -> Option<&LoadedState> {
        match self {
            Self::NoData => None,
            Self::PrimaryOnly(state) | Self::SecondaryOnly(state) | Self::BothAgree(state) => {
                Some(state)
            }
            Self::BothConflict { state, .. } => Some(state),
        }
    }

    pub fn into_loaded(self) -> Option<LoadedState> {
        match self {
            Self::NoData => None,
            Self::PrimaryOnly(state) | Self::SecondaryOnly(state) | Self::BothAgree(state) => {
                Some(state)
            }
            Self::BothConflict { state, .. } => Some(state),
        }
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NoData => "no-data",
            Self::PrimaryOnly(_) => "primary-only",
            Self::SecondaryOnly(_) => "secondary-only",
            Self::BothAgree(_) => "both-agree",
            Self::BothConflict { .. } => "both-conflict",
        };
        f.write_str(label)
    }
}

/// Picks the authoritative copy. The higher sequence wins; ties go to primary.
pub fn reconcile(primary: Option<LoadedState>, secondary: Option<LoadedState>) -> Reconciliation {
    match (primary, secondary) {
        (None, None) => Reconciliation::NoData,
        (Some(primary), None) => Reconciliation::PrimaryOnly(primary),
        (None, Some(secondary)) => Reconciliation::SecondaryOnly(secondary),
        (Some(primary), Some(secondary)) => {
            if primary.state == secondary.state {
                let sequence = primary.sequence.max(secondary.sequence);
                return Reconciliation::BothAgree(LoadedState { sequence, ..primary });
            }

            let primary_sequence = primary.sequence;
            let secondary_sequence = secondary.sequence;
            let (winner, state) = if secondary_sequence > primary_sequence {
                (Source::Secondary, secondary)
            } else {
                (Source::Primary, primary)
            };

            warn!(
                primary_sequence,
                secondary_sequence,
                winner = ?winner,
                "durable copies disagree, keeping the higher sequence"
            );
            Reconciliation::BothConflict {
                winner,
                primary_sequence,
                secondary_sequence,
                state,
            }
        }
    }
}

/// Loads both channels and reconciles them.
pub fn load_reconciled(
    primary: &crate::storage::PersistenceChannel,
    secondary: Option<&CrossSyncChannel>,
) -> Reconciliation {
    let outcome = reconcile(primary.load(), secondary.and_then(CrossSyncChannel::read));
    info!(outcome = %outcome, "durable state reconciled");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PeriodRecord;
    use crate::storage::MemoryStore;
    use chrono::{Duration, NaiveDate};

    fn loaded(sequence: u64, period_id: &str, written_at: DateTime<Utc>) -> LoadedState {
        let mut state = State::default();
        state.current_period = Some(PeriodRecord::new(
            period_id,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            None,
            written_at,
        ));
        LoadedState {
            sequence,
            written_at,
            state,
        }
    }

    fn period_id(outcome: &Reconciliation) -> String {
        outcome
            .loaded()
            .and_then(|loaded| loaded.state.current_period.as_ref())
            .map(|period| period.id.clone())
            .unwrap()
    }

    #[test]
    fn higher_sequence_wins_even_with_older_timestamp() {
        let now = Utc::now();
        let primary = loaded(3, "stale", now);
        let secondary = loaded(7, "fresh", now - Duration::hours(5));

        let outcome = reconcile(Some(primary), Some(secondary));
        assert_eq!(outcome.winner(), Some(Source::Secondary));
        assert_eq!(period_id(&outcome), "fresh");

        let primary = loaded(9, "fresh", now - Duration::hours(5));
        let secondary = loaded(2, "stale", now);
        let outcome = reconcile(Some(primary), Some(secondary));
        assert_eq!(outcome.winner(), Some(Source::Primary));
        assert_eq!(period_id(&outcome), "fresh");
    }

    #[test]
    fn equal_sequences_prefer_primary() {
        let now = Utc::now();
        let outcome = reconcile(Some(loaded(5, "primary", now)), Some(loaded(5, "secondary", now)));
        assert!(matches!(outcome, Reconciliation::BothConflict { .. }));
        assert_eq!(period_id(&outcome), "primary");
    }

    #[test]
    fn single_or_matching_copies() {
        let now = Utc::now();
        assert_eq!(reconcile(None, None), Reconciliation::NoData);
        assert_eq!(
            reconcile(Some(loaded(1, "a", now)), None).winner(),
            Some(Source::Primary)
        );
        assert_eq!(
            reconcile(None, Some(loaded(1, "a", now))).winner(),
            Some(Source::Secondary)
        );

        let outcome = reconcile(Some(loaded(2, "a", now)), Some(loaded(4, "a", now)));
        match outcome {
            Reconciliation::BothAgree(state) => assert_eq!(state.sequence, 4),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn publish_then_read_keeps_sequence() {
        let store = Arc::new(MemoryStore::new());
        let channel = CrossSyncChannel::new(store, "tab-a");
        channel.publish(&loaded(11, "p", Utc::now()).state, 11).unwrap();

        let read = channel.read().unwrap();
        assert_eq!(read.sequence, 11);
        assert_eq!(read.state.current_period.unwrap().id, "p");
    }
}
