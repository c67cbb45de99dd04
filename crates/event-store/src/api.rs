use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use runplane_core_types::{OwnerId, RunId};

use crate::config::LogLimits;
use crate::errors::{EsError, EsErrorKind};
use crate::model::{RunEvent, RunStatus, RunSummary};

pub type EventStoreResult<T> = Result<T, EsError>;

/// Durable, strictly ordered record of what happened during each run.
///
/// Implementations must assign gap-free sequence numbers even when `append`
/// is called concurrently for the same run, and must refuse appends once a
/// run has reached a terminal status.
#[async_trait]
pub trait RunEventLog: Send + Sync {
    /// Registers a new run in `running` status with zero events.
    async fn create_run(&self, run_id: &RunId, owner: &OwnerId) -> EventStoreResult<RunSummary>;

    /// Appends an event and returns the sequence number it was assigned.
    async fn append(&self, run_id: &RunId, kind: &str, payload: Value) -> EventStoreResult<u64>;

    /// Events with `sequence > last_sequence`, ascending. `-1` reads from the start.
    async fn read_since(&self, run_id: &RunId, last_sequence: i64)
        -> EventStoreResult<Vec<RunEvent>>;

    async fn status(&self, run_id: &RunId) -> EventStoreResult<RunStatus>;

    async fn summary(&self, run_id: &RunId) -> EventStoreResult<RunSummary>;

    /// Appends the closing event and moves the run to `status` in one step,
    /// so no reader can observe the terminal status without the closing event.
    async fn finish(
        &self,
        run_id: &RunId,
        status: RunStatus,
        payload: Value,
    ) -> EventStoreResult<u64>;
}

#[derive(Debug)]
struct RunRecord {
    owner: OwnerId,
    status: RunStatus,
    events: Vec<RunEvent>,
    created_at: chrono::DateTime<Utc>,
    finished_at: Option<chrono::DateTime<Utc>>,
}

impl RunRecord {
    fn summary(&self, run_id: &RunId) -> RunSummary {
        RunSummary {
            run_id: run_id.clone(),
            owner: self.owner.clone(),
            status: self.status,
            event_count: self.events.len() as u64,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }

    fn ensure_open(&self, run_id: &RunId) -> EventStoreResult<()> {
        if self.status.is_terminal() {
            return Err(EsErrorKind::RunClosed {
                run_id: run_id.to_string(),
                status: self.status,
            }
            .into());
        }
        Ok(())
    }

    fn push(&mut self, run_id: &RunId, kind: &str, payload: Value) -> u64 {
        let sequence = self.events.len() as u64;
        self.events.push(RunEvent {
            run_id: run_id.clone(),
            sequence,
            kind: kind.to_string(),
            payload,
            timestamp: Utc::now(),
        });
        sequence
    }
}

/// Process-local log. Each run's mutations are serialized by its own lock, so
/// appenders for different runs never contend.
#[derive(Default)]
pub struct InMemoryRunEventLog {
    runs: DashMap<RunId, Arc<Mutex<RunRecord>>>,
    limits: LogLimits,
}

impl InMemoryRunEventLog {
    pub fn new(limits: LogLimits) -> Arc<Self> {
        Arc::new(Self {
            runs: DashMap::new(),
            limits,
        })
    }

    fn record(&self, run_id: &RunId) -> EventStoreResult<Arc<Mutex<RunRecord>>> {
        self.runs
            .get(run_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EsErrorKind::RunNotFound(run_id.to_string()).into())
    }

    fn check_payload(&self, payload: &Value) -> EventStoreResult<()> {
        let size = serde_json::to_vec(payload)
            .map_err(|err| EsErrorKind::AppendRejected(err.to_string()))?
            .len();
        if size > self.limits.max_payload_bytes {
            return Err(EsErrorKind::AppendRejected(format!(
                "payload of {size} bytes exceeds limit of {}",
                self.limits.max_payload_bytes
            ))
            .into());
        }
        Ok(())
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Drops finished runs whose terminal transition is older than `max_age`.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        if max_age.is_zero() {
            return 0;
        }
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let stale: Vec<RunId> = self
            .runs
            .iter()
            .filter_map(|entry| {
                let finished_at = entry.value().lock().finished_at;
                match finished_at {
                    Some(finished) if finished < cutoff => Some(entry.key().clone()),
                    _ => None,
                }
            })
            .collect();
        let mut removed = 0;
        for run_id in stale {
            if self.runs.remove(&run_id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "pruned finished runs from event log");
        }
        removed
    }
}

#[async_trait]
impl RunEventLog for InMemoryRunEventLog {
    async fn create_run(&self, run_id: &RunId, owner: &OwnerId) -> EventStoreResult<RunSummary> {
        let record = RunRecord {
            owner: owner.clone(),
            status: RunStatus::Running,
            events: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        };
        let summary = record.summary(run_id);
        match self.runs.entry(run_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(EsErrorKind::RunExists(run_id.to_string()).into())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(record)));
                debug!(run_id = %run_id, owner = %owner, "run created");
                Ok(summary)
            }
        }
    }

    async fn append(&self, run_id: &RunId, kind: &str, payload: Value) -> EventStoreResult<u64> {
        self.check_payload(&payload)?;
        let record = self.record(run_id)?;
        let mut guard = record.lock();
        guard.ensure_open(run_id)?;
        // one slot is always kept free for the closing event
        if guard.events.len() + 1 >= self.limits.max_events_per_run {
            return Err(EsErrorKind::AppendRejected(format!(
                "run {run_id} reached {} events",
                self.limits.max_events_per_run
            ))
            .into());
        }
        Ok(guard.push(run_id, kind, payload))
    }

    async fn read_since(
        &self,
        run_id: &RunId,
        last_sequence: i64,
    ) -> EventStoreResult<Vec<RunEvent>> {
        let record = self.record(run_id)?;
        let guard = record.lock();
        let start = usize::try_from(last_sequence.saturating_add(1)).unwrap_or(0);
        Ok(guard.events.iter().skip(start).cloned().collect())
    }

    async fn status(&self, run_id: &RunId) -> EventStoreResult<RunStatus> {
        let record = self.record(run_id)?;
        let status = record.lock().status;
        Ok(status)
    }

    async fn summary(&self, run_id: &RunId) -> EventStoreResult<RunSummary> {
        let record = self.record(run_id)?;
        let summary = record.lock().summary(run_id);
        Ok(summary)
    }

    async fn finish(
        &self,
        run_id: &RunId,
        status: RunStatus,
        payload: Value,
    ) -> EventStoreResult<u64> {
        if !status.is_terminal() {
            return Err(EsErrorKind::InvalidTransition(status).into());
        }
        let record = self.record(run_id)?;
        let mut guard = record.lock();
        guard.ensure_open(run_id)?;
        let sequence = guard.push(run_id, status.terminal_event_type(), payload);
        guard.status = status;
        guard.finished_at = Some(Utc::now());
        info!(run_id = %run_id, status = %status, events = sequence + 1, "run finished");
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (RunId, OwnerId) {
        (RunId::new(), OwnerId::from("owner-1"))
    }

    #[tokio::test]
    async fn sequences_start_at_zero_and_increase() {
        let log = InMemoryRunEventLog::new(LogLimits::default());
        let (run, owner) = ids();
        log.create_run(&run, &owner).await.unwrap();
        for expected in 0..3u64 {
            let seq = log.append(&run, "step", json!({"n": expected})).await.unwrap();
            assert_eq!(seq, expected);
        }
        let events = log.read_since(&run, -1).await.unwrap();
        assert_eq!(events.len(), 3);
        let tail = log.read_since(&run, 1).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);
        assert!(log.read_since(&run, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_run_is_rejected() {
        let log = InMemoryRunEventLog::new(LogLimits::default());
        let (run, owner) = ids();
        log.create_run(&run, &owner).await.unwrap();
        let err = log.create_run(&run, &owner).await.unwrap_err();
        assert!(matches!(err.kind(), EsErrorKind::RunExists(_)));
    }

    #[tokio::test]
    async fn unknown_run_reports_not_found() {
        let log = InMemoryRunEventLog::new(LogLimits::default());
        let err = log.status(&RunId::from("missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn finish_closes_the_run_exactly_once() {
        let log = InMemoryRunEventLog::new(LogLimits::default());
        let (run, owner) = ids();
        log.create_run(&run, &owner).await.unwrap();
        log.append(&run, "step", json!({})).await.unwrap();
        let seq = log
            .finish(&run, RunStatus::Completed, json!({"output": "done"}))
            .await
            .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(log.status(&run).await.unwrap(), RunStatus::Completed);

        let events = log.read_since(&run, -1).await.unwrap();
        assert_eq!(events.last().unwrap().kind, "complete");

        let err = log.append(&run, "late", json!({})).await.unwrap_err();
        assert!(matches!(err.kind(), EsErrorKind::RunClosed { .. }));
        let err = log
            .finish(&run, RunStatus::Error, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), EsErrorKind::RunClosed { .. }));
        assert_eq!(log.status(&run).await.unwrap(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn finish_requires_terminal_status() {
        let log = InMemoryRunEventLog::new(LogLimits::default());
        let (run, owner) = ids();
        log.create_run(&run, &owner).await.unwrap();
        let err = log
            .finish(&run, RunStatus::Running, json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &EsErrorKind::InvalidTransition(RunStatus::Running)
        );
    }

    #[tokio::test]
    async fn limits_reject_oversized_payloads_and_long_runs() {
        let log = InMemoryRunEventLog::new(LogLimits {
            max_events_per_run: 3,
            max_payload_bytes: 32,
        });
        let (run, owner) = ids();
        log.create_run(&run, &owner).await.unwrap();
        let err = log
            .append(&run, "big", json!({"blob": "x".repeat(64)}))
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), EsErrorKind::AppendRejected(_)));

        log.append(&run, "a", json!({})).await.unwrap();
        log.append(&run, "b", json!({})).await.unwrap();
        assert!(log.append(&run, "c", json!({})).await.is_err());
        // the closing event still fits
        assert_eq!(
            log.finish(&run, RunStatus::Completed, json!({}))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_gap_free() {
        let log = InMemoryRunEventLog::new(LogLimits::default());
        let (run, owner) = ids();
        log.create_run(&run, &owner).await.unwrap();

        let mut handles = Vec::new();
        for writer in 0..8 {
            let log = Arc::clone(&log);
            let run = run.clone();
            handles.push(tokio::spawn(async move {
                let mut seqs = Vec::new();
                for n in 0..50 {
                    seqs.push(
                        log.append(&run, "step", json!({"writer": writer, "n": n}))
                            .await
                            .unwrap(),
                    );
                }
                seqs
            }));
        }
        let mut assigned = Vec::new();
        for handle in handles {
            assigned.extend(handle.await.unwrap());
        }
        assigned.sort_unstable();
        assert_eq!(assigned, (0..400u64).collect::<Vec<_>>());

        let events = log.read_since(&run, -1).await.unwrap();
        for (idx, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, idx as u64);
        }
    }

    #[tokio::test]
    async fn prune_removes_only_finished_runs() {
        let log = InMemoryRunEventLog::new(LogLimits::default());
        let owner = OwnerId::from("o");
        let open = RunId::new();
        let closed = RunId::new();
        log.create_run(&open, &owner).await.unwrap();
        log.create_run(&closed, &owner).await.unwrap();
        log.finish(&closed, RunStatus::Error, json!({}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.prune_finished(Duration::from_millis(5)), 1);
        assert_eq!(log.run_count(), 1);
        assert!(log.status(&open).await.is_ok());
    }
}
