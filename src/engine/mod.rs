mod catalog;
mod checkout;
mod clock;
mod conflict;
mod error;
mod log;
mod overlap;
mod policy;
mod queries;
mod reservation;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{
    check_against_enrollments, check_against_reservation, check_reservation_pairs, check_teacher,
    normalize_teacher,
};
pub use error::EngineError;
pub use log::{EventLog, MemoryLog, WalLog};
pub use overlap::{overlaps, Overlap};
pub use policy::pass_end_date;
pub use store::Store;

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::wal::Wal;

pub type SharedBatch = Arc<RwLock<Batch>>;

/// A student's reservation. Its mutex is also the per-student lock that
/// serializes checkout, cancellation and switching for that student.
pub type SharedReservation = Arc<Mutex<Reservation>>;

/// The scheduling, reservation and checkout engine.
///
/// Lock order, outermost first: log gate, teacher lock, student lock, batch locks in
/// ascending id order. No path takes them in any other order.
pub struct Engine {
    pub(super) store: Store,
    pub(super) log: Arc<dyn EventLog>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    pub(super) reservations: DashMap<Ulid, SharedReservation>,
    /// Normalized teacher name → lock held across check-then-write of a batch.
    pub(super) teacher_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Held shared by every logged mutation, exclusively by compaction, so a
    /// compacted log never misses an event appended mid-snapshot. Always
    /// taken before any other lock.
    pub(super) log_gate: RwLock<()>,
}

impl Engine {
    pub fn new(log: Arc<dyn EventLog>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Store::new(),
            log,
            clock,
            config,
            reservations: DashMap::new(),
            teacher_locks: DashMap::new(),
            log_gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `path` and keep appending to it.
    pub async fn open(
        path: &Path,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let events = Wal::replay(path).map_err(|e| EngineError::Persistence(e.to_string()))?;
        let wal = Wal::open(path).map_err(|e| EngineError::Persistence(e.to_string()))?;
        let engine = Self::new(Arc::new(WalLog::spawn(wal)), config, clock);
        for event in &events {
            engine.store.apply_event(event).await;
        }
        info!(
            "replayed {} event(s) from {}: {} batches, {} businesses",
            events.len(),
            path.display(),
            engine.store.batch_count(),
            engine.store.business_count()
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Ms {
        self.clock.now()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(super) fn student_lock(&self, student_id: Ulid) -> SharedReservation {
        self.reservations
            .entry(student_id)
            .or_insert_with(|| Arc::new(Mutex::new(Reservation::new(student_id))))
            .clone()
    }

    /// Lookup without creating an entry, for read-only paths.
    pub(super) fn existing_student_lock(&self, student_id: &Ulid) -> Option<SharedReservation> {
        self.reservations.get(student_id).map(|e| e.value().clone())
    }

    pub(super) fn teacher_lock(&self, teacher: &str) -> Arc<Mutex<()>> {
        self.teacher_locks
            .entry(normalize_teacher(teacher))
            .or_default()
            .clone()
    }

    pub(super) fn resolve_batch(&self, id: &Ulid) -> Result<SharedBatch, EngineError> {
        self.store.get_batch(id).ok_or(EngineError::NotFound(*id))
    }

    /// Write-lock several batches in ascending id order (deadlock-free).
    pub(super) async fn lock_batches(
        &self,
        ids: impl IntoIterator<Item = Ulid>,
    ) -> Result<BatchGuards, EngineError> {
        let mut ids: Vec<Ulid> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let shared = self.resolve_batch(&id)?;
            guards.push((id, shared.write_owned().await));
        }
        Ok(guards)
    }

    /// Days counted toward pass durations. A business that vanished from the
    /// catalog counts every day.
    pub(super) fn operating_days(&self, business_id: &Ulid) -> WeekdaySet {
        self.store
            .get_business(business_id)
            .map(|b| b.operating_days)
            .unwrap_or(WeekdaySet::ALL)
    }

    /// Compact the log down to the events recreating current state.
    pub async fn compact_log(&self) -> Result<(), EngineError> {
        let _gate = self.log_gate.write().await;
        let events = self.store.snapshot_events().await;
        let n = events.len();
        self.log.compact(events).await?;
        info!("compacted event log to {n} event(s)");
        Ok(())
    }

    pub async fn log_appends_since_compact(&self) -> u64 {
        self.log.appends_since_compact().await
    }
}

pub(super) type BatchGuards = Vec<(Ulid, OwnedRwLockWriteGuard<Batch>)>;

/// The locked batch `id` out of a `lock_batches` result.
pub(super) fn locked_batch(guards: &mut BatchGuards, id: Ulid) -> Result<&mut Batch, EngineError> {
    guards
        .iter_mut()
        .find(|(gid, _)| *gid == id)
        .map(|(_, g)| &mut **g)
        .ok_or(EngineError::NotFound(id))
}
