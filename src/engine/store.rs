use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedBatch;

/// In-memory indexes over businesses, batches, enrollments and transactions.
///
/// Batches sit behind their own `RwLock`: that lock is the per-offering lock
/// every capacity check-then-write runs under. Enrollments and transactions
/// are plain snapshots replaced wholesale.
pub struct Store {
    businesses: DashMap<Ulid, Business>,
    batches: DashMap<Ulid, SharedBatch>,
    enrollments: DashMap<Ulid, Enrollment>,
    /// Student → enrollment ids, in creation order.
    student_enrollments: DashMap<Ulid, Vec<Ulid>>,
    transactions: DashMap<Ulid, Transaction>,
    student_transactions: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            businesses: DashMap::new(),
            batches: DashMap::new(),
            enrollments: DashMap::new(),
            student_enrollments: DashMap::new(),
            transactions: DashMap::new(),
            student_transactions: DashMap::new(),
        }
    }

    // ── Businesses ───────────────────────────────────────────

    pub fn business_count(&self) -> usize {
        self.businesses.len()
    }

    pub fn get_business(&self, id: &Ulid) -> Option<Business> {
        self.businesses.get(id).map(|e| e.value().clone())
    }

    pub fn insert_business(&self, business: Business) {
        self.businesses.insert(business.id, business);
    }

    pub fn businesses(&self) -> Vec<Business> {
        self.businesses.iter().map(|e| e.value().clone()).collect()
    }

    // ── Batches ──────────────────────────────────────────────

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn get_batch(&self, id: &Ulid) -> Option<SharedBatch> {
        self.batches.get(id).map(|e| e.value().clone())
    }

    pub fn insert_batch(&self, batch: Batch) -> SharedBatch {
        let id = batch.id;
        let shared = Arc::new(RwLock::new(batch));
        self.batches.insert(id, shared.clone());
        shared
    }

    /// Clone every batch except `skip`. The skipped batch may be write-locked
    /// by the caller.
    pub async fn snapshot_batches(&self, skip: Option<Ulid>) -> Vec<Batch> {
        let shared: Vec<SharedBatch> = self
            .batches
            .iter()
            .filter(|e| Some(*e.key()) != skip)
            .map(|e| e.value().clone())
            .collect();
        let mut out = Vec::with_capacity(shared.len());
        for b in shared {
            out.push(b.read().await.clone());
        }
        out
    }

    /// Overwrite a batch with a persisted snapshot, creating it if new.
    pub async fn save_batch(&self, batch: Batch) {
        match self.get_batch(&batch.id) {
            Some(shared) => *shared.write().await = batch,
            None => {
                self.insert_batch(batch);
            }
        }
    }

    // ── Enrollments ──────────────────────────────────────────

    pub fn get_enrollment(&self, id: &Ulid) -> Option<Enrollment> {
        self.enrollments.get(id).map(|e| e.value().clone())
    }

    /// Insert or replace an enrollment, indexing it under its student.
    pub fn upsert_enrollment(&self, enrollment: Enrollment) {
        let (id, student_id) = (enrollment.id, enrollment.student_id);
        if self.enrollments.insert(id, enrollment).is_none() {
            self.student_enrollments.entry(student_id).or_default().push(id);
        }
    }

    pub fn student_enrollments(&self, student_id: &Ulid) -> Vec<Enrollment> {
        let ids = self
            .student_enrollments
            .get(student_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_enrollment(id)).collect()
    }

    pub fn enrollments(&self) -> Vec<Enrollment> {
        self.enrollments.iter().map(|e| e.value().clone()).collect()
    }

    // ── Transactions ─────────────────────────────────────────

    pub fn get_transaction(&self, id: &Ulid) -> Option<Transaction> {
        self.transactions.get(id).map(|e| e.value().clone())
    }

    /// Transactions are append-only; a repeated id is ignored.
    pub fn insert_transaction(&self, transaction: Transaction) {
        let (id, student_id) = (transaction.id, transaction.student_id);
        if self.transactions.contains_key(&id) {
            return;
        }
        self.transactions.insert(id, transaction);
        self.student_transactions.entry(student_id).or_default().push(id);
    }

    pub fn student_transactions(&self, student_id: &Ulid) -> Vec<Transaction> {
        let ids = self
            .student_transactions
            .get(student_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_transaction(id)).collect()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions.iter().map(|e| e.value().clone()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a persisted event. Every event carries full snapshots, so
    /// applying the same event twice leaves the same state.
    pub async fn apply_event(&self, event: &Event) {
        match event {
            Event::BusinessRegistered { business } => self.insert_business(business.clone()),
            Event::BatchSaved { batch } => self.save_batch(batch.clone()).await,
            Event::CheckoutCommitted {
                transaction,
                enrollments,
                batches,
            } => {
                for b in batches {
                    self.save_batch(b.clone()).await;
                }
                for e in enrollments {
                    self.upsert_enrollment(e.clone());
                }
                self.insert_transaction(transaction.clone());
            }
            Event::EnrollmentSaved {
                enrollment,
                batches,
            } => {
                for b in batches {
                    self.save_batch(b.clone()).await;
                }
                self.upsert_enrollment(enrollment.clone());
            }
        }
    }

    /// Minimal event list recreating the current state, for WAL compaction.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .businesses()
            .into_iter()
            .map(|business| Event::BusinessRegistered { business })
            .collect();
        for batch in self.snapshot_batches(None).await {
            events.push(Event::BatchSaved { batch });
        }
        for enrollment in self.enrollments() {
            events.push(Event::EnrollmentSaved {
                enrollment,
                batches: Vec::new(),
            });
        }
        for transaction in self.transactions() {
            events.push(Event::CheckoutCommitted {
                transaction,
                enrollments: Vec::new(),
                batches: Vec::new(),
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn batch(enrolled: u32) -> Batch {
        Batch {
            id: Ulid::new(),
            business_id: Ulid::new(),
            name: "Morning yoga".into(),
            teacher: "A. Sen".into(),
            slot: Slot::new("daily", MinuteRange::new(360, 420)),
            capacity: 5,
            enrolled_count: enrolled,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            cancelled: false,
        }
    }

    #[tokio::test]
    async fn save_batch_overwrites_in_place() {
        let store = Store::new();
        let b = batch(0);
        let shared = store.insert_batch(b.clone());

        let mut updated = b.clone();
        updated.enrolled_count = 3;
        store.save_batch(updated).await;

        // Same Arc, new contents.
        assert_eq!(shared.read().await.enrolled_count, 3);
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn apply_event_is_idempotent() {
        let store = Store::new();
        let b = batch(1);
        let student = Ulid::new();
        let enrollment = Enrollment {
            id: Ulid::new(),
            student_id: student,
            business_id: b.business_id,
            target: BookingTarget::Batch { batch_id: b.id },
            slot: b.slot.clone(),
            tier: PassTier::Monthly,
            start_date: b.start_date,
            end_date: NaiveDate::from_ymd_opt(2026, 1, 30).unwrap(),
            status: EnrollmentStatus::Active,
            switch_used: false,
            auto_renew: true,
            transaction_id: Ulid::new(),
        };
        let event = Event::CheckoutCommitted {
            transaction: Transaction {
                id: enrollment.transaction_id,
                student_id: student,
                contact: Contact {
                    name: "Asha".into(),
                    phone: "+91 90000 00000".into(),
                    email: None,
                },
                lines: Vec::new(),
                total: 1500,
                created_at: 0,
            },
            enrollments: vec![enrollment.clone()],
            batches: vec![b.clone()],
        };

        store.apply_event(&event).await;
        store.apply_event(&event).await;

        assert_eq!(store.student_enrollments(&student), vec![enrollment]);
        assert_eq!(store.student_transactions(&student).len(), 1);
        let shared = store.get_batch(&b.id).unwrap();
        assert_eq!(shared.read().await.enrolled_count, 1);
    }

    #[tokio::test]
    async fn snapshot_skips_locked_batch() {
        let store = Store::new();
        let held = store.insert_batch(batch(0));
        store.insert_batch(batch(2));
        let held_id = held.read().await.id;

        let _guard = held.write().await;
        let others = store.snapshot_batches(Some(held_id)).await;
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].enrolled_count, 2);
    }
}
