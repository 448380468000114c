use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_RESERVATION_ITEMS;
use crate::model::*;
use crate::observability::RESERVATIONS_EXPIRED_TOTAL;
use crate::pattern::{is_known_pattern, validate_slot};

use super::conflict::{check_against_enrollments, check_against_reservation, check_bookable};
use super::{Engine, EngineError};

/// Drop the items of a reservation whose shared timer has run out. The expiry
/// stamp stays, so the next mutation still reports `ReservationExpired` no
/// matter whether a reader, the sweep or the mutation itself got here first.
pub(super) fn void_if_expired(reservation: &mut Reservation, now: Ms, via: &'static str) -> bool {
    if !reservation.is_expired(now) {
        return false;
    }
    if !reservation.items.is_empty() {
        info!(
            "reservation of student {} expired with {} item(s), voided ({via})",
            reservation.student_id,
            reservation.items.len()
        );
        reservation.items.clear();
        metrics::counter!(RESERVATIONS_EXPIRED_TOTAL, "via" => via).increment(1);
    }
    true
}

/// Mutations on an expired reservation reset it and fail.
pub(super) fn reject_if_expired(reservation: &mut Reservation, now: Ms) -> Result<(), EngineError> {
    if void_if_expired(reservation, now, "lazy") {
        reservation.clear();
        return Err(EngineError::ReservationExpired);
    }
    Ok(())
}

/// A candidate resolved against the catalog.
pub(super) struct Resolved {
    pub slot: Slot,
    pub batch: Option<Batch>,
}

impl Engine {
    fn validate_start_date(&self, start_date: NaiveDate, today: NaiveDate) -> Result<(), EngineError> {
        let horizon = today + chrono::Days::new(self.config.advance_booking_days as u64);
        if start_date < today {
            return Err(EngineError::Validation(format!(
                "start date {start_date} is in the past"
            )));
        }
        if start_date > horizon {
            return Err(EngineError::Validation(format!(
                "start date {start_date} is more than {} days ahead",
                self.config.advance_booking_days
            )));
        }
        Ok(())
    }

    pub(super) async fn resolve_candidate(
        &self,
        candidate: &Candidate,
        today: NaiveDate,
    ) -> Result<Resolved, EngineError> {
        self.validate_start_date(candidate.start_date, today)?;
        match candidate.target {
            BookingTarget::Batch { batch_id } => {
                let batch = self
                    .get_batch(&batch_id)
                    .await
                    .ok_or(EngineError::NotFound(batch_id))?;
                check_bookable(&batch, today)?;
                if candidate.start_date > batch.end_date {
                    return Err(EngineError::Validation(format!(
                        "start date {} is after batch end {}",
                        candidate.start_date, batch.end_date
                    )));
                }
                Ok(Resolved {
                    slot: batch.slot.clone(),
                    batch: Some(batch),
                })
            }
            BookingTarget::Pass { business_id } => {
                if self.store.get_business(&business_id).is_none() {
                    return Err(EngineError::NotFound(business_id));
                }
                let slot = candidate.slot.clone().ok_or_else(|| {
                    EngineError::Validation("pass bookings need a time slot".into())
                })?;
                validate_slot(&slot)?;
                if !is_known_pattern(&slot.pattern) {
                    return Err(EngineError::Validation(format!(
                        "unknown schedule pattern {:?}",
                        slot.pattern
                    )));
                }
                Ok(Resolved { slot, batch: None })
            }
        }
    }

    /// Capacity first, then duplicates, then time conflicts.
    fn evaluate(
        &self,
        student_id: Ulid,
        reservation: &Reservation,
        candidate: &Candidate,
        resolved: &Resolved,
        today: NaiveDate,
    ) -> ConflictResult {
        if let Some(batch) = &resolved.batch
            && batch.is_full()
        {
            return ConflictResult::CapacityFull {
                batch_id: batch.id,
                capacity: batch.capacity,
            };
        }
        if let Some(item_id) =
            reservation.find_duplicate(&candidate.target, &resolved.slot, candidate.start_date)
        {
            return ConflictResult::AlreadyReserved { item_id };
        }
        let enrollments = self.store.student_enrollments(&student_id);
        if let Some(c) = check_against_enrollments(
            &resolved.slot,
            &enrollments,
            today,
            self.config.grace_period_days,
        ) {
            return ConflictResult::ScheduleConflict(c);
        }
        if let Some(c) = check_against_reservation(&resolved.slot, &reservation.items, None) {
            return ConflictResult::ScheduleConflict(c);
        }
        ConflictResult::Compatible
    }

    /// Read-only: would `candidate` be accepted into the student's reservation?
    pub async fn check_add(
        &self,
        student_id: Ulid,
        candidate: &Candidate,
    ) -> Result<ConflictResult, EngineError> {
        let today = self.clock.today();
        let resolved = self.resolve_candidate(candidate, today).await?;
        let Some(lock) = self.existing_student_lock(&student_id) else {
            let empty = Reservation::new(student_id);
            return Ok(self.evaluate(student_id, &empty, candidate, &resolved, today));
        };
        let mut reservation = lock.lock().await;
        void_if_expired(&mut reservation, self.clock.now(), "lazy");
        Ok(self.evaluate(student_id, &reservation, candidate, &resolved, today))
    }

    pub async fn add_to_reservation(
        &self,
        student_id: Ulid,
        candidate: Candidate,
    ) -> Result<ReservationItem, EngineError> {
        let today = self.clock.today();
        let resolved = self.resolve_candidate(&candidate, today).await?;
        let lock = self.student_lock(student_id);
        let mut reservation = lock.lock().await;
        let now = self.clock.now();
        reject_if_expired(&mut reservation, now)?;
        if reservation.items.len() >= MAX_RESERVATION_ITEMS {
            return Err(EngineError::LimitExceeded("too many items in reservation"));
        }

        match self.evaluate(student_id, &reservation, &candidate, &resolved, today) {
            ConflictResult::Compatible => {}
            ConflictResult::ScheduleConflict(c) => {
                debug!("student {student_id} add rejected: {}", c.reason());
                return Err(EngineError::ScheduleConflict(c));
            }
            ConflictResult::CapacityFull { batch_id, capacity } => {
                return Err(EngineError::CapacityFull { batch_id, capacity });
            }
            ConflictResult::AlreadyReserved { item_id } => {
                return Err(EngineError::AlreadyReserved(item_id));
            }
        }

        let item = ReservationItem {
            id: Ulid::new(),
            target: candidate.target,
            slot: resolved.slot,
            tier: candidate.tier,
            start_date: candidate.start_date,
            price: candidate.price,
            auto_renew: candidate.auto_renew,
        };
        reservation.items.push(item.clone());
        // The window runs from the first add; later adds never extend it.
        if reservation.expires_at.is_none() {
            reservation.expires_at = Some(now + self.config.reservation_window_ms());
        }
        Ok(item)
    }

    pub async fn remove_from_reservation(
        &self,
        student_id: Ulid,
        item_id: Ulid,
    ) -> Result<(), EngineError> {
        let lock = self.student_lock(student_id);
        let mut reservation = lock.lock().await;
        reject_if_expired(&mut reservation, self.clock.now())?;
        let pos = reservation
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or(EngineError::NotFound(item_id))?;
        reservation.items.remove(pos);
        if reservation.items.is_empty() {
            reservation.expires_at = None;
        }
        Ok(())
    }

    pub async fn clear_reservation(&self, student_id: Ulid) {
        let lock = self.student_lock(student_id);
        lock.lock().await.clear();
    }

    /// Seconds left on the shared timer; 0 for an empty or expired reservation.
    pub async fn remaining_reservation_seconds(&self, student_id: Ulid) -> u64 {
        let Some(lock) = self.existing_student_lock(&student_id) else {
            return 0;
        };
        let mut reservation = lock.lock().await;
        let now = self.clock.now();
        void_if_expired(&mut reservation, now, "lazy");
        reservation.remaining_seconds(now)
    }

    pub async fn get_reservation(&self, student_id: Ulid) -> Reservation {
        let Some(lock) = self.existing_student_lock(&student_id) else {
            return Reservation::new(student_id);
        };
        let mut reservation = lock.lock().await;
        void_if_expired(&mut reservation, self.clock.now(), "lazy");
        reservation.clone()
    }

    /// Void every expired reservation still holding items. Reservations busy
    /// in another call are skipped; that call voids them itself. Idle locks
    /// are then dropped from the lock maps.
    pub fn sweep_expired_reservations(&self) -> usize {
        let now = self.clock.now();
        let mut voided = 0;
        for entry in self.reservations.iter() {
            if let Ok(mut reservation) = entry.value().try_lock()
                && !reservation.items.is_empty()
                && void_if_expired(&mut reservation, now, "sweep")
            {
                voided += 1;
            }
        }
        self.prune_idle_locks(now);
        voided
    }

    /// Drop reservation entries nobody holds that are empty and either never
    /// timed or expired a full window ago (until then the stamp still turns the
    /// next mutation into `ReservationExpired`). Unused teacher locks go too.
    /// `retain` holds each shard's write lock, and every `Arc` is cloned out
    /// under that lock, so a count of 1 means no caller can be using it.
    fn prune_idle_locks(&self, now: Ms) {
        let window = self.config.reservation_window_ms();
        self.reservations.retain(|_, lock| {
            if Arc::strong_count(lock) > 1 {
                return true;
            }
            let Ok(reservation) = lock.try_lock() else {
                return true;
            };
            let stale = match reservation.expires_at {
                None => true,
                Some(at) => now >= at.saturating_add(window),
            };
            !(reservation.items.is_empty() && stale)
        });
        self.teacher_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
