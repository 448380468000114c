use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::overlap::overlaps;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Teacher names compare case-insensitively with whitespace collapsed.
pub fn normalize_teacher(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First conflict between `candidate` and the student's active enrollments.
pub fn check_against_enrollments<'a>(
    candidate: &Slot,
    enrollments: impl IntoIterator<Item = &'a Enrollment>,
    today: NaiveDate,
    grace_period_days: u32,
) -> Option<ScheduleConflict> {
    enrollments
        .into_iter()
        .filter(|e| e.is_active(today, grace_period_days))
        .find_map(|e| {
            overlaps(candidate, &e.slot).map(|o| o.into_conflict(OffendingEntity::Enrollment(e.id)))
        })
}

/// First conflict between `candidate` and items already held, skipping `skip`.
pub fn check_against_reservation<'a>(
    candidate: &Slot,
    items: impl IntoIterator<Item = &'a ReservationItem>,
    skip: Option<Ulid>,
) -> Option<ScheduleConflict> {
    items
        .into_iter()
        .filter(|i| Some(i.id) != skip)
        .find_map(|i| {
            overlaps(candidate, &i.slot).map(|o| o.into_conflict(OffendingEntity::ReservationItem(i.id)))
        })
}

/// Every pair inside a reservation must be compatible. Reports the later item
/// of the first colliding pair.
pub fn check_reservation_pairs(items: &[ReservationItem]) -> Option<ScheduleConflict> {
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if let Some(o) = overlaps(&items[i].slot, &items[j].slot) {
                return Some(o.into_conflict(OffendingEntity::ReservationItem(items[j].id)));
            }
        }
    }
    None
}

/// First live batch of the same teacher whose slot collides with `slot`.
/// Cancelled and completed batches no longer occupy the teacher.
pub fn check_teacher<'a>(
    teacher: &str,
    slot: &Slot,
    batches: impl IntoIterator<Item = &'a Batch>,
    skip: Option<Ulid>,
    today: NaiveDate,
) -> Option<ScheduleConflict> {
    let teacher = normalize_teacher(teacher);
    batches
        .into_iter()
        .filter(|b| Some(b.id) != skip)
        .filter(|b| b.is_live(today))
        .filter(|b| normalize_teacher(&b.teacher) == teacher)
        .find_map(|b| overlaps(slot, &b.slot).map(|o| o.into_conflict(OffendingEntity::Batch(b.id))))
}

pub fn check_capacity(batch: &Batch) -> Result<(), EngineError> {
    if batch.is_full() {
        return Err(EngineError::CapacityFull {
            batch_id: batch.id,
            capacity: batch.capacity,
        });
    }
    Ok(())
}

pub fn check_bookable(batch: &Batch, today: NaiveDate) -> Result<(), EngineError> {
    match batch.status(today) {
        BatchStatus::Scheduled | BatchStatus::Active => Ok(()),
        BatchStatus::Completed => Err(EngineError::Validation(format!(
            "batch {} has completed",
            batch.id
        ))),
        BatchStatus::Cancelled => Err(EngineError::Validation(format!(
            "batch {} was cancelled",
            batch.id
        ))),
    }
}
