use chrono::{Datelike, Days, NaiveDate};
use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::conflict::{check_against_enrollments, check_bookable, check_capacity};
use super::{locked_batch, Engine, EngineError};

/// Days before start after which a batch enrollment can no longer switch.
pub const SWITCH_NOTICE_DAYS: u64 = 7;

/// Days a monthly pass must run before it can be cancelled.
pub const MONTHLY_LOCK_DAYS: i64 = 30;

/// Last day of a pass that starts on `start` and lasts `tier.duration_days()`
/// operating days. The start day counts if the business is open on it.
pub fn pass_end_date(start: NaiveDate, tier: PassTier, operating_days: WeekdaySet) -> NaiveDate {
    let days = if operating_days.is_empty() {
        WeekdaySet::ALL
    } else {
        operating_days
    };
    let needed = tier.duration_days();
    let mut counted = 0;
    let mut day = start;
    let mut last = start;
    // Any 7 consecutive days contain at least one operating day.
    for _ in 0..needed * 7 {
        if days.contains(day.weekday()) {
            counted += 1;
            last = day;
            if counted == needed {
                break;
            }
        }
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    last
}

/// End date of an enrollment, capped at the batch's own last day.
pub(super) fn enrollment_end_date(
    start: NaiveDate,
    tier: PassTier,
    operating_days: WeekdaySet,
    batch_end: Option<NaiveDate>,
) -> NaiveDate {
    let end = pass_end_date(start, tier, operating_days);
    match batch_end {
        Some(batch_end) => end.min(batch_end),
        None => end,
    }
}

fn ensure_active(enrollment: &Enrollment, today: NaiveDate, grace: u32) -> Result<(), EngineError> {
    match enrollment.effective_status(today, grace) {
        EnrollmentStatus::Active => Ok(()),
        EnrollmentStatus::Cancelled => Err(EngineError::Validation(format!(
            "enrollment {} is cancelled",
            enrollment.id
        ))),
        EnrollmentStatus::Expired => Err(EngineError::Validation(format!(
            "enrollment {} has expired",
            enrollment.id
        ))),
    }
}

impl Engine {
    fn resolve_enrollment(&self, id: &Ulid) -> Result<Enrollment, EngineError> {
        self.store.get_enrollment(id).ok_or(EngineError::NotFound(*id))
    }

    /// Cancel an enrollment and release its batch seat. Monthly passes stay
    /// locked for their first 30 days.
    pub async fn cancel_enrollment(&self, id: Ulid) -> Result<Enrollment, EngineError> {
        let _gate = self.log_gate.read().await;
        let student_id = self.resolve_enrollment(&id)?.student_id;
        let student_lock = self.student_lock(student_id);
        let _student = student_lock.lock().await;

        let mut enrollment = self.resolve_enrollment(&id)?;
        let today = self.clock.today();
        ensure_active(&enrollment, today, self.config.grace_period_days)?;
        if enrollment.tier == PassTier::Monthly {
            let days_since = (today - enrollment.start_date).num_days();
            if days_since < MONTHLY_LOCK_DAYS {
                return Err(EngineError::Locked {
                    days_remaining: MONTHLY_LOCK_DAYS - days_since,
                });
            }
        }

        let mut guards = self.lock_batches(enrollment.target.batch_id()).await?;
        let mut batches = Vec::new();
        if let Some(batch_id) = enrollment.target.batch_id() {
            let mut batch = locked_batch(&mut guards, batch_id)?.clone();
            batch.enrolled_count = batch.enrolled_count.saturating_sub(1);
            batches.push(batch);
        }
        enrollment.status = EnrollmentStatus::Cancelled;

        self.log
            .append(&Event::EnrollmentSaved {
                enrollment: enrollment.clone(),
                batches: batches.clone(),
            })
            .await?;
        for batch in batches {
            let batch_id = batch.id;
            *locked_batch(&mut guards, batch_id)? = batch;
        }
        self.store.upsert_enrollment(enrollment.clone());
        info!("cancelled enrollment {id} of student {student_id}");
        Ok(enrollment)
    }

    /// Move a batch enrollment to another batch. Allowed once, and only while
    /// the start date is at least a week away.
    pub async fn switch_enrollment(
        &self,
        id: Ulid,
        new_batch_id: Ulid,
    ) -> Result<Enrollment, EngineError> {
        let _gate = self.log_gate.read().await;
        let student_id = self.resolve_enrollment(&id)?.student_id;
        let student_lock = self.student_lock(student_id);
        let _student = student_lock.lock().await;

        let mut enrollment = self.resolve_enrollment(&id)?;
        let today = self.clock.today();
        if enrollment.switch_used {
            return Err(EngineError::SwitchNotAllowed("switch already used"));
        }
        ensure_active(&enrollment, today, self.config.grace_period_days)?;
        let Some(old_batch_id) = enrollment.target.batch_id() else {
            return Err(EngineError::SwitchNotAllowed("only batch enrollments can switch"));
        };
        if enrollment.start_date < today + Days::new(SWITCH_NOTICE_DAYS) {
            return Err(EngineError::SwitchNotAllowed(
                "less than 7 days before the start date",
            ));
        }
        if old_batch_id == new_batch_id {
            return Err(EngineError::Validation("already enrolled in that batch".into()));
        }

        let mut guards = self.lock_batches([old_batch_id, new_batch_id]).await?;
        let mut new_batch = locked_batch(&mut guards, new_batch_id)?.clone();
        check_bookable(&new_batch, today)?;
        if new_batch.business_id != enrollment.business_id {
            return Err(EngineError::Validation(format!(
                "batch {new_batch_id} belongs to another business"
            )));
        }
        if enrollment.start_date > new_batch.end_date {
            return Err(EngineError::Validation(format!(
                "batch {new_batch_id} ends before the enrollment starts"
            )));
        }
        check_capacity(&new_batch)?;
        let others: Vec<Enrollment> = self
            .store
            .student_enrollments(&student_id)
            .into_iter()
            .filter(|e| e.id != id)
            .collect();
        if let Some(c) = check_against_enrollments(
            &new_batch.slot,
            &others,
            today,
            self.config.grace_period_days,
        ) {
            return Err(EngineError::ScheduleConflict(c));
        }

        let mut old_batch = locked_batch(&mut guards, old_batch_id)?.clone();
        old_batch.enrolled_count = old_batch.enrolled_count.saturating_sub(1);
        new_batch.enrolled_count += 1;
        enrollment.target = BookingTarget::Batch {
            batch_id: new_batch_id,
        };
        enrollment.slot = new_batch.slot.clone();
        enrollment.end_date = enrollment_end_date(
            enrollment.start_date,
            enrollment.tier,
            self.operating_days(&enrollment.business_id),
            Some(new_batch.end_date),
        );
        enrollment.switch_used = true;

        let batches = vec![old_batch, new_batch];
        self.log
            .append(&Event::EnrollmentSaved {
                enrollment: enrollment.clone(),
                batches: batches.clone(),
            })
            .await?;
        for batch in batches {
            let batch_id = batch.id;
            *locked_batch(&mut guards, batch_id)? = batch;
        }
        self.store.upsert_enrollment(enrollment.clone());
        info!("switched enrollment {id} from batch {old_batch_id} to {new_batch_id}");
        Ok(enrollment)
    }

    pub async fn set_auto_renew(&self, id: Ulid, auto_renew: bool) -> Result<Enrollment, EngineError> {
        let _gate = self.log_gate.read().await;
        let student_id = self.resolve_enrollment(&id)?.student_id;
        let student_lock = self.student_lock(student_id);
        let _student = student_lock.lock().await;

        let mut enrollment = self.resolve_enrollment(&id)?;
        if enrollment.status == EnrollmentStatus::Cancelled {
            return Err(EngineError::Validation(format!("enrollment {id} is cancelled")));
        }
        if enrollment.auto_renew == auto_renew {
            return Ok(enrollment);
        }
        enrollment.auto_renew = auto_renew;
        self.log
            .append(&Event::EnrollmentSaved {
                enrollment: enrollment.clone(),
                batches: Vec::new(),
            })
            .await?;
        self.store.upsert_enrollment(enrollment.clone());
        Ok(enrollment)
    }
}
