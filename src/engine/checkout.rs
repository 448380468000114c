use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, error, info};
use ulid::Ulid;

use crate::limits::MAX_CONTACT_FIELD_LEN;
use crate::model::*;
use crate::observability::{CHECKOUTS_TOTAL, CHECKOUT_ROLLBACKS_TOTAL, ENROLLMENTS_CREATED_TOTAL};

use super::conflict::{check_against_enrollments, check_bookable, check_reservation_pairs};
use super::policy::enrollment_end_date;
use super::reservation::reject_if_expired;
use super::{locked_batch, Engine, EngineError};

fn validate_contact(contact: &Contact) -> Result<(), EngineError> {
    if contact.name.trim().is_empty() {
        return Err(EngineError::Validation("contact name is required".into()));
    }
    if contact.phone.trim().is_empty() {
        return Err(EngineError::Validation("contact phone is required".into()));
    }
    let email_len = contact.email.as_ref().map_or(0, String::len);
    if contact.name.len().max(contact.phone.len()).max(email_len) > MAX_CONTACT_FIELD_LEN {
        return Err(EngineError::LimitExceeded("contact field too long"));
    }
    if let Some(email) = &contact.email
        && !email.contains('@')
    {
        return Err(EngineError::Validation(format!("{email:?} is not an email address")));
    }
    Ok(())
}

impl Engine {
    /// Convert the student's reservation into enrollments and one transaction.
    ///
    /// Everything added earlier is re-validated under the batch write locks;
    /// either every item commits or none does.
    pub async fn checkout(
        &self,
        student_id: Ulid,
        contact: Contact,
    ) -> Result<Transaction, EngineError> {
        let _gate = self.log_gate.read().await;
        validate_contact(&contact)?;
        let started = Instant::now();

        let student_lock = self.student_lock(student_id);
        let mut reservation = student_lock.lock().await;
        reject_if_expired(&mut reservation, self.clock.now())?;
        if reservation.is_empty() {
            return Err(EngineError::EmptyReservation);
        }

        let batch_ids: Vec<Ulid> = reservation
            .items
            .iter()
            .filter_map(|i| i.target.batch_id())
            .collect();
        let mut guards = self.lock_batches(batch_ids).await?;

        // The timer may have run out while we waited on the batch locks.
        let now = self.clock.now();
        reject_if_expired(&mut reservation, now)?;
        let today = self.clock.today();

        if let Some(c) = check_reservation_pairs(&reservation.items) {
            return Err(EngineError::ScheduleConflict(c));
        }
        let enrollments = self.store.student_enrollments(&student_id);
        let mut wanted: HashMap<Ulid, u32> = HashMap::new();
        for item in &reservation.items {
            if let Some(c) = check_against_enrollments(
                &item.slot,
                &enrollments,
                today,
                self.config.grace_period_days,
            ) {
                debug!("checkout of student {student_id} hit {}", c.reason());
                return Err(EngineError::ScheduleConflict(c));
            }
            match item.target {
                BookingTarget::Batch { batch_id } => {
                    let batch = locked_batch(&mut guards, batch_id)?;
                    check_bookable(batch, today)?;
                    let n = wanted.entry(batch_id).or_default();
                    *n += 1;
                    if batch.enrolled_count + *n > batch.capacity {
                        return Err(EngineError::CapacityFull {
                            batch_id,
                            capacity: batch.capacity,
                        });
                    }
                }
                BookingTarget::Pass { business_id } => {
                    if self.store.get_business(&business_id).is_none() {
                        return Err(EngineError::NotFound(business_id));
                    }
                }
            }
        }

        // Stage: nothing below touches shared state until the log accepts it.
        let transaction_id = Ulid::new();
        let mut staged = Vec::with_capacity(reservation.items.len());
        let mut lines = Vec::with_capacity(reservation.items.len());
        for item in &reservation.items {
            let (business_id, batch_end) = match item.target {
                BookingTarget::Batch { batch_id } => {
                    let batch = locked_batch(&mut guards, batch_id)?;
                    (batch.business_id, Some(batch.end_date))
                }
                BookingTarget::Pass { business_id } => (business_id, None),
            };
            let enrollment = Enrollment {
                id: Ulid::new(),
                student_id,
                business_id,
                target: item.target,
                slot: item.slot.clone(),
                tier: item.tier,
                start_date: item.start_date,
                end_date: enrollment_end_date(
                    item.start_date,
                    item.tier,
                    self.operating_days(&business_id),
                    batch_end,
                ),
                status: EnrollmentStatus::Active,
                switch_used: false,
                auto_renew: item.auto_renew,
                transaction_id,
            };
            lines.push(TransactionLine {
                item_id: item.id,
                enrollment_id: enrollment.id,
                target: item.target,
                price: item.price,
            });
            staged.push(enrollment);
        }
        let transaction = Transaction {
            id: transaction_id,
            student_id,
            contact,
            lines,
            total: reservation.total(),
            created_at: now,
        };

        for (batch_id, n) in &wanted {
            locked_batch(&mut guards, *batch_id)?.enrolled_count += n;
        }
        let batches: Vec<Batch> = guards.iter().map(|(_, g)| (**g).clone()).collect();

        let event = Event::CheckoutCommitted {
            transaction: transaction.clone(),
            enrollments: staged.clone(),
            batches,
        };
        if let Err(e) = self.log.append(&event).await {
            for (batch_id, n) in &wanted {
                let batch = locked_batch(&mut guards, *batch_id)?;
                batch.enrolled_count = batch.enrolled_count.saturating_sub(*n);
            }
            error!("checkout of student {student_id} rolled back: {e}");
            metrics::counter!(CHECKOUT_ROLLBACKS_TOTAL).increment(1);
            return Err(e);
        }
        drop(guards);

        for enrollment in staged {
            self.store.upsert_enrollment(enrollment);
        }
        self.store.insert_transaction(transaction.clone());
        reservation.clear();

        metrics::counter!(CHECKOUTS_TOTAL).increment(1);
        metrics::counter!(ENROLLMENTS_CREATED_TOTAL).increment(transaction.lines.len() as u64);
        info!(
            "checkout {} for student {student_id}: {} item(s), total {} in {:?}",
            transaction.id,
            transaction.lines.len(),
            transaction.total,
            started.elapsed()
        );
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact {
            name: "Asha".into(),
            phone: "+91 90000 00000".into(),
            email: Some("asha@example.com".into()),
        }
    }

    #[test]
    fn contact_needs_name_and_phone() {
        assert!(validate_contact(&contact()).is_ok());
        let mut c = contact();
        c.phone = "  ".into();
        assert!(matches!(validate_contact(&c), Err(EngineError::Validation(_))));
    }

    #[test]
    fn contact_email_is_checked_when_given() {
        let mut c = contact();
        c.email = Some("not-an-address".into());
        assert!(matches!(validate_contact(&c), Err(EngineError::Validation(_))));
        c.email = None;
        assert!(validate_contact(&c).is_ok());
    }

    #[test]
    fn contact_fields_are_bounded() {
        let mut c = contact();
        c.name = "x".repeat(MAX_CONTACT_FIELD_LEN + 1);
        assert!(matches!(validate_contact(&c), Err(EngineError::LimitExceeded(_))));
    }
}
