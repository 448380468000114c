use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pattern::{is_known_pattern, parse_range};

use super::conflict::check_teacher;
use super::{Engine, EngineError};

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// Shape checks on a batch spec, before any lock is taken.
fn validate_batch_spec(spec: &BatchSpec) -> Result<Slot, EngineError> {
    validate_name(&spec.name, "batch name")?;
    validate_name(&spec.teacher, "teacher")?;
    if spec.pattern.len() > MAX_PATTERN_LEN {
        return Err(EngineError::LimitExceeded("pattern too long"));
    }
    if !is_known_pattern(&spec.pattern) {
        return Err(EngineError::Validation(format!(
            "unknown schedule pattern {:?}",
            spec.pattern
        )));
    }
    let range = parse_range(&spec.start_time, &spec.end_time)?;
    if spec.capacity == 0 {
        return Err(EngineError::Validation("capacity must be at least 1".into()));
    }
    if spec.capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if spec.start_date > spec.end_date {
        return Err(EngineError::Validation(
            "batch start date is after its end date".into(),
        ));
    }
    if (spec.end_date - spec.start_date).num_days() > MAX_BATCH_DAYS {
        return Err(EngineError::LimitExceeded("batch runs too long"));
    }
    Ok(Slot::new(spec.pattern.trim(), range))
}

impl Engine {
    /// Register a business, or replace its name and operating days.
    pub async fn register_business(
        &self,
        id: Ulid,
        name: String,
        operating_days: WeekdaySet,
    ) -> Result<Business, EngineError> {
        let _gate = self.log_gate.read().await;
        validate_name(&name, "business name")?;
        if operating_days.is_empty() {
            return Err(EngineError::Validation(
                "business must operate on at least one day".into(),
            ));
        }
        if self.store.get_business(&id).is_none() && self.store.business_count() >= MAX_BUSINESSES {
            return Err(EngineError::LimitExceeded("too many businesses"));
        }
        let business = Business {
            id,
            name,
            operating_days,
        };
        let event = Event::BusinessRegistered {
            business: business.clone(),
        };
        self.log.append(&event).await?;
        self.store.insert_business(business.clone());
        Ok(business)
    }

    pub fn get_business(&self, id: &Ulid) -> Option<Business> {
        self.store.get_business(id)
    }

    /// Create (`spec.id == None`) or edit a batch. The teacher must not already
    /// teach a live batch overlapping the new slot.
    pub async fn create_or_edit_batch(&self, spec: BatchSpec) -> Result<Batch, EngineError> {
        let _gate = self.log_gate.read().await;
        let slot = validate_batch_spec(&spec)?;
        if self.store.get_business(&spec.business_id).is_none() {
            return Err(EngineError::NotFound(spec.business_id));
        }

        let teacher_lock = self.teacher_lock(&spec.teacher);
        let _teacher_guard = teacher_lock.lock().await;
        let today = self.clock.today();

        // Snapshot before locking the edited batch: readers of other batches
        // must never wait while we hold a batch write lock.
        let others = self.store.snapshot_batches(spec.id).await;
        if let Some(conflict) = check_teacher(&spec.teacher, &slot, &others, spec.id, today) {
            warn!(
                "teacher {:?} conflict for {} on {}: {}",
                spec.teacher,
                slot.range,
                slot.pattern,
                conflict.reason()
            );
            return Err(EngineError::TeacherConflict(conflict));
        }

        match spec.id {
            None => {
                if self.store.batch_count() >= MAX_BATCHES {
                    return Err(EngineError::LimitExceeded("too many batches"));
                }
                let batch = Batch {
                    id: Ulid::new(),
                    business_id: spec.business_id,
                    name: spec.name,
                    teacher: spec.teacher.trim().to_string(),
                    slot,
                    capacity: spec.capacity,
                    enrolled_count: 0,
                    start_date: spec.start_date,
                    end_date: spec.end_date,
                    cancelled: false,
                };
                self.log
                    .append(&Event::BatchSaved {
                        batch: batch.clone(),
                    })
                    .await?;
                self.store.insert_batch(batch.clone());
                info!("created batch {} ({}) for {}", batch.id, batch.name, batch.teacher);
                Ok(batch)
            }
            Some(id) => {
                let shared = self.resolve_batch(&id)?;
                let mut guard = shared.write().await;
                if guard.cancelled {
                    return Err(EngineError::Validation(format!(
                        "batch {id} was cancelled and cannot be edited"
                    )));
                }
                if guard.business_id != spec.business_id {
                    return Err(EngineError::Validation(format!(
                        "batch {id} belongs to another business"
                    )));
                }
                if spec.capacity < guard.enrolled_count {
                    return Err(EngineError::Validation(format!(
                        "capacity {} is below the {} students already enrolled",
                        spec.capacity, guard.enrolled_count
                    )));
                }
                let batch = Batch {
                    id,
                    business_id: spec.business_id,
                    name: spec.name,
                    teacher: spec.teacher.trim().to_string(),
                    slot,
                    capacity: spec.capacity,
                    enrolled_count: guard.enrolled_count,
                    start_date: spec.start_date,
                    end_date: spec.end_date,
                    cancelled: false,
                };
                self.log
                    .append(&Event::BatchSaved {
                        batch: batch.clone(),
                    })
                    .await?;
                *guard = batch.clone();
                info!("edited batch {id} ({})", batch.name);
                Ok(batch)
            }
        }
    }

    /// Cancel a batch. Terminal; cancelling twice is a no-op.
    pub async fn cancel_batch(&self, id: Ulid) -> Result<Batch, EngineError> {
        let _gate = self.log_gate.read().await;
        let shared = self.resolve_batch(&id)?;
        let mut guard = shared.write().await;
        if guard.cancelled {
            return Ok(guard.clone());
        }
        let mut batch = guard.clone();
        batch.cancelled = true;
        self.log
            .append(&Event::BatchSaved {
                batch: batch.clone(),
            })
            .await?;
        *guard = batch.clone();
        info!("cancelled batch {id} with {} enrolled", batch.enrolled_count);
        Ok(batch)
    }

    pub async fn get_batch(&self, id: &Ulid) -> Option<Batch> {
        let shared = self.store.get_batch(id)?;
        let batch = shared.read().await.clone();
        Some(batch)
    }

    /// Batches of one business, or all batches, ordered by id.
    pub async fn list_batches(&self, business_id: Option<Ulid>) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self
            .store
            .snapshot_batches(None)
            .await
            .into_iter()
            .filter(|b| business_id.is_none_or(|id| b.business_id == id))
            .collect();
        batches.sort_by_key(|b| b.id);
        batches
    }
}
