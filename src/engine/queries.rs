use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub fn get_enrollment(&self, id: &Ulid) -> Option<Enrollment> {
        self.store.get_enrollment(id)
    }

    /// Every enrollment of a student in creation order, including cancelled
    /// and expired ones. Callers wanting live ones filter on
    /// `effective_status`.
    pub fn student_enrollments(&self, student_id: &Ulid) -> Vec<Enrollment> {
        self.store.student_enrollments(student_id)
    }

    /// Enrollments still active today, grace period included.
    pub fn active_enrollments(&self, student_id: &Ulid) -> Vec<Enrollment> {
        let today = self.clock.today();
        self.store
            .student_enrollments(student_id)
            .into_iter()
            .filter(|e| e.is_active(today, self.config.grace_period_days))
            .collect()
    }

    pub fn enrollment_status(&self, enrollment: &Enrollment) -> EnrollmentStatus {
        enrollment.effective_status(self.clock.today(), self.config.grace_period_days)
    }

    pub fn get_transaction(&self, id: &Ulid) -> Option<Transaction> {
        self.store.get_transaction(id)
    }

    pub fn student_transactions(&self, student_id: &Ulid) -> Vec<Transaction> {
        self.store.student_transactions(student_id)
    }

    pub async fn batch_status(&self, id: &Ulid) -> Option<BatchStatus> {
        let batch = self.get_batch(id).await?;
        Some(batch.status(self.clock.today()))
    }
}
