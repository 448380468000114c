use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// Money in minor currency units.
pub type Amount = u64;

pub const MS_PER_SECOND: Ms = 1_000;
pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_DAY: Ms = 86_400_000;

pub fn date_of(ms: Ms) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

// ── Weekdays ─────────────────────────────────────────────────────

const ORDERED_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Set of weekdays packed into a bitmask, bit 0 = Monday.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);
    pub const ALL: WeekdaySet = WeekdaySet(0b0111_1111);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b0111_1111)
    }

    pub fn from_days(days: &[Weekday]) -> Self {
        days.iter().fold(Self::EMPTY, |set, d| set.with(*d))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn with(self, day: Weekday) -> Self {
        Self(self.0 | (1 << day.num_days_from_monday()))
    }

    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn intersection(self, other: WeekdaySet) -> WeekdaySet {
        Self(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Days in Monday-first order.
    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        ORDERED_DAYS.into_iter().filter(move |d| self.contains(*d))
    }
}

impl std::fmt::Debug for WeekdaySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl std::fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let days: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", days.join("/"))
    }
}

// ── Time of day ──────────────────────────────────────────────────

/// Half-open time-of-day range `[start, end)` in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinuteRange {
    pub start: u16,
    pub end: u16,
}

impl MinuteRange {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start < end, "MinuteRange start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &MinuteRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for MinuteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

/// A recurring weekly slot: pattern code plus time-of-day range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub pattern: String,
    pub range: MinuteRange,
}

impl Slot {
    pub fn new(pattern: impl Into<String>, range: MinuteRange) -> Self {
        Self {
            pattern: pattern.into(),
            range,
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: Ulid,
    pub name: String,
    /// Days the business is open; pass durations count only these days.
    pub operating_days: WeekdaySet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
}

/// A recurring, capacity-bounded class taught by one teacher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Ulid,
    pub business_id: Ulid,
    pub name: String,
    pub teacher: String,
    pub slot: Slot,
    pub capacity: u32,
    pub enrolled_count: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Terminal once set.
    pub cancelled: bool,
}

impl Batch {
    pub fn status(&self, today: NaiveDate) -> BatchStatus {
        if self.cancelled {
            BatchStatus::Cancelled
        } else if today < self.start_date {
            BatchStatus::Scheduled
        } else if today <= self.end_date {
            BatchStatus::Active
        } else {
            BatchStatus::Completed
        }
    }

    /// Scheduled or active: still occupies the teacher and accepts students.
    pub fn is_live(&self, today: NaiveDate) -> bool {
        matches!(
            self.status(today),
            BatchStatus::Scheduled | BatchStatus::Active
        )
    }

    pub fn is_full(&self) -> bool {
        self.enrolled_count >= self.capacity
    }
}

/// Input for `create_or_edit_batch`. `id: None` creates a new batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSpec {
    #[serde(default)]
    pub id: Option<Ulid>,
    pub business_id: Ulid,
    pub name: String,
    pub teacher: String,
    pub pattern: String,
    pub start_time: String,
    pub end_time: String,
    pub capacity: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

// ── Enrollments ──────────────────────────────────────────────────

/// What a booking binds the student to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingTarget {
    /// A seat in a class batch.
    Batch { batch_id: Ulid },
    /// A non-class pass for a business time segment (gym, library).
    Pass { business_id: Ulid },
}

impl BookingTarget {
    pub fn batch_id(&self) -> Option<Ulid> {
        match self {
            BookingTarget::Batch { batch_id } => Some(*batch_id),
            BookingTarget::Pass { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTier {
    Daily,
    Weekly,
    Monthly,
}

impl PassTier {
    /// Length of the pass in business operating days.
    pub fn duration_days(self) -> u32 {
        match self {
            PassTier::Daily => 1,
            PassTier::Weekly => 7,
            PassTier::Monthly => 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Ulid,
    pub student_id: Ulid,
    pub business_id: Ulid,
    pub target: BookingTarget,
    pub slot: Slot,
    pub tier: PassTier,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Only `Active` or `Cancelled` are stored; `Expired` is derived by date.
    pub status: EnrollmentStatus,
    pub switch_used: bool,
    pub auto_renew: bool,
    pub transaction_id: Ulid,
}

impl Enrollment {
    pub fn effective_status(&self, today: NaiveDate, grace_period_days: u32) -> EnrollmentStatus {
        match self.status {
            EnrollmentStatus::Active
                if today > self.end_date + chrono::Days::new(grace_period_days as u64) =>
            {
                EnrollmentStatus::Expired
            }
            status => status,
        }
    }

    pub fn is_active(&self, today: NaiveDate, grace_period_days: u32) -> bool {
        self.effective_status(today, grace_period_days) == EnrollmentStatus::Active
    }
}

// ── Reservations ─────────────────────────────────────────────────

/// What the caller asks to book. Batch targets take their slot from the
/// batch; pass targets must supply one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub target: BookingTarget,
    #[serde(default)]
    pub slot: Option<Slot>,
    pub tier: PassTier,
    pub start_date: NaiveDate,
    pub price: Amount,
    #[serde(default)]
    pub auto_renew: bool,
}

/// A selection held in a reservation, not yet paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    pub id: Ulid,
    pub target: BookingTarget,
    pub slot: Slot,
    pub tier: PassTier,
    pub start_date: NaiveDate,
    pub price: Amount,
    pub auto_renew: bool,
}

/// A student's provisional selections. One expiry covers every item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub student_id: Ulid,
    pub items: Vec<ReservationItem>,
    pub expires_at: Option<Ms>,
}

impl Reservation {
    pub fn new(student_id: Ulid) -> Self {
        Self {
            student_id,
            items: Vec::new(),
            expires_at: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Void once the shared timer reaches zero.
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Whole seconds left, rounded up so that 0 means expired.
    pub fn remaining_seconds(&self, now: Ms) -> u64 {
        match self.expires_at {
            Some(at) if at > now => ((at - now + MS_PER_SECOND - 1) / MS_PER_SECOND) as u64,
            _ => 0,
        }
    }

    /// The item already holding this booking: the same batch, or a pass at
    /// the same business for the same slot and start date.
    pub fn find_duplicate(
        &self,
        target: &BookingTarget,
        slot: &Slot,
        start_date: NaiveDate,
    ) -> Option<Ulid> {
        self.items
            .iter()
            .find(|i| {
                i.target == *target
                    && match target {
                        BookingTarget::Batch { .. } => true,
                        BookingTarget::Pass { .. } => i.slot == *slot && i.start_date == start_date,
                    }
            })
            .map(|i| i.id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.expires_at = None;
    }

    pub fn total(&self) -> Amount {
        self.items.iter().map(|i| i.price).sum()
    }
}

// ── Conflict results ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Identical start and end on a shared day.
    ExactDuplicate,
    PartialOverlap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum OffendingEntity {
    Enrollment(Ulid),
    ReservationItem(Ulid),
    Batch(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConflict {
    pub overlap_days: WeekdaySet,
    pub overlap_minutes: u16,
    pub kind: ConflictKind,
    pub offending: OffendingEntity,
}

impl ScheduleConflict {
    pub fn reason(&self) -> String {
        match self.kind {
            ConflictKind::ExactDuplicate => format!("exact duplicate slot on {}", self.overlap_days),
            ConflictKind::PartialOverlap => format!(
                "partial overlap of {} minutes on {}",
                self.overlap_minutes, self.overlap_days
            ),
        }
    }
}

/// Outcome of a read-only compatibility check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConflictResult {
    Compatible,
    ScheduleConflict(ScheduleConflict),
    CapacityFull { batch_id: Ulid, capacity: u32 },
    AlreadyReserved { item_id: Ulid },
}

impl ConflictResult {
    pub fn has_conflict(&self) -> bool {
        !matches!(self, ConflictResult::Compatible)
    }
}

// ── Transactions ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub item_id: Ulid,
    pub enrollment_id: Ulid,
    pub target: BookingTarget,
    pub price: Amount,
}

/// Immutable record of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Ulid,
    pub student_id: Ulid,
    pub contact: Contact,
    pub lines: Vec<TransactionLine>,
    pub total: Amount,
    pub created_at: Ms,
}

impl Transaction {
    pub fn enrollment_ids(&self) -> Vec<Ulid> {
        self.lines.iter().map(|l| l.enrollment_id).collect()
    }
}

/// WAL record format. Every event carries full post-state snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BusinessRegistered {
        business: Business,
    },
    BatchSaved {
        batch: Batch,
    },
    CheckoutCommitted {
        transaction: Transaction,
        enrollments: Vec<Enrollment>,
        batches: Vec<Batch>,
    },
    EnrollmentSaved {
        enrollment: Enrollment,
        batches: Vec<Batch>,
    },
}
