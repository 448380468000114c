use crate::model::*;
use crate::pattern::weekdays_of;

/// Intersection of two weekly slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub days: WeekdaySet,
    pub minutes: u16,
    pub kind: ConflictKind,
}

impl Overlap {
    pub fn into_conflict(self, offending: OffendingEntity) -> ScheduleConflict {
        ScheduleConflict {
            overlap_days: self.days,
            overlap_minutes: self.minutes,
            kind: self.kind,
            offending,
        }
    }
}

/// Two slots collide when they share a weekday and their half-open minute
/// ranges intersect. Touching ranges (10:00 end, 10:00 start) do not.
pub fn overlaps(a: &Slot, b: &Slot) -> Option<Overlap> {
    let days = weekdays_of(&a.pattern).intersection(weekdays_of(&b.pattern));
    if days.is_empty() || !a.range.overlaps(&b.range) {
        return None;
    }
    let minutes = a.range.end.min(b.range.end) - a.range.start.max(b.range.start);
    let kind = if a.range == b.range {
        ConflictKind::ExactDuplicate
    } else {
        ConflictKind::PartialOverlap
    };
    Some(Overlap {
        days,
        minutes,
        kind,
    })
}
