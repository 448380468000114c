//! Schedule-pattern codes and `HH:MM` parsing.
//!
//! Every caller resolves patterns through this table so that overlap checks
//! agree everywhere. Unknown codes resolve to the empty set and therefore
//! never overlap anything.

use chrono::Weekday::{self, *};

use crate::engine::EngineError;
use crate::model::{MinuteRange, Slot, WeekdaySet};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Pattern code (normalized: lowercase, no whitespace) → weekdays.
static PATTERNS: &[(&str, &[Weekday])] = &[
    ("mon/wed/fri", &[Mon, Wed, Fri]),
    ("tue/thu/sat", &[Tue, Thu, Sat]),
    ("mon/wed", &[Mon, Wed]),
    ("tue/thu", &[Tue, Thu]),
    ("mon-fri", &[Mon, Tue, Wed, Thu, Fri]),
    ("weekdays", &[Mon, Tue, Wed, Thu, Fri]),
    ("mon-sat", &[Mon, Tue, Wed, Thu, Fri, Sat]),
    ("sat/sun", &[Sat, Sun]),
    ("weekends", &[Sat, Sun]),
    ("daily", &[Mon, Tue, Wed, Thu, Fri, Sat, Sun]),
    ("mon", &[Mon]),
    ("tue", &[Tue]),
    ("wed", &[Wed]),
    ("thu", &[Thu]),
    ("fri", &[Fri]),
    ("sat", &[Sat]),
    ("sun", &[Sun]),
];

fn normalize(pattern: &str) -> String {
    pattern
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn weekdays_of(pattern: &str) -> WeekdaySet {
    let key = normalize(pattern);
    PATTERNS
        .iter()
        .find(|(code, _)| *code == key)
        .map(|(_, days)| WeekdaySet::from_days(days))
        .unwrap_or(WeekdaySet::EMPTY)
}

pub fn is_known_pattern(pattern: &str) -> bool {
    !weekdays_of(pattern).is_empty()
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted as end of day.
pub fn to_minutes(time: &str) -> Result<u16, EngineError> {
    let invalid = || EngineError::Validation(format!("malformed time {time:?}, expected HH:MM"));
    let (h, m) = time.trim().split_once(':').ok_or_else(invalid)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(invalid());
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: u16 = h.parse().map_err(|_| invalid())?;
    let minutes: u16 = m.parse().map_err(|_| invalid())?;
    if minutes > 59 || hours > 24 || (hours == 24 && minutes != 0) {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

pub fn parse_range(start: &str, end: &str) -> Result<MinuteRange, EngineError> {
    let s = to_minutes(start)?;
    let e = to_minutes(end)?;
    if s >= e || s >= MINUTES_PER_DAY {
        return Err(EngineError::Validation(format!(
            "start time {start} must be before end time {end}"
        )));
    }
    Ok(MinuteRange::new(s, e))
}

/// Validate a slot supplied by a caller. Ranges built by hand may be inverted.
pub fn validate_slot(slot: &Slot) -> Result<(), EngineError> {
    if slot.pattern.len() > crate::limits::MAX_PATTERN_LEN {
        return Err(EngineError::LimitExceeded("pattern too long"));
    }
    if slot.range.start >= slot.range.end || slot.range.end > MINUTES_PER_DAY {
        return Err(EngineError::Validation(format!(
            "invalid time range {}..{}",
            slot.range.start, slot.range.end
        )));
    }
    Ok(())
}
