use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDate;

use crate::model::{date_of, Ms};

use super::conflict::now_ms;

/// Source of "now" for timers and date-based policies.
pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;

    fn today(&self) -> NaiveDate {
        date_of(self.now())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        now_ms()
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn at_date(date: NaiveDate) -> Self {
        let ms = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or(0);
        Self::new(ms)
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}
