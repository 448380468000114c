use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that periodically voids expired reservations.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let voided = engine.sweep_expired_reservations();
        if voided > 0 {
            info!("reaped {voided} expired reservation(s)");
        }
    }
}

/// Background task that compacts the event log once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.log_appends_since_compact().await;
        if appends < threshold {
            debug!("compactor: {appends} append(s) since last compaction");
            continue;
        }
        if let Err(e) = engine.compact_log().await {
            warn!("log compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{Clock, ManualClock, MemoryLog};
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[tokio::test]
    async fn reaper_voids_expired_reservations() {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()));
        let engine = Arc::new(Engine::new(
            Arc::new(MemoryLog::new()),
            EngineConfig::default(),
            clock.clone(),
        ));
        let biz = Ulid::new();
        engine
            .register_business(biz, "Gym".into(), WeekdaySet::ALL)
            .await
            .unwrap();
        let student = Ulid::new();
        engine
            .add_to_reservation(
                student,
                Candidate {
                    target: BookingTarget::Pass { business_id: biz },
                    slot: Some(Slot::new("daily", MinuteRange::new(360, 420))),
                    tier: PassTier::Daily,
                    start_date: clock.today(),
                    price: 300,
                    auto_renew: false,
                },
            )
            .await
            .unwrap();

        clock.advance(16 * MS_PER_MINUTE);
        let reaper = tokio::spawn(run_reaper(engine.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        reaper.abort();

        let lock = engine.reservations.get(&student).map(|e| e.value().clone()).unwrap();
        assert!(lock.lock().await.items.is_empty());
    }

    #[tokio::test]
    async fn compactor_waits_for_threshold() {
        let log = Arc::new(MemoryLog::new());
        let engine = Arc::new(Engine::new(
            log.clone(),
            EngineConfig::default(),
            Arc::new(ManualClock::new(0)),
        ));
        for i in 0..3 {
            engine
                .register_business(Ulid::new(), format!("Studio {i}"), WeekdaySet::ALL)
                .await
                .unwrap();
        }

        let compactor = tokio::spawn(run_compactor(engine.clone(), 3, Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        compactor.abort();

        assert_eq!(engine.log_appends_since_compact().await, 0);
        assert_eq!(log.events().len(), 3);
    }
}
