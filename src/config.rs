//! Environment-driven configuration.
//!
//! `EngineConfig` is the admin-facing knob set shared with the rest of the
//! marketplace; `ServerConfig` only concerns the standalone binary.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::limits::MAX_RESERVATION_WINDOW_MS;
use crate::model::{Amount, Ms, MS_PER_MINUTE};

/// Commission and subscription figures for one business tier. Carried for the
/// admin surface; the engine itself never reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFigures {
    pub commission_percent: u32,
    pub subscription_fee: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Shared lifetime of a reservation, measured from its first item.
    pub reservation_window_minutes: u32,
    /// How far ahead a booking's start date may be.
    pub advance_booking_days: u32,
    /// Days past `end_date` an enrollment still counts as active.
    pub grace_period_days: u32,
    #[serde(default)]
    pub tier_figures: BTreeMap<String, TierFigures>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let tier_figures = BTreeMap::from([
            (
                "basic".to_string(),
                TierFigures {
                    commission_percent: 10,
                    subscription_fee: 0,
                },
            ),
            (
                "premium".to_string(),
                TierFigures {
                    commission_percent: 5,
                    subscription_fee: 99_900,
                },
            ),
        ]);
        Self {
            reservation_window_minutes: 15,
            advance_booking_days: 30,
            grace_period_days: 3,
            tier_figures,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        let defaults = Self::default();
        let tier_figures = match std::env::var("SLOTCHECK_TIER_FIGURES") {
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                EngineError::Validation(format!("SLOTCHECK_TIER_FIGURES: {e}"))
            })?,
            Err(_) => defaults.tier_figures,
        };
        let config = Self {
            reservation_window_minutes: env_or(
                "SLOTCHECK_RESERVATION_WINDOW_MINUTES",
                defaults.reservation_window_minutes,
            ),
            advance_booking_days: env_or(
                "SLOTCHECK_ADVANCE_BOOKING_DAYS",
                defaults.advance_booking_days,
            ),
            grace_period_days: env_or("SLOTCHECK_GRACE_PERIOD_DAYS", defaults.grace_period_days),
            tier_figures,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.reservation_window_minutes == 0 {
            return Err(EngineError::Validation(
                "reservation window must be at least one minute".into(),
            ));
        }
        if self.reservation_window_ms() > MAX_RESERVATION_WINDOW_MS {
            return Err(EngineError::LimitExceeded("reservation window too long"));
        }
        Ok(())
    }

    pub fn reservation_window_ms(&self) -> Ms {
        self.reservation_window_minutes as Ms * MS_PER_MINUTE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind: env_or("SLOTCHECK_BIND", "0.0.0.0".to_string()),
            port: env_or("SLOTCHECK_PORT", 7433),
            data_dir: PathBuf::from(env_or("SLOTCHECK_DATA_DIR", "./data".to_string())),
            max_connections: env_or("SLOTCHECK_MAX_CONNECTIONS", 256),
            compact_threshold: env_or("SLOTCHECK_COMPACT_THRESHOLD", 1000),
            metrics_port: std::env::var("SLOTCHECK_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotcheck.wal")
    }
}
