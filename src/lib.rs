pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pattern;
pub mod reaper;
pub mod service;
pub mod wal;
