use std::io;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::wal::Wal;

use super::EngineError;

/// Durable, append-only record of engine events. The engine applies a change
/// to memory only after `append` returns `Ok`.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: &Event) -> Result<(), EngineError>;

    /// Replace the log with `events`, the minimal set recreating current state.
    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError>;

    async fn appends_since_compact(&self) -> u64;
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// `EventLog` backed by a WAL file owned by a background writer task.
pub struct WalLog {
    tx: mpsc::Sender<WalCommand>,
}

impl WalLog {
    /// Must be called from within a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))
    }
}

#[async_trait]
impl EventLog for WalLog {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.request(cmd, rx)
            .await?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}

/// Writer task owning the WAL file. Appends queued while a flush runs are
/// committed together under one fsync; every sender in the group gets the
/// group's result. A compaction request ends the current group.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} event(s): {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the
    // next batch; callers of this batch are told it failed.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── In-memory log ────────────────────────────────────────

/// `EventLog` keeping events in memory. For embedding without durability,
/// tests and benchmarks.
#[derive(Default)]
pub struct MemoryLog {
    events: std::sync::Mutex<Vec<Event>>,
    appends_since_compact: std::sync::atomic::AtomicU64,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventLog for MemoryLog {
    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        self.appends_since_compact
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = events;
        self.appends_since_compact
            .store(0, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
            .load(std::sync::atomic::Ordering::Relaxed)
    }
}
