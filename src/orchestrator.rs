//! Owns every component's lifecycle and wires the pipeline together:
//! watcher -> parse -> write -> {record metrics, broadcast}.

use crate::monitor::PerformanceMonitor;
use crate::parser::JsonlParser;
use crate::persistence::{PersistenceWriter, RetryPolicy, WriterError};
use crate::transcript::{FileEvent, FileEventKind};
use crate::watcher::{ComponentStatus, FileWatcher, WatcherError};
use crate::ws::Broadcaster;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Errors that can prevent the pipeline from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Watcher(#[from] WatcherError),
    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// Errors returned by [`Orchestrator::stop`].
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("pipeline task did not settle within the {0}ms grace period")]
    GracePeriodExceeded(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub filesystem: HealthStatus,
    pub observer: HealthStatus,
    pub database: HealthStatus,
    pub overall: HealthStatus,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OrchestratorStats {
    pub files_processed: u64,
    pub conversations_created: u64,
    pub processing_errors: u64,
}

pub struct Orchestrator {
    watcher: FileWatcher,
    parser: Mutex<JsonlParser>,
    writer: Arc<PersistenceWriter>,
    monitor: Mutex<PerformanceMonitor>,
    broadcaster: Broadcaster,
    watch_root: PathBuf,
    stats: Mutex<OrchestratorStats>,
    database_ok: AtomicBool,
    grace_period_ms: u64,
    stopped: AtomicBool,
}

impl Orchestrator {
    /// Starts every component and spawns the event loop that drives the
    /// pipeline. `grace_period_ms` bounds how long [`Orchestrator::stop`]
    /// waits for that loop to settle during shutdown.
    pub async fn start(
        watch_root: PathBuf,
        database_path: &Path,
        retry: RetryPolicy,
        sla_threshold_ms: f64,
        ring_buffer_size: usize,
        grace_period_ms: u64,
        broadcaster: Broadcaster,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), StartupError> {
        let (watcher, mut events) = FileWatcher::start(watch_root.clone()).await?;
        let writer = Arc::new(PersistenceWriter::open(database_path, retry)?);

        let orchestrator = Arc::new(Self {
            watcher,
            parser: Mutex::new(JsonlParser::new()),
            writer,
            monitor: Mutex::new(PerformanceMonitor::new(ring_buffer_size, sla_threshold_ms)),
            broadcaster,
            watch_root,
            stats: Mutex::new(OrchestratorStats::default()),
            database_ok: AtomicBool::new(true),
            grace_period_ms,
            stopped: AtomicBool::new(false),
        });

        let loop_handle = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    orchestrator.handle_file_event(event).await;
                }
            })
        };

        Ok((orchestrator, loop_handle))
    }

    /// Stops the pipeline's event loop, waiting up to `grace_period_ms` for
    /// in-flight work to settle before aborting. Idempotent: a second call
    /// returns immediately without touching `handle` again.
    pub async fn stop(&self, mut handle: tokio::task::JoinHandle<()>) -> Result<(), ShutdownError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match tokio::time::timeout(Duration::from_millis(self.grace_period_ms), &mut handle).await
        {
            Ok(_) => Ok(()),
            Err(_) => {
                handle.abort();
                warn!(
                    grace_period_ms = self.grace_period_ms,
                    "pipeline did not settle in time, aborting"
                );
                Err(ShutdownError::GracePeriodExceeded(self.grace_period_ms))
            }
        }
    }

    #[instrument(skip(self, event), fields(path = %event.path().display()))]
    async fn handle_file_event(&self, event: FileEvent) {
        if !matches!(event.kind(), FileEventKind::Created | FileEventKind::Modified) {
            return;
        }
        if event.path().extension().and_then(|e| e.to_str()) != Some("jsonl") {
            return;
        }

        let processing_start = Instant::now();
        let project_id = project_id_for(&self.watch_root, event.path());

        let parsed = {
            let mut parser = self.parser.lock().await;
            parser.parse_conversation_file(event.path(), &project_id)
        };

        let convo = match parsed {
            Ok(convo) => convo,
            Err(err) => {
                warn!(%err, "failed to parse transcript file");
                self.stats.lock().await.processing_errors += 1;
                return;
            }
        };

        match self.writer.write_conversation(&convo).await {
            Ok(_) => {
                self.database_ok.store(true, std::sync::atomic::Ordering::Relaxed);
            }
            Err(err) => {
                error!(%err, "failed to write conversation");
                self.database_ok.store(false, std::sync::atomic::Ordering::Relaxed);
                self.stats.lock().await.processing_errors += 1;
                return;
            }
        }

        let detection_latency_ms = (chrono::Utc::now() - event.detected_at())
            .num_milliseconds()
            .max(0) as f64;
        let processing_latency_ms = processing_start.elapsed().as_secs_f64() * 1000.0;
        let throughput = if processing_latency_ms > 0.0 {
            convo.messages.len() as f64 / (processing_latency_ms / 1000.0)
        } else {
            convo.messages.len() as f64
        };

        self.monitor.lock().await.record(
            detection_latency_ms.max(0.1),
            processing_latency_ms.max(0.1),
            throughput,
        );

        {
            let mut stats = self.stats.lock().await;
            stats.files_processed += 1;
            stats.conversations_created += 1;
        }

        let file_kind = match event.kind() {
            FileEventKind::Created => "file_created",
            FileEventKind::Modified => "file_modified",
            FileEventKind::Moved => "file_moved",
            FileEventKind::Deleted => "file_deleted",
        };
        self.broadcaster
            .broadcast_file_event(&event.path().display().to_string(), file_kind);
        self.broadcaster.broadcast_conversation_update(&convo);
        info!(
            project_id = %convo.project_id,
            session_id = %convo.session_id,
            messages = convo.messages.len(),
            "processed transcript file"
        );
    }

    pub async fn stats(&self) -> OrchestratorStats {
        *self.stats.lock().await
    }

    pub async fn performance_summary(&self) -> crate::monitor::PerformanceSummary {
        self.monitor.lock().await.summary()
    }

    pub fn health(&self) -> SystemHealth {
        let filesystem = match self.watcher.status() {
            ComponentStatus::Ok => HealthStatus::Ok,
            ComponentStatus::Degraded => HealthStatus::Degraded,
            ComponentStatus::Unavailable => HealthStatus::Unavailable,
        };
        let observer = filesystem;
        let database = if self.database_ok.load(std::sync::atomic::Ordering::Relaxed) {
            HealthStatus::Ok
        } else {
            HealthStatus::Unavailable
        };

        let overall = combine_health(&[filesystem, observer, database]);

        SystemHealth {
            filesystem,
            observer,
            database,
            overall,
            checked_at: chrono::Utc::now(),
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }
}

fn combine_health(statuses: &[HealthStatus]) -> HealthStatus {
    if statuses.iter().all(|s| *s == HealthStatus::Ok) {
        HealthStatus::Ok
    } else if statuses.iter().any(|s| *s == HealthStatus::Unavailable) {
        HealthStatus::Unavailable
    } else {
        HealthStatus::Degraded
    }
}

/// Derives a project id from the path segment immediately under the watch
/// root, matching the directory-per-project layout the watcher observes.
fn project_id_for(watch_root: &Path, file_path: &Path) -> String {
    file_path
        .strip_prefix(watch_root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string())
}
