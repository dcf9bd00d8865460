// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Journal Orchestrator
//!
//! Owns the live generation (one `.buf` and one `.ids` file) and rotates it
//! when the data file grows past the configured threshold.
//!
//! # Locking
//! The live generation sits behind a single `parking_lot::Mutex`:
//! - `write_data` / `write_id` only `try_lock`, and return
//!   [`JournalError::RotationInProgress`] when contended
//! - the periodic flush task also `try_lock`s and skips its tick when contended
//! - `rotate` takes the blocking `lock`, so rotation always completes
//!
//! The legacy replayer has its own mutex. Lock order is live, then legacy.
//!
//! # Durability
//! Writes are buffered. They reach the file on `flush()`, on the periodic
//! flush tick, on rotation, or on `close()`. A crash in between loses the
//! unflushed tail.

use crate::codec::{IdEncoder, RecordEncoder};
use crate::config::JournalConfig;
use crate::error::{JournalError, Result};
use crate::layout::{self, ScanPlan};
use crate::legacy::LegacyReplayer;
use crate::record::Record;
use crate::telemetry;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// The generation currently receiving writes.
struct Generation<R> {
    data_path: PathBuf,
    id_path: PathBuf,
    records: RecordEncoder<R>,
    ids: IdEncoder,
}

impl<R: Record> Generation<R> {
    fn create(plan: &ScanPlan, file_mode: u32) -> Result<Self> {
        let data = open_buffer_file(&plan.next_data_file, file_mode)?;
        let ids = open_buffer_file(&plan.next_id_file, file_mode)?;
        Ok(Self {
            data_path: plan.next_data_file.clone(),
            id_path: plan.next_id_file.clone(),
            records: RecordEncoder::new(data)?,
            ids: IdEncoder::new(ids)?,
        })
    }

    /// Flushes both encoders; the first error wins.
    fn flush(&mut self) -> Result<()> {
        let records = self.records.flush();
        let ids = self.ids.flush();
        records.and(ids)
    }

    fn close(self) -> Result<()> {
        let records = self.records.into_file().map(drop);
        let ids = self.ids.into_file().map(drop);
        records.and(ids)
    }
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn open_buffer_file(path: &Path, mode: u32) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).read(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    options
        .open(path)
        .map_err(|e| JournalError::fs("open", path, e))
}

struct Shared<R> {
    config: JournalConfig,
    live: Mutex<Option<Generation<R>>>,
    legacy: Mutex<Option<LegacyReplayer<R>>>,
    writes: AtomicU64,
    rotation_pending: AtomicBool,
    closed: AtomicBool,
    runtime: Handle,
}

impl<R: Record> Shared<R> {
    fn rotate(&self) -> Result<()> {
        let started = Instant::now();
        let mut live = self.live.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(JournalError::Closed);
        }

        if let Some(generation) = live.as_mut() {
            generation.flush()?;
        }

        // Holding the legacy slot across the scan keeps a concurrent drain
        // from deleting files the new replayer is about to be handed.
        let mut legacy = self.legacy.lock();
        let now = chrono::Local::now().naive_local();
        let plan = layout::scan_and_plan(&self.config.buffer_dir, now)?;
        let next = Generation::create(&plan, self.config.file_mode)?;

        *legacy = Some(LegacyReplayer::new(
            plan.old_data_files.clone(),
            plan.old_id_files.clone(),
        ));
        drop(legacy);

        let previous = live.replace(next);
        drop(live);

        if let Some(previous) = previous {
            let data_path = previous.data_path.clone();
            if let Err(e) = previous.close() {
                tracing::warn!(
                    file = %data_path.display(),
                    error = %e,
                    "failed to close superseded buffer files"
                );
            }
        }

        metrics::increment_counter!(telemetry::ROTATIONS);
        metrics::histogram!(telemetry::ROTATION_DURATION, started.elapsed().as_secs_f64());
        tracing::info!(
            data_file = %plan.next_data_file.display(),
            id_file = %plan.next_id_file.display(),
            legacy_data_files = plan.old_data_files.len(),
            legacy_id_files = plan.old_id_files.len(),
            "rotated buffer generation"
        );
        Ok(())
    }

    /// Flush tick: never waits for the lock.
    fn try_flush(&self) {
        let Some(mut live) = self.live.try_lock() else {
            tracing::trace!("buffer busy, skipping flush tick");
            return;
        };
        if let Some(generation) = live.as_mut() {
            if let Err(e) = generation.flush() {
                tracing::warn!(error = %e, "periodic flush failed");
            }
        }
    }
}

/// Starts a background rotation unless one is already queued.
fn schedule_rotation<R: Record>(shared: &Arc<Shared<R>>) {
    if shared
        .rotation_pending
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    let task = Arc::clone(shared);
    shared.runtime.spawn_blocking(move || {
        if let Err(e) = task.rotate() {
            tracing::error!(error = %e, "background rotation failed");
        }
        task.rotation_pending.store(false, Ordering::Release);
    });
}

struct FlushTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushTask {
    fn spawn<R: Record>(shared: Arc<Shared<R>>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = shared.config.flush_interval;
        let runtime = shared.runtime.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => shared.try_flush(),
                }
            }
            tracing::debug!("flush task stopped");
        });

        Self { cancel, handle }
    }
}

/// Crash-recoverable buffering journal.
///
/// Must be opened from within a tokio runtime; the runtime drives the
/// periodic flush and background rotations. The write methods themselves are
/// synchronous and may be called from any thread.
pub struct Journal<R: Record> {
    shared: Arc<Shared<R>>,
    flusher: Option<FlushTask>,
}

impl<R: Record> Journal<R> {
    /// Creates the buffer directory if needed, rotates into a fresh
    /// generation (turning every existing file into legacy) and starts the
    /// flush task.
    pub fn open(config: JournalConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| JournalError::Runtime(e.to_string()))?;
        layout::ensure_dir(&config.buffer_dir, config.dir_mode)?;
        telemetry::describe_metrics();

        let shared = Arc::new(Shared {
            config,
            live: Mutex::new(None),
            legacy: Mutex::new(None),
            writes: AtomicU64::new(0),
            rotation_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            runtime,
        });

        shared.rotate()?;
        let flusher = FlushTask::spawn(Arc::clone(&shared));

        tracing::info!(
            dir = %shared.config.buffer_dir.display(),
            rotate_size_bytes = shared.config.rotate_size_bytes,
            flush_interval_ms = shared.config.flush_interval.as_millis() as u64,
            "journal opened"
        );

        Ok(Self {
            shared,
            flusher: Some(flusher),
        })
    }

    /// Buffers a record in the live data file.
    ///
    /// Returns [`JournalError::RotationInProgress`] without writing when the
    /// buffer is busy, or when this write found the data file over the size
    /// threshold and kicked off a rotation. Callers retry.
    pub fn write_data(&self, record: &R) -> Result<()> {
        let Some(mut live) = self.shared.live.try_lock() else {
            metrics::increment_counter!(telemetry::WRITES_REJECTED);
            return Err(JournalError::RotationInProgress);
        };
        let generation = live.as_mut().ok_or(JournalError::Closed)?;

        let config = &self.shared.config;
        let writes = self.shared.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % config.size_check_every == 0 {
            let size = generation.records.bytes_written();
            if size > config.rotate_size_bytes {
                drop(live);
                tracing::debug!(
                    size,
                    threshold = config.rotate_size_bytes,
                    "data file over threshold, rotating"
                );
                schedule_rotation(&self.shared);
                metrics::increment_counter!(telemetry::WRITES_REJECTED);
                return Err(JournalError::RotationInProgress);
            }
        }

        generation.records.write(record)?;
        metrics::increment_counter!(telemetry::RECORDS_WRITTEN);
        Ok(())
    }

    /// Appends a commit marker for a delivered record.
    pub fn write_id(&self, id: i64) -> Result<()> {
        let Some(mut live) = self.shared.live.try_lock() else {
            metrics::increment_counter!(telemetry::WRITES_REJECTED);
            return Err(JournalError::RotationInProgress);
        };
        let generation = live.as_mut().ok_or(JournalError::Closed)?;
        generation.ids.write(id)?;
        metrics::increment_counter!(telemetry::IDS_COMMITTED);
        Ok(())
    }

    /// Flushes both live files.
    ///
    /// Unlike the write path this waits for the lock, so it can block behind
    /// a writer or a rotation. It never returns `RotationInProgress`.
    pub fn flush(&self) -> Result<()> {
        match self.shared.live.lock().as_mut() {
            Some(generation) => generation.flush(),
            None => Ok(()),
        }
    }

    /// Switches to a new generation. Blocks until no writer holds the buffer.
    pub fn rotate(&self) -> Result<()> {
        self.shared.rotate()
    }

    /// Next uncommitted record from the generations superseded by the last
    /// rotation. Once they are drained the files are deleted and `None` is
    /// returned.
    pub fn load_legacy(&self) -> Result<Option<R>> {
        let mut slot = self.shared.legacy.lock();
        let Some(replayer) = slot.as_mut() else {
            return Ok(None);
        };
        if let Some(record) = replayer.load()? {
            return Ok(Some(record));
        }
        if let Err(e) = replayer.clean() {
            tracing::warn!(error = %e, "failed to clean legacy buffer files");
        }
        *slot = None;
        Ok(None)
    }

    /// True while a size-triggered rotation is queued or running.
    pub fn rotation_pending(&self) -> bool {
        self.shared.rotation_pending.load(Ordering::Acquire)
    }

    /// Data and id file of the live generation.
    pub fn current_files(&self) -> Option<(PathBuf, PathBuf)> {
        self.shared
            .live
            .lock()
            .as_ref()
            .map(|g| (g.data_path.clone(), g.id_path.clone()))
    }

    pub fn config(&self) -> &JournalConfig {
        &self.shared.config
    }

    /// Stops the flush task, then flushes, fsyncs and closes the live files.
    pub async fn close(mut self) -> Result<()> {
        if let Some(task) = self.flusher.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "flush task ended abnormally");
            }
        }

        let previous = {
            let mut live = self.shared.live.lock();
            self.shared.closed.store(true, Ordering::Release);
            live.take()
        };
        tracing::info!(dir = %self.shared.config.buffer_dir.display(), "journal closed");
        match previous {
            Some(generation) => generation.close(),
            None => Ok(()),
        }
    }
}

impl<R: Record> Drop for Journal<R> {
    fn drop(&mut self) {
        if let Some(task) = self.flusher.take() {
            task.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Entry;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &Path) -> JournalConfig {
        let mut cfg = JournalConfig::new(dir.join("buffer"));
        cfg.flush_interval = Duration::from_millis(50);
        cfg
    }

    #[tokio::test]
    async fn test_open_creates_first_generation() {
        let dir = tempdir().unwrap();
        let journal = Journal::<Entry>::open(config(dir.path())).unwrap();

        let (data, ids) = journal.current_files().unwrap();
        assert!(data.exists());
        assert!(ids.exists());
        assert!(data.to_string_lossy().ends_with("0001.buf"));
        assert!(ids.to_string_lossy().ends_with("0001.ids"));

        // Nothing to replay in a fresh directory.
        assert!(journal.load_legacy().unwrap().is_none());
        journal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_outside_runtime_fails() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let result = std::thread::spawn(move || Journal::<Entry>::open(cfg).map(|_| ()))
            .join()
            .unwrap();
        assert!(matches!(result, Err(JournalError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_write_id_rejects_negative() {
        let dir = tempdir().unwrap();
        let journal = Journal::<Entry>::open(config(dir.path())).unwrap();
        assert!(matches!(journal.write_id(-3), Err(JournalError::NegativeId(-3))));
        journal.write_id(3).unwrap();
        journal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_contended_write_is_retryable() {
        let dir = tempdir().unwrap();
        let journal = Journal::<Entry>::open(config(dir.path())).unwrap();

        let guard = journal.shared.live.lock();
        let err = journal.write_data(&Entry::new(1)).unwrap_err();
        assert!(err.is_retryable());
        let err = journal.write_id(1).unwrap_err();
        assert!(err.is_retryable());
        drop(guard);

        journal.write_data(&Entry::new(1)).unwrap();
        journal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_moves_writes_to_new_files() {
        let dir = tempdir().unwrap();
        let journal = Journal::<Entry>::open(config(dir.path())).unwrap();
        let (old_data, old_ids) = journal.current_files().unwrap();

        journal.write_data(&Entry::new(1)).unwrap();
        journal.rotate().unwrap();
        let (new_data, new_ids) = journal.current_files().unwrap();
        assert_ne!(old_data, new_data);
        assert_ne!(old_ids, new_ids);

        journal.write_data(&Entry::new(2)).unwrap();
        journal.flush().unwrap();

        let now = chrono::Local::now().naive_local();
        let plan = layout::scan_and_plan(&journal.config().buffer_dir, now).unwrap();
        assert!(plan.old_data_files.contains(&old_data));
        assert!(plan.old_id_files.contains(&old_ids));

        let in_new: Vec<i64> = crate::codec::RecordDecoder::<Entry>::open(&new_data)
            .unwrap()
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(in_new, vec![2]);

        let replayed = journal.load_legacy().unwrap().unwrap();
        assert_eq!(replayed.id, 1);
        assert!(journal.load_legacy().unwrap().is_none());
        assert!(!old_data.exists());
        assert!(!old_ids.exists());
        journal.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_tick_skips_while_buffer_held() {
        let dir = tempdir().unwrap();
        let journal = Journal::<Entry>::open(config(dir.path())).unwrap();
        let (data, _) = journal.current_files().unwrap();

        {
            let mut guard = journal.shared.live.lock();
            guard.as_mut().unwrap().records.write(&Entry::new(7)).unwrap();
            // Several 50ms ticks go by; none of them may touch the file.
            std::thread::sleep(Duration::from_millis(300));
            assert_eq!(std::fs::metadata(&data).unwrap().len(), 0);
        }

        let mut waited = Duration::ZERO;
        while std::fs::metadata(&data).unwrap().len() == 0 && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert!(
            std::fs::metadata(&data).unwrap().len() > 0,
            "flush task stalled after the buffer was released"
        );
        journal.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_flush_waits_for_lock() {
        let dir = tempdir().unwrap();
        let journal = Journal::<Entry>::open(config(dir.path())).unwrap();
        let (data, _) = journal.current_files().unwrap();
        journal.write_data(&Entry::new(9)).unwrap();

        let (held_tx, held_rx) = std::sync::mpsc::channel();
        std::thread::scope(|s| {
            let shared = &journal.shared;
            s.spawn(move || {
                let _guard = shared.live.lock();
                held_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
            });

            held_rx.recv().unwrap();
            let started = Instant::now();
            journal.flush().unwrap();
            assert!(started.elapsed() >= Duration::from_millis(50));
        });

        assert!(std::fs::metadata(&data).unwrap().len() > 0);
        journal.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_after_close_fail() {
        let dir = tempdir().unwrap();
        let journal = Journal::<Entry>::open(config(dir.path())).unwrap();
        let shared = Arc::clone(&journal.shared);
        journal.close().await.unwrap();

        assert!(shared.live.lock().is_none());
        assert!(matches!(shared.rotate(), Err(JournalError::Closed)));
    }
}
