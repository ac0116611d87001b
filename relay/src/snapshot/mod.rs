pub mod keys;
pub mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::state::RelayState;

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub dir: PathBuf,
    pub extension: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid frame: {0}")]
    Frame(String),
    #[error("failed to write snapshot {path}: {reason}")]
    Encode { path: String, reason: String },
    #[error("no image encoder for extension {0:?}")]
    UnsupportedFormat(String),
    #[error("snapshot writer task failed: {0}")]
    Join(String),
}

#[derive(Debug)]
enum SnapshotOutcome {
    Saved(PathBuf),
    NoFrame,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub saved: Vec<PathBuf>,
    pub no_frame: u64,
    pub failed: u64,
    /// Requests refused because too many snapshots were already in flight.
    pub rejected: u64,
}

/// Persist the newest frame as `snapshot_<n>.<ext>`.
///
/// Returns `Ok(None)` without consuming a number when nothing has been
/// captured yet.
pub async fn take_snapshot(
    state: &RelayState,
    settings: &SnapshotSettings,
) -> Result<Option<PathBuf>, SnapshotError> {
    let Some(frame) = state.frames.snapshot_latest() else {
        return Ok(None);
    };

    let n = state.next_snapshot_number();
    let path = keys::snapshot_path(&settings.dir, n, &settings.extension);
    debug!(
        n,
        seq = frame.seq,
        captured_at = %frame.captured_at(),
        path = path.display().to_string(),
        "writing snapshot"
    );

    let write_path = path.clone();
    tokio::task::spawn_blocking(move || writer::save_frame(&frame, &write_path))
        .await
        .map_err(|e| SnapshotError::Join(e.to_string()))??;

    Ok(Some(path))
}

/// Tracked set of in-flight snapshot tasks.
///
/// Each request runs on its own task and completes regardless of the running
/// flag. Finished tasks are collected by `reap`; `join_all` waits for the rest
/// during shutdown.
pub struct SnapshotTasks {
    state: Arc<RelayState>,
    settings: Arc<SnapshotSettings>,
    tasks: JoinSet<SnapshotOutcome>,
    max_in_flight: usize,
    report: SnapshotReport,
}

impl SnapshotTasks {
    pub fn new(state: Arc<RelayState>, settings: SnapshotSettings, max_in_flight: usize) -> Self {
        Self {
            state,
            settings: Arc::new(settings),
            tasks: JoinSet::new(),
            max_in_flight: max_in_flight.max(1),
            report: SnapshotReport::default(),
        }
    }

    /// Start a snapshot without waiting for it. Returns `false` if the request
    /// was refused because `max_in_flight` snapshots are still running.
    pub fn request(&mut self) -> bool {
        self.reap();
        if self.tasks.len() >= self.max_in_flight {
            warn!(
                in_flight = self.tasks.len(),
                max_in_flight = self.max_in_flight,
                "too many snapshots in flight, ignoring request"
            );
            self.report.rejected += 1;
            return false;
        }

        let state = Arc::clone(&self.state);
        let settings = Arc::clone(&self.settings);
        self.tasks.spawn(async move {
            match take_snapshot(&state, &settings).await {
                Ok(Some(path)) => {
                    info!(path = path.display().to_string(), "snapshot saved");
                    SnapshotOutcome::Saved(path)
                }
                Ok(None) => {
                    warn!("snapshot requested before the first frame, nothing saved");
                    SnapshotOutcome::NoFrame
                }
                Err(e) => {
                    error!(error = %e, "failed to save snapshot");
                    SnapshotOutcome::Failed
                }
            }
        });
        true
    }

    /// Collect snapshots that have already finished.
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every outstanding snapshot.
    pub async fn join_all(mut self) -> SnapshotReport {
        let outstanding = self.tasks.len();
        if outstanding > 0 {
            info!(outstanding, "waiting for in-flight snapshots");
        }
        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
        }
        self.report
    }

    fn record(&mut self, result: Result<SnapshotOutcome, JoinError>) {
        match result {
            Ok(SnapshotOutcome::Saved(path)) => self.report.saved.push(path),
            Ok(SnapshotOutcome::NoFrame) => self.report.no_frame += 1,
            Ok(SnapshotOutcome::Failed) => self.report.failed += 1,
            Err(e) => {
                error!(error = %e, "snapshot task panicked");
                self.report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_relay_common::frame::{Frame, FrameSize, PixelFormat};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn state_with_frame() -> Arc<RelayState> {
        let state = Arc::new(RelayState::new());
        let size = FrameSize::new(8, 8);
        state.frames.publish(Frame::new(
            vec![200u8; size.payload_len(PixelFormat::Rgb24)],
            size,
            PixelFormat::Rgb24,
            1,
        ));
        state
    }

    fn settings(dir: &TempDir) -> SnapshotSettings {
        SnapshotSettings {
            dir: dir.path().to_path_buf(),
            extension: "png".into(),
        }
    }

    #[tokio::test]
    async fn sequential_snapshots_are_numbered_in_order() {
        let dir = TempDir::new().unwrap();
        let state = state_with_frame();
        let settings = settings(&dir);

        let mut names = Vec::new();
        for _ in 0..5 {
            let path = take_snapshot(&state, &settings).await.unwrap().unwrap();
            assert!(path.exists());
            names.push(path.file_name().unwrap().to_string_lossy().into_owned());
        }
        let expected: Vec<String> = (0..5).map(|n| format!("snapshot_{n}.png")).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn nothing_captured_means_nothing_saved() {
        let dir = TempDir::new().unwrap();
        let state = RelayState::new();
        let result = take_snapshot(&state, &settings(&dir)).await.unwrap();
        assert!(result.is_none());
        assert_eq!(state.snapshots_allocated(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_snapshots_get_distinct_files() {
        let dir = TempDir::new().unwrap();
        let state = state_with_frame();
        let mut tasks = SnapshotTasks::new(Arc::clone(&state), settings(&dir), 64);

        for _ in 0..16 {
            assert!(tasks.request());
        }
        let report = tasks.join_all().await;

        assert_eq!(report.failed, 0);
        assert_eq!(report.saved.len(), 16);
        let unique: HashSet<_> = report.saved.iter().collect();
        assert_eq!(unique.len(), 16);

        let on_disk: HashSet<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let expected: HashSet<String> = (0..16).map(|n| format!("snapshot_{n}.png")).collect();
        assert_eq!(on_disk, expected);
    }

    #[tokio::test]
    async fn requests_beyond_capacity_are_rejected() {
        let dir = TempDir::new().unwrap();
        let state = state_with_frame();
        let mut tasks = SnapshotTasks::new(state, settings(&dir), 1);

        // The first task has not been polled yet on this single-threaded runtime.
        assert!(tasks.request());
        assert!(!tasks.request());
        assert_eq!(tasks.in_flight(), 1);

        let report = tasks.join_all().await;
        assert_eq!(report.saved.len(), 1);
        assert_eq!(report.rejected, 1);
    }

    #[tokio::test]
    async fn write_failures_are_counted_not_raised() {
        let dir = TempDir::new().unwrap();
        let state = state_with_frame();
        let settings = SnapshotSettings {
            dir: dir.path().join("missing").join("dir"),
            extension: "png".into(),
        };
        let mut tasks = SnapshotTasks::new(state, settings, 4);
        assert!(tasks.request());
        let report = tasks.join_all().await;
        assert_eq!(report.failed, 1);
        assert!(report.saved.is_empty());
    }

    #[tokio::test]
    async fn early_request_reports_no_frame() {
        let dir = TempDir::new().unwrap();
        let mut tasks = SnapshotTasks::new(Arc::new(RelayState::new()), settings(&dir), 4);
        tasks.request();
        let report = tasks.join_all().await;
        assert_eq!(report.no_frame, 1);
    }
}
