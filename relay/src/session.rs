use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::camera::FrameSource;
use crate::capture::{run_capture_loop, CaptureStats};
use crate::display::{run_display_loop, DisplayStats, FrameRenderer, KeyMap, KeySource};
use crate::recorder::{run_recorder_loop, RecorderStats, RecordingSummary, VideoSink};
use crate::snapshot::{SnapshotReport, SnapshotTasks};
use crate::state::{RelayState, StopReason};
use crate::RelayError;

#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub capture_interval: Duration,
    pub recorder_interval: Duration,
    pub display_interval: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            capture_interval: Duration::from_millis(10),
            recorder_interval: Duration::from_millis(30),
            display_interval: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub capture: CaptureStats,
    pub recorder: RecorderStats,
    pub display: DisplayStats,
    pub snapshots: SnapshotReport,
    /// `None` if the output stream failed to close cleanly.
    pub recording: Option<RecordingSummary>,
    pub stop_reason: Option<StopReason>,
}

/// Run one live session until the user quits or the camera runs dry.
///
/// Capture and recording run as their own tasks; the display loop runs on the
/// calling task and decides when the session ends. Shutdown then follows a
/// fixed order: join capture and recorder, drain outstanding snapshots,
/// release the camera, close the output stream.
#[allow(clippy::too_many_arguments)]
pub async fn run_session<S, V, R, K>(
    state: Arc<RelayState>,
    mut camera: S,
    mut sink: V,
    renderer: &mut R,
    keys: &mut K,
    keymap: KeyMap,
    mut snapshots: SnapshotTasks,
    timing: SessionTiming,
) -> Result<SessionReport, RelayError>
where
    S: FrameSource + 'static,
    V: VideoSink + 'static,
    R: FrameRenderer,
    K: KeySource,
{
    let capture = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let stats = run_capture_loop(&mut camera, &state, timing.capture_interval).await;
            (camera, stats)
        })
    };

    let recorder = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let stats = run_recorder_loop(&mut sink, &state, timing.recorder_interval).await;
            (sink, stats)
        })
    };

    let display = run_display_loop(
        &state,
        renderer,
        keys,
        &keymap,
        &mut snapshots,
        timing.display_interval,
    )
    .await;

    info!(
        last_seq = ?state.frames.latest_seq(),
        pending_snapshots = snapshots.in_flight(),
        "shutting down"
    );

    let capture = capture.await;
    let recorder = recorder.await;
    let snapshot_report = snapshots.join_all().await;
    // Read once the stopping loop has been joined, so its reason is visible.
    let stop_reason = state.running.reason();

    // Release the camera before closing the output, both only after every
    // loop that used them has been joined.
    let capture_stats = match capture {
        Ok((camera, stats)) => {
            camera.release().await;
            Ok(stats)
        }
        Err(e) => Err(RelayError::TaskJoin {
            task: "capture",
            source: e,
        }),
    };

    let (recorder_stats, recording) = match recorder {
        Ok((sink, stats)) => {
            let recording = match sink.close().await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    error!(error = %e, "failed to close output video");
                    None
                }
            };
            (Ok(stats), recording)
        }
        Err(e) => (
            Err(RelayError::TaskJoin {
                task: "recorder",
                source: e,
            }),
            None,
        ),
    };

    let report = SessionReport {
        capture: capture_stats?,
        recorder: recorder_stats?,
        display,
        snapshots: snapshot_report,
        recording,
        stop_reason,
    };

    info!(
        captured = report.capture.published,
        published = state.frames.published(),
        snapshot_numbers = state.snapshots_allocated(),
        recorded = report.recorder.appended,
        snapshots = report.snapshots.saved.len(),
        snapshots_failed = report.snapshots.failed,
        snapshots_rejected = report.snapshots.rejected,
        snapshots_without_frame = report.snapshots.no_frame,
        reason = ?report.stop_reason,
        "session finished"
    );
    Ok(report)
}
