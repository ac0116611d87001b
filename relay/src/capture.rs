use std::time::Duration;

use tracing::{debug, error, info};

use crate::camera::FrameSource;
use crate::state::{RelayState, StopReason};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub published: u64,
}

/// Pull frames from `source` and publish each one into the frame store.
///
/// End of stream, or any read failure, stops the whole pipeline. There is no
/// retry. Between frames the loop sleeps `interval` so a source that does not
/// block cannot spin.
pub async fn run_capture_loop<S: FrameSource>(
    source: &mut S,
    state: &RelayState,
    interval: Duration,
) -> CaptureStats {
    let mut stats = CaptureStats::default();

    info!(
        size = %source.frame_size(),
        interval_ms = interval.as_millis() as u64,
        "capture loop started"
    );

    while state.running.is_running() {
        match source.read_frame().await {
            Ok(Some(frame)) => {
                let seq = frame.seq;
                state.frames.publish(frame);
                stats.published += 1;
                if stats.published % 100 == 0 {
                    debug!(published = stats.published, seq, "capture progress");
                }
            }
            Ok(None) => {
                info!(published = stats.published, "camera reported end of stream");
                state.running.stop(StopReason::EndOfStream);
                break;
            }
            Err(e) => {
                error!(error = %e, published = stats.published, "failed to read frame, stopping");
                state.running.stop(StopReason::CaptureFailed);
                break;
            }
        }
        tokio::time::sleep(interval).await;
    }

    info!(published = stats.published, "capture loop stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, PatternCamera};
    use frame_relay_common::frame::{Frame, FrameSize, PixelFormat};
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Yields `frames` good frames, then fails.
    struct FailingSource {
        frames: u64,
        served: u64,
    }

    impl FrameSource for FailingSource {
        fn frame_size(&self) -> FrameSize {
            FrameSize::new(1, 1)
        }

        fn pixel_format(&self) -> PixelFormat {
            PixelFormat::Gray8
        }

        async fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            if self.served == self.frames {
                return Err(CameraError::Read("device unplugged".into()));
            }
            self.served += 1;
            Ok(Some(Frame::new(
                vec![0u8],
                FrameSize::new(1, 1),
                PixelFormat::Gray8,
                self.served - 1,
            )))
        }

        async fn release(self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_stream_stops_pipeline() {
        let state = RelayState::new();
        let mut camera = PatternCamera::new(FrameSize::new(4, 4), 1000.0, Some(10));
        let stats = run_capture_loop(&mut camera, &state, Duration::from_millis(10)).await;

        assert_eq!(stats.published, 10);
        assert_eq!(state.frames.latest_seq(), Some(9));
        assert!(!state.running.is_running());
        assert_eq!(state.running.reason(), Some(StopReason::EndOfStream));
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_is_treated_as_end_of_stream() {
        let state = RelayState::new();
        let mut source = FailingSource {
            frames: 3,
            served: 0,
        };
        let stats = run_capture_loop(&mut source, &state, Duration::from_millis(10)).await;

        assert_eq!(stats.published, 3);
        assert!(!state.running.is_running());
        assert_eq!(state.running.reason(), Some(StopReason::CaptureFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn already_stopped_captures_nothing() {
        let state = RelayState::new();
        state.running.stop(StopReason::UserQuit);
        let mut camera = PatternCamera::new(FrameSize::new(2, 2), 100.0, None);
        let stats = run_capture_loop(&mut camera, &state, Duration::from_millis(10)).await;
        assert_eq!(stats.published, 0);
        assert!(state.frames.snapshot_latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exits_within_one_interval_of_stop() {
        let state = Arc::new(RelayState::new());
        let interval = Duration::from_millis(10);
        let loop_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            // Faster than the capture interval, so the loop sleep dominates.
            let mut camera = PatternCamera::new(FrameSize::new(2, 2), 1000.0, None);
            run_capture_loop(&mut camera, &loop_state, interval).await
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        let stopped_at = Instant::now();
        state.running.stop(StopReason::UserQuit);
        let stats = task.await.unwrap();

        assert!(stopped_at.elapsed() <= interval + Duration::from_millis(1));
        assert!(stats.published >= 5);
        assert_eq!(state.running.reason(), Some(StopReason::UserQuit));
    }
}
