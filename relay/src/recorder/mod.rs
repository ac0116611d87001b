pub mod encoder;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use frame_relay_common::frame::Frame;
use tracing::{debug, info, warn};

use crate::state::RelayState;

pub use encoder::{EncoderError, VideoWriter};

/// Append-only output video stream.
///
/// `close` consumes the sink, so a stream is closed at most once and nothing
/// can be appended afterwards.
pub trait VideoSink: Send {
    fn append(&mut self, frame: Frame) -> impl Future<Output = Result<(), EncoderError>> + Send;

    fn close(self) -> impl Future<Output = Result<RecordingSummary, EncoderError>> + Send
    where
        Self: Sized;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSummary {
    pub frames_written: u64,
    pub output_path: Option<PathBuf>,
}

/// Sink used when recording is disabled. Counts frames and drops them.
#[derive(Default)]
pub struct DiscardSink {
    frames: u64,
}

impl VideoSink for DiscardSink {
    async fn append(&mut self, _frame: Frame) -> Result<(), EncoderError> {
        self.frames += 1;
        Ok(())
    }

    async fn close(self) -> Result<RecordingSummary, EncoderError> {
        Ok(RecordingSummary {
            frames_written: self.frames,
            output_path: None,
        })
    }
}

/// The output sinks selectable from config.
pub enum Recorder {
    File(VideoWriter),
    Disabled(DiscardSink),
}

impl VideoSink for Recorder {
    async fn append(&mut self, frame: Frame) -> Result<(), EncoderError> {
        match self {
            Recorder::File(w) => w.append(frame).await,
            Recorder::Disabled(d) => d.append(frame).await,
        }
    }

    async fn close(self) -> Result<RecordingSummary, EncoderError> {
        match self {
            Recorder::File(w) => w.close().await,
            Recorder::Disabled(d) => d.close().await,
        }
    }
}

/// What the recorder saw, derived from frame sequence numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub appended: u64,
    /// Appends of the same frame as the previous append.
    pub duplicates: u64,
    /// Captured frames that were overwritten before the recorder saw them.
    pub skipped: u64,
    pub write_failures: u64,
}

impl RecorderStats {
    fn observe(&mut self, last_seq: Option<u64>, seq: u64) {
        match last_seq {
            Some(last) if seq == last => self.duplicates += 1,
            Some(last) if seq > last => self.skipped += seq - last - 1,
            None => self.skipped += seq,
            _ => {}
        }
    }
}

/// Append the newest frame to `sink` every `interval` until the pipeline stops.
///
/// The recorder does not try to match the capture rate: it may append the same
/// frame twice or miss frames entirely. Write failures are logged and the loop
/// carries on with the next tick.
pub async fn run_recorder_loop<V: VideoSink>(
    sink: &mut V,
    state: &RelayState,
    interval: Duration,
) -> RecorderStats {
    let mut stats = RecorderStats::default();
    let mut last_seq: Option<u64> = None;

    info!(interval_ms = interval.as_millis() as u64, "recorder loop started");

    while state.running.is_running() {
        if let Some(frame) = state.frames.snapshot_latest() {
            let seq = frame.seq;
            match sink.append(frame).await {
                Ok(()) => {
                    stats.observe(last_seq, seq);
                    stats.appended += 1;
                    last_seq = Some(seq);
                    if stats.appended % 100 == 0 {
                        debug!(appended = stats.appended, seq, "recorder progress");
                    }
                }
                Err(e) => {
                    stats.write_failures += 1;
                    warn!(error = %e, seq, "failed to append frame to video, continuing");
                }
            }
        }
        tokio::time::sleep(interval).await;
    }

    info!(
        appended = stats.appended,
        duplicates = stats.duplicates,
        skipped = stats.skipped,
        write_failures = stats.write_failures,
        "recorder loop stopped"
    );
    stats
}
