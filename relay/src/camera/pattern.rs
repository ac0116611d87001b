use std::time::Duration;

use frame_relay_common::config::CameraConfig;
use frame_relay_common::frame::{Frame, FrameSize, PixelFormat};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{CameraError, FrameSource};

/// Synthetic camera producing a moving RGB gradient at a fixed native rate.
///
/// Useful without hardware and as a deterministic source in tests. With a
/// `frame_limit` the stream ends after that many frames.
pub struct PatternCamera {
    size: FrameSize,
    frame_period: Duration,
    frame_limit: Option<u64>,
    next_seq: u64,
    next_due: Option<Instant>,
}

impl PatternCamera {
    /// `fps` must be a validated config rate; tiny values overflow the period.
    pub fn new(size: FrameSize, fps: f64, frame_limit: Option<u64>) -> Self {
        Self {
            size,
            frame_period: Duration::from_secs_f64(1.0 / fps),
            frame_limit,
            next_seq: 0,
            next_due: None,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        let size = FrameSize::new(config.width, config.height);
        info!(
            size = %size,
            fps = config.fps,
            frame_limit = ?config.frame_limit,
            "opened synthetic pattern camera"
        );
        Self::new(size, config.fps, config.frame_limit)
    }

    fn render(&self, seq: u64) -> Vec<u8> {
        let (w, h) = (self.size.width as usize, self.size.height as usize);
        let shift = (seq % 256) as usize;
        let mut data = Vec::with_capacity(self.size.payload_len(PixelFormat::Rgb24));
        for y in 0..h {
            for x in 0..w {
                data.push(((x + shift * 4) % 256) as u8);
                data.push(((y + shift * 2) % 256) as u8);
                data.push(((shift * 3) % 256) as u8);
            }
        }
        data
    }
}

impl FrameSource for PatternCamera {
    fn frame_size(&self) -> FrameSize {
        self.size
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb24
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if self.frame_limit.is_some_and(|limit| self.next_seq >= limit) {
            debug!(frames = self.next_seq, "pattern camera reached frame limit");
            return Ok(None);
        }

        // Behave like a device that blocks until its next frame is exposed.
        if let Some(due) = self.next_due {
            tokio::time::sleep_until(due).await;
        }
        self.next_due = Some(Instant::now() + self.frame_period);

        let seq = self.next_seq;
        self.next_seq += 1;
        Ok(Some(Frame::new(
            self.render(seq),
            self.size,
            PixelFormat::Rgb24,
            seq,
        )))
    }

    async fn release(self) {
        info!(frames = self.next_seq, "pattern camera released");
    }
}
