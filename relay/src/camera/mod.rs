pub mod ffmpeg;
pub mod pattern;

use std::future::Future;

use frame_relay_common::config::CameraConfig;
use frame_relay_common::frame::{Frame, FrameSize, PixelFormat};

pub use ffmpeg::FfmpegCamera;
pub use pattern::PatternCamera;

/// Pull-based frame acquisition.
///
/// `read_frame` yields `Ok(None)` once the stream is exhausted. Every frame a
/// source returns has the size and format it reports up front.
pub trait FrameSource: Send {
    fn frame_size(&self) -> FrameSize;

    fn pixel_format(&self) -> PixelFormat;

    fn read_frame(&mut self) -> impl Future<Output = Result<Option<Frame>, CameraError>> + Send;

    /// Release the underlying device. Called once, after every loop using the
    /// source has been joined.
    fn release(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to spawn camera process: {0}")]
    Spawn(String),
    #[error("unable to open camera {input}: {reason}")]
    Open { input: String, reason: String },
    #[error("failed to read frame from camera: {0}")]
    Read(String),
    #[error("unknown camera source {0:?}, expected 'ffmpeg' or 'pattern'")]
    UnknownSource(String),
}

/// The camera sources selectable from config.
pub enum Camera {
    Ffmpeg(FfmpegCamera),
    Pattern(PatternCamera),
}

impl Camera {
    /// Open the configured source. Failure here is fatal for the process.
    pub async fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        match config.source.as_str() {
            "ffmpeg" => Ok(Camera::Ffmpeg(FfmpegCamera::open(config).await?)),
            "pattern" => Ok(Camera::Pattern(PatternCamera::from_config(config))),
            other => Err(CameraError::UnknownSource(other.to_string())),
        }
    }
}

impl FrameSource for Camera {
    fn frame_size(&self) -> FrameSize {
        match self {
            Camera::Ffmpeg(c) => c.frame_size(),
            Camera::Pattern(c) => c.frame_size(),
        }
    }

    fn pixel_format(&self) -> PixelFormat {
        match self {
            Camera::Ffmpeg(c) => c.pixel_format(),
            Camera::Pattern(c) => c.pixel_format(),
        }
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self {
            Camera::Ffmpeg(c) => c.read_frame().await,
            Camera::Pattern(c) => c.read_frame().await,
        }
    }

    async fn release(self) {
        match self {
            Camera::Ffmpeg(c) => c.release().await,
            Camera::Pattern(c) => c.release().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let config = CameraConfig {
            source: "webcam9000".into(),
            ..CameraConfig::default()
        };
        let err = Camera::open(&config).await.err().unwrap();
        assert!(matches!(err, CameraError::UnknownSource(ref s) if s == "webcam9000"));
    }

    #[tokio::test]
    async fn pattern_source_opens_without_device() {
        let config = CameraConfig {
            source: "pattern".into(),
            width: 8,
            height: 4,
            frame_limit: Some(1),
            ..CameraConfig::default()
        };
        let mut camera = Camera::open(&config).await.unwrap();
        assert_eq!(camera.frame_size(), FrameSize::new(8, 4));
        assert!(camera.read_frame().await.unwrap().is_some());
        assert!(camera.read_frame().await.unwrap().is_none());
        camera.release().await;
    }
}
