use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Accepted frame rate range. Tiny rates overflow a `Duration` frame period.
const MIN_FPS: f64 = 0.01;
const MAX_FPS: f64 = 10_000.0;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// `ffmpeg` (device, file or URL via an ffmpeg subprocess) or `pattern`.
    #[serde(default = "default_camera_source")]
    pub source: String,
    /// ffmpeg input, e.g. `/dev/video0` or `clip.mp4`.
    #[serde(default = "default_camera_input")]
    pub input: String,
    /// ffmpeg demuxer passed as `-f`, e.g. `v4l2`. Empty lets ffmpeg probe.
    #[serde(default = "default_input_format")]
    pub input_format: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Native rate of the device; the pattern source paces itself to this.
    #[serde(default = "default_camera_fps")]
    pub fps: f64,
    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,
    /// Pattern source only: end the stream after this many frames.
    #[serde(default)]
    pub frame_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_interval")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_fourcc")]
    pub fourcc: String,
    #[serde(default = "default_recording_fps")]
    pub fps: f64,
    #[serde(default = "default_recorder_interval")]
    pub interval_ms: u64,
    /// A frame write that ffmpeg does not accept within this time marks the
    /// output as stalled.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// `status` (one-line stderr status) or `none`.
    #[serde(default = "default_renderer")]
    pub renderer: String,
    #[serde(default = "default_display_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_snapshot_key")]
    pub snapshot_key: char,
    #[serde(default = "default_quit_key")]
    pub quit_key: char,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_snapshot_extension")]
    pub extension: String,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            input: default_camera_input(),
            input_format: default_input_format(),
            width: default_width(),
            height: default_height(),
            fps: default_camera_fps(),
            open_timeout_secs: default_open_timeout(),
            frame_limit: None,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_capture_interval(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_path: default_output_path(),
            fourcc: default_fourcc(),
            fps: default_recording_fps(),
            interval_ms: default_recorder_interval(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            renderer: default_renderer(),
            interval_ms: default_display_interval(),
            snapshot_key: default_snapshot_key(),
            quit_key: default_quit_key(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
            extension: default_snapshot_extension(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera size must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        for (name, fps) in [
            ("camera.fps", self.camera.fps),
            ("recording.fps", self.recording.fps),
        ] {
            // Also rejects NaN.
            if !(MIN_FPS..=MAX_FPS).contains(&fps) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between {MIN_FPS} and {MAX_FPS}, got {fps}"
                )));
            }
        }
        for (name, value) in [
            ("capture.interval_ms", self.capture.interval_ms),
            ("recording.interval_ms", self.recording.interval_ms),
            ("recording.write_timeout_ms", self.recording.write_timeout_ms),
            ("display.interval_ms", self.display.interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.display.snapshot_key == self.display.quit_key {
            return Err(ConfigError::Invalid(format!(
                "snapshot and quit keys are both '{}'",
                self.display.quit_key
            )));
        }
        if self.snapshot.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "snapshot.max_in_flight must be at least 1".into(),
            ));
        }
        if self.snapshot.extension.is_empty() {
            return Err(ConfigError::Invalid("snapshot.extension is empty".into()));
        }
        FourCc::parse(&self.recording.fourcc)?;
        Ok(())
    }
}

/// Four-character video codec identifier, e.g. `MJPG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub fn parse(code: &str) -> Result<Self, ConfigError> {
        let bytes = code.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(ConfigError::Invalid(format!(
                "fourcc must be four printable ASCII characters, got {code:?}"
            )));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        raw.make_ascii_uppercase();
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_camera_source() -> String {
    "ffmpeg".into()
}
fn default_camera_input() -> String {
    "/dev/video0".into()
}
fn default_input_format() -> String {
    "v4l2".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_camera_fps() -> f64 {
    30.0
}
fn default_open_timeout() -> u64 {
    5
}
fn default_capture_interval() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_output_path() -> PathBuf {
    PathBuf::from("output.avi")
}
fn default_fourcc() -> String {
    "MJPG".into()
}
fn default_recording_fps() -> f64 {
    20.0
}
fn default_write_timeout() -> u64 {
    5000
}
fn default_recorder_interval() -> u64 {
    30
}
fn default_renderer() -> String {
    "status".into()
}
fn default_display_interval() -> u64 {
    1
}
fn default_snapshot_key() -> char {
    's'
}
fn default_quit_key() -> char {
    'q'
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_snapshot_extension() -> String {
    "jpg".into()
}
fn default_max_in_flight() -> usize {
    8
}
fn default_log_level() -> String {
    "info".into()
}
