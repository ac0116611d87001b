mod camera;
mod capture;
mod display;
mod process;
mod recorder;
mod session;
mod snapshot;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use frame_relay_common::config::{Config, FourCc};
use tracing::{error, info, warn};

use camera::{Camera, FrameSource};
use display::{KeyMap, Renderer, StdinKeys};
use recorder::{DiscardSink, Recorder, VideoWriter};
use session::{run_session, SessionTiming};
use snapshot::{SnapshotSettings, SnapshotTasks};
use state::{RelayState, StopReason};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("config error: {0}")]
    Config(#[from] frame_relay_common::config::ConfigError),
    #[error("camera error: {0}")]
    Camera(#[from] camera::CameraError),
    #[error("video writer error: {0}")]
    Encoder(#[from] recorder::EncoderError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] snapshot::SnapshotError),
    #[error("failed to create snapshot directory {path}: {source}")]
    SnapshotDir {
        path: String,
        source: std::io::Error,
    },
    #[error("unknown renderer {0:?}, expected 'status' or 'none'")]
    UnknownRenderer(String),
    #[error("{task} task failed: {source}")]
    TaskJoin {
        task: &'static str,
        source: tokio::task::JoinError,
    },
}

/// An explicit path must load. Without one, `config.toml` is used if present.
fn load_config(arg: Option<PathBuf>) -> Result<Config, RelayError> {
    match arg {
        Some(path) => Ok(Config::load(&path)?),
        None => {
            let default_path = Path::new("config.toml");
            if default_path.exists() {
                Ok(Config::load(default_path)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let config_arg = std::env::args().nth(1).map(PathBuf::from);

    let config = match load_config(config_arg) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config.camera.source,
        input = config.camera.input,
        recording = config.recording.enabled,
        "starting frame-relay"
    );

    match run(config).await {
        Ok(()) => {}
        Err(e) => {
            error!(error = %e, "frame-relay failed");
            std::process::exit(1);
        }
    }
}

/// Checks that need neither the camera nor ffmpeg.
fn prepare_outputs(config: &Config) -> Result<(Renderer, FourCc), RelayError> {
    let renderer = Renderer::from_name(&config.display.renderer)
        .ok_or_else(|| RelayError::UnknownRenderer(config.display.renderer.clone()))?;
    snapshot::writer::image_format_for(&config.snapshot.extension)?;
    std::fs::create_dir_all(&config.snapshot.dir).map_err(|e| RelayError::SnapshotDir {
        path: config.snapshot.dir.display().to_string(),
        source: e,
    })?;
    let fourcc = FourCc::parse(&config.recording.fourcc)?;
    Ok((renderer, fourcc))
}

async fn run(config: Config) -> Result<(), RelayError> {
    let needs_ffmpeg = config.camera.source == "ffmpeg" || config.recording.enabled;
    if needs_ffmpeg && !recorder::encoder::check_ffmpeg_available().await {
        warn!("ffmpeg not found on PATH, opening the camera or video writer will likely fail");
    }

    // Opening the writer truncates the output file, so it comes last.
    let (mut renderer, fourcc) = prepare_outputs(&config)?;
    let camera = Camera::open(&config.camera).await?;

    let sink = if config.recording.enabled {
        let writer = VideoWriter::open(
            &config.recording.output_path,
            fourcc,
            config.recording.fps,
            camera.frame_size(),
            camera.pixel_format(),
        )
        .await?
        .with_write_timeout(Duration::from_millis(config.recording.write_timeout_ms));
        Recorder::File(writer)
    } else {
        info!("recording disabled");
        Recorder::Disabled(DiscardSink::default())
    };

    let state = Arc::new(RelayState::new());
    let snapshots = SnapshotTasks::new(
        Arc::clone(&state),
        SnapshotSettings {
            dir: config.snapshot.dir.clone(),
            extension: config.snapshot.extension.clone(),
        },
        config.snapshot.max_in_flight,
    );

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        state.running.stop(StopReason::Interrupted);
                    }
                }
                _ = state.running.stopped() => {}
            }
        });
    }

    let keymap = KeyMap {
        snapshot: config.display.snapshot_key,
        quit: config.display.quit_key,
    };
    eprintln!(
        "Press '{}' then Enter to save a snapshot, '{}' then Enter to quit.",
        keymap.snapshot, keymap.quit
    );

    let timing = SessionTiming {
        capture_interval: Duration::from_millis(config.capture.interval_ms),
        recorder_interval: Duration::from_millis(config.recording.interval_ms),
        display_interval: Duration::from_millis(config.display.interval_ms),
    };
    let mut keys = StdinKeys::spawn();

    let report = run_session(
        state,
        camera,
        sink,
        &mut renderer,
        &mut keys,
        keymap,
        snapshots,
        timing,
    )
    .await?;

    if let Some(recording) = &report.recording {
        if let Some(path) = &recording.output_path {
            info!(
                frames = recording.frames_written,
                path = path.display().to_string(),
                "recording saved"
            );
        }
    }
    for path in &report.snapshots.saved {
        info!(path = path.display().to_string(), "snapshot");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.snapshot.dir = dir.path().join("shots");
        config.recording.output_path = dir.path().join("output.avi");
        config
    }

    #[test]
    fn outputs_prepared_without_touching_video_file() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let (renderer, fourcc) = prepare_outputs(&config).unwrap();
        assert!(matches!(renderer, Renderer::Status(_)));
        assert_eq!(fourcc.as_str(), "MJPG");
        assert!(config.snapshot.dir.is_dir());
        assert!(!config.recording.output_path.exists());
    }

    #[test]
    fn bad_snapshot_extension_fails_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.snapshot.extension = "avi".into();
        let err = prepare_outputs(&config).err().unwrap();
        assert!(matches!(
            err,
            RelayError::Snapshot(snapshot::SnapshotError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn unknown_renderer_fails_before_snapshot_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.display.renderer = "opengl".into();
        let err = prepare_outputs(&config).err().unwrap();
        assert!(matches!(err, RelayError::UnknownRenderer(ref name) if name == "opengl"));
        assert!(!config.snapshot.dir.exists());
    }
}
