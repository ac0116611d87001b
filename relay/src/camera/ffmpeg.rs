use std::process::Stdio;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use frame_relay_common::config::CameraConfig;
use frame_relay_common::frame::{Frame, FrameSize, PixelFormat};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{CameraError, FrameSource};
use crate::process::StderrTail;

const FORMAT: PixelFormat = PixelFormat::Rgb24;

/// Camera backed by an ffmpeg subprocess that decodes the configured input
/// (a V4L2 device, a file, or a stream URL) into raw RGB frames on stdout.
///
/// EOF on stdout is end-of-stream.
pub struct FfmpegCamera {
    child: Child,
    stdout: ChildStdout,
    input: String,
    size: FrameSize,
    /// First frame, read during `open` to prove the device works.
    pending: Option<Frame>,
    stderr: Option<StderrTail>,
    next_seq: u64,
}

impl FfmpegCamera {
    /// Spawn ffmpeg and wait for the first frame.
    ///
    /// Fails if ffmpeg cannot be spawned, exits, or produces nothing within
    /// `open_timeout_secs`.
    pub async fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let size = FrameSize::new(config.width, config.height);
        let args = capture_args(config);

        let mut cmd = Command::new("ffmpeg");
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| CameraError::Spawn(e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::Spawn("could not get stdout handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .map(|stderr| StderrTail::spawn(stderr, "ffmpeg camera"));

        debug!(input = config.input, size = %size, ?args, "ffmpeg camera started");

        let mut camera = Self {
            child,
            stdout,
            input: config.input.clone(),
            size,
            pending: None,
            stderr,
            next_seq: 0,
        };

        let timeout = Duration::from_secs(config.open_timeout_secs);
        let first = match tokio::time::timeout(timeout, camera.read_next()).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                let status = camera.child.wait().await.ok();
                let stderr = match camera.stderr.take() {
                    Some(tail) => tail.finish().await,
                    None => String::new(),
                };
                return Err(camera.open_error(format!(
                    "ffmpeg exited before producing a frame (status {status:?}): {stderr}"
                )));
            }
            Ok(Err(e)) => return Err(camera.open_error(e.to_string())),
            Err(_) => {
                let _ = camera.child.kill().await;
                return Err(camera.open_error(format!("no frame within {timeout:?}")));
            }
        };
        camera.pending = Some(first);

        info!(input = camera.input, size = %size, "camera opened");
        Ok(camera)
    }

    async fn read_next(&mut self) -> Result<Option<Frame>, CameraError> {
        let frame_len = self.size.payload_len(FORMAT);
        match read_raw_frame(&mut self.stdout, frame_len).await? {
            Some(data) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                Ok(Some(Frame::new(data, self.size, FORMAT, seq)))
            }
            None => Ok(None),
        }
    }

    fn open_error(&self, reason: String) -> CameraError {
        CameraError::Open {
            input: self.input.clone(),
            reason,
        }
    }
}

impl FrameSource for FfmpegCamera {
    fn frame_size(&self) -> FrameSize {
        self.size
    }

    fn pixel_format(&self) -> PixelFormat {
        FORMAT
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_next().await
    }

    async fn release(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, input = self.input, "failed to stop ffmpeg camera process");
        }
        info!(input = self.input, frames = self.next_seq, "camera released");
    }
}

/// Read exactly one frame of `frame_len` bytes.
///
/// Returns `Ok(None)` on a clean EOF. A truncated trailing frame is also
/// treated as the end of the stream.
async fn read_raw_frame<R>(reader: &mut R, frame_len: usize) -> Result<Option<Bytes>, CameraError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(frame_len);
    let mut filled = 0;
    while filled < frame_len {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| CameraError::Read(e.to_string()))?;
        if n == 0 {
            if filled > 0 {
                debug!(filled, frame_len, "discarding truncated frame at end of stream");
            }
            return Ok(None);
        }
        filled += n;
    }
    Ok(Some(buf.freeze()))
}

/// ffmpeg arguments for decoding `config.input` into raw frames on stdout.
fn capture_args(config: &CameraConfig) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    if !config.input_format.is_empty() {
        args.push("-f".into());
        args.push(config.input_format.clone());
    }
    args.extend([
        "-i".into(),
        config.input.clone(),
        "-an".into(),
        "-vf".into(),
        format!("scale={}:{}", config.width, config.height),
        "-pix_fmt".into(),
        FORMAT.ffmpeg_name().into(),
        "-f".into(),
        "rawvideo".into(),
        "pipe:1".into(),
    ]);
    args
}
