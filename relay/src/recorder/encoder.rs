use std::path::{Path, PathBuf};
use std::time::Duration;

use frame_relay_common::config::FourCc;
use frame_relay_common::frame::{Frame, FrameSize, PixelFormat};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, error, info, warn};

use super::{RecordingSummary, VideoSink};
use crate::process::StderrTail;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Output video stream backed by an ffmpeg subprocess.
///
/// Raw frames are piped into ffmpeg's stdin in call order. Size, rate and
/// codec are fixed when the writer is opened. A write that ffmpeg does not
/// accept within the write timeout marks the stream as stalled: the frame
/// boundary is lost, so every later append fails too.
pub struct VideoWriter {
    child: Child,
    stdin: ChildStdin,
    stderr: StderrTail,
    write_timeout: Duration,
    stalled: bool,
    output_path: PathBuf,
    size: FrameSize,
    format: PixelFormat,
    fourcc: FourCc,
    frame_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("no ffmpeg encoder for fourcc {0}")]
    UnsupportedCodec(FourCc),
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("ffmpeg accepted no input for {0:?}")]
    Stalled(Duration),
    #[error("frame {seq} is {got} {got_format:?}, stream expects {expected} {expected_format:?}")]
    FrameMismatch {
        seq: u64,
        got: FrameSize,
        got_format: PixelFormat,
        expected: FrameSize,
        expected_format: PixelFormat,
    },
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
}

impl VideoWriter {
    /// Spawn ffmpeg ready to receive raw frames of `size` on stdin and write
    /// them to `output_path`.
    pub async fn open(
        output_path: &Path,
        fourcc: FourCc,
        fps: f64,
        size: FrameSize,
        format: PixelFormat,
    ) -> Result<Self, EncoderError> {
        let args = encode_args(output_path, fourcc, fps, size, format)?;
        let writer = Self::spawn("ffmpeg", &args, output_path, fourcc, size, format)?;

        info!(
            %fourcc,
            fps,
            size = %size,
            output = output_path.display().to_string(),
            "video writer opened"
        );
        Ok(writer)
    }

    fn spawn(
        program: &str,
        args: &[String],
        output_path: &Path,
        fourcc: FourCc,
        size: FrameSize,
        format: PixelFormat,
    ) -> Result<Self, EncoderError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stdin handle".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stderr handle".into()))?;

        Ok(Self {
            child,
            stdin,
            stderr: StderrTail::spawn(stderr, "ffmpeg encoder"),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            stalled: false,
            output_path: output_path.to_path_buf(),
            size,
            format,
            fourcc,
            frame_count: 0,
        })
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }
}

impl VideoSink for VideoWriter {
    async fn append(&mut self, frame: Frame) -> Result<(), EncoderError> {
        if self.stalled {
            return Err(EncoderError::Stalled(self.write_timeout));
        }
        check_frame(&frame, self.size, self.format)?;
        match tokio::time::timeout(self.write_timeout, self.stdin.write_all(&frame.data)).await {
            Ok(result) => result.map_err(|e| EncoderError::Write(e.to_string()))?,
            Err(_) => {
                self.stalled = true;
                error!(seq = frame.seq, timeout = ?self.write_timeout, "ffmpeg encoder stalled");
                return Err(EncoderError::Stalled(self.write_timeout));
            }
        }
        self.frame_count += 1;
        debug!(seq = frame.seq, frame_count = self.frame_count, "appended frame to video");
        Ok(())
    }

    /// Close stdin so ffmpeg flushes the container, then wait for it to exit.
    async fn close(self) -> Result<RecordingSummary, EncoderError> {
        let Self {
            mut child,
            mut stdin,
            stderr,
            write_timeout,
            stalled,
            output_path,
            fourcc,
            frame_count,
            ..
        } = self;

        if stalled {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill stalled ffmpeg encoder");
            }
            stderr.finish().await;
            return Err(EncoderError::Stalled(write_timeout));
        }

        if let Err(e) = stdin.flush().await {
            warn!(error = %e, "failed to flush ffmpeg stdin");
        }
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| EncoderError::Wait(e.to_string()))?;
        let stderr = stderr.finish().await;

        if !status.success() {
            error!(%status, stderr = %stderr, "ffmpeg exited with error");
            let reason = if stderr.is_empty() {
                status.to_string()
            } else {
                stderr
            };
            return Err(EncoderError::FfmpegFailed(reason));
        }

        info!(
            frame_count,
            %fourcc,
            output = output_path.display().to_string(),
            "video file closed"
        );

        Ok(RecordingSummary {
            frames_written: frame_count,
            output_path: Some(output_path),
        })
    }
}

/// Reject frames that do not match the stream's fixed size and format.
fn check_frame(frame: &Frame, size: FrameSize, format: PixelFormat) -> Result<(), EncoderError> {
    if frame.size != size || frame.format != format || frame.validate().is_err() {
        return Err(EncoderError::FrameMismatch {
            seq: frame.seq,
            got: frame.size,
            got_format: frame.format,
            expected: size,
            expected_format: format,
        });
    }
    Ok(())
}

/// ffmpeg encoder name and output pixel format for a four-character code.
fn codec_for(fourcc: FourCc) -> Result<(&'static str, &'static str), EncoderError> {
    match fourcc.as_str() {
        "MJPG" => Ok(("mjpeg", "yuvj420p")),
        "XVID" | "MP4V" | "FMP4" | "DIVX" => Ok(("mpeg4", "yuv420p")),
        "H264" | "AVC1" | "X264" => Ok(("libx264", "yuv420p")),
        _ => Err(EncoderError::UnsupportedCodec(fourcc)),
    }
}

fn encode_args(
    output_path: &Path,
    fourcc: FourCc,
    fps: f64,
    size: FrameSize,
    format: PixelFormat,
) -> Result<Vec<String>, EncoderError> {
    let (vcodec, out_pix_fmt) = codec_for(fourcc)?;
    Ok(vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        format.ffmpeg_name().into(),
        "-s".into(),
        size.to_string(),
        "-r".into(),
        fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
        "-c:v".into(),
        vcodec.into(),
        "-vtag".into(),
        fourcc.to_string(),
        "-pix_fmt".into(),
        out_pix_fmt.into(),
        "-y".into(),
        output_path.display().to_string(),
    ])
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub async fn check_ffmpeg_available() -> bool {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
            true
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; capture and recording may fail");
            false
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; the ffmpeg camera and video recording will fail"
            );
            false
        }
    }
}
