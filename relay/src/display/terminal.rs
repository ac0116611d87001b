use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use frame_relay_common::frame::Frame;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{FrameRenderer, KeySource};

/// Key presses read from stdin, one line at a time.
///
/// Every non-whitespace character of a line counts as a key press, so typing
/// `s` and Enter requests a snapshot. Stdin is read on a dedicated thread that
/// is left to die with the process.
pub struct StdinKeys {
    rx: mpsc::UnboundedReceiver<char>,
    closed: bool,
}

impl StdinKeys {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("stdin-keys".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    for key in line.chars().filter(|c| !c.is_whitespace()) {
                        if tx.send(key).is_err() {
                            return;
                        }
                    }
                }
                debug!("stdin closed, no more key input");
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start stdin reader; keyboard control disabled");
        }
        Self::from_receiver(rx)
    }

    fn from_receiver(rx: mpsc::UnboundedReceiver<char>) -> Self {
        Self { rx, closed: false }
    }
}

impl KeySource for StdinKeys {
    async fn poll_key(&mut self, wait: Duration) -> Option<char> {
        if self.closed {
            tokio::time::sleep(wait).await;
            return None;
        }
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(key)) => Some(key),
            Ok(None) => {
                self.closed = true;
                None
            }
            Err(_) => None,
        }
    }
}

/// The renderers selectable from config.
pub enum Renderer {
    Status(StatusLine),
    Headless,
}

impl Renderer {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "status" => Some(Renderer::Status(StatusLine::new(Duration::from_millis(250)))),
            "none" => Some(Renderer::Headless),
            _ => None,
        }
    }
}

impl FrameRenderer for Renderer {
    fn render(&mut self, frame: &Frame) {
        if let Renderer::Status(status) = self {
            status.render(frame);
        }
    }

    fn finish(&mut self) {
        if let Renderer::Status(status) = self {
            status.finish();
        }
    }
}

/// Single self-overwriting status line on stderr.
pub struct StatusLine {
    refresh: Duration,
    last_draw: Option<(Instant, u64)>,
    drawn: bool,
}

impl StatusLine {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            last_draw: None,
            drawn: false,
        }
    }

    /// Build the status text, or `None` if the last draw is too recent.
    fn line(&mut self, frame: &Frame, now: Instant) -> Option<String> {
        let fps = match self.last_draw {
            Some((at, _)) if now.duration_since(at) < self.refresh => return None,
            Some((at, seq)) => {
                let secs = now.duration_since(at).as_secs_f64();
                frame.seq.saturating_sub(seq) as f64 / secs
            }
            None => 0.0,
        };
        self.last_draw = Some((now, frame.seq));
        Some(format!(
            "live  frame #{:<8} {:>9}  {:>5.1} fps",
            frame.seq,
            frame.size.to_string(),
            fps
        ))
    }
}

impl FrameRenderer for StatusLine {
    fn render(&mut self, frame: &Frame) {
        if let Some(line) = self.line(frame, Instant::now()) {
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "\r{line}");
            let _ = err.flush();
            self.drawn = true;
        }
    }

    fn finish(&mut self) {
        if self.drawn {
            let _ = writeln!(std::io::stderr());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_relay_common::frame::{FrameSize, PixelFormat};

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![0u8; 3], FrameSize::new(1, 1), PixelFormat::Rgb24, seq)
    }

    #[tokio::test]
    async fn stdin_keys_yield_sent_chars() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut keys = StdinKeys::from_receiver(rx);
        tx.send('s').unwrap();
        assert_eq!(keys.poll_key(Duration::from_millis(1)).await, Some('s'));
        assert_eq!(keys.poll_key(Duration::from_millis(1)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stdin_still_waits() {
        let (tx, rx) = mpsc::unbounded_channel::<char>();
        drop(tx);
        let mut keys = StdinKeys::from_receiver(rx);
        assert_eq!(keys.poll_key(Duration::from_millis(5)).await, None);
        let start = tokio::time::Instant::now();
        assert_eq!(keys.poll_key(Duration::from_millis(5)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn status_line_is_throttled() {
        let mut status = StatusLine::new(Duration::from_millis(250));
        let t0 = Instant::now();
        assert!(status.line(&frame(0), t0).is_some());
        assert!(status.line(&frame(3), t0 + Duration::from_millis(100)).is_none());
        let line = status.line(&frame(10), t0 + Duration::from_millis(500)).unwrap();
        assert!(line.contains("#10"));
        assert!(line.contains("20.0 fps"));
    }

    #[test]
    fn renderer_names() {
        assert!(matches!(Renderer::from_name("status"), Some(Renderer::Status(_))));
        assert!(matches!(Renderer::from_name("none"), Some(Renderer::Headless)));
        assert!(Renderer::from_name("opengl").is_none());
    }
}
