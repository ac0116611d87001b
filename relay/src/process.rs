use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;
use tracing::warn;

/// Lines kept for error reports once the child exits.
const TAIL_LINES: usize = 20;

/// Background reader for a child's stderr.
///
/// The pipe is read continuously so the child never blocks on it. Each line is
/// logged as it arrives and the last few are kept for `finish`.
pub struct StderrTail {
    tail: Arc<Mutex<VecDeque<String>>>,
    task: JoinHandle<()>,
}

impl StderrTail {
    pub fn spawn(stderr: ChildStderr, process: &'static str) -> Self {
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_LINES)));
        let task = tokio::spawn(drain(stderr, process, Arc::clone(&tail)));
        Self { tail, task }
    }

    /// Wait for the child to close stderr and return the kept lines.
    pub async fn finish(self) -> String {
        if let Err(e) = self.task.await {
            warn!(error = %e, "stderr reader task failed");
        }
        let tail = self.tail.lock().unwrap_or_else(|p| p.into_inner());
        tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

async fn drain(stderr: ChildStderr, process: &'static str, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(process, error = %e, "failed to read child stderr");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        warn!(process, "{line}");

        let mut tail = tail.lock().unwrap_or_else(|p| p.into_inner());
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn keeps_only_the_last_lines() {
        let mut child = Command::new("sh")
            .args(["-c", "for i in $(seq 1 50); do echo line $i >&2; done"])
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let tail = StderrTail::spawn(child.stderr.take().unwrap(), "sh");
        assert!(child.wait().await.unwrap().success());

        let kept = tail.finish().await;
        let lines: Vec<&str> = kept.lines().collect();
        assert_eq!(lines.len(), TAIL_LINES);
        assert_eq!(lines.first(), Some(&"line 31"));
        assert_eq!(lines.last(), Some(&"line 50"));
    }
}
