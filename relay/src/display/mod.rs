pub mod terminal;

use std::future::Future;
use std::time::Duration;

use frame_relay_common::frame::Frame;
use tracing::{debug, info};

use crate::snapshot::SnapshotTasks;
use crate::state::{RelayState, StopReason};

pub use terminal::{Renderer, StdinKeys};

/// What a key press asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Snapshot,
    Quit,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyMap {
    pub snapshot: char,
    pub quit: char,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            snapshot: 's',
            quit: 'q',
        }
    }
}

impl KeyMap {
    /// Map a key to a command. Unrecognized keys map to `None`.
    pub fn command(&self, key: char) -> Option<KeyCommand> {
        if key == self.quit {
            Some(KeyCommand::Quit)
        } else if key == self.snapshot {
            Some(KeyCommand::Snapshot)
        } else {
            None
        }
    }
}

/// Source of user key presses.
pub trait KeySource: Send {
    /// Wait at most `wait` for a key press.
    fn poll_key(&mut self, wait: Duration) -> impl Future<Output = Option<char>> + Send;
}

/// Presents frames to the user.
pub trait FrameRenderer {
    fn render(&mut self, frame: &Frame);

    /// Called once when the display loop exits.
    fn finish(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    pub renders: u64,
    pub snapshot_requests: u64,
}

/// Render the newest frame and react to key presses until the pipeline stops.
///
/// This loop owns the quit decision: the quit key stops the pipeline and the
/// loop returns straight away. It also returns when anything else (end of
/// stream, Ctrl-C) has stopped the pipeline.
pub async fn run_display_loop<R, K>(
    state: &RelayState,
    renderer: &mut R,
    keys: &mut K,
    keymap: &KeyMap,
    snapshots: &mut SnapshotTasks,
    interval: Duration,
) -> DisplayStats
where
    R: FrameRenderer,
    K: KeySource,
{
    let mut stats = DisplayStats::default();

    while state.running.is_running() {
        if let Some(frame) = state.frames.snapshot_latest() {
            renderer.render(&frame);
            stats.renders += 1;
        }
        snapshots.reap();

        let Some(key) = keys.poll_key(interval).await else {
            continue;
        };
        match keymap.command(key) {
            Some(KeyCommand::Quit) => {
                state.running.stop(StopReason::UserQuit);
                break;
            }
            Some(KeyCommand::Snapshot) => {
                stats.snapshot_requests += 1;
                snapshots.request();
            }
            None => debug!(?key, "ignoring key"),
        }
    }

    renderer.finish();
    info!(
        renders = stats.renders,
        snapshot_requests = stats.snapshot_requests,
        "display loop stopped"
    );
    stats
}
