//! Progress queue between a running start and its observers.
//!
//! Every start opens its own unbounded channel. The engine worker pushes
//! messages through the sender, which never blocks and may be used from any
//! thread. A reader is bound to one start when its stream is created: the
//! start in progress, or the next one when none is running. It yields that
//! start's messages in order and ends at the [`ProgressSignal::End`] marker,
//! so messages of an earlier start can never reach it.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use playspawn_types::{ProgressEvent, ProgressSignal};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::debug;

/// Stream of progress messages for one start.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

#[derive(Debug, Default)]
struct Channels {
    /// Number of starts begun so far.
    started: u64,
    running: bool,
    /// Sender of the start in progress.
    tx: Option<UnboundedSender<ProgressSignal>>,
    /// Receiver of the latest start, until a reader claims it.
    unclaimed: Option<(u64, UnboundedReceiver<ProgressSignal>)>,
}

/// Shared progress queue.
#[derive(Debug, Clone)]
pub struct ProgressQueue {
    channels: Arc<Mutex<Channels>>,
    started: Arc<watch::Sender<u64>>,
}

impl Default for ProgressQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressQueue {
    pub fn new() -> Self {
        let (started, _) = watch::channel(0);
        Self {
            channels: Arc::new(Mutex::new(Channels::default())),
            started: Arc::new(started),
        }
    }

    /// Open the channel of a new start and return its sender.
    ///
    /// An unread channel of an earlier start is dropped.
    pub fn begin(&self) -> UnboundedSender<ProgressSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let start = {
            let mut channels = self.channels.lock();
            channels.started += 1;
            channels.running = true;
            channels.tx = Some(tx.clone());
            let start = channels.started;
            if let Some((stale, _)) = channels.unclaimed.replace((start, rx)) {
                debug!(start = stale, "Discarded unread progress");
            }
            start
        };
        self.started.send_replace(start);
        tx
    }

    /// Mark the end of the current start.
    pub fn finish(&self) {
        let mut channels = self.channels.lock();
        channels.running = false;
        if let Some(tx) = channels.tx.take() {
            // A reader may already have gone away.
            let _ = tx.send(ProgressSignal::End);
        }
    }

    /// Stream the messages of the start in progress, or of the next start.
    ///
    /// One reader per start: a second stream bound to the same start ends
    /// without yielding anything, as does one whose start was superseded
    /// before it was read.
    pub fn stream(&self) -> ProgressStream {
        let target = {
            let channels = self.channels.lock();
            if channels.running {
                channels.started
            } else {
                channels.started + 1
            }
        };
        let channels = self.channels.clone();
        let mut started = self.started.subscribe();

        Box::pin(async_stream::stream! {
            let begun = started.wait_for(|start| *start >= target).await.map(|_| ());
            let claimed = match begun {
                Ok(()) => claim(&channels, target),
                Err(_) => None,
            };
            if let Some(mut rx) = claimed {
                while let Some(signal) = rx.recv().await {
                    match signal {
                        ProgressSignal::Event(event) => yield event,
                        ProgressSignal::End => break,
                    }
                }
            }
        })
    }
}

/// Take the receiver of `start` if it is still unclaimed.
fn claim(channels: &Mutex<Channels>, start: u64) -> Option<UnboundedReceiver<ProgressSignal>> {
    let mut channels = channels.lock();
    match channels.unclaimed.take() {
        Some((latest, rx)) if latest == start => Some(rx),
        other => {
            channels.unclaimed = other;
            None
        }
    }
}
