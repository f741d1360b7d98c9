//! Progress reporting and cancellation (§5 concurrency model).
//!
//! Long-running jobs (import, autopick, layout, invert) pump progress
//! through a transport-free [`ProgressSink`] rather than assuming a UI
//! event loop, and observe a [`CancelToken`] between records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// One unit of progress emitted by a long-running job.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { job: String },
    Record { index: u64, total: Option<u64> },
    Message(String),
    Finished { job: String },
}

/// A sink that a job reports [`ProgressEvent`]s to. Implementations must be
/// cheap to call on every record boundary.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Default sink: routes every event to the `log` facade.
pub struct LoggingSink;

impl ProgressSink for LoggingSink {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { job } => log::info!("{job} started"),
            ProgressEvent::Record { index, total: Some(total) } => {
                log::debug!("record {index}/{total}")
            }
            ProgressEvent::Record { index, total: None } => log::debug!("record {index}"),
            ProgressEvent::Message(message) => log::info!("{message}"),
            ProgressEvent::Finished { job } => log::info!("{job} finished"),
        }
    }
}

/// A sink backed by an unbounded `tokio::sync::mpsc` channel, for a caller
/// (UI or CLI driver) that wants to consume events itself rather than rely
/// on the log stream.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn report(&self, event: ProgressEvent) {
        // The receiver may already be dropped (caller lost interest); that
        // is not a pipeline error.
        let _ = self.tx.send(event);
    }
}

/// A cooperative cancellation flag, checked at record boundaries. Cloning
/// shares the same underlying flag.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
