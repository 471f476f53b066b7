//! Event sources: the live server-push consumer and the replay driver.
//!
//! Both run as spawned tasks that hand [`ConsumerMessage`]s to their owner over an
//! unbounded channel, tagged with the generation they were started under. Each is
//! released through a [`CancelHandle`].

pub mod api;
pub mod replay;
pub mod sse;
pub mod stream;

use crate::model::Event;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Problems a consumer reports instead of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFault {
    /// Connect failure, dropped channel, or channel closed before a terminal event.
    Transport(String),
    /// A message that could not be decoded. The channel stays open.
    Decode(String),
    /// No bytes for longer than the configured stall timeout.
    Stalled(Duration),
}

impl StreamFault {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamFault::Decode(_))
    }

    pub fn to_message(&self) -> String {
        match self {
            StreamFault::Transport(msg) => format!("Connection error: {msg}"),
            StreamFault::Decode(msg) => format!("Failed to parse event data: {msg}"),
            StreamFault::Stalled(limit) => format!(
                "No events received for {}",
                humantime::format_duration(*limit)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Event),
    Fault(StreamFault),
    /// The source has nothing more to deliver.
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerMessage {
    pub generation: u64,
    pub delivery: Delivery,
}

/// Sending side shared by consumer tasks. Stops delivering once cancelled.
pub(crate) struct Outbox {
    generation: u64,
    tx: UnboundedSender<ConsumerMessage>,
    cancelled: Arc<AtomicBool>,
}

impl Outbox {
    pub(crate) fn new(
        generation: u64,
        tx: UnboundedSender<ConsumerMessage>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            generation,
            tx,
            cancelled,
        }
    }

    /// Returns `false` when the consumer should stop: cancelled or owner gone.
    pub(crate) fn deliver(&self, delivery: Delivery) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        self.tx
            .send(ConsumerMessage {
                generation: self.generation,
                delivery,
            })
            .is_ok()
    }
}

/// Release handle for a consumer task.
///
/// `cancel` is idempotent and also runs on drop, so every exit path releases the
/// channel or pending timers.
#[derive(Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl CancelHandle {
    pub(crate) fn new(cancelled: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self {
            cancelled,
            task: Some(task),
        }
    }

    pub fn cancel(&mut self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping a JoinHandle does not stop the task; abort it explicitly.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
