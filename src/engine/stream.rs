//! Live stream consumer: one server-push channel per subscription.

use crate::engine::api::{ByteStream, RunApi};
use crate::engine::sse::SseDecoder;
use crate::engine::{CancelHandle, ConsumerMessage, Delivery, Outbox, StreamFault};
use crate::errors::DecodeError;
use crate::model::Event;
use futures::StreamExt;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    /// Report a fault when the channel is silent for this long.
    pub stall_timeout: Option<Duration>,
}

/// Open the live channel for `run_id` and forward decoded events in arrival order.
///
/// Malformed messages are reported as [`StreamFault::Decode`] and reading continues.
/// Unknown event types are skipped. The returned handle closes the channel.
pub fn subscribe(
    api: Arc<dyn RunApi>,
    run_id: String,
    generation: u64,
    tx: UnboundedSender<ConsumerMessage>,
    opts: StreamOptions,
) -> CancelHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let outbox = Outbox::new(generation, tx, cancelled.clone());
    let task = tokio::spawn(async move {
        info!(run_id = %run_id, generation, "opening live channel");
        match api.open_stream(&run_id).await {
            Ok(body) => pump(body, &outbox, opts).await,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "live channel failed to open");
                outbox.deliver(Delivery::Fault(StreamFault::Transport(e.to_string())));
            }
        }
        debug!(run_id = %run_id, generation, "live channel task done");
    });
    CancelHandle::new(cancelled, task)
}

async fn pump(mut body: ByteStream, outbox: &Outbox, opts: StreamOptions) {
    let mut decoder = SseDecoder::new();
    let mut saw_terminal = false;

    loop {
        let next = match opts.stall_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    outbox.deliver(Delivery::Fault(StreamFault::Stalled(limit)));
                    return;
                }
            },
            None => body.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                for message in decoder.push(&chunk) {
                    if !dispatch(outbox, &message, &mut saw_terminal) {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                outbox.deliver(Delivery::Fault(StreamFault::Transport(e.to_string())));
                return;
            }
            None => {
                for message in decoder.finish() {
                    if !dispatch(outbox, &message, &mut saw_terminal) {
                        return;
                    }
                }
                let closing = if saw_terminal {
                    Delivery::Finished
                } else {
                    Delivery::Fault(StreamFault::Transport(
                        "channel closed before the run finished".into(),
                    ))
                };
                outbox.deliver(closing);
                return;
            }
        }
    }
}

/// Decode and forward one message. Returns `false` once the owner stopped listening.
fn dispatch(outbox: &Outbox, message: &str, saw_terminal: &mut bool) -> bool {
    match Event::decode(message) {
        Ok(event) => {
            debug!(kind = event.kind.kind(), ts = event.ts, "live event");
            if event.kind.is_terminal() {
                *saw_terminal = true;
            }
            outbox.deliver(Delivery::Event(event))
        }
        Err(DecodeError::UnknownType(kind)) => {
            warn!(kind = %kind, "skipping unknown event type");
            true
        }
        Err(e) => {
            warn!(error = %e, raw = %message, "malformed live message");
            outbox.deliver(Delivery::Fault(StreamFault::Decode(e.to_string())))
        }
    }
}
