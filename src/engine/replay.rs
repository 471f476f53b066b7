//! Replay driver: re-delivers a recorded log on a timer that reproduces the
//! original gaps between events, scaled by a speed factor.

use crate::engine::{CancelHandle, ConsumerMessage, Delivery, Outbox};
use crate::errors::ReplayError;
use crate::model::Event;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub const DEFAULT_SPEED: f64 = 1.25;
pub const DEFAULT_LEAD_IN: Duration = Duration::from_millis(500);
pub const DEFAULT_FLOOR: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    pub speed: f64,
    /// Delay before the first event.
    pub lead_in: Duration,
    /// Minimum delay between consecutive events.
    pub floor: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            lead_in: DEFAULT_LEAD_IN,
            floor: DEFAULT_FLOOR,
        }
    }
}

impl ReplayOptions {
    pub fn validate(&self) -> Result<(), ReplayError> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ReplayError::InvalidSpeed(self.speed));
        }
        Ok(())
    }
}

/// Delay before each event of `log`, in delivery order.
///
/// The first entry is the lead-in. Each later entry is the timestamp gap to the
/// previous event divided by `speed`, never shorter than `floor`. Gaps that run
/// backwards count as zero; gaps too long to represent saturate at `Duration::MAX`.
pub fn schedule(log: &[Event], opts: &ReplayOptions) -> Vec<Duration> {
    let mut delays = Vec::with_capacity(log.len());
    let mut prev_ts: Option<i64> = None;
    for event in log {
        let delay = match prev_ts {
            None => opts.lead_in,
            Some(prev) => {
                let gap_ms = event.ts.saturating_sub(prev).max(0) as f64;
                let scaled = Duration::try_from_secs_f64(gap_ms / opts.speed / 1000.0)
                    .unwrap_or(Duration::MAX);
                scaled.max(opts.floor)
            }
        };
        delays.push(delay);
        prev_ts = Some(event.ts);
    }
    delays
}

/// Start delivering `log`. Sends [`Delivery::Finished`] after the last event.
pub fn replay(
    log: Vec<Event>,
    opts: ReplayOptions,
    generation: u64,
    tx: UnboundedSender<ConsumerMessage>,
) -> Result<CancelHandle, ReplayError> {
    opts.validate()?;
    let delays = schedule(&log, &opts);
    let cancelled = Arc::new(AtomicBool::new(false));
    let outbox = Outbox::new(generation, tx, cancelled.clone());
    let total = log.len();

    let task = tokio::spawn(async move {
        debug!(events = total, speed = opts.speed, generation, "replay started");
        for (index, (event, delay)) in log.into_iter().zip(delays).enumerate() {
            tokio::time::sleep(delay).await;
            if !outbox.deliver(Delivery::Event(event)) {
                debug!(delivered = index, "replay stopped");
                return;
            }
        }
        outbox.deliver(Delivery::Finished);
        debug!(events = total, "replay finished");
    });
    Ok(CancelHandle::new(cancelled, task))
}
