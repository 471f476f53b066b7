//! Run lifecycle controller.
//!
//! Owns the single active consumer (live channel or replay schedule) and the run
//! aggregate. Consumers hand their deliveries back over a channel; the controller
//! applies them through the reducer and publishes a [`RunUpdate`] snapshot for
//! presentation layers after every change.

use crate::engine::api::RunApi;
use crate::engine::replay::{self, ReplayOptions};
use crate::engine::stream::{self, StreamOptions};
use crate::engine::{CancelHandle, ConsumerMessage, Delivery, StreamFault};
use crate::errors::{ApiError, ReplayError};
use crate::model::{
    decode_log, ErrorPayload, Event, RunAggregate, RunEvent, RunRequest, RunStatus,
    ServerConfig,
};
use crate::progress::{self, DEFAULT_BASELINE};
use crate::reducer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Which consumer feeds the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Idle,
    Live,
    Replay,
}

/// Where a replay gets its log from.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaySource {
    /// The last run this controller watched live to completion.
    LastRun,
    /// Any finished run on the server.
    Run(String),
    /// A log loaded from disk.
    Log(Vec<Event>),
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub replay: ReplayOptions,
    pub stall_timeout: Option<Duration>,
    /// Expected variant count before the server says otherwise.
    pub baseline: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            replay: ReplayOptions::default(),
            stall_timeout: None,
            baseline: DEFAULT_BASELINE,
        }
    }
}

/// Read-only snapshot published after every state change.
#[derive(Debug, Clone, Serialize)]
pub struct RunUpdate {
    pub mode: Mode,
    pub run_id: Option<String>,
    pub aggregate: RunAggregate,
    pub progress: f64,
    pub error: Option<String>,
    /// A consumer is still attached.
    pub active: bool,
    /// The event that produced this snapshot, if any.
    #[serde(skip)]
    pub cause: Option<Event>,
}

impl RunUpdate {
    /// The current live run or replay has nothing more to deliver.
    pub fn is_settled(&self) -> bool {
        match self.mode {
            Mode::Idle => false,
            Mode::Live => !self.active && self.aggregate.status.is_terminal(),
            Mode::Replay => !self.active,
        }
    }
}

/// Commands accepted by [`run_controller`].
#[derive(Debug, Clone)]
pub enum Command {
    Start(String),
    Replay(ReplaySource),
    Reset,
    Quit,
}

/// What a controller session ended with.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub mode: Mode,
    pub run_id: Option<String>,
    pub aggregate: RunAggregate,
    pub progress: f64,
    pub error: Option<String>,
    /// Every event applied to the aggregate, in order.
    pub events: Vec<Event>,
}

pub struct RunController {
    api: Arc<dyn RunApi>,
    settings: ControllerSettings,
    aggregate: RunAggregate,
    error: Option<String>,
    mode: Mode,
    run_id: Option<String>,
    completed_run: Option<String>,
    events: Vec<Event>,
    active: Option<CancelHandle>,
    generation: u64,
    consumer_tx: UnboundedSender<ConsumerMessage>,
    updates: UnboundedSender<RunUpdate>,
    server_config: Option<ServerConfig>,
}

impl RunController {
    /// Build a controller. The returned receiver carries consumer deliveries and
    /// must be fed back through [`RunController::handle`].
    pub fn new(
        api: Arc<dyn RunApi>,
        settings: ControllerSettings,
        updates: UnboundedSender<RunUpdate>,
    ) -> (Self, UnboundedReceiver<ConsumerMessage>) {
        let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();
        let ctl = Self {
            api,
            settings,
            aggregate: RunAggregate::default(),
            error: None,
            mode: Mode::Idle,
            run_id: None,
            completed_run: None,
            events: Vec::new(),
            active: None,
            generation: 0,
            consumer_tx,
            updates,
            server_config: None,
        };
        (ctl, consumer_rx)
    }

    pub fn aggregate(&self) -> &RunAggregate {
        &self.aggregate
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn completed_run(&self) -> Option<&str> {
        self.completed_run.as_deref()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn progress(&self) -> f64 {
        progress::progress(&self.aggregate, self.baseline())
    }

    fn baseline(&self) -> usize {
        self.server_config
            .as_ref()
            .and_then(|c| c.variant_count)
            .map(|n| n as usize)
            .unwrap_or(self.settings.baseline)
    }

    /// Fetch server limits. Later `start` calls validate input against them and
    /// progress uses the announced variant count.
    pub async fn load_server_config(&mut self) -> Result<&ServerConfig, ApiError> {
        let cfg = self.api.fetch_config().await?;
        debug!(
            variant_count = ?cfg.variant_count,
            max_input_chars = ?cfg.max_input_chars,
            "server config loaded"
        );
        Ok(self.server_config.insert(cfg))
    }

    /// Request a new run and attach the live channel to it.
    ///
    /// Validation failures leave the current state alone. A failed run request
    /// ends the new run in `error`.
    pub async fn start(&mut self, input: &str) -> Result<String, ApiError> {
        if let Err(e) = self.validate_input(input) {
            self.error = Some(e.to_string());
            self.publish(None);
            return Err(e);
        }

        self.begin(Mode::Live, None);
        self.aggregate = RunAggregate::compiling();
        self.publish(None);

        let request = RunRequest {
            input_text: input.to_string(),
        };
        let resp = match self.api.create_run(&request).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "run creation failed");
                self.fail(format!("Failed to start run: {e}"));
                return Err(e);
            }
        };

        info!(run_id = %resp.run_id, generation = self.generation, "run created");
        self.run_id = Some(resp.run_id.clone());
        self.aggregate = reducer::run_created(std::mem::take(&mut self.aggregate));
        self.active = Some(stream::subscribe(
            self.api.clone(),
            resp.run_id.clone(),
            self.generation,
            self.consumer_tx.clone(),
            StreamOptions {
                stall_timeout: self.settings.stall_timeout,
            },
        ));
        self.publish(None);
        Ok(resp.run_id)
    }

    fn validate_input(&self, input: &str) -> Result<(), ApiError> {
        if input.trim().is_empty() {
            return Err(ApiError::InvalidInput("input text is empty".into()));
        }
        let limit = self.server_config.as_ref().and_then(|c| c.max_input_chars);
        if let Some(max) = limit {
            let len = input.chars().count();
            if len > max {
                return Err(ApiError::InvalidInput(format!(
                    "input is {len} characters, the server accepts at most {max}"
                )));
            }
        }
        Ok(())
    }

    /// Re-derive a finished run from its recorded log.
    ///
    /// The current state is only replaced once the log is in hand, so a failed
    /// fetch leaves whatever was on screen untouched.
    pub async fn replay(&mut self, source: ReplaySource) -> Result<(), ReplayError> {
        if let Err(e) = self.settings.replay.validate() {
            self.error = Some(e.to_string());
            self.publish(None);
            return Err(e);
        }

        let (run_id, log) = match self.resolve_log(source).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "replay unavailable");
                self.error = Some(format!("Failed to load replay: {e}"));
                self.publish(None);
                return Err(e);
            }
        };

        info!(run_id = ?run_id, events = log.len(), speed = self.settings.replay.speed, "replay starting");
        self.begin(Mode::Replay, run_id);
        self.aggregate = RunAggregate::compiling();
        let handle = replay::replay(
            log,
            self.settings.replay,
            self.generation,
            self.consumer_tx.clone(),
        )?;
        self.active = Some(handle);
        self.publish(None);
        Ok(())
    }

    async fn resolve_log(
        &self,
        source: ReplaySource,
    ) -> Result<(Option<String>, Vec<Event>), ReplayError> {
        let (run_id, log) = match source {
            ReplaySource::Log(events) => (None, events),
            ReplaySource::LastRun => {
                let run_id = self
                    .completed_run
                    .clone()
                    .ok_or(ReplayError::NothingToReplay)?;
                let log = self.fetch_log(&run_id).await?;
                (Some(run_id), log)
            }
            ReplaySource::Run(run_id) => {
                let log = self.fetch_log(&run_id).await?;
                (Some(run_id), log)
            }
        };
        if log.is_empty() {
            return Err(ReplayError::NothingToReplay);
        }
        Ok((run_id, log))
    }

    async fn fetch_log(&self, run_id: &str) -> Result<Vec<Event>, ReplayError> {
        let values = self.api.fetch_replay_log(run_id).await?;
        let (events, rejected) = decode_log(values);
        for e in &rejected {
            warn!(run_id, error = %e, "dropping malformed log entry");
        }
        Ok(events)
    }

    /// Drop the active consumer and return to an empty aggregate.
    pub fn reset(&mut self) {
        self.begin(Mode::Idle, None);
        self.publish(None);
    }

    /// Release the active consumer on teardown.
    pub fn shutdown(&mut self) {
        if self.active.is_some() {
            debug!(generation = self.generation, "releasing consumer on shutdown");
        }
        self.release();
    }

    fn begin(&mut self, mode: Mode, run_id: Option<String>) {
        self.release();
        self.generation += 1;
        self.mode = mode;
        self.run_id = run_id;
        self.aggregate = RunAggregate::default();
        self.error = None;
        self.events.clear();
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.cancel();
        }
    }

    /// Apply one consumer delivery. Deliveries from a superseded consumer are dropped.
    pub fn handle(&mut self, msg: ConsumerMessage) {
        if msg.generation != self.generation || self.active.is_none() {
            debug!(
                generation = msg.generation,
                current = self.generation,
                "dropping delivery from released consumer"
            );
            return;
        }
        match msg.delivery {
            Delivery::Event(event) => self.apply(event),
            Delivery::Fault(fault) => self.on_fault(fault),
            Delivery::Finished => {
                debug!(mode = ?self.mode, "consumer finished");
                self.release();
                self.publish(None);
            }
        }
    }

    fn apply(&mut self, event: Event) {
        let was_terminal = self.aggregate.status.is_terminal();
        self.aggregate = reducer::apply(std::mem::take(&mut self.aggregate), &event);
        if !was_terminal {
            self.events.push(event.clone());
            match self.aggregate.status {
                RunStatus::Complete => {
                    if self.mode == Mode::Live {
                        info!(run_id = ?self.run_id, winner = ?self.aggregate.winner, "run complete");
                        self.completed_run = self.run_id.clone();
                        self.release();
                    }
                }
                RunStatus::Error => {
                    self.error = self.aggregate.error.clone();
                    if self.mode == Mode::Live {
                        self.release();
                    }
                }
                _ => {}
            }
        }
        self.publish(Some(event));
    }

    fn on_fault(&mut self, fault: StreamFault) {
        if self.aggregate.status.is_terminal() {
            debug!(fault = ?fault, "fault after run ended suppressed");
            return;
        }
        if !fault.is_fatal() {
            self.error = Some(fault.to_message());
            self.publish(None);
            return;
        }
        warn!(fault = ?fault, run_id = ?self.run_id, "live channel failed");
        self.fail(fault.to_message());
    }

    /// End the current run through the reducer with a run-level error.
    fn fail(&mut self, message: String) {
        let ts = self.events.last().map(|e| e.ts).unwrap_or(0);
        let event = Event::new(
            ts,
            RunEvent::Error(ErrorPayload {
                error: Some(message),
            }),
        );
        self.apply(event);
        self.release();
    }

    fn publish(&self, cause: Option<Event>) {
        let _ = self.updates.send(RunUpdate {
            mode: self.mode,
            run_id: self.run_id.clone(),
            aggregate: self.aggregate.clone(),
            progress: self.progress(),
            error: self.error.clone(),
            active: self.active.is_some(),
            cause,
        });
    }

    pub fn into_record(mut self) -> SessionRecord {
        self.release();
        SessionRecord {
            mode: self.mode,
            progress: self.progress(),
            run_id: self.run_id.take(),
            aggregate: std::mem::take(&mut self.aggregate),
            error: self.error.take(),
            events: std::mem::take(&mut self.events),
        }
    }
}

/// Drive a controller from commands until `Quit` (or the command channel closes).
///
/// A pending run request or log fetch is raced against the command channel, so
/// `Quit` and `Reset` are honoured while the server is slow to answer. The
/// interrupted request is dropped and the new command runs in its place.
pub async fn run_controller(
    mut ctl: RunController,
    mut cmd_rx: UnboundedReceiver<Command>,
    mut consumer_rx: UnboundedReceiver<ConsumerMessage>,
) -> SessionRecord {
    let mut next: Option<Command> = None;
    loop {
        let cmd = match next.take() {
            Some(cmd) => cmd,
            None => tokio::select! {
                cmd = cmd_rx.recv() => cmd.unwrap_or(Command::Quit),
                Some(msg) = consumer_rx.recv() => {
                    ctl.handle(msg);
                    continue;
                }
            },
        };
        match cmd {
            Command::Start(input) => {
                tokio::select! {
                    res = ctl.start(&input) => {
                        if let Err(e) = res {
                            debug!(error = %e, "start rejected");
                        }
                    }
                    cmd = cmd_rx.recv() => {
                        debug!("run request abandoned");
                        next = Some(cmd.unwrap_or(Command::Quit));
                    }
                }
            }
            Command::Replay(source) => {
                tokio::select! {
                    res = ctl.replay(source) => {
                        if let Err(e) = res {
                            debug!(error = %e, "replay rejected");
                        }
                    }
                    cmd = cmd_rx.recv() => {
                        debug!("replay fetch abandoned");
                        next = Some(cmd.unwrap_or(Command::Quit));
                    }
                }
            }
            Command::Reset => ctl.reset(),
            Command::Quit => break,
        }
    }
    ctl.shutdown();
    ctl.into_record()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::api::ByteStream;
    use crate::model::{
        Health, RunCompletePayload, RunInfo, RunResponse, VariantStartPayload,
    };
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use serde_json::Value;

    /// A server that is never reachable.
    struct Offline;

    impl RunApi for Offline {
        fn create_run<'a>(
            &'a self,
            _request: &'a RunRequest,
        ) -> BoxFuture<'a, Result<RunResponse, ApiError>> {
            async { Err(ApiError::Transport("connection refused".into())) }.boxed()
        }

        fn get_run<'a>(&'a self, _run_id: &'a str) -> BoxFuture<'a, Result<RunInfo, ApiError>> {
            async { Err(ApiError::Transport("connection refused".into())) }.boxed()
        }

        fn open_stream<'a>(
            &'a self,
            _run_id: &'a str,
        ) -> BoxFuture<'a, Result<ByteStream, ApiError>> {
            async { Err(ApiError::Transport("connection refused".into())) }.boxed()
        }

        fn fetch_replay_log<'a>(
            &'a self,
            _run_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Value>, ApiError>> {
            async { Err(ApiError::Transport("connection refused".into())) }.boxed()
        }

        fn fetch_config(&self) -> BoxFuture<'_, Result<ServerConfig, ApiError>> {
            async { Err(ApiError::Transport("connection refused".into())) }.boxed()
        }

        fn health(&self) -> BoxFuture<'_, Result<Health, ApiError>> {
            async { Err(ApiError::Transport("connection refused".into())) }.boxed()
        }
    }

    /// A server that accepts connections and never answers.
    struct Unresponsive;

    impl RunApi for Unresponsive {
        fn create_run<'a>(
            &'a self,
            _request: &'a RunRequest,
        ) -> BoxFuture<'a, Result<RunResponse, ApiError>> {
            futures::future::pending().boxed()
        }

        fn get_run<'a>(&'a self, _run_id: &'a str) -> BoxFuture<'a, Result<RunInfo, ApiError>> {
            futures::future::pending().boxed()
        }

        fn open_stream<'a>(
            &'a self,
            _run_id: &'a str,
        ) -> BoxFuture<'a, Result<ByteStream, ApiError>> {
            futures::future::pending().boxed()
        }

        fn fetch_replay_log<'a>(
            &'a self,
            _run_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Value>, ApiError>> {
            futures::future::pending().boxed()
        }

        fn fetch_config(&self) -> BoxFuture<'_, Result<ServerConfig, ApiError>> {
            futures::future::pending().boxed()
        }

        fn health(&self) -> BoxFuture<'_, Result<Health, ApiError>> {
            futures::future::pending().boxed()
        }
    }

    fn controller() -> (
        RunController,
        UnboundedReceiver<ConsumerMessage>,
        UnboundedReceiver<RunUpdate>,
    ) {
        let (tx, updates) = mpsc::unbounded_channel();
        let (ctl, consumer_rx) =
            RunController::new(Arc::new(Offline), ControllerSettings::default(), tx);
        (ctl, consumer_rx, updates)
    }

    fn start(ts: i64, id: &str) -> Event {
        Event::new(
            ts,
            RunEvent::VariantStart(VariantStartPayload {
                variant_id: id.into(),
                prompt_spec: "p".into(),
            }),
        )
    }

    fn complete(ts: i64, winner: &str) -> Event {
        Event::new(
            ts,
            RunEvent::RunComplete(RunCompletePayload {
                winner_variant_id: Some(winner.into()),
                total_variants: None,
            }),
        )
    }

    fn current(ctl: &RunController, delivery: Delivery) -> ConsumerMessage {
        ConsumerMessage {
            generation: ctl.generation(),
            delivery,
        }
    }

    #[tokio::test]
    async fn failed_run_request_ends_in_error() {
        let (mut ctl, _consumer_rx, mut updates) = controller();
        assert!(ctl.start("ticket text").await.is_err());
        assert_eq!(ctl.aggregate().status, RunStatus::Error);
        assert!(ctl.error().is_some_and(|e| e.contains("connection refused")));
        assert!(!ctl.is_active());

        let mut last = None;
        while let Ok(u) = updates.try_recv() {
            last = Some(u);
        }
        assert!(last.is_some_and(|u| u.is_settled()));
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_touching_state() {
        let (mut ctl, _consumer_rx, _updates) = controller();
        assert!(matches!(
            ctl.start("   ").await,
            Err(ApiError::InvalidInput(_))
        ));
        assert_eq!(ctl.aggregate().status, RunStatus::Idle);
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(ctl.error().is_some());
    }

    #[tokio::test]
    async fn replay_without_completed_run_reports_nothing_to_replay() {
        let (mut ctl, _consumer_rx, _updates) = controller();
        let err = ctl.replay(ReplaySource::LastRun).await.unwrap_err();
        assert!(matches!(err, ReplayError::NothingToReplay));
        assert_eq!(ctl.mode(), Mode::Idle);
    }

    #[tokio::test]
    async fn replay_fetch_failure_keeps_current_state() {
        let (mut ctl, _consumer_rx, _updates) = controller();
        ctl.replay(ReplaySource::Log(vec![start(0, "v1")]))
            .await
            .expect("replay");
        ctl.handle(current(&ctl, Delivery::Event(start(0, "v1"))));
        let before = ctl.aggregate().clone();

        let err = ctl.replay(ReplaySource::Run("r9".into())).await.unwrap_err();
        assert!(matches!(err, ReplayError::Fetch(_)));
        assert_eq!(ctl.aggregate(), &before);
        assert!(ctl.is_active());
        assert!(ctl.error().is_some_and(|e| e.starts_with("Failed to load replay")));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_dropped() {
        let (mut ctl, _consumer_rx, _updates) = controller();
        ctl.replay(ReplaySource::Log(vec![start(0, "v1")]))
            .await
            .expect("replay");
        let stale = ConsumerMessage {
            generation: ctl.generation() - 1,
            delivery: Delivery::Event(start(0, "ghost")),
        };
        ctl.handle(stale);
        assert!(ctl.aggregate().variants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn faults_after_completion_are_suppressed() {
        let (mut ctl, _consumer_rx, _updates) = controller();
        ctl.replay(ReplaySource::Log(vec![start(0, "v1"), complete(5, "v1")]))
            .await
            .expect("replay");
        ctl.handle(current(&ctl, Delivery::Event(start(0, "v1"))));
        ctl.handle(current(&ctl, Delivery::Event(complete(5, "v1"))));
        ctl.handle(current(
            &ctl,
            Delivery::Fault(StreamFault::Transport("reset by peer".into())),
        ));
        assert_eq!(ctl.aggregate().status, RunStatus::Complete);
        assert_eq!(ctl.aggregate().winner.as_deref(), Some("v1"));
        assert!(ctl.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn decode_fault_fills_error_slot_only() {
        let (mut ctl, _consumer_rx, _updates) = controller();
        ctl.replay(ReplaySource::Log(vec![start(0, "v1")]))
            .await
            .expect("replay");
        ctl.handle(current(&ctl, Delivery::Event(start(0, "v1"))));
        ctl.handle(current(
            &ctl,
            Delivery::Fault(StreamFault::Decode("expected value".into())),
        ));
        assert_eq!(ctl.aggregate().status, RunStatus::Running);
        assert!(ctl.error().is_some_and(|e| e.contains("expected value")));
        assert!(ctl.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_fault_ends_run_through_reducer() {
        let (mut ctl, _consumer_rx, _updates) = controller();
        ctl.replay(ReplaySource::Log(vec![start(0, "v1")]))
            .await
            .expect("replay");
        ctl.handle(current(&ctl, Delivery::Event(start(7, "v1"))));
        ctl.handle(current(
            &ctl,
            Delivery::Fault(StreamFault::Stalled(Duration::from_secs(30))),
        ));
        assert_eq!(ctl.aggregate().status, RunStatus::Error);
        assert_eq!(ctl.error(), ctl.aggregate().error.as_deref());
        assert!(!ctl.is_active());
        let last = ctl.events().last().expect("synthetic error recorded");
        assert_eq!(last.ts, 7);
        assert_eq!(last.kind.kind(), "Error");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_everything_and_releases_consumer() {
        let (mut ctl, mut consumer_rx, _updates) = controller();
        ctl.replay(ReplaySource::Log(vec![start(0, "v1"), complete(10, "v1")]))
            .await
            .expect("replay");
        ctl.reset();
        assert!(!ctl.is_active());
        assert_eq!(ctl.aggregate(), &RunAggregate::default());
        assert!(ctl.error().is_none());
        assert!(ctl.events().is_empty());

        // The cancelled schedule delivers nothing.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(consumer_rx.try_recv().is_err());
    }

    fn spawn_unresponsive() -> (
        UnboundedSender<Command>,
        tokio::task::JoinHandle<SessionRecord>,
    ) {
        let (tx, _updates) = mpsc::unbounded_channel();
        let (ctl, consumer_rx) =
            RunController::new(Arc::new(Unresponsive), ControllerSettings::default(), tx);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        (cmd_tx, tokio::spawn(run_controller(ctl, cmd_rx, consumer_rx)))
    }

    #[tokio::test(start_paused = true)]
    async fn quit_is_honoured_while_run_request_is_pending() {
        let (cmd_tx, driver) = spawn_unresponsive();
        cmd_tx.send(Command::Start("ticket text".into())).expect("send");
        tokio::task::yield_now().await;
        cmd_tx.send(Command::Quit).expect("send");

        let record = tokio::time::timeout(Duration::from_secs(3600), driver)
            .await
            .expect("controller stopped")
            .expect("join");
        assert!(record.events.is_empty());
        assert!(!record.aggregate.status.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_fetch_gives_way_to_reset_and_next_command() {
        let (cmd_tx, driver) = spawn_unresponsive();
        cmd_tx
            .send(Command::Replay(ReplaySource::Run("r1".into())))
            .expect("send");
        tokio::task::yield_now().await;
        cmd_tx.send(Command::Reset).expect("send");
        cmd_tx
            .send(Command::Replay(ReplaySource::Log(vec![start(0, "v1")])))
            .expect("send");
        tokio::time::sleep(Duration::from_secs(1)).await;
        cmd_tx.send(Command::Quit).expect("send");

        let record = tokio::time::timeout(Duration::from_secs(3600), driver)
            .await
            .expect("controller stopped")
            .expect("join");
        assert_eq!(record.mode, Mode::Replay);
        assert_eq!(record.aggregate.variants.len(), 1);
        assert_eq!(record.events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_speed_is_refused() {
        let (tx, _updates) = mpsc::unbounded_channel();
        let settings = ControllerSettings {
            replay: ReplayOptions {
                speed: 0.0,
                ..ReplayOptions::default()
            },
            ..ControllerSettings::default()
        };
        let (mut ctl, _rx) = RunController::new(Arc::new(Offline), settings, tx);
        let err = ctl
            .replay(ReplaySource::Log(vec![start(0, "v1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::InvalidSpeed(_)));
        assert_eq!(ctl.mode(), Mode::Idle);
    }
}
