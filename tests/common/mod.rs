#![allow(dead_code)]

use arena_watch::engine::api::{ByteStream, RunApi};
use arena_watch::engine::ConsumerMessage;
use arena_watch::errors::ApiError;
use arena_watch::model::{
    Event, Health, RunInfo, RunRequest, RunResponse, ServerConfig,
};
use arena_watch::orchestrator::RunController;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

/// The example run: two variants start, v1 answers and scores, the run completes.
pub fn scenario() -> Vec<Value> {
    vec![
        json!({"type": "VariantStart", "payload": {"variant_id": "v1", "prompt_spec": "terse classifier"}, "ts": 1000}),
        json!({"type": "VariantStart", "payload": {"variant_id": "v2", "prompt_spec": "verbose classifier"}, "ts": 1100}),
        json!({"type": "VariantOutput", "payload": {"variant_id": "v1", "output": {"category": "billing", "summary": "refund request"}, "latency_ms": 842}, "ts": 1900}),
        json!({"type": "VariantScored", "payload": {"variant_id": "v1", "score": {"variant_id": "v1", "total": 4.5, "components": {"label_valid": 1.0, "label_match": 2.0}}}, "ts": 2300}),
        json!({"type": "RunComplete", "payload": {"winner_variant_id": "v1", "total_variants": 2}, "ts": 2400}),
    ]
}

pub fn scenario_events() -> Vec<Event> {
    scenario()
        .into_iter()
        .map(|v| Event::from_value(v).expect("scenario event"))
        .collect()
}

pub fn sse(values: &[Value]) -> Vec<String> {
    values.iter().map(|v| format!("data: {v}\n\n")).collect()
}

/// In-memory stand-in for the run server.
pub struct FakeServer {
    pub run_id: String,
    pub frames: Vec<String>,
    /// Keep the channel open after the last frame instead of closing it.
    pub hold_open: bool,
    pub log: Vec<Value>,
    pub config: ServerConfig,
    pub create_error: Option<ApiError>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn new(run_id: &str, frames: Vec<String>, log: Vec<Value>) -> Self {
        Self {
            run_id: run_id.to_string(),
            frames,
            hold_open: false,
            log,
            config: ServerConfig {
                labels: vec!["billing".into(), "technical".into()],
                max_input_chars: Some(2000),
                demo_examples: Vec::new(),
                variant_count: Some(2),
            },
            create_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, what: String) {
        if let Ok(mut r) = self.requests.lock() {
            r.push(what);
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl RunApi for FakeServer {
    fn create_run<'a>(
        &'a self,
        request: &'a RunRequest,
    ) -> BoxFuture<'a, Result<RunResponse, ApiError>> {
        self.record(format!("create:{}", request.input_text));
        async move {
            match &self.create_error {
                Some(ApiError::Status { status, detail }) => Err(ApiError::Status {
                    status: *status,
                    detail: detail.clone(),
                }),
                Some(other) => Err(ApiError::Transport(other.to_string())),
                None => Ok(RunResponse {
                    run_id: self.run_id.clone(),
                }),
            }
        }
        .boxed()
    }

    fn get_run<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<RunInfo, ApiError>> {
        async move {
            Ok(RunInfo {
                run_id: run_id.to_string(),
                input_text: String::new(),
                created_at: None,
                status: Some("complete".into()),
                winner_variant_id: None,
            })
        }
        .boxed()
    }

    fn open_stream<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<ByteStream, ApiError>> {
        self.record(format!("stream:{run_id}"));
        let chunks: Vec<Result<Bytes, ApiError>> = self
            .frames
            .iter()
            .map(|f| Ok(Bytes::from(f.clone())))
            .collect();
        let hold_open = self.hold_open;
        async move {
            let body = futures::stream::iter(chunks);
            if hold_open {
                Ok(body.chain(futures::stream::pending()).boxed())
            } else {
                Ok(body.boxed())
            }
        }
        .boxed()
    }

    fn fetch_replay_log<'a>(
        &'a self,
        run_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Value>, ApiError>> {
        self.record(format!("replay:{run_id}"));
        async move {
            if run_id == self.run_id {
                Ok(self.log.clone())
            } else {
                Err(ApiError::Status {
                    status: 404,
                    detail: "Run not found".into(),
                })
            }
        }
        .boxed()
    }

    fn fetch_config(&self) -> BoxFuture<'_, Result<ServerConfig, ApiError>> {
        async move { Ok(self.config.clone()) }.boxed()
    }

    fn health(&self) -> BoxFuture<'_, Result<Health, ApiError>> {
        async move {
            Ok(Health {
                status: "ok".into(),
                message: "fake".into(),
            })
        }
        .boxed()
    }
}

/// Feed consumer deliveries back into the controller until its consumer lets go.
pub async fn drive(ctl: &mut RunController, rx: &mut UnboundedReceiver<ConsumerMessage>) {
    while ctl.is_active() {
        match rx.recv().await {
            Some(msg) => ctl.handle(msg),
            None => break,
        }
    }
}
