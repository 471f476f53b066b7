//! Boundary to the run server: run creation, live channel, replay log, metadata.

use crate::errors::ApiError;
use crate::model::{Health, RunInfo, RunRequest, RunResponse, ServerConfig};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Raw body of a live channel.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// External collaborators the controller depends on. `HttpApi` talks to the real
/// server; tests substitute their own implementation.
pub trait RunApi: Send + Sync + 'static {
    fn create_run<'a>(&'a self, request: &'a RunRequest)
        -> BoxFuture<'a, Result<RunResponse, ApiError>>;

    fn get_run<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<RunInfo, ApiError>>;

    fn open_stream<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<ByteStream, ApiError>>;

    /// Complete recorded log for a finished run, as undecoded JSON values.
    fn fetch_replay_log<'a>(&'a self, run_id: &'a str)
        -> BoxFuture<'a, Result<Vec<Value>, ApiError>>;

    fn fetch_config(&self) -> BoxFuture<'_, Result<ServerConfig, ApiError>>;

    fn health(&self) -> BoxFuture<'_, Result<Health, ApiError>>;
}

#[derive(Debug, Deserialize)]
struct ReplayBody {
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base: Url,
}

impl HttpApi {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidInput(format!("base url `{base_url}`: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidInput(format!(
                "base url `{base_url}` cannot carry a path"
            )));
        }
        // No overall request timeout: the live channel stays open for the whole run.
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidInput("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Turn a non-2xx response into `ApiError::Status`, preferring the server's `detail`.
async fn check(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed.to_string()
            }
        });
    Err(ApiError::Status {
        status: status.as_u16(),
        detail,
    })
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let resp = check(resp).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Body(e.to_string()))
}

impl RunApi for HttpApi {
    fn create_run<'a>(
        &'a self,
        request: &'a RunRequest,
    ) -> BoxFuture<'a, Result<RunResponse, ApiError>> {
        async move {
            let url = self.endpoint(&["api", "run"])?;
            let resp = self.http.post(url).json(request).send().await?;
            read_json(resp).await
        }
        .boxed()
    }

    fn get_run<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<RunInfo, ApiError>> {
        async move {
            let url = self.endpoint(&["api", "run", run_id])?;
            read_json(self.http.get(url).send().await?).await
        }
        .boxed()
    }

    fn open_stream<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, Result<ByteStream, ApiError>> {
        async move {
            let url = self.endpoint(&["api", "run", run_id, "stream"])?;
            let resp = self
                .http
                .get(url)
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await?;
            let resp = check(resp).await?;
            Ok(resp.bytes_stream().map(|r| r.map_err(ApiError::from)).boxed())
        }
        .boxed()
    }

    fn fetch_replay_log<'a>(
        &'a self,
        run_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Value>, ApiError>> {
        async move {
            let url = self.endpoint(&["api", "run", run_id, "replay"])?;
            let body: ReplayBody = read_json(self.http.get(url).send().await?).await?;
            Ok(body.events)
        }
        .boxed()
    }

    fn fetch_config(&self) -> BoxFuture<'_, Result<ServerConfig, ApiError>> {
        async move {
            let url = self.endpoint(&["api", "config"])?;
            read_json(self.http.get(url).send().await?).await
        }
        .boxed()
    }

    fn health(&self) -> BoxFuture<'_, Result<Health, ApiError>> {
        async move {
            let url = self.base.clone();
            read_json(self.http.get(url).send().await?).await
        }
        .boxed()
    }
}
