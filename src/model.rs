use crate::errors::DecodeError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

// ── Client settings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub base_url: String,
    /// Replay speed multiplier; gaps between events are divided by it.
    pub speed: f64,
    #[serde(with = "humantime_serde")]
    pub lead_in: Duration,
    #[serde(with = "humantime_serde")]
    pub floor: Duration,
    /// Fail a live run that emits nothing for this long. Off when `None`.
    #[serde(default, with = "humantime_serde")]
    pub stall_timeout: Option<Duration>,
    pub user_agent: String,
}

// ── Server-side request/response shapes ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub input_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: String,
}

/// Descriptive run metadata from `GET /api/run/{id}`. Not part of the event protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    #[serde(default)]
    pub input_text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub winner_variant_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub max_input_chars: Option<usize>,
    #[serde(default)]
    pub demo_examples: Vec<String>,
    #[serde(default)]
    pub variant_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

// ── Event payloads ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOutput {
    pub category: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub total: f64,
    /// Named score components (label_valid, label_match, ...).
    #[serde(default)]
    pub components: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStartPayload {
    pub variant_id: String,
    pub prompt_spec: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOutputPayload {
    pub variant_id: String,
    #[serde(default)]
    pub output: Option<VariantOutput>,
    #[serde(default, deserialize_with = "de_opt_millis")]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantScoredPayload {
    pub variant_id: String,
    pub score: Score,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderChangePayload {
    pub new_leader: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_leader: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompletePayload {
    #[serde(default)]
    pub winner_variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_variants: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
}

// ── Events ───────────────────────────────────────────────────────────────────

/// The closed set of server-to-client run events.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    VariantStart(VariantStartPayload),
    VariantOutput(VariantOutputPayload),
    VariantScored(VariantScoredPayload),
    LeaderChange(LeaderChangePayload),
    RunComplete(RunCompletePayload),
    Error(ErrorPayload),
}

impl RunEvent {
    /// Wire name used in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::VariantStart(_) => "VariantStart",
            RunEvent::VariantOutput(_) => "VariantOutput",
            RunEvent::VariantScored(_) => "VariantScored",
            RunEvent::LeaderChange(_) => "LeaderChange",
            RunEvent::RunComplete(_) => "RunComplete",
            RunEvent::Error(_) => "Error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::RunComplete(_) | RunEvent::Error(_))
    }

    pub fn variant_id(&self) -> Option<&str> {
        match self {
            RunEvent::VariantStart(p) => Some(&p.variant_id),
            RunEvent::VariantOutput(p) => Some(&p.variant_id),
            RunEvent::VariantScored(p) => Some(&p.variant_id),
            _ => None,
        }
    }

    fn payload_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            RunEvent::VariantStart(p) => serde_json::to_value(p),
            RunEvent::VariantOutput(p) => serde_json::to_value(p),
            RunEvent::VariantScored(p) => serde_json::to_value(p),
            RunEvent::LeaderChange(p) => serde_json::to_value(p),
            RunEvent::RunComplete(p) => serde_json::to_value(p),
            RunEvent::Error(p) => serde_json::to_value(p),
        }
    }
}

/// One immutable, timestamped event as it appears on the wire and in a log.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Milliseconds; only differences between events are meaningful.
    pub ts: i64,
    pub kind: RunEvent,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(deserialize_with = "de_millis")]
    ts: i64,
}

impl Event {
    pub fn new(ts: i64, kind: RunEvent) -> Self {
        Self { ts, kind }
    }

    /// Decode one message body.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON object. Unknown `type` values are reported
    /// separately from malformed input so callers can skip them quietly.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let Some(kind) = kind else {
            return Err(DecodeError::Malformed("missing `type` field".into()));
        };
        if !is_known_kind(&kind) {
            return Err(DecodeError::UnknownType(kind));
        }
        let raw: RawEnvelope =
            serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let malformed = |e: serde_json::Error| DecodeError::Malformed(format!("{kind}: {e}"));
        let event = match raw.kind.as_str() {
            "VariantStart" => RunEvent::VariantStart(
                serde_json::from_value(raw.payload).map_err(malformed)?,
            ),
            "VariantOutput" => RunEvent::VariantOutput(
                serde_json::from_value(raw.payload).map_err(malformed)?,
            ),
            "VariantScored" => RunEvent::VariantScored(
                serde_json::from_value(raw.payload).map_err(malformed)?,
            ),
            "LeaderChange" => RunEvent::LeaderChange(
                serde_json::from_value(raw.payload).map_err(malformed)?,
            ),
            "RunComplete" => RunEvent::RunComplete(
                serde_json::from_value(raw.payload).map_err(malformed)?,
            ),
            "Error" => RunEvent::Error(serde_json::from_value(raw.payload).map_err(malformed)?),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        };
        Ok(Event {
            ts: raw.ts,
            kind: event,
        })
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self
            .kind
            .payload_value()
            .map_err(serde::ser::Error::custom)?;
        let mut s = serializer.serialize_struct("Event", 3)?;
        s.serialize_field("type", self.kind.kind())?;
        s.serialize_field("payload", &payload)?;
        s.serialize_field("ts", &self.ts)?;
        s.end()
    }
}

pub const EVENT_KINDS: [&str; 6] = [
    "VariantStart",
    "VariantOutput",
    "VariantScored",
    "LeaderChange",
    "RunComplete",
    "Error",
];

pub fn is_known_kind(kind: &str) -> bool {
    EVENT_KINDS.contains(&kind)
}

/// Decode every entry of a recorded log, skipping unknown event types.
/// Malformed entries are skipped too and returned alongside so callers can report them.
pub fn decode_log(values: Vec<Value>) -> (Vec<Event>, Vec<DecodeError>) {
    let mut events = Vec::with_capacity(values.len());
    let mut rejected = Vec::new();
    for v in values {
        match Event::from_value(v) {
            Ok(ev) => events.push(ev),
            Err(DecodeError::UnknownType(kind)) => {
                tracing::warn!(kind = %kind, "skipping unknown event type in log");
            }
            Err(e) => rejected.push(e),
        }
    }
    (events, rejected)
}

// The server stamps events with fractional epoch milliseconds.
fn number_to_millis(n: &serde_json::Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
            .map(|f| f.round() as i64)
    })
}

fn de_millis<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let n = serde_json::Number::deserialize(d)?;
    number_to_millis(&n).ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
}

fn de_opt_millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let n = Option::<serde_json::Number>::deserialize(d)?;
    match n {
        None => Ok(None),
        Some(n) => number_to_millis(&n)
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("latency out of range")),
    }
}

// ── Aggregate ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Compiling,
    Running,
    Complete,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantState {
    Idle,
    Querying,
    Output,
    Error,
    Scored,
}

impl VariantState {
    pub fn is_terminal(self) -> bool {
        matches!(self, VariantState::Scored | VariantState::Error)
    }

    /// Position along the lifecycle, used to check forward-only progression.
    pub fn rank(self) -> u8 {
        match self {
            VariantState::Idle => 0,
            VariantState::Querying => 1,
            VariantState::Output => 2,
            VariantState::Error | VariantState::Scored => 3,
        }
    }
}

/// What a `VariantOutput` event delivered for a variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantResult {
    pub output: Option<VariantOutput>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: String,
    pub prompt_spec: String,
    pub result: Option<VariantResult>,
    pub score: Option<Score>,
}

impl Variant {
    pub fn new(variant_id: impl Into<String>, prompt_spec: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            prompt_spec: prompt_spec.into(),
            result: None,
            score: None,
        }
    }

    /// Lifecycle state, derived from which fields are populated.
    pub fn state(&self) -> VariantState {
        match (&self.result, &self.score) {
            (Some(r), _) if r.error.is_some() => VariantState::Error,
            (Some(_), Some(_)) => VariantState::Scored,
            (Some(_), None) => VariantState::Output,
            (None, _) => VariantState::Querying,
        }
    }

    pub fn output(&self) -> Option<&VariantOutput> {
        self.result.as_ref().and_then(|r| r.output.as_ref())
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.result.as_ref().and_then(|r| r.latency_ms)
    }

    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }
}

/// Full derived state for one run. Mutated only by `reducer::apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunAggregate {
    pub status: RunStatus,
    /// First-seen order.
    pub variants: Vec<Variant>,
    pub leader: Option<String>,
    /// Set only once the run is `complete`. A `RunComplete` with no winner
    /// while nobody leads leaves this empty even though the run completed.
    pub winner: Option<String>,
    /// Run-level error message, set by an `Error` event.
    pub error: Option<String>,
    /// Variant count announced by `RunComplete`, when present.
    pub total_variants: Option<u32>,
}

impl RunAggregate {
    /// Fresh aggregate for a run that has been requested but has not emitted events.
    pub fn compiling() -> Self {
        Self {
            status: RunStatus::Compiling,
            ..Self::default()
        }
    }

    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }

    pub(crate) fn variant_mut(&mut self, variant_id: &str) -> Option<&mut Variant> {
        self.variants.iter_mut().find(|v| v.variant_id == variant_id)
    }

    pub fn variant_state(&self, variant_id: &str) -> VariantState {
        self.variant(variant_id)
            .map(Variant::state)
            .unwrap_or(VariantState::Idle)
    }

    pub fn terminal_variants(&self) -> usize {
        self.variants
            .iter()
            .filter(|v| v.state().is_terminal())
            .count()
    }
}
