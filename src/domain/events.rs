//! Domain events carried on the event streams.
//!
//! Wire format is a flat string-keyed map: plain strings pass through
//! unencoded, everything else is JSON-encoded before transport. Decoders
//! attempt JSON-parse-else-string on every field, including keys they do
//! not recognize, so new fields never break older readers.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

const RESERVED_KEYS: &[&str] = &[
    "category",
    "type",
    "subtype",
    "namespace",
    "user_id",
    "session_id",
    "workflow_id",
    "summary",
    "timestamp",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Business,
    Agent,
}

impl EventCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::Agent => "agent",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "business" => Some(Self::Business),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum WireDecodeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown event category: {0}")]
    UnknownCategory(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// An event as published onto a stream.
#[derive(Clone, Debug, Serialize)]
pub struct BusEvent {
    pub category: EventCategory,

    /// Dotted type, e.g. `vendor.created` or `agent.tool.success`.
    pub event_type: String,

    pub subtype: Option<String>,

    pub namespace: String,

    pub user_id: String,

    pub session_id: Option<String>,

    /// Correlates the steps of one multi-step operation.
    pub workflow_id: Option<String>,

    pub payload: Map<String, Value>,

    pub summary: String,

    /// Assigned at publish time, milliseconds since epoch.
    pub timestamp_ms: i64,
}

impl BusEvent {
    #[must_use]
    pub fn new(
        category: EventCategory,
        event_type: impl Into<String>,
        namespace: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            category,
            event_type: event_type.into(),
            subtype: None,
            namespace: namespace.into(),
            user_id: user_id.into(),
            session_id: None,
            workflow_id: None,
            payload: Map::new(),
            summary: String::new(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Idempotency key for the persisted copy: an explicit `event_id`
    /// payload field wins, otherwise derived from publish time + type +
    /// user so re-delivery of the same message maps to the same key.
    #[must_use]
    pub fn external_id(&self) -> String {
        if let Some(Value::String(id)) = self.payload.get("event_id")
            && !id.is_empty()
        {
            return id.clone();
        }
        format!("{}-{}-{}", self.timestamp_ms, self.event_type, self.user_id)
    }

    /// Flatten into the wire map. Payload keys that collide with the
    /// envelope keys are dropped rather than allowed to smuggle an
    /// envelope override.
    #[must_use]
    pub fn to_wire(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("category".to_string(), self.category.as_str().to_string()),
            ("type".to_string(), self.event_type.clone()),
            ("namespace".to_string(), self.namespace.clone()),
            ("user_id".to_string(), self.user_id.clone()),
            ("summary".to_string(), self.summary.clone()),
            ("timestamp".to_string(), self.timestamp_ms.to_string()),
        ];

        if let Some(subtype) = &self.subtype {
            fields.push(("subtype".to_string(), subtype.clone()));
        }
        if let Some(session_id) = &self.session_id {
            fields.push(("session_id".to_string(), session_id.clone()));
        }
        if let Some(workflow_id) = &self.workflow_id {
            fields.push(("workflow_id".to_string(), workflow_id.clone()));
        }

        for (key, value) in &self.payload {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            fields.push((key.clone(), encode_value(value)));
        }

        fields
    }

    pub fn from_wire(fields: &[(String, String)]) -> Result<Self, WireDecodeError> {
        let get = |key: &'static str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let category_raw = get("category").ok_or(WireDecodeError::MissingField("category"))?;
        let category = EventCategory::parse(category_raw)
            .ok_or_else(|| WireDecodeError::UnknownCategory(category_raw.to_string()))?;

        let event_type = get("type")
            .ok_or(WireDecodeError::MissingField("type"))?
            .to_string();
        let namespace = get("namespace")
            .ok_or(WireDecodeError::MissingField("namespace"))?
            .to_string();
        let user_id = get("user_id")
            .ok_or(WireDecodeError::MissingField("user_id"))?
            .to_string();

        let timestamp_raw = get("timestamp").ok_or(WireDecodeError::MissingField("timestamp"))?;
        let timestamp_ms = timestamp_raw
            .parse::<i64>()
            .map_err(|_| WireDecodeError::InvalidTimestamp(timestamp_raw.to_string()))?;

        let mut payload = Map::new();
        for (key, value) in fields {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            payload.insert(key.clone(), decode_value(value));
        }

        Ok(Self {
            category,
            event_type,
            subtype: get("subtype").map(ToString::to_string),
            namespace,
            user_id,
            session_id: get("session_id").map(ToString::to_string),
            workflow_id: get("workflow_id").map(ToString::to_string),
            payload,
            summary: get("summary").unwrap_or_default().to_string(),
            timestamp_ms,
        })
    }
}

/// Plain strings pass through; everything else goes out as JSON.
fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON-parse-else-string fallback, applied to every incoming field.
fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// The processor's durable, denormalized view of a bus event, matching
/// the persisted row.
#[derive(Clone, Debug)]
pub struct NormalizedEvent {
    pub external_id: String,
    pub category: EventCategory,
    pub event_type: String,
    pub subtype: Option<String>,
    pub namespace: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
    pub payload: Map<String, Value>,
    pub summary: String,
    pub severity: String,
    pub agent_name: Option<String>,
    pub tool_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub occurred_at: String,
}

impl NormalizedEvent {
    #[must_use]
    pub fn from_bus(event: &BusEvent) -> Self {
        let str_field = |key: &str| {
            event
                .payload
                .get(key)
                .and_then(Value::as_str)
                .map(ToString::to_string)
        };

        let occurred_at = chrono::DateTime::from_timestamp_millis(event.timestamp_ms)
            .unwrap_or_else(chrono::Utc::now)
            .to_rfc3339();

        Self {
            external_id: event.external_id(),
            category: event.category,
            event_type: event.event_type.clone(),
            subtype: event.subtype.clone(),
            namespace: event.namespace.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            workflow_id: event.workflow_id.clone(),
            payload: event.payload.clone(),
            summary: event.summary.clone(),
            severity: str_field("severity").unwrap_or_else(|| "info".to_string()),
            agent_name: str_field("agent_name"),
            tool_name: str_field("tool_name"),
            duration_ms: event.payload.get("duration_ms").and_then(Value::as_i64),
            occurred_at,
        }
    }

    /// Payload field as text, used by detectors scanning response bodies.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> BusEvent {
        BusEvent::new(
            EventCategory::Business,
            "vendor.created",
            "ns_u_abc",
            "u_abc",
        )
        .with_session("sess-1")
        .with_summary("Vendor Acme created")
        .with_field("vendor_id", 42)
        .with_field("tags", serde_json::json!(["new", "trial"]))
        .with_field("note", "plain text")
    }

    #[test]
    fn test_wire_round_trip() {
        let event = sample_event();
        let decoded = BusEvent::from_wire(&event.to_wire()).unwrap();

        assert_eq!(decoded.category, EventCategory::Business);
        assert_eq!(decoded.event_type, "vendor.created");
        assert_eq!(decoded.namespace, "ns_u_abc");
        assert_eq!(decoded.session_id.as_deref(), Some("sess-1"));
        assert_eq!(decoded.payload["vendor_id"], serde_json::json!(42));
        assert_eq!(decoded.payload["tags"], serde_json::json!(["new", "trial"]));
        assert_eq!(decoded.timestamp_ms, event.timestamp_ms);
    }

    #[test]
    fn test_unknown_fields_survive_decode() {
        let mut fields = sample_event().to_wire();
        fields.push(("future_field".to_string(), "{\"a\":1}".to_string()));
        fields.push(("future_plain".to_string(), "hello".to_string()));

        let decoded = BusEvent::from_wire(&fields).unwrap();
        assert_eq!(decoded.payload["future_field"], serde_json::json!({"a": 1}));
        assert_eq!(decoded.payload["future_plain"], Value::String("hello".into()));
    }

    #[test]
    fn test_missing_required_field_is_an_error() {
        let fields: Vec<(String, String)> = sample_event()
            .to_wire()
            .into_iter()
            .filter(|(k, _)| k != "namespace")
            .collect();
        assert!(matches!(
            BusEvent::from_wire(&fields),
            Err(WireDecodeError::MissingField("namespace"))
        ));
    }

    #[test]
    fn test_external_id_prefers_explicit_event_id() {
        let event = sample_event().with_field("event_id", "explicit-1");
        assert_eq!(event.external_id(), "explicit-1");

        let derived = sample_event();
        assert_eq!(
            derived.external_id(),
            format!("{}-vendor.created-u_abc", derived.timestamp_ms)
        );
    }

    #[test]
    fn test_normalize_extracts_display_fields() {
        let event = BusEvent::new(EventCategory::Agent, "agent.tool.success", "ns_x", "u_x")
            .with_field("severity", "warning")
            .with_field("tool_name", "create_vendor")
            .with_field("agent_name", "invoice-agent")
            .with_field("duration_ms", 118);

        let normalized = NormalizedEvent::from_bus(&event);
        assert_eq!(normalized.severity, "warning");
        assert_eq!(normalized.tool_name.as_deref(), Some("create_vendor"));
        assert_eq!(normalized.agent_name.as_deref(), Some("invoice-agent"));
        assert_eq!(normalized.duration_ms, Some(118));
    }
}
