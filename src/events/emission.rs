//! Explicit instrumentation around agent tool calls.
//!
//! Call sites wrap the operation future; the wrapper emits a start event,
//! then success or failure with the measured duration. The event contract
//! stays typed and visible at the call boundary.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use crate::domain::{BusEvent, EventCategory};

use super::bus::EventBus;

#[derive(Clone, Debug)]
pub struct EmissionMetadata {
    pub tool_name: String,
    pub agent_name: String,
    pub namespace: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
}

impl EmissionMetadata {
    fn base_event(&self, event_type: &str, summary: String) -> BusEvent {
        let mut event = BusEvent::new(
            EventCategory::Agent,
            event_type,
            self.namespace.clone(),
            self.user_id.clone(),
        )
        .with_summary(summary)
        .with_field("tool_name", self.tool_name.clone())
        .with_field("agent_name", self.agent_name.clone());

        if let Some(session_id) = &self.session_id {
            event = event.with_session(session_id.clone());
        }
        if let Some(workflow_id) = &self.workflow_id {
            event = event.with_workflow(workflow_id.clone());
        }
        event
    }
}

pub async fn with_event_emission<T, E, Fut>(
    bus: &EventBus,
    meta: &EmissionMetadata,
    op: Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    bus.emit(meta.base_event(
        "agent.tool.start",
        format!("{} started {}", meta.agent_name, meta.tool_name),
    ))
    .await;

    let started = Instant::now();
    let result = op.await;
    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    match &result {
        Ok(_) => {
            bus.emit(
                meta.base_event(
                    "agent.tool.success",
                    format!("{} finished {}", meta.agent_name, meta.tool_name),
                )
                .with_field("duration_ms", duration_ms),
            )
            .await;
        }
        Err(e) => {
            bus.emit(
                meta.base_event(
                    "agent.tool.failure",
                    format!("{} failed {}", meta.agent_name, meta.tool_name),
                )
                .with_field("duration_ms", duration_ms)
                .with_field("error", e.to_string())
                .with_field("severity", "warning"),
            )
            .await;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::memory::InMemoryStreamTransport;
    use crate::events::transport::StreamTransport;
    use std::sync::Arc;
    use std::time::Duration;

    fn meta() -> EmissionMetadata {
        EmissionMetadata {
            tool_name: "create_vendor".to_string(),
            agent_name: "onboarding-agent".to_string(),
            namespace: "ns_u_1".to_string(),
            user_id: "u_1".to_string(),
            session_id: Some("sess-1".to_string()),
            workflow_id: Some("wf-1".to_string()),
        }
    }

    async fn drain(transport: &InMemoryStreamTransport) -> Vec<crate::domain::BusEvent> {
        transport
            .ensure_group(crate::constants::streams::AGENT_EVENTS, "t", 0)
            .await
            .unwrap();
        transport
            .read_group(
                "t",
                "c",
                &[crate::constants::streams::AGENT_EVENTS],
                64,
                Duration::ZERO,
            )
            .await
            .unwrap()
            .iter()
            .map(|m| crate::domain::BusEvent::from_wire(&m.fields).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_success_emits_start_and_success() {
        let transport = Arc::new(InMemoryStreamTransport::new());
        let bus = EventBus::new(transport.clone(), 100);

        let result: Result<i32, String> =
            with_event_emission(&bus, &meta(), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);

        let events = drain(&transport).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "agent.tool.start");
        assert_eq!(events[1].event_type, "agent.tool.success");
        assert!(events[1].payload.get("duration_ms").unwrap().is_i64());
        assert_eq!(events[1].workflow_id.as_deref(), Some("wf-1"));
    }

    #[tokio::test]
    async fn test_failure_emits_failure_with_error() {
        let transport = Arc::new(InMemoryStreamTransport::new());
        let bus = EventBus::new(transport.clone(), 100);

        let result: Result<i32, String> =
            with_event_emission(&bus, &meta(), async { Err("boom".to_string()) }).await;
        assert!(result.is_err());

        let events = drain(&transport).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "agent.tool.failure");
        assert_eq!(
            events[1].payload.get("error"),
            Some(&serde_json::Value::String("boom".to_string()))
        );
    }
}
