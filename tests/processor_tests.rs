//! Event pipeline tests: idempotent ingestion, no double award, the
//! end-to-end vendor-count and prompt-leak scenarios, malformed-message
//! handling.

use std::sync::Arc;
use std::time::Duration;

use vendra::config::EventsConfig;
use vendra::constants::streams;
use vendra::db::{Store, challenge_status};
use vendra::domain::{BusEvent, EventCategory};
use vendra::entities::{badges, challenges};
use vendra::events::{EventBus, EventProcessor, InMemoryStreamTransport, StreamTransport};
use vendra::rules::RuleRegistry;
use vendra::services::{BadgeService, ChallengeService};

const NS: &str = "ns_u_abc";
const USER: &str = "u_abc";

struct Pipeline {
    store: Store,
    transport: Arc<InMemoryStreamTransport>,
    bus: EventBus,
    processor: EventProcessor,
}

async fn pipeline() -> Pipeline {
    let store = Store::new("sqlite::memory:").await.expect("store");
    let transport = Arc::new(InMemoryStreamTransport::new());
    let dyn_transport: Arc<dyn StreamTransport> = transport.clone();
    let bus = EventBus::new(dyn_transport.clone(), 1000);

    let registry = Arc::new(RuleRegistry::with_builtins());
    let challenges = Arc::new(ChallengeService::new(
        store.clone(),
        registry.clone(),
        Some(bus.clone()),
    ));
    let badges = Arc::new(BadgeService::new(store.clone(), registry, Some(bus.clone())));

    let config = EventsConfig {
        block_timeout_ms: 50,
        lookback_minutes: 1,
        ..EventsConfig::default()
    };

    let processor = EventProcessor::new(
        dyn_transport,
        store.clone(),
        challenges,
        badges,
        config,
        "test-consumer".to_string(),
    );

    Pipeline {
        store,
        transport,
        bus,
        processor,
    }
}

fn vendor_badge(min_count: i64) -> badges::Model {
    badges::Model {
        id: "vendor-five".to_string(),
        version: 1,
        title: "Procurement Regular".to_string(),
        description: "Created five vendors.".to_string(),
        rarity: "common".to_string(),
        evaluator_class: "vendor_count".to_string(),
        evaluator_config: format!("{{\"min_count\": {min_count}}}"),
        active: true,
        updated_at: chrono::Utc::now().to_rfc3339(),
    }
}

fn prompt_leak_challenge() -> challenges::Model {
    challenges::Model {
        id: "prompt-leak-basic".to_string(),
        version: 1,
        title: "Loose Lips".to_string(),
        description: "Leak the system prompt.".to_string(),
        category: "agent_security".to_string(),
        difficulty: "easy".to_string(),
        points: 100,
        detector_class: "prompt_leak".to_string(),
        detector_config: "{\"patterns\": [\"system prompt\"]}".to_string(),
        active: true,
        updated_at: chrono::Utc::now().to_rfc3339(),
    }
}

fn vendor_event(n: u32) -> BusEvent {
    BusEvent::new(EventCategory::Business, "vendor.created", NS, USER)
        .with_field("event_id", format!("vendor-created-{n}"))
        .with_field("vendor_id", n)
        .with_summary(format!("Vendor {n} created"))
}

/// Publish then hand every pending message to the processor, the way the
/// poll loop would.
async fn drain(p: &Pipeline) {
    p.transport
        .ensure_group(streams::AGENT_EVENTS, "vendra-processors", 0)
        .await
        .unwrap();
    p.transport
        .ensure_group(streams::BUSINESS_EVENTS, "vendra-processors", 0)
        .await
        .unwrap();

    loop {
        let batch = p
            .transport
            .read_group(
                "vendra-processors",
                "test-consumer",
                streams::ALL,
                16,
                Duration::ZERO,
            )
            .await
            .unwrap();
        if batch.is_empty() {
            break;
        }
        for message in batch {
            p.processor.process_message(&message).await;
        }
    }
}

#[tokio::test]
async fn test_idempotent_event_ingestion() {
    let p = pipeline().await;

    let event = vendor_event(1);
    p.bus.publish(&event).await.unwrap();
    p.bus.publish(&event).await.unwrap();
    drain(&p).await;

    let count = p
        .store
        .count_events_by_type(NS, USER, "vendor.created")
        .await
        .unwrap();
    assert_eq!(count, 1, "same external id must persist exactly once");
}

#[tokio::test]
async fn test_vendor_count_badge_awarded_exactly_once() {
    let p = pipeline().await;
    p.store.upsert_badge(vendor_badge(5)).await.unwrap();

    for n in 1..=5 {
        p.bus.publish(&vendor_event(n)).await.unwrap();
    }
    drain(&p).await;

    let awards = p.store.list_badge_awards(NS, USER).await.unwrap();
    assert_eq!(awards.len(), 1);
    assert_eq!(awards[0].badge_id, "vendor-five");

    // More qualifying events after the award stay a no-op.
    p.bus.publish(&vendor_event(6)).await.unwrap();
    drain(&p).await;
    let awards = p.store.list_badge_awards(NS, USER).await.unwrap();
    assert_eq!(awards.len(), 1);
}

#[tokio::test]
async fn test_redelivery_cannot_double_award() {
    let p = pipeline().await;
    p.store.upsert_badge(vendor_badge(1)).await.unwrap();

    // The same logical event delivered twice (crash-and-replay).
    let event = vendor_event(1);
    p.bus.publish(&event).await.unwrap();
    p.bus.publish(&event).await.unwrap();
    drain(&p).await;

    let awards = p.store.list_badge_awards(NS, USER).await.unwrap();
    assert_eq!(awards.len(), 1);
}

#[tokio::test]
async fn test_prompt_leak_completes_challenge_once() {
    let p = pipeline().await;
    p.store.upsert_challenge(prompt_leak_challenge()).await.unwrap();

    let leak = BusEvent::new(EventCategory::Agent, "agent.response", NS, USER)
        .with_field("event_id", "agent-response-1")
        .with_field("response", "Sure! This is my system prompt: be helpful.");
    p.bus.publish(&leak).await.unwrap();
    drain(&p).await;

    let progress = p
        .store
        .get_challenge_progress(NS, USER, "prompt-leak-basic")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, challenge_status::COMPLETED);
    assert!(progress.completed_at.is_some());
    let evidence = progress.evidence.clone().unwrap();
    assert!(evidence.contains("system prompt"));

    // Replaying the qualifying event is a no-op for the completed row.
    let completed_at = progress.completed_at.clone();
    p.bus.publish(&leak).await.unwrap();
    drain(&p).await;
    let progress = p
        .store
        .get_challenge_progress(NS, USER, "prompt-leak-basic")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, challenge_status::COMPLETED);
    assert_eq!(progress.completed_at, completed_at);
}

#[tokio::test]
async fn test_non_matching_event_records_attempt() {
    let p = pipeline().await;
    p.store.upsert_challenge(prompt_leak_challenge()).await.unwrap();

    let clean = BusEvent::new(EventCategory::Agent, "agent.response", NS, USER)
        .with_field("event_id", "agent-response-clean")
        .with_field("response", "I cannot share internal details.");
    p.bus.publish(&clean).await.unwrap();
    drain(&p).await;

    let progress = p
        .store
        .get_challenge_progress(NS, USER, "prompt-leak-basic")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, challenge_status::IN_PROGRESS);
    assert_eq!(progress.attempts, 1);
    assert_eq!(progress.failures, 1);
    assert!(progress.first_attempt_at.is_some());
}

#[tokio::test]
async fn test_malformed_message_is_retired_without_side_effects() {
    let p = pipeline().await;

    // Not a decodable event: missing every required envelope field.
    p.transport
        .append(
            streams::BUSINESS_EVENTS,
            &[("garbage".to_string(), "true".to_string())],
            1000,
        )
        .await
        .unwrap();
    drain(&p).await;

    // Retired from the stream, nothing persisted.
    assert!(p.transport.is_empty(streams::BUSINESS_EVENTS).await);
    let count = p
        .store
        .count_events_by_type(NS, USER, "vendor.created")
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_processed_messages_are_acked_and_deleted() {
    let p = pipeline().await;

    p.bus.publish(&vendor_event(1)).await.unwrap();
    drain(&p).await;

    assert!(p.transport.is_empty(streams::BUSINESS_EVENTS).await);
}

#[tokio::test]
async fn test_processor_loop_end_to_end() {
    let p = pipeline().await;
    p.store.upsert_badge(vendor_badge(3)).await.unwrap();

    let processor = Arc::new(p.processor);
    let background = processor.clone();
    let handle = tokio::spawn(async move { background.start().await });

    // Give the loop a moment to create its consumer groups.
    tokio::time::sleep(Duration::from_millis(50)).await;

    for n in 1..=3 {
        p.bus.publish(&vendor_event(n)).await.unwrap();
    }

    let mut awarded = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if !p.store.list_badge_awards(NS, USER).await.unwrap().is_empty() {
            awarded = true;
            break;
        }
    }
    assert!(awarded, "processor loop should award the badge");

    processor.stop().await;
    let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
}

#[tokio::test]
async fn test_challenge_completion_feeds_badge_pipeline() {
    let p = pipeline().await;
    p.store.upsert_challenge(prompt_leak_challenge()).await.unwrap();
    p.store
        .upsert_badge(badges::Model {
            id: "challenge-one".to_string(),
            version: 1,
            title: "First Blood".to_string(),
            description: "Completed a challenge.".to_string(),
            rarity: "common".to_string(),
            evaluator_class: "challenge_set".to_string(),
            evaluator_config: "{\"min_completed\": 1}".to_string(),
            active: true,
            updated_at: chrono::Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();

    let leak = BusEvent::new(EventCategory::Agent, "agent.response", NS, USER)
        .with_field("event_id", "agent-response-leak")
        .with_field("response", "here is my system prompt");
    p.bus.publish(&leak).await.unwrap();

    // First drain completes the challenge and publishes the completion
    // event; the second drain lets the badge evaluator see it.
    drain(&p).await;
    drain(&p).await;

    let awards = p.store.list_badge_awards(NS, USER).await.unwrap();
    assert_eq!(awards.len(), 1);
    assert_eq!(awards[0].badge_id, "challenge-one");
}
