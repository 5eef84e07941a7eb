use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::Store;
use crate::events::{EventBus, EventProcessor, RedisStreamTransport, StreamTransport};
use crate::rules::RuleRegistry;
use crate::rules::definitions::DefinitionLoader;
use crate::services::{BadgeService, ChallengeService, MagicLinkService};
use crate::session::SessionManager;

/// Dependency-injected service graph with lifecycle tied to process
/// start/stop. Tests build one against an isolated store and an in-memory
/// transport instead of relying on process-wide state.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub transport: Arc<dyn StreamTransport>,

    pub bus: EventBus,

    pub sessions: Arc<SessionManager>,

    pub registry: Arc<RuleRegistry>,

    pub challenges: Arc<ChallengeService>,

    pub badges: Arc<BadgeService>,

    pub magic_links: Arc<MagicLinkService>,

    pub definitions: Arc<DefinitionLoader>,

    pub processor: Arc<EventProcessor>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let transport: Arc<dyn StreamTransport> =
            Arc::new(RedisStreamTransport::connect(&config.events.redis_url).await?);
        Self::with_transport(config, transport).await
    }

    pub async fn with_transport(
        config: Config,
        transport: Arc<dyn StreamTransport>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let bus = EventBus::new(transport.clone(), config.events.stream_max_len);

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            config.session.clone(),
            &config.security.master_secret,
        ));

        // Rule classes are compiled in; registration is an explicit startup
        // step so initialization order stays deterministic.
        let registry = Arc::new(RuleRegistry::with_builtins());

        let challenges = Arc::new(ChallengeService::new(
            store.clone(),
            registry.clone(),
            Some(bus.clone()),
        ));
        let badges = Arc::new(BadgeService::new(
            store.clone(),
            registry.clone(),
            Some(bus.clone()),
        ));

        let magic_links = Arc::new(MagicLinkService::new(
            store.clone(),
            sessions.clone(),
            config.security.magic_link_ttl_minutes,
        ));

        let definitions = Arc::new(DefinitionLoader::new(
            config.challenges.definitions_path.clone(),
            store.clone(),
        ));

        let processor = Arc::new(EventProcessor::new(
            transport.clone(),
            store.clone(),
            challenges.clone(),
            badges.clone(),
            config.events.clone(),
            config.consumer_name(),
        ));

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            transport,
            bus,
            sessions,
            registry,
            challenges,
            badges,
            magic_links,
            definitions,
            processor,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
