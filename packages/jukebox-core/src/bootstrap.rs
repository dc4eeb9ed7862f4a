//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. The provider and the store
//! are injected so the server can pick a backend and tests can use doubles.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, ServerError, WsConnectionManager};
use crate::error::{JukeboxError, JukeboxResult};
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::protocol_constants::PROVIDER_HTTP_TIMEOUT_SECS;
use crate::provider::{ProviderClient, ProviderPlayback};
use crate::runtime::TokioSpawner;
use crate::services::{QueueReconciler, QueueService, ReconcilerConfig, VoteConfig, VoteManager};
use crate::state::Config;
use crate::store::{BanStore, JukeboxStore, MetadataStore};

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Queue facade used by the API layer.
    pub queue_service: Arc<QueueService>,
    /// Background reconciler, shared with the queue facade.
    pub reconciler: Arc<QueueReconciler>,
    /// Owner of the active ban vote.
    pub vote_manager: Arc<VoteManager>,
    /// Banned-track list.
    pub bans: Arc<dyn BanStore>,
    /// Event bridge for emitting events to WebSocket/SSE and optional external consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Manages WebSocket connections and presence.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Starts the periodic reconciliation loop.
    pub fn start_background_tasks(&self) {
        let interval = Duration::from_millis(self.config.read().sync_interval_ms);
        Arc::clone(&self.reconciler).start_sync_loop(
            interval,
            self.cancel_token.clone(),
            &self.spawner,
        );
    }

    /// Builds the API state from the wired services.
    pub fn app_state(&self) -> Result<AppState, ServerError> {
        AppState::builder()
            .queue_service(Arc::clone(&self.queue_service))
            .vote_manager(Arc::clone(&self.vote_manager))
            .bans(Arc::clone(&self.bans))
            .event_bridge(Arc::clone(&self.event_bridge))
            .ws_manager(Arc::clone(&self.ws_manager))
            .config(Arc::clone(&self.config))
            .build()
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to the sync loop and the HTTP server
        self.cancel_token.cancel();

        // Drop any open vote without emitting an outcome
        self.vote_manager.shutdown();

        let closed = self.ws_manager.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", closed);
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for provider communication.
///
/// Using a shared client enables connection pooling for better performance.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn create_http_client() -> JukeboxResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(PROVIDER_HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|e| JukeboxError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together, in dependency order:
///
/// 1. Shared infrastructure (event bridge, cancellation token, spawner)
/// 2. Reconciler (depends on provider reads, metadata store, events)
/// 3. Queue facade (depends on provider, store, reconciler, events)
/// 4. Vote manager (depends on ban store, events, spawner)
/// 5. WebSocket connection manager (depends on events for presence)
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`JukeboxError::Configuration`] if `config` fails validation.
pub fn bootstrap_services<P, S>(
    config: Config,
    provider: Arc<P>,
    store: Arc<S>,
) -> JukeboxResult<BootstrappedServices>
where
    P: ProviderClient + 'static,
    S: JukeboxStore + 'static,
{
    config.validate().map_err(JukeboxError::Configuration)?;

    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();

    // Create the event bridge that maps domain events to broadcast transport
    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    let emitter = Arc::clone(&event_bridge) as Arc<dyn EventEmitter>;

    let reconciler = Arc::new(QueueReconciler::new(
        Arc::clone(&provider) as Arc<dyn ProviderPlayback>,
        Arc::clone(&store) as Arc<dyn MetadataStore>,
        Arc::clone(&emitter),
        ReconcilerConfig {
            provider_timeout: Duration::from_millis(config.provider_timeout_ms),
            provider_attribution: config.provider_attribution.clone(),
        },
    ));

    let queue_service = Arc::new(QueueService::new(
        Arc::clone(&provider) as Arc<dyn ProviderClient>,
        Arc::clone(&store) as Arc<dyn JukeboxStore>,
        Arc::clone(&reconciler),
        Arc::clone(&emitter),
    ));

    let bans = Arc::clone(&store) as Arc<dyn BanStore>;
    let vote_manager = VoteManager::new(
        Arc::clone(&bans),
        Arc::clone(&emitter),
        VoteConfig {
            duration: Duration::from_secs(config.vote_duration_secs),
            min_online: u32::try_from(config.min_online_for_vote).unwrap_or(u32::MAX),
        },
        spawner.clone(),
    );

    let ws_manager = Arc::new(WsConnectionManager::new(emitter));

    log::info!(
        "[Bootstrap] Services ready (sync every {}ms, votes {}s, min online {})",
        config.sync_interval_ms,
        config.vote_duration_secs,
        config.min_online_for_vote
    );

    Ok(BootstrappedServices {
        queue_service,
        reconciler,
        vote_manager,
        bans,
        event_bridge,
        ws_manager,
        config: Arc::new(RwLock::new(config)),
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_fixtures::{MockProvider, TRACK_A};
    use crate::store::InMemoryStore;

    #[test]
    fn http_client_builds() {
        let client = create_http_client().unwrap();
        assert!(client.get("http://example.com").build().is_ok());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = Config {
            sync_interval_ms: 0,
            ..Config::default()
        };
        let result = bootstrap_services(
            config,
            Arc::new(MockProvider::new()),
            Arc::new(InMemoryStore::new()),
        );
        assert!(matches!(result, Err(JukeboxError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_loop_feeds_the_queue_view_until_shutdown() {
        let provider = Arc::new(MockProvider::with_state(Some(TRACK_A), &[]));
        let services = bootstrap_services(
            Config::default(),
            Arc::clone(&provider),
            Arc::new(InMemoryStore::new()),
        )
        .unwrap();
        let mut events = services.event_bridge.subscribe();

        services.start_background_tasks();
        let first = events.recv().await.unwrap();
        assert_eq!(first.event_name(), "queueUpdate");
        assert_eq!(
            services.queue_service.get_current_state().current_uri(),
            Some(TRACK_A)
        );

        services.shutdown().await;
        assert!(services.cancel_token.is_cancelled());
        assert!(services.app_state().is_ok());
    }
}
