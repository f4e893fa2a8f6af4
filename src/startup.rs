//! Application Startup
//!
//! Application building, shared state, and server initialization. Also owns
//! the outbound dispatcher task that drains routed events from the services
//! into the session registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::application::events::Outbound;
use crate::application::services::{DeliveryService, PresenceService};
use crate::config::Settings;
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    PgConversationRepository, PgIdentityRepository, PgMessageRepository,
};
use crate::presentation::http::handlers::health;
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::SessionRegistry;
use crate::shared::snowflake::SnowflakeGenerator;

/// Concrete delivery pipeline wired against Postgres and the registry.
pub type Delivery = DeliveryService<
    PgMessageRepository,
    PgConversationRepository,
    PgIdentityRepository,
    SessionRegistry,
>;

/// Concrete presence broadcaster.
pub type Presence = PresenceService<PgIdentityRepository>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub snowflake: Arc<SnowflakeGenerator>,
    pub registry: Arc<SessionRegistry>,
    pub delivery: Arc<Delivery>,
    pub presence: Arc<Presence>,
    pub identities: Arc<PgIdentityRepository>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");

        database::run_migrations(&db).await?;
        tracing::info!("Database migrations applied");

        let snowflake = Arc::new(SnowflakeGenerator::new(
            settings.snowflake.machine_id as u64,
            settings.snowflake.epoch,
        ));

        let registry = Arc::new(SessionRegistry::new());

        // Everything the services fan out flows through this channel into
        // the registry; per-conversation ordering is preserved because the
        // services enqueue while holding the conversation lock.
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                while let Some(outbound) = outbound_rx.recv().await {
                    registry.dispatch(&outbound);
                }
            });
        }

        let message_repo = Arc::new(PgMessageRepository::new(db.clone()));
        let conversation_repo = Arc::new(PgConversationRepository::new(db.clone()));
        let identity_repo = Arc::new(PgIdentityRepository::new(db.clone()));

        let delivery = Arc::new(DeliveryService::new(
            message_repo,
            conversation_repo,
            Arc::clone(&identity_repo),
            Arc::clone(&registry),
            Arc::clone(&snowflake),
            outbound_tx.clone(),
        ));

        let presence = Arc::new(PresenceService::new(
            Arc::clone(&identity_repo),
            Duration::from_millis(settings.gateway.typing_ttl_ms),
            outbound_tx,
        ));

        health::init_server_start();

        let state = AppState {
            db,
            snowflake,
            registry,
            delivery,
            presence,
            identities: identity_repo,
            settings: Arc::new(settings.clone()),
        };

        let router = crate::presentation::http::routes::create_router(state)
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        let addr = SocketAddr::from(([0, 0, 0, 0], settings.server.port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self { listener, router })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
