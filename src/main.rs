use axum::{routing::get, Router};
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use myroute_ledger::{
    config::Config,
    controllers,
    database::Database,
    redis_client::RedisClient,
    services::{BroadcastNotifier, Notifier, RedisNotifier},
    store::PgStore,
    AppState, Ledger,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting MyRoute ledger");

    // Connect to the database
    let db = Database::new(&config.database).await?;
    info!("Database connected");

    // Run migrations
    db.run_migrations().await?;

    // Notifications: Redis if configured, otherwise an in-process channel
    let notifier: Arc<dyn Notifier> = match config.redis.url.as_deref() {
        Some(url) => {
            let redis = RedisClient::new(url).await?;
            Arc::new(RedisNotifier::new(redis, config.redis.channel.clone()))
        }
        None => {
            warn!("REDIS_URL is not set, notifications stay in-process");
            Arc::new(BroadcastNotifier::default())
        }
    };

    let store = Arc::new(PgStore::new(db.pool.clone(), config.ledger.lock_timeout()));
    let ledger = Ledger::new(
        store,
        notifier,
        config.ledger.retry_policy(),
        config.policy.trip_policy()?,
    );

    // Create the shared application state
    let app_state = Arc::new(AppState { ledger });

    // Create the main router
    let app = Router::new()
        .route("/", get(|| async { "MyRoute ledger v0.1" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let ip: std::net::IpAddr = config.app.host.parse()?;
    let addr = SocketAddr::new(ip, config.app.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
