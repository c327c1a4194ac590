use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::{ExpirySweeper, PaymentPoller, ReconciliationEngine};
use appointment_cell::LifecycleState;
use shared_config::AppConfig;
use shared_database::{DbHandle, PgStore};
use shared_utils::notification::{LogNotifier, Notifier, WebhookNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic check-in API server");

    let config = Arc::new(AppConfig::from_env());

    let pg = PgStore::connect(&config).await.context("connecting to the database")?;
    pg.migrate().await.context("running migrations")?;
    let store: DbHandle = Arc::new(pg);

    let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone(), Duration::from_secs(config.gateway_timeout_secs))
                .context("building notification client")?,
        ),
        None => {
            warn!("NOTIFICATION_WEBHOOK_URL not set, notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let state = LifecycleState::new(Arc::clone(&config), Arc::clone(&store), notifier)
        .context("building payment gateway client")?;

    // Background jobs
    let (stop, shutdown) = watch::channel(false);
    let sweeper = ExpirySweeper::new(
        Arc::clone(&store),
        Duration::from_secs(config.sweeper_interval_secs),
    )
    .spawn(shutdown.clone());
    let poller = PaymentPoller::new(
        Arc::clone(&store),
        Arc::new(ReconciliationEngine::new(&state)),
        Duration::from_secs(config.payment_poll_interval_secs),
        chrono::Duration::seconds(config.payment_poll_min_age_secs),
    )
    .spawn(shutdown);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        })
        .await
        .context("serving HTTP")?;

    let _ = stop.send(true);
    let _ = tokio::join!(sweeper, poller);
    info!("Background jobs stopped");

    Ok(())
}
