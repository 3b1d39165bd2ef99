use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seatmap::{config::Config, controllers, reconciler::drive_feed, store::SeatStore, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Seatmap API");

    // Resolve identity and fetch the seat snapshot before serving anything
    let state = AppState::new(config.clone()).await?;
    info!("Seat snapshot loaded");

    // Open the change subscription and fold events into the reconciler
    let (feed, subscription) = state.store.subscribe().await?;
    let driver = drive_feed(state.reconciler.clone(), feed);

    let app = Router::new()
        .route("/", get(|| async { "Seatmap API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.app.host, config.app.port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release the live subscription before exiting; the driver task ends
    // once the feed channel closes
    subscription.unsubscribe();
    driver.await.ok();
    info!("Seatmap API stopped");

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
}
