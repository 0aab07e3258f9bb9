use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use models::AppState;
use opentelemetry::trace::TracerProvider;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod db;
mod handlers;
mod models;
mod services;

#[tokio::main]
async fn main() {
    // Create a new OpenTelemetry trace pipeline that prints to stdout
    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();

    let tracer = provider.tracer("hookrelay");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookrelay=debug,tower_http=debug,otel=debug".into()),
        )
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::new().await;
    tokio::join!(start_http_server(&state), start_poller_service(&state));

    println!("->> SHUTDOWN")
}

async fn start_http_server(state: &Arc<AppState>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], 8100));
    let app = Router::new()
        .merge(handlers::live::routes(Arc::clone(state)))
        .merge(handlers::jobs::routes(Arc::clone(state)))
        .merge(handlers::process::routes(Arc::clone(state)))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Unable to bind listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(state)))
        .await
        .expect("Failed to run http server");
}

async fn start_poller_service(state: &Arc<AppState>) {
    let app_state = Arc::clone(state);
    let service = services::PollerService::new(app_state);
    service.run().await.expect("Failed to run PollerService");
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    state.shutdown_token.cancel();
    tracing::warn!("signal received, starting graceful shutdown");
}
