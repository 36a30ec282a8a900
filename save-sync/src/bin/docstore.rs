use axum::http::{header, Method};
use save_sync::api::{self, ApiState};
use save_sync::config::{load_env_file, DocstoreConfig};
use save_sync::FileBackend;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "save_sync=debug,docstore=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    load_env_file();
    let config = DocstoreConfig::from_env();

    tokio::fs::create_dir_all(&config.data_dir).await?;
    tracing::info!(
        bind = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        "Starting document store"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600));

    let state = ApiState::new(Arc::new(FileBackend::new(config.data_dir)));
    let app = api::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Document store listening");
    axum::serve(listener, app).await?;
    Ok(())
}
