use batch_doc_generator::config::ServiceConfig;
use batch_doc_generator::infrastructure::storage;
use batch_doc_generator::services::worker::StagingJanitor;
use batch_doc_generator::{AppState, create_app};
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Bind all interfaces and serve clients directly
    Standalone,
    /// Bind loopback only, behind a co-located request dispatcher
    Managed,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// How the server is exposed
    #[arg(short, long, value_enum, env = "RUN_MODE", default_value = "standalone")]
    mode: RunMode,

    /// Port for the API server
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batch_doc_generator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting document generator [Mode: {:?}]...", args.mode);

    let config = match args.mode {
        RunMode::Standalone => ServiceConfig::from_env(),
        RunMode::Managed => ServiceConfig::production(),
    };
    info!(
        "⚙️  Config: Max Size={}MB, Compression={}, Janitor={}",
        config.max_file_size / 1024 / 1024,
        config.compression_level,
        config.enable_staging_janitor
    );

    // 2. Staging
    let storage_service = storage::setup_storage(&config).await;

    // 3. Shutdown channel & janitor
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let janitor_handle = if config.enable_staging_janitor {
        let janitor = StagingJanitor::new(
            storage_service.clone(),
            config.staging_cleanup_age_hours,
            config.staging_sweep_interval_secs,
            shutdown_rx.clone(),
        );
        info!("🧹 Staging janitor initialized.");
        Some(tokio::spawn(janitor.run()))
    } else {
        None
    };

    // 4. API
    let state = AppState::new(storage_service, config);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);

    let ip = match args.mode {
        RunMode::Standalone => Ipv4Addr::UNSPECIFIED,
        RunMode::Managed => Ipv4Addr::LOCALHOST,
    };
    let addr = SocketAddr::from((ip, args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://{}", addr);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", args.port);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    // 5. Stop background work
    info!("🛑 Shutting down services...");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = janitor_handle {
        let _ = handle.await;
    }

    info!("👋 Exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
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
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
