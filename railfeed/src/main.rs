//! Subscribe to one Network Rail feed topic and store every message as table rows.
use envconfig::Envconfig;
use railfeed::client::FeedClient;
use railfeed::config::Config;
use railfeed::error::FeedError;
use railfeed_common::health::HealthRegistry;
use railfeed_common::metrics::{serve, setup_metrics_router};
use railfeed_common::topics::TopicRegistry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

async fn shutdown(token: CancellationToken) {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
        _ = token.cancelled() => return,
    };

    tracing::info!("Shutting down gracefully...");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<(), FeedError> {
    // stdout with a level configured by the RUST_LOG envvar (default=INFO)
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env().expect("Invalid configuration:");
    let registry = TopicRegistry::default();
    let liveness = HealthRegistry::new("liveness");

    let mut client = FeedClient::new(&config, &registry, liveness.clone()).await?;

    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_metrics_router(liveness).expect("failed to install metrics recorder");
        serve(router, &bind).await.expect("failed to start serving metrics");
    });

    let token = CancellationToken::new();
    tokio::task::spawn(shutdown(token.clone()));

    let result = client.run(token.clone()).await;
    token.cancel();
    result
}
