use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use totalip_relay::cli::Args;
use totalip_relay::resilience::ResilienceConfig;
use totalip_relay::{
    BridgeConfig, EventConduit, HttpForwardingConsumer, Listener, LocalClock, PublishingApiClient,
    WorkingHoursGate,
};

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Resolve on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_directive())),
        )
        .init();

    let cfg = BridgeConfig::load(args.config.as_deref())?;

    if args.check {
        println!("{}", cfg.redacted_summary());
        return Ok(());
    }

    let max_concurrent = args.effective_concurrency(cfg.max_concurrent_deliveries);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %cfg.socket_server_host,
        port = cfg.socket_server_port,
        publish_url = %cfg.publish_url(),
        max_concurrent,
        "totalip-relay starting"
    );

    let api = PublishingApiClient::builder(cfg.publish_url(), cfg.publishing_api_key.clone()).build()?;
    let conduit = EventConduit::new(cfg.conduit_capacity);

    // Two tokens: the listener stops first, deliveries get a grace period.
    let listener_cancel = CancellationToken::new();
    let delivery_cancel = CancellationToken::new();

    let consumer = Arc::new(HttpForwardingConsumer::new(api, delivery_cancel.clone()));
    let dispatcher = conduit.subscribe(max_concurrent, consumer, delivery_cancel.clone());

    {
        let listener_cancel = listener_cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            listener_cancel.cancel();
        });
    }

    let listener = Listener::from_config(&cfg, conduit.clone());
    let gate = cfg
        .enforce_working_hours
        .then(|| WorkingHoursGate::new(cfg.working_hours, LocalClock));
    listener
        .run(gate, ResilienceConfig::default(), listener_cancel)
        .await;

    if let Err(e) = conduit
        .close_and_drain(dispatcher, cfg.shutdown_grace, &delivery_cancel)
        .await
    {
        error!(error = %e, "Delivery dispatcher panicked");
    }

    let stats = conduit.stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        failed = stats.failed,
        cancelled = stats.cancelled,
        "totalip-relay stopped"
    );
    Ok(())
}
