//! Realtime fan-out hub server binary.
//!
//! Boot sequence (§9's "global mutable state" design note: everything is
//! constructed once here and injected, rather than reached for as a
//! module-scoped singleton):
//! 1. Load and validate [`fanhub_config::HubConfig`] from the environment;
//!    a malformed or inconsistent config aborts the process (§7.6, a
//!    cold-path fatal error).
//! 2. Connect the durable bus (`lapin`) and the pub/sub bus (`redis`),
//!    declare topology on the durable side.
//! 3. Build the shared channel pool, spawn the egress worker pool, the
//!    channel-fleet idle sweeper, and the two cross-instance ingress
//!    consumers.
//! 4. Construct the [`fanhub_core::Hub`] and the Axum router, bind, serve.
//! 5. On SIGINT/SIGTERM: stop accepting registrations, cancel every rooted
//!    task, drain the egress workers, close the pool and bus connections
//!    (§8 scenario 6).

mod auth;
mod cli;
mod collaborators;
mod monitoring;
mod origin;
mod state;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::get,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use fanhub_config::HubConfig;
use fanhub_core::channel_fleet::UserChannelFleet;
use fanhub_core::channel_pool::SharedChannelPool;
use fanhub_core::client::ClientConfig;
use fanhub_core::dispatcher::Dispatcher;
use fanhub_core::hub::Hub;
use fanhub_core::ingress;
use fanhub_core::topology;
use fanhub_core::transport::{PubSubBus, spawn_egress_workers};
use fanhub_protocol::{Envelope, topic};

use crate::cli::Cli;
use crate::collaborators::AllowAllAccess;
use crate::origin::OriginPolicy;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = HubConfig::from_env().unwrap_or_else(|err| {
        tracing::error!(%err, "invalid configuration, aborting");
        std::process::exit(1);
    });

    let metrics_handle = fanhub_metrics::install_prometheus_recorder()
        .inspect_err(|err| tracing::warn!(%err, "failed to install prometheus recorder"))
        .ok();

    let durable_conn = connect_durable_bus(&config).await.unwrap_or_else(|err| {
        tracing::error!(%err, "failed to connect to durable bus, aborting");
        std::process::exit(1);
    });
    let pubsub = Arc::new(PubSubBus::connect(&config.pubsub_url).unwrap_or_else(|err| {
        tracing::error!(%err, "failed to configure pub/sub bus, aborting");
        std::process::exit(1);
    }));

    let cancel = CancellationToken::new();

    let topology_channel = durable_conn.create_channel().await.unwrap_or_else(|err| {
        tracing::error!(%err, "failed to open topology channel, aborting");
        std::process::exit(1);
    });

    let channel_fleet = Arc::new(UserChannelFleet::new(durable_conn.clone(), config.bus_prefetch));
    let pool = Arc::new(
        SharedChannelPool::new(durable_conn.clone(), config.bus_pool_size)
            .await
            .unwrap_or_else(|err| {
                tracing::error!(%err, "failed to initialize shared channel pool, aborting");
                std::process::exit(1);
            }),
    );
    let (egress_handle, egress_workers) = spawn_egress_workers(pool.clone(), &config, cancel.clone());

    let hub = Hub::new(config.clone(), channel_fleet.clone(), pubsub.clone(), egress_handle, cancel.clone());

    let instance_queue = topology::declare_instance_queue(&topology_channel, &config, &hub.instance_id)
        .await
        .unwrap_or_else(|err| {
            tracing::error!(%err, "failed to declare instance topology, aborting");
            std::process::exit(1);
        });

    let sweeper = channel_fleet.clone().spawn_sweeper(
        Duration::from_secs(config.sweep_interval_sec),
        Duration::from_secs(config.idle_channel_timeout_sec),
        cancel.clone(),
    );

    let chat_ingress = tokio::spawn(ingress::run_chat_ingress(
        hub.clone(),
        topology_channel.clone(),
        instance_queue.clone(),
    ));

    let board_ingress = {
        let hub = hub.clone();
        pubsub.clone().spawn_board_ingress(topic::BOARD_PATTERN, cancel.clone(), move |board_id, payload| {
            let hub = hub.clone();
            tokio::spawn(async move {
                match serde_json::from_slice::<Envelope>(&payload) {
                    Ok(envelope) if !envelope.is_from_instance(&hub.instance_id) => {
                        hub.deliver_board_ingress(&board_id, envelope.frame).await;
                    }
                    Ok(_) => {} // self-filtered: already delivered locally on egress
                    Err(err) => tracing::warn!(%err, board_id, "malformed board ingress envelope, discarding"),
                }
            });
        })
    };

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(AllowAllAccess),
        Arc::new(AllowAllAccess),
        Arc::new(fanhub_core::EchoDomainHandler),
    ));

    let state = AppState {
        hub: hub.clone(),
        dispatcher,
        client_config: ClientConfig::from_hub_config(&config),
        origin_policy: OriginPolicy::new(cli.allowed_origins.clone(), cli.dev_allow_any_origin),
        metrics_handle,
    };

    let app = Router::new()
        .route("/ws", get(ws::upgrade_handler))
        .route("/healthz", get(monitoring::healthz))
        .route("/metrics", get(monitoring::prometheus_metrics))
        .route("/stats/channels", get(monitoring::active_channels))
        .route("/stats/channels/{principal}", get(monitoring::channel_stats_for_principal))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    tracing::info!(bind = %cli.bind, instance_id = %hub.instance_id, "fanhub-server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown signal received, draining");
    hub.shutdown().await;
    cancel.cancel();
    for worker in egress_workers {
        let _ = tokio::time::timeout(Duration::from_secs(config.publish_deadline_sec), worker).await;
    }
    let _ = chat_ingress.await;
    let _ = board_ingress.await;
    sweeper.abort();
    pool.close().await;
    let _ = durable_conn.close(0, "graceful shutdown").await;

    Ok(())
}

async fn connect_durable_bus(config: &HubConfig) -> Result<lapin::Connection, lapin::Error> {
    lapin::Connection::connect(&config.bus_url, lapin::ConnectionProperties::default()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            return;
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
