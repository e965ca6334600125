use std::sync::Arc;

use sim_automation::{AiCaller, Scheduler};
use sim_bus::EventBus;
use sim_bus::SubscriberHub;
use sim_engine::Engine;
use sim_ingest::Ingestor;
use sim_store::postgres::PostgresStore;
use sim_store::Store;
use sim_types::Config;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(port = config.server_port, "starting simulation platform");

    let store: Arc<dyn Store> = {
        let pg = PostgresStore::connect(&config.database_url()).await?;
        pg.migrate().await?;
        Arc::new(pg)
    };

    let bus = Arc::new(EventBus::new());
    let hub = Arc::new(SubscriberHub::new());
    let engine = Arc::new(Engine::new(store.clone(), bus.clone(), config.max_concurrent_simulations));
    let ai = Arc::new(AiCaller::new(config.ai_endpoint.clone(), config.ai_api_key.clone(), config.ai_model.clone()));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        bus.clone(),
        engine.clone(),
        ai.clone(),
        config.strategies_per_interval,
        config.max_concurrent_simulations,
    ));

    let shutdown = CancellationToken::new();

    let scheduler_handles = if config.automation_enabled {
        Some(scheduler.clone().spawn(
            config.strategy_gen_interval,
            config.performance_analysis_interval,
            shutdown.clone(),
        ))
    } else {
        tracing::info!("automation disabled via AUTOMATION_ENABLED=false");
        None
    };

    let (ingestor, mut channels) = Ingestor::new();
    let ingestor_shutdown = shutdown.clone();
    let ingestor_url = config.websocket_url.clone();
    let ingestor_handle = tokio::spawn(async move { ingestor.run(ingestor_url, ingestor_shutdown).await });

    let fan_out_engine = engine.clone();
    let fan_out_shutdown = shutdown.clone();
    let fan_out_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = fan_out_shutdown.cancelled() => return,
                Some(event) = channels.token_events.recv() => {
                    if let Err(e) = fan_out_engine.ingest_and_fan_out(event).await {
                        tracing::warn!(error = %e, "failed to process tokenCreated event");
                    }
                }
                Some(event) = channels.trade_events.recv() => {
                    if let Err(e) = fan_out_engine.ingest_and_fan_out(event).await {
                        tracing::warn!(error = %e, "failed to process tradeCreated event");
                    }
                }
                else => return,
            }
        }
    });

    let bridge_hub = hub.clone();
    let mut bus_rx = bus.subscribe();
    let bridge_shutdown = shutdown.clone();
    let bridge_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = bridge_shutdown.cancelled() => return,
                event = bus_rx.recv() => match event {
                    Ok(event) => bridge_hub.broadcast(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber bridge lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    });

    let sweep_hub = hub.clone();
    let sweep_shutdown = shutdown.clone();
    let sweep_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sim_api::HUB_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = sweep_shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    sweep_hub.sweep_stale();
                }
            }
        }
    });

    let state = Arc::new(sim_api::AppState { store, bus, hub, engine: engine.clone(), ai, scheduler });
    let app = sim_api::build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "http surface listening");

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown_signal = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("shutting down: draining simulations and background tasks");
    shutdown.cancel();
    engine.shutdown().await;

    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), ingestor_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), fan_out_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), bridge_handle).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), sweep_handle).await;
    if let Some(handles) = scheduler_handles {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(10), handles.strategy_generation).await;
        let _ = tokio::time::timeout(std::time::Duration::from_secs(10), handles.performance_analysis).await;
        let _ = tokio::time::timeout(std::time::Duration::from_secs(10), handles.simulation_seeding).await;
    }

    Ok(())
}
