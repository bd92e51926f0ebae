use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

mod app;
mod dispatch;
mod http;
mod limiter;
mod queue;
mod session;
mod ws;

use app::{AppState, CoreDispatchAdapter, EngineWindowOracle};
use vigil_alerts::{AlertPipeline, AlertStore};
use vigil_core::config::{RelayConfig, SHUTDOWN_DRAIN_SECS};
use vigil_core::Severity;
use vigil_roster::RosterStore;
use vigil_schedule::{PreServiceScheduler, ScheduleEngine, WindowEdge};
use vigil_telegram::{TelegramAdapter, TelegramNotifier};
use vigil_venues::{db as venue_db, VenueStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil_relay=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("VIGIL_RELAY_CONFIG").ok();
    let config = RelayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        RelayConfig::default()
    });

    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // One SQLite file, separate connections per store — WAL keeps readers
    // flowing while any single store writes.
    let venues = Arc::new(VenueStore::new(
        venue_db::open(&config.database_path)?,
        config.token_secret.clone(),
    )?);
    let alerts = Arc::new(AlertStore::new(venue_db::open(&config.database_path)?)?);
    let roster = Arc::new(RosterStore::new(venue_db::open(&config.database_path)?)?);

    let core = dispatch::DispatchCore::new();
    let schedule = Arc::new(ScheduleEngine::new(Arc::clone(&venues)));

    let notifier = TelegramNotifier::new(
        config.telegram_bot_token.as_deref(),
        config.admin_chat_id,
        Arc::clone(&venues),
        Arc::clone(&roster),
    );

    let pipeline = AlertPipeline::new(
        Arc::clone(&alerts),
        Arc::clone(&venues),
        notifier.clone(),
        Arc::new(CoreDispatchAdapter(Arc::clone(&core))),
        Arc::new(EngineWindowOracle(Arc::clone(&schedule))),
    );

    // Window edges feed the pipeline: a closing window files the
    // service-ended marker so the alert history brackets every service.
    {
        let pipeline = Arc::clone(&pipeline);
        schedule.on_edge(move |venue_id, edge| {
            if edge == WindowEdge::Close {
                let pipeline = Arc::clone(&pipeline);
                let venue_id = venue_id.clone();
                tokio::spawn(async move {
                    let _ = pipeline
                        .handle(
                            &venue_id,
                            Some("service_ended"),
                            Severity::Info,
                            "Service window closed",
                            serde_json::Value::Null,
                        )
                        .await;
                });
            }
        });
    }

    let state = AppState::new(
        config.clone(),
        Arc::clone(&venues),
        Arc::clone(&alerts),
        Arc::clone(&roster),
        Arc::clone(&pipeline),
        Arc::clone(&schedule),
        Arc::clone(&core),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(Arc::clone(&schedule).run(shutdown_rx.clone()));

    let prechecks = Arc::new(PreServiceScheduler::new(
        Arc::clone(&venues),
        Arc::new(CoreDispatchAdapter(Arc::clone(&core))),
        notifier.clone(),
    ));
    tokio::spawn(prechecks.run(shutdown_rx.clone()));

    // Daily sweeps: expired guest tokens and stale swap requests.
    {
        let roster = Arc::clone(&roster);
        let state = Arc::clone(&state);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = roster.sweep_expired_guests() {
                            warn!("guest sweep failed: {e}");
                        }
                        state.swaps.sweep();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    if let Some(bot_token) = config.telegram_bot_token.as_deref() {
        let adapter = TelegramAdapter::new(bot_token, Arc::clone(&state));
        tokio::spawn(adapter.run());
    } else {
        warn!("no Telegram bot token configured — chat surface disabled");
    }

    let router = http::build_router(Arc::clone(&state));
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port).parse()?;
    info!(%addr, "vigil relay listening");

    // Shutdown order matters: waiters must drain and sessions must cancel
    // BEFORE the server waits out its connections, or open WS legs keep the
    // graceful shutdown hanging past the 5-second budget.
    let graceful = {
        let core = Arc::clone(&core);
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            let _ = shutdown_tx.send(true);
            core.drain_shutdown();
            // Let session writer tasks flush their close frames.
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_DRAIN_SECS.min(1))).await;
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(graceful)
        .await?;
    Ok(())
}
