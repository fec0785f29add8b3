//! Prediction simulation driver
//!
//! Runs a client session against a simulated authoritative server that lags,
//! rejects some commands and changes the world on its own, then prints the
//! session statistics as JSON.

use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prediction_sync::config::SimConfig;
use prediction_sync::engine::ReconciledEvent;
use prediction_sync::protocol::{ClientMsg, PlayerId};
use prediction_sync::session::{ClientSession, SessionHandle};
use prediction_sync::sim::{random_command, SimulatedServer};
use prediction_sync::util::time::{unix_millis, SIMULATION_TPS, TICK_DURATION_MICROS};

const LOCAL_PLAYER: PlayerId = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = SimConfig::from_env()?;
    init_tracing(&config.log_level);

    info!(
        seed = config.seed,
        ticks = config.ticks,
        reject_rate = config.reject_rate,
        ack_delay_ticks = config.ack_delay_ticks,
        "Starting prediction simulation"
    );

    let mut server = SimulatedServer::new(config.seed, config.reject_rate, config.ack_delay_ticks);
    let (session, handle) = ClientSession::new(config.reconciliation.clone());
    let session_task = tokio::spawn(session.run());
    let telemetry = spawn_telemetry(handle.subscribe());

    handle.initialize(server.state().clone(), server.tick()).await?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));
    let mut interval = tokio::time::interval(Duration::from_micros(TICK_DURATION_MICROS));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    for tick in 0..config.ticks {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => break,
        }

        for _ in 0..config.commands_per_tick {
            let current = handle.current_state().await?;
            let command = random_command(&mut rng, &current, LOCAL_PLAYER);
            handle.predict(command.clone()).await?;
            server.receive(ClientMsg::Command { command });
        }

        if tick % u64::from(SIMULATION_TPS) == 0 {
            for reply in server.receive(ClientMsg::Ping { t: unix_millis() }) {
                handle.handle_server_msg(reply).await?;
            }
        }

        for msg in server.step() {
            handle.handle_server_msg(msg).await?;
        }
    }

    let stats = handle.stats().await?;
    finish(handle, session_task, telemetry).await?;

    info!(
        predictions = stats.engine.total_predictions,
        accuracy = stats.engine.accuracy(),
        rollbacks = stats.engine.rollbacks_performed,
        avg_latency_ms = stats.engine.average_latency_ms,
        "Simulation complete"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn finish(
    handle: SessionHandle,
    session_task: JoinHandle<()>,
    telemetry: JoinHandle<u64>,
) -> anyhow::Result<()> {
    handle.shutdown().await?;
    drop(handle);
    session_task.await?;
    let rollbacks = telemetry.await?;
    info!(rollbacks, "Telemetry closed");
    Ok(())
}

/// Log every rollback; returns the count once the session is gone
fn spawn_telemetry(mut events: broadcast::Receiver<ReconciledEvent>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut rollbacks = 0;
        loop {
            match events.recv().await {
                Ok(event) if event.rollback_occurred => {
                    rollbacks += 1;
                    info!(
                        tick = event.server_tick,
                        score = event.divergence_score,
                        "Rollback"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Telemetry lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        rollbacks
    })
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping simulation");
        }
        _ = terminate => {
            info!("Received terminate signal, stopping simulation");
        }
    }
}
