//! Market-microstructure analytics engine binary.
//!
//! Spawns one [`TradingEngine`] per configured symbol, each wired to the
//! `Null*` collaborator doubles from `engine::traits` — this binary is the
//! runnable shape of the engine loop, not a live exchange deployment. A real
//! deployment swaps the `Arc<dyn SnapshotSource>` / `Arc<dyn IngestionSource>`
//! / `Arc<dyn DerivativesSource>` / `Arc<dyn PersistenceSink>` arguments for
//! adapters that live outside this crate.

use std::sync::Arc;

use chrono::Utc;
use microstructure_engine::config::get_config;
use microstructure_engine::domain::DetectionEvent;
use microstructure_engine::engine::{
    NullDerivativesSource, NullIngestionSource, NullPersistenceSink, NullSnapshotSource, TradingEngine,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SYMBOLS: &[&str] = &["BTCUSDT", "ETHUSDT", "SOLUSDT"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr, matching a process whose stdout may be reserved for
    // a downstream consumer.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .init();

    tracing::info!("starting microstructure engine v{}", env!("CARGO_PKG_VERSION"));

    let mut handles = Vec::with_capacity(SYMBOLS.len());
    for &symbol in SYMBOLS {
        let config = get_config(symbol);
        let (engine, mut events) = TradingEngine::new(
            symbol,
            config,
            Arc::new(NullSnapshotSource),
            Arc::new(NullDerivativesSource),
            Arc::new(NullPersistenceSink),
            Arc::new(NullIngestionSource),
            Utc::now(),
        );

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_detection_event(symbol, &event);
            }
        });

        handles.push(tokio::spawn(async move {
            if let Err(err) = engine.run().await {
                tracing::error!(symbol, error = %err, "trading engine exited with an error");
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("all trading engines stopped");
    Ok(())
}

fn log_detection_event(symbol: &str, event: &DetectionEvent) {
    match event {
        DetectionEvent::IcebergDetected(e) => {
            tracing::info!(symbol, price = %e.price, hidden_volume = %e.detected_hidden_volume, "iceberg detected")
        }
        DetectionEvent::IcebergBreached(e) => {
            tracing::info!(symbol, price = %e.price, is_gamma_wall = e.is_gamma_wall, "iceberg breached")
        }
        DetectionEvent::WhaleTrade(e) => {
            tracing::info!(symbol, price = %e.price, volume_usd = %e.volume_usd, "whale trade")
        }
        DetectionEvent::AlgoDetected(e) => {
            tracing::info!(symbol, kind = ?e.kind, "minnow algo pattern detected")
        }
        DetectionEvent::Accumulation(e) => {
            tracing::info!(symbol, timeframe = %e.timeframe, pattern = ?e.pattern, confidence = e.confidence, "accumulation divergence")
        }
    }
}
