//! End-to-end exercise of `TradingEngine::run`: bootstrap from a snapshot,
//! feed a handful of depth/trade items through real producer tasks, and
//! confirm the consumer loop drains them and shuts down cleanly once both
//! feeds end.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use microstructure_engine::config::get_config;
use microstructure_engine::domain::{BookSnapshot, OrderBookUpdate, Price, PriceLevel, Qty, TradeEvent};
use microstructure_engine::engine::{
    EngineState, IngestionSource, NullDerivativesSource, NullPersistenceSink, NullSnapshotSource, SnapshotSource,
    TradingEngine,
};
use microstructure_engine::error::EngineError;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct ScriptedIngestion {
    depth: Mutex<Vec<OrderBookUpdate>>,
    trades: Mutex<Vec<TradeEvent>>,
}

impl IngestionSource for ScriptedIngestion {
    fn next_depth_update<'a>(&'a self) -> BoxFuture<'a, Option<OrderBookUpdate>> {
        Box::pin(async { self.depth.lock().await.pop() })
    }
    fn next_trade<'a>(&'a self) -> BoxFuture<'a, Option<TradeEvent>> {
        Box::pin(async { self.trades.lock().await.pop() })
    }
}

struct FixedSnapshot;

impl SnapshotSource for FixedSnapshot {
    fn fetch_snapshot<'a>(&'a self) -> BoxFuture<'a, Result<BookSnapshot, EngineError>> {
        Box::pin(async {
            Ok(BookSnapshot {
                last_update_id: 100,
                bids: vec![PriceLevel::new(dec!(99), dec!(10))],
                asks: vec![PriceLevel::new(dec!(101), dec!(10))],
            })
        })
    }
}

#[tokio::test]
async fn engine_drains_a_scripted_feed_and_shuts_down_cleanly() {
    let config = get_config("BTCUSDT");
    let ingestion = Arc::new(ScriptedIngestion {
        depth: Mutex::new(vec![OrderBookUpdate {
            first_update_id: 101,
            final_update_id: 101,
            event_time_ms: 1_000,
            bids: vec![PriceLevel::new(dec!(99), dec!(12))],
            asks: vec![],
        }]),
        trades: Mutex::new(vec![TradeEvent {
            price: Price(dec!(101)),
            quantity: Qty(dec!(1)),
            is_buyer_maker: false,
            event_time_ms: 900,
            trade_id: Some(1),
        }]),
    });

    let (engine, mut events) = TradingEngine::new(
        "BTCUSDT",
        config,
        Arc::new(FixedSnapshot),
        Arc::new(NullDerivativesSource),
        Arc::new(NullPersistenceSink),
        ingestion,
        Utc::now(),
    );

    let drain = tokio::spawn(async move { while events.recv().await.is_some() {} });

    tokio::time::timeout(std::time::Duration::from_secs(5), engine.run())
        .await
        .expect("engine did not shut down once both feeds ended")
        .expect("engine run should not error on a well-formed scripted feed");

    drain.abort();
}

#[tokio::test]
async fn engine_stays_in_warmup_for_an_empty_immediate_feed() {
    let config = get_config("ETHUSDT");
    let (engine, _events) = TradingEngine::new(
        "ETHUSDT",
        config,
        Arc::new(NullSnapshotSource),
        Arc::new(NullDerivativesSource),
        Arc::new(NullPersistenceSink),
        Arc::new(microstructure_engine::engine::NullIngestionSource),
        Utc::now(),
    );

    assert_eq!(engine.state(), EngineState::Initializing);

    tokio::time::timeout(std::time::Duration::from_secs(5), engine.run())
        .await
        .expect("engine did not shut down for an immediately-ended feed")
        .expect("engine run should not error with no ingestion at all");
}
