//! The trading engine (C10): owns the single `LocalOrderBook` for one
//! symbol, wires the C1-C9 analyzers around it, and drives the
//! ingest -> reorder -> dispatch -> periodic-task orchestration loop.
//!
//! `LocalOrderBook` is mutated exclusively from [`TradingEngine::run`]'s own
//! task — producer tasks and the derivatives refresher only ever hand data
//! across a [`queue::DropOldestQueue`] or a `tokio::sync::watch` channel, never
//! a reference to the book itself.

mod consumer;
mod queue;
mod state;
pub mod traits;
mod types;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::analytics::{AccumulationDetector, FlowToxicityAnalyzer, IcebergAnalyzer, SpoofingAnalyzer, WhaleAnalyzer};
use crate::config::AssetConfig;
use crate::domain::{DetectionEvent, Price};
use crate::error::EngineError;
use crate::orderbook::LocalOrderBook;
use crate::pipeline::{LatencyMonitor, ReorderingBuffer};

pub use queue::DropOldestQueue;
pub use state::{EngineState, StateMachine};
pub use traits::{
    DerivativesSource, IngestionSource, NullDerivativesSource, NullIngestionSource, NullPersistenceSink,
    NullSnapshotSource, PersistenceSink, SnapshotSource,
};
pub use types::{DerivativesSnapshot, IngestionItem, SkipCounters};

const DEPTH_QUEUE_CAPACITY: usize = 20_000;
const TRADE_QUEUE_CAPACITY: usize = 20_000;
const TICK_INTERVAL_MS: u64 = 5;
const CLEANUP_INTERVAL_SECS: u64 = 60;
const DERIVATIVES_REFRESH_INTERVAL_SECS: u64 = 300;
const ICEBERG_HALF_LIFE_SECONDS: f64 = 300.0;
const ICEBERG_MIN_CONFIDENCE: f64 = 0.1;
/// Velocity/TWAP/volatility window maintained by [`types::PriceHistory`].
const PRICE_HISTORY_MAX_AGE_MS: i64 = 3_600_000;
const PRICE_HISTORY_MAX_SAMPLES: usize = 50_000;

pub(crate) struct PersistThrottle {
    window_start_ms: i64,
    count: u32,
}

impl PersistThrottle {
    fn new() -> Self {
        Self { window_start_ms: 0, count: 0 }
    }

    /// At most 10 writes/sec/symbol for detection-event-driven rows.
    fn allow(&mut self, now_ms: i64) -> bool {
        if now_ms - self.window_start_ms >= 1_000 {
            self.window_start_ms = now_ms;
            self.count = 0;
        }
        if self.count < 10 {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

pub struct TradingEngine {
    symbol: String,
    config: &'static AssetConfig,

    book: LocalOrderBook,
    state: StateMachine,
    reorder: ReorderingBuffer<IngestionItem>,
    latency: LatencyMonitor,
    price_history: types::PriceHistory,

    flow: FlowToxicityAnalyzer,
    whale: WhaleAnalyzer,
    iceberg: IcebergAnalyzer,
    accumulation: AccumulationDetector,
    spoofing: SpoofingAnalyzer,

    skip_counters: SkipCounters,
    persist_throttle: PersistThrottle,
    emitted_cancellations: HashSet<Price>,
    last_trade_is_buy: Option<bool>,

    depth_queue: DropOldestQueue<crate::domain::OrderBookUpdate>,
    trade_queue: DropOldestQueue<crate::domain::TradeEvent>,

    snapshot_source: Arc<dyn SnapshotSource>,
    derivatives_source: Arc<dyn DerivativesSource>,
    persistence: Arc<dyn PersistenceSink>,
    ingestion: Arc<dyn IngestionSource>,

    event_tx: mpsc::UnboundedSender<DetectionEvent>,
}

impl TradingEngine {
    pub fn new(
        symbol: impl Into<String>,
        config: &'static AssetConfig,
        snapshot_source: Arc<dyn SnapshotSource>,
        derivatives_source: Arc<dyn DerivativesSource>,
        persistence: Arc<dyn PersistenceSink>,
        ingestion: Arc<dyn IngestionSource>,
        now: DateTime<Utc>,
    ) -> (Self, mpsc::UnboundedReceiver<DetectionEvent>) {
        let symbol = symbol.into();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let engine = Self {
            book: LocalOrderBook::new(symbol.clone(), config, now),
            state: StateMachine::default(),
            reorder: ReorderingBuffer::new(LatencyMonitor::default().get_adaptive_delay_ms() as u64),
            latency: LatencyMonitor::default(),
            price_history: types::PriceHistory::new(PRICE_HISTORY_MAX_AGE_MS, PRICE_HISTORY_MAX_SAMPLES),
            flow: FlowToxicityAnalyzer::new(config),
            whale: WhaleAnalyzer::new(config),
            iceberg: IcebergAnalyzer::new(config),
            accumulation: AccumulationDetector::new(config),
            spoofing: SpoofingAnalyzer::new(config),
            skip_counters: SkipCounters::default(),
            persist_throttle: PersistThrottle::new(),
            emitted_cancellations: HashSet::new(),
            last_trade_is_buy: None,
            depth_queue: DropOldestQueue::new(DEPTH_QUEUE_CAPACITY),
            trade_queue: DropOldestQueue::new(TRADE_QUEUE_CAPACITY),
            snapshot_source,
            derivatives_source,
            persistence,
            ingestion,
            symbol,
            config,
            event_tx,
        };
        (engine, event_rx)
    }

    pub fn state(&self) -> EngineState {
        self.state.state()
    }

    pub fn skip_counters(&self) -> SkipCounters {
        self.skip_counters
    }

    /// Runs forever: bootstraps the book from a snapshot, then drives the
    /// ingest/dispatch/periodic-task loop until the ingestion source's feeds
    /// both end.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let now = Utc::now();
        self.bootstrap(now).await?;

        let depth_producer = {
            let queue = self.depth_queue.clone();
            let source = Arc::clone(&self.ingestion);
            tokio::spawn(async move {
                loop {
                    match source.next_depth_update().await {
                        Some(update) => {
                            queue.push(update).await;
                        }
                        None => break,
                    }
                }
            })
        };
        let trade_producer = {
            let queue = self.trade_queue.clone();
            let source = Arc::clone(&self.ingestion);
            tokio::spawn(async move {
                loop {
                    match source.next_trade().await {
                        Some(trade) => {
                            queue.push(trade).await;
                        }
                        None => break,
                    }
                }
            })
        };
        let (derivatives_tx, mut derivatives_rx) = watch::channel(DerivativesSnapshot::default());
        let derivatives_refresher = {
            let source = Arc::clone(&self.derivatives_source);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(DERIVATIVES_REFRESH_INTERVAL_SECS));
                loop {
                    interval.tick().await;
                    let (gamma_profile, basis_apr, options_skew) = tokio::join!(
                        source.fetch_gamma_profile(),
                        source.fetch_basis_apr(),
                        source.fetch_options_skew(),
                    );
                    let _ = derivatives_tx.send(DerivativesSnapshot { gamma_profile, basis_apr, options_skew });
                }
            })
        };

        let mut tick_interval = tokio::time::interval(std::time::Duration::from_millis(TICK_INTERVAL_MS));
        let mut cleanup_interval = tokio::time::interval(std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let now = Utc::now();
                    self.state.tick(now);
                    if let Err(err) = self.process_tick(now).await {
                        warn!(symbol = %self.symbol, error = %err, "tick processing failed");
                    }
                }
                _ = cleanup_interval.tick() => {
                    let now = Utc::now();
                    let removed = self.book.cleanup_old_icebergs(now, ICEBERG_HALF_LIFE_SECONDS, ICEBERG_MIN_CONFIDENCE);
                    self.emitted_cancellations.retain(|p| self.book.active_icebergs.contains_key(p));
                    if removed > 0 {
                        info!(symbol = %self.symbol, removed, "cleaned up decayed iceberg levels");
                    }
                    self.check_accumulation(now);
                }
                changed = derivatives_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let snapshot = *derivatives_rx.borrow_and_update();
                    self.apply_derivatives(snapshot, Utc::now());
                }
            }

            if depth_producer.is_finished() && trade_producer.is_finished() {
                let now = Utc::now();
                if self.depth_queue.len().await == 0
                    && self.trade_queue.len().await == 0
                    && self.reorder.is_empty()
                {
                    self.process_tick(now).await.ok();
                    break;
                }
            }
        }

        derivatives_refresher.abort();
        info!(symbol = %self.symbol, "trading engine stopped: ingestion feeds ended");
        Ok(())
    }

    async fn bootstrap(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let snapshot = self.snapshot_source.fetch_snapshot().await?;
        self.book.apply_snapshot(snapshot.bids, snapshot.asks, snapshot.last_update_id);
        self.book.clear_all_icebergs();
        self.state.enter_warmup(now, self.config.warmup_period_ms);
        info!(symbol = %self.symbol, last_update_id = snapshot.last_update_id, "bootstrapped order book from snapshot");
        Ok(())
    }
}
