//! Per-item dispatch: trade/depth processing, resync, feature-snapshot and
//! market-metrics capture. Split out of `mod.rs` purely for size; every
//! method here is a private `impl TradingEngine` continuation and reaches
//! into the struct's private fields directly (this module is a descendant
//! of `engine`, so that's an ordinary same-crate visibility, not a
//! workaround).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::analytics::Timeframe;
use crate::analytics::spoofing::apply_spoofing_discount;
use crate::domain::{
    AccumulationEvent, Cohort, DetectionEvent, FeatureSnapshotRow, IcebergBreachedEvent, IcebergLifecycleRow,
    IcebergStatus, LifecycleEventType, MarketMetricsRow, OrderBookUpdate, Price, TradeEvent, TradeSide, WhaleTradeEvent,
};
use crate::error::EngineError;

use super::TradingEngine;

/// VPIN thresholds a reading is classified against for the feature
/// snapshot's `vpin_level` column — the same cutoffs the iceberg confidence
/// adjustment applies (`VPIN_CALM_THRESHOLD` / `VPIN_TOXIC_THRESHOLD`).
const VPIN_CALM: f64 = 0.3;
const VPIN_TOXIC: f64 = 0.7;
const TWAP_WINDOW_MS: i64 = 300_000;
const VOLATILITY_WINDOW_MS: i64 = 3_600_000;
const VELOCITY_WINDOW_MS: i64 = 5_000;
const TREND_THRESHOLD_PCT: f64 = 0.001;

impl TradingEngine {
    /// Drains both producer queues into the reordering buffer, releases
    /// whatever is now old enough to be ready, dispatches each in order, and
    /// — once Running — captures one feature-snapshot/market-metrics pair.
    pub(super) async fn process_tick(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let now_ms = now.timestamp_millis();

        for trade in self.trade_queue.drain().await {
            self.latency.record_latency(trade.event_time_ms as i64, now_ms as f64);
            self.reorder.add(super::IngestionItem::Trade(trade), trade.event_time_ms as i64, crate::pipeline::reorder::PRIORITY_TRADE);
        }
        for update in self.depth_queue.drain().await {
            self.latency.record_latency(update.event_time_ms as i64, now_ms as f64);
            let event_time_ms = update.event_time_ms as i64;
            self.reorder.add(super::IngestionItem::Depth(update), event_time_ms, crate::pipeline::reorder::PRIORITY_DEPTH);
        }
        self.reorder.set_delay_ms(self.latency.get_adaptive_delay_ms() as u64);

        for item in self.reorder.pop_ready(now_ms) {
            self.process_item(item, now).await?;
        }

        if self.state.state().is_running() {
            let feature_row = self.build_feature_snapshot(now);
            self.persistence.write_feature_snapshot(feature_row);

            if let Some(is_buy) = self.last_trade_is_buy {
                if self.persist_throttle.allow(now_ms) {
                    let row = self.build_market_metrics(now, is_buy);
                    self.persistence.write_market_metrics(row);
                }
            }
        }

        Ok(())
    }

    async fn process_item(&mut self, item: super::IngestionItem, now: DateTime<Utc>) -> Result<(), EngineError> {
        match item {
            super::IngestionItem::Trade(trade) => {
                self.process_trade(trade, now);
                Ok(())
            }
            super::IngestionItem::Depth(update) => self.process_depth(update, now).await,
        }
    }

    fn process_trade(&mut self, trade: TradeEvent, now: DateTime<Utc>) {
        let is_ask = trade.resting_side_is_ask();
        let visible_before = crate::domain::Qty::from(self.book.visible_qty(trade.price, is_ask));

        self.book.record_trade_for_vpin(trade.quantity, !trade.is_buyer_maker, now);
        let vpin_score = match self.flow.is_reliable(&self.book, now) {
            Ok(()) => self.flow.vpin(&self.book, now),
            Err(_) => {
                self.skip_counters.unreliable_vpin += 1;
                None
            }
        };

        let (cohort, volume_usd, algo_event) = self.whale.update(&mut self.book, &trade);
        self.last_trade_is_buy = Some(!trade.is_buyer_maker);

        if self.state.state().is_running() {
            if cohort == Cohort::Whale {
                let event = WhaleTradeEvent {
                    id: Uuid::new_v4(),
                    symbol: self.symbol.clone(),
                    price: trade.price,
                    volume_usd,
                    side: if trade.is_buyer_maker { TradeSide::Sell } else { TradeSide::Buy },
                    event_time: now,
                };
                self.emit(DetectionEvent::WhaleTrade(event));
            }
            if let Some(algo) = algo_event {
                self.emit(DetectionEvent::AlgoDetected(algo));
            }
        }

        let whale_cvd = *self.book.whale_cvd.get(&Cohort::Whale).unwrap_or(&Decimal::ZERO);
        let minnow_cvd = *self.book.whale_cvd.get(&Cohort::Minnow).unwrap_or(&Decimal::ZERO);
        // `is_passive`: the cohort's own order sat passively and got hit,
        // rather than crossing the spread to take liquidity.
        let is_passive = trade.is_buyer_maker;
        self.book.historical_memory.update_history(now, whale_cvd, minnow_cvd, trade.price.inner(), is_passive);
        self.book.latest_wyckoff_divergence = self.book.detect_cvd_divergence(Timeframe::H1);

        if let Some(level) = self.book.active_icebergs.get_mut(&trade.price) {
            level.add_trade_to_footprint(trade.quantity, !trade.is_buyer_maker);
        }

        let check = crate::orderbook::PendingCheck {
            price: trade.price,
            is_ask,
            visible_before,
            trade_qty: trade.quantity,
            trade_time_ms: trade.event_time_ms as i64,
            vpin_score,
            cvd_divergence: self.book.latest_wyckoff_divergence,
            cohort,
        };
        self.book.push_pending_check(check, trade.event_time_ms as i64);

        self.price_history.push(trade.event_time_ms as i64, trade.price.inner());

        let breached = self.book.check_breaches(trade.price.inner(), now);
        if self.state.state().is_running() {
            for price in breached {
                if let Some(level) = self.book.active_icebergs.get(&price) {
                    let event = IcebergBreachedEvent {
                        id: Uuid::new_v4(),
                        symbol: self.symbol.clone(),
                        price,
                        last_total_hidden_volume: level.total_hidden_volume,
                        is_gamma_wall: level.is_gamma_wall,
                        event_time: now,
                    };
                    self.emit(DetectionEvent::IcebergBreached(event));
                }
            }
        }
    }

    async fn process_depth(&mut self, update: OrderBookUpdate, now: DateTime<Utc>) -> Result<(), EngineError> {
        match self.book.apply_update(&update) {
            Ok(false) => {
                self.skip_counters.stale_updates += 1;
                return Ok(());
            }
            Ok(true) => {}
            Err(_core_err) => {
                self.resync(now).await?;
                return Ok(());
            }
        }

        let event_time_ms = update.event_time_ms as i64;
        for level in &update.bids {
            self.handle_level_refill(level.price, false, event_time_ms, now);
        }
        for level in &update.asks {
            self.handle_level_refill(level.price, true, event_time_ms, now);
        }

        let mid = self.book.mid_price().unwrap_or(Decimal::ZERO);
        let velocity = self.price_history.velocity(event_time_ms, VELOCITY_WINDOW_MS);
        self.book.mark_cancelled_if_vanished(now, mid, velocity);
        self.handle_new_cancellations(now);

        Ok(())
    }

    fn handle_level_refill(&mut self, price: Price, is_ask: bool, update_time_ms: i64, now: DateTime<Utc>) {
        for check in self.book.take_pending_checks_at(price, is_ask) {
            let delta_t_ms = update_time_ms - check.trade_time_ms;
            if delta_t_ms < 0 {
                self.skip_counters.negative_delta_t += 1;
                continue;
            }
            if self.book.visible_qty(price, is_ask) < check.visible_before.inner() {
                continue;
            }

            let event = self.iceberg.analyze_with_timing(
                &mut self.book,
                price,
                is_ask,
                check.trade_qty,
                check.visible_before,
                delta_t_ms,
                check.vpin_score,
                check.cvd_divergence,
                check.cohort,
                now,
            );
            if let Some(event) = event {
                if self.state.state().is_running() {
                    self.emit(DetectionEvent::IcebergDetected(event));
                }
            }
        }
    }

    /// Emits a lifecycle row (throttled) for any iceberg that has just
    /// transitioned to `Cancelled` with captured context, applying the
    /// anti-spoofing discount to its confidence before persisting.
    fn handle_new_cancellations(&mut self, now: DateTime<Utc>) {
        let recent_spread_bps = self.book.spread_bps().unwrap_or(0.0);
        let candidates: Vec<Price> = self
            .book
            .active_icebergs
            .iter()
            .filter(|(price, level)| {
                level.status == IcebergStatus::Cancelled
                    && level.cancellation_context.is_some()
                    && !self.emitted_cancellations.contains(*price)
            })
            .map(|(price, _)| *price)
            .collect();

        for price in candidates {
            self.emitted_cancellations.insert(price);
            let score = self.spoofing.score(&self.book.active_icebergs[&price], recent_spread_bps);

            let row = {
                let level = self.book.active_icebergs.get_mut(&price).expect("just located above");
                level.spoofing_probability = score;
                level.confidence_score = apply_spoofing_discount(level.confidence_score, score);
                let adv_20d = self.config.estimated_adv_20d;
                let intention_type = crate::domain::IcebergLevel::classify_intention(level.total_hidden_volume, adv_20d);
                let iir_value = if adv_20d > Decimal::ZERO {
                    (level.total_hidden_volume.inner() / adv_20d).to_f64()
                } else {
                    None
                };
                IcebergLifecycleRow {
                    symbol: self.symbol.clone(),
                    price: price.inner(),
                    is_ask: level.is_ask,
                    event_type: LifecycleEventType::Cancelled,
                    event_time: now,
                    survival_seconds: Some((level.last_update_time - level.creation_time).num_milliseconds() as f64 / 1000.0),
                    total_volume_absorbed: Some(level.total_hidden_volume.inner()),
                    refill_count: level.refill_count,
                    outcome: Some("cancelled".to_string()),
                    price_at_death: level.cancellation_context.map(|c| c.mid_price_at_cancel),
                    intention_type: Some(intention_type),
                    iir_value,
                }
            };

            if self.state.state().is_running() {
                self.persist_lifecycle(row);
            }
        }
    }

    async fn resync(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.skip_counters.gap_resyncs += 1;
        let snapshot = self.snapshot_source.fetch_snapshot().await?;
        self.book.reconcile_with_snapshot(&snapshot.bids, &snapshot.asks, now);
        self.book.apply_snapshot(snapshot.bids, snapshot.asks, snapshot.last_update_id);

        let last_update_id = self.book.last_update_id();
        let drained = self.reorder.drain_all();
        for item in drained {
            let keep = match &item {
                super::IngestionItem::Depth(update) => update.final_update_id > last_update_id,
                super::IngestionItem::Trade(_) => true,
            };
            if keep {
                let event_time_ms = item.event_time_ms();
                let priority = item.priority();
                self.reorder.add(item, event_time_ms, priority);
            }
        }

        self.state.enter_warmup(now, self.config.warmup_period_ms);
        tracing::warn!(symbol = %self.symbol, "resynced order book after gap/invariant violation");
        Ok(())
    }

    /// Checks every timeframe's cached CVD/price divergence for a Wyckoff
    /// pattern, emitting one [`AccumulationEvent`] per timeframe currently
    /// showing one. Called off the 60s cleanup cadence rather than every
    /// tick — the underlying divergence barely moves faster than that on
    /// the coarser timeframes, and whale-CVD history on `H1` updates at
    /// most once per trade anyway.
    pub(super) fn check_accumulation(&mut self, now: DateTime<Utc>) {
        if !self.state.state().is_running() {
            return;
        }
        let mid = self.book.mid_price().unwrap_or(Decimal::ZERO);
        for (timeframe, label) in [
            (Timeframe::H1, "1h"),
            (Timeframe::H4, "4h"),
            (Timeframe::D1, "1d"),
            (Timeframe::W1, "1w"),
        ] {
            if let Some(result) = self.accumulation.detect(&self.book, timeframe, mid) {
                let event = AccumulationEvent {
                    id: Uuid::new_v4(),
                    symbol: self.symbol.clone(),
                    timeframe: label.to_string(),
                    div_type: result.div_type,
                    pattern: result.pattern,
                    confidence: result.confidence,
                    absorption_detected: result.absorption_detected,
                    obi_confirms: result.obi_confirms,
                    near_strong_zone: result.near_strong_zone,
                    event_time: now,
                };
                self.emit(DetectionEvent::Accumulation(event));
            }
        }
    }

    fn apply_derivatives(&mut self, snapshot: super::DerivativesSnapshot, now: DateTime<Utc>) {
        if let Some(gamma) = snapshot.gamma_profile {
            self.book.set_gamma_profile(gamma, now);
        }
        if let Some(basis_apr) = snapshot.basis_apr {
            self.book.set_basis_apr(basis_apr, now);
        }
        if let Some(skew) = snapshot.options_skew {
            self.book.set_options_skew(skew, now);
        }
    }

    fn persist_lifecycle(&mut self, row: IcebergLifecycleRow) {
        let now_ms = row.event_time.timestamp_millis();
        if self.persist_throttle.allow(now_ms) {
            self.persistence.write_lifecycle_row(row);
        }
    }

    fn emit(&self, event: DetectionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn cvd_trend(&self, timeframe: Timeframe, n: usize) -> Decimal {
        let points = self.book.historical_memory.points(timeframe, n);
        match (points.first(), points.last()) {
            (Some(first), Some(last)) if points.len() >= 2 => last.1 - first.1,
            _ => Decimal::ZERO,
        }
    }

    fn build_feature_snapshot(&self, now: DateTime<Utc>) -> FeatureSnapshotRow {
        let now_ms = now.timestamp_millis();
        let spread_bps = self.book.spread_bps().unwrap_or(0.0);
        let mid = self.book.mid_price().unwrap_or(Decimal::ZERO);

        let vpin_score = match self.flow.is_reliable(&self.book, now) {
            Ok(()) => self.flow.vpin(&self.book, now),
            Err(_) => None,
        };
        let basis_apr = self.book.basis_apr(now);
        let options_skew = self.book.options_skew(now);
        let gamma_profile = self.book.gamma_profile(now).copied();

        let twap_5m = self.price_history.mean(now_ms, TWAP_WINDOW_MS).unwrap_or(mid);
        let price_vs_twap_pct =
            if twap_5m.is_zero() { 0.0 } else { ((mid - twap_5m) / twap_5m).to_f64().unwrap_or(0.0) };
        let volatility_1h = self.price_history.stdev_pct(now_ms, VOLATILITY_WINDOW_MS);

        let whale_cvd = *self.book.whale_cvd.get(&Cohort::Whale).unwrap_or(&Decimal::ZERO);
        let dolphin_cvd = *self.book.whale_cvd.get(&Cohort::Dolphin).unwrap_or(&Decimal::ZERO);
        let fish_cvd = *self.book.whale_cvd.get(&Cohort::Minnow).unwrap_or(&Decimal::ZERO);

        let is_htf_divergence =
            self.book.detect_cvd_divergence(Timeframe::D1).is_some() || self.book.detect_cvd_divergence(Timeframe::W1).is_some();

        let recent_spread = self.book.spread_mean_std();
        let volatility_regime = match recent_spread {
            Some((mean, stdev)) => {
                let factor = crate::analytics::RegimeAdapter::volatility_factor(spread_bps, mean, stdev);
                classify_volatility_regime(factor)
            }
            None => "unknown".to_string(),
        };

        FeatureSnapshotRow {
            symbol: self.symbol.clone(),
            snapshot_time: now,
            obi_value: self.book.get_weighted_obi(self.config.ofi_depth, true),
            ofi_value: self.book.calculate_ofi(None, true),
            spread_bps,
            depth_ratio: depth_ratio(&self.book, self.config),
            whale_cvd,
            dolphin_cvd,
            fish_cvd,
            whale_cvd_delta_5m: self.cvd_trend(Timeframe::H1, 5),
            total_cvd: whale_cvd + dolphin_cvd + fish_cvd,
            whale_cvd_trend_1w: self.cvd_trend(Timeframe::D1, 7),
            whale_cvd_trend_1m: self.cvd_trend(Timeframe::D1, 30),
            whale_cvd_trend_3m: self.cvd_trend(Timeframe::W1, 13),
            whale_cvd_trend_6m: self.cvd_trend(Timeframe::W1, 26),
            vpin_score,
            vpin_level: vpin_score.map(classify_vpin_level),
            futures_basis_apr: basis_apr,
            basis_state: basis_apr.map(classify_basis_state),
            options_skew,
            skew_state: options_skew.map(classify_skew_state),
            total_gex: gamma_profile.map(|g| g.total_gex),
            dist_to_gamma_wall: gamma_profile.and_then(|g| distance_to_nearest_wall(mid, &g)),
            gamma_wall_type: gamma_profile.map(|g| classify_gamma_wall_type(mid, &g, self.config)),
            current_price: mid,
            twap_5m,
            price_vs_twap_pct,
            volatility_1h,
            spoofing_score: self.last_spoofing_score(),
            cancel_ratio_5m: self.emitted_cancellations.len() as f64 / self.book.active_icebergs.len().max(1) as f64,
            trend_regime: classify_trend_regime(price_vs_twap_pct),
            volatility_regime,
            is_htf_divergence,
            basis_regime_weekly: basis_apr.map(classify_basis_state),
        }
    }

    fn last_spoofing_score(&self) -> f64 {
        self.book
            .active_icebergs
            .values()
            .filter(|l| l.status == IcebergStatus::Cancelled)
            .map(|l| l.spoofing_probability)
            .fold(0.0, f64::max)
    }

    fn build_market_metrics(&self, now: DateTime<Utc>, is_aggressor_buy: bool) -> MarketMetricsRow {
        let mid = self.book.mid_price().unwrap_or(Decimal::ZERO);
        let whale_cvd = *self.book.whale_cvd.get(&Cohort::Whale).unwrap_or(&Decimal::ZERO);
        let dolphin_cvd = *self.book.whale_cvd.get(&Cohort::Dolphin).unwrap_or(&Decimal::ZERO);
        let fish_cvd = *self.book.whale_cvd.get(&Cohort::Minnow).unwrap_or(&Decimal::ZERO);
        MarketMetricsRow {
            time: now,
            symbol: self.symbol.clone(),
            price: mid,
            spread_bps: self.book.spread_bps().unwrap_or(0.0),
            book_ofi: self.book.calculate_ofi(None, true),
            book_obi: self.book.get_weighted_obi(self.config.ofi_depth, true),
            flow_whale_cvd_delta: whale_cvd,
            flow_dolphin_cvd_delta: dolphin_cvd,
            flow_minnow_cvd_delta: fish_cvd,
            wall_whale_vol: self
                .book
                .active_icebergs
                .values()
                .filter(|l| !l.is_dolphin && l.status == IcebergStatus::Active)
                .map(|l| l.total_hidden_volume.inner())
                .sum(),
            wall_dolphin_vol: self
                .book
                .active_icebergs
                .values()
                .filter(|l| l.is_dolphin && l.status == IcebergStatus::Active)
                .map(|l| l.total_hidden_volume.inner())
                .sum(),
            basis_apr: self.book.basis_apr(now),
            options_skew: self.book.options_skew(now),
            oi_delta: None,
            is_aggressor_buy,
        }
    }
}

fn depth_ratio(book: &crate::orderbook::LocalOrderBook, config: &crate::config::AssetConfig) -> f64 {
    let bid_depth = book.visible_depth(false, config.ofi_depth).to_f64().unwrap_or(0.0);
    let ask_depth = book.visible_depth(true, config.ofi_depth).to_f64().unwrap_or(0.0);
    if ask_depth == 0.0 { 0.0 } else { bid_depth / ask_depth }
}

fn classify_vpin_level(score: f64) -> String {
    if score > VPIN_TOXIC {
        "high".to_string()
    } else if score < VPIN_CALM {
        "low".to_string()
    } else {
        "medium".to_string()
    }
}

fn classify_basis_state(apr: f64) -> String {
    if apr > 0.01 {
        "contango".to_string()
    } else if apr < -0.01 {
        "backwardation".to_string()
    } else {
        "flat".to_string()
    }
}

fn classify_skew_state(skew: f64) -> String {
    if skew > 0.01 {
        "put_skew".to_string()
    } else if skew < -0.01 {
        "call_skew".to_string()
    } else {
        "flat".to_string()
    }
}

fn classify_trend_regime(price_vs_twap_pct: f64) -> String {
    if price_vs_twap_pct > TREND_THRESHOLD_PCT {
        "uptrend".to_string()
    } else if price_vs_twap_pct < -TREND_THRESHOLD_PCT {
        "downtrend".to_string()
    } else {
        "range".to_string()
    }
}

fn classify_volatility_regime(factor: f64) -> String {
    if factor < 1.0 {
        "low".to_string()
    } else if factor < 2.0 {
        "medium".to_string()
    } else {
        "high".to_string()
    }
}

fn distance_to_nearest_wall(mid: Decimal, gamma: &crate::domain::GammaProfile) -> Option<f64> {
    let mid_f64 = mid.to_f64()?;
    if mid_f64 == 0.0 {
        return None;
    }
    let call_dist = (mid_f64 - gamma.call_wall).abs() / mid_f64;
    let put_dist = (mid_f64 - gamma.put_wall).abs() / mid_f64;
    Some(call_dist.min(put_dist))
}

fn classify_gamma_wall_type(mid: Decimal, gamma: &crate::domain::GammaProfile, config: &crate::config::AssetConfig) -> String {
    let Some(mid_f64) = mid.to_f64() else { return "none".to_string() };
    let tolerance = mid_f64 * config.gamma_wall_tolerance_pct.to_f64().unwrap_or(0.0);
    if (mid_f64 - gamma.call_wall).abs() < tolerance {
        "call_wall".to_string()
    } else if (mid_f64 - gamma.put_wall).abs() < tolerance {
        "put_wall".to_string()
    } else {
        "none".to_string()
    }
}
