//! Single-symbol order book
//!
//! Grounded on the teacher's `Orderbook`: `BTreeMap<PriceLevel,
//! VecDeque<_>>` per side behind a `parking_lot::RwLock`, a `DashMap`
//! index from order id to its resting location for O(1) cancel, and an
//! atomic last-trade price. We add a monotonic sequence counter and a
//! bounded ring of per-mutation deltas so subscribers can recover from a
//! missed broadcast by replaying deltas since their last known sequence
//! (spec §4.A).

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};

use crate::clock::Clock;
use crate::models::{OrderId, Side, TradeId, UserId};

use super::types::{BookDelta, BookLevelView, OrderBookSnapshot, OrderRef, TradeExecution};

const MAX_DELTA_LOG: usize = 512;

pub struct Orderbook {
    symbol: String,
    bids: RwLock<BTreeMap<super::types::PriceLevel, VecDeque<OrderRef>>>,
    asks: RwLock<BTreeMap<super::types::PriceLevel, VecDeque<OrderRef>>>,
    order_index: DashMap<OrderId, (Side, super::types::PriceLevel)>,
    last_trade_price: AtomicI64,
    order_count: AtomicI64,
    sequence: AtomicU64,
    next_insertion_seq: AtomicU64,
    deltas: RwLock<VecDeque<(u64, BookDelta)>>,
}

impl Orderbook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            order_index: DashMap::new(),
            last_trade_price: AtomicI64::new(0),
            order_count: AtomicI64::new(0),
            sequence: AtomicU64::new(0),
            next_insertion_seq: AtomicU64::new(0),
            deltas: RwLock::new(VecDeque::new()),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sequence(&self) -> u64 {
        self.sequence.load(AtomicOrdering::Relaxed)
    }

    pub fn order_count(&self) -> i64 {
        self.order_count.load(AtomicOrdering::Relaxed)
    }

    pub fn last_trade_price(&self) -> Option<Decimal> {
        let raw = self.last_trade_price.load(AtomicOrdering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(Decimal::from(raw) / Decimal::from(100_000_000))
        }
    }

    fn set_last_trade_price(&self, price: Decimal) {
        let raw = (price * Decimal::from(100_000_000))
            .trunc()
            .mantissa() as i64;
        self.last_trade_price.store(raw, AtomicOrdering::Relaxed);
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.read().keys().next_back().map(|p| p.to_decimal())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.read().keys().next().map(|p| p.to_decimal())
    }

    pub fn has_order(&self, order_id: OrderId) -> bool {
        self.order_index.contains_key(&order_id)
    }

    fn bump_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    /// Aggregate (quantity, order_count) per price level, used as the
    /// before/after snapshot that `record_delta` diffs.
    fn level_snapshot(
        book: &BTreeMap<super::types::PriceLevel, VecDeque<OrderRef>>,
    ) -> BTreeMap<super::types::PriceLevel, (Decimal, usize)> {
        book.iter()
            .map(|(price, orders)| (*price, (orders.iter().map(|o| o.remaining).sum(), orders.len())))
            .collect()
    }

    /// Diffs a side's before/after level snapshots into the absolute
    /// changes since `before`: a level whose aggregate quantity changed
    /// (or that is new) carries its current quantity, a level that
    /// vanished carries `quantity == 0` (spec §4.A: "a level set to 0
    /// means removal"). Unchanged levels are omitted entirely — this is
    /// a true incremental diff, not a full-book replay.
    fn diff_levels(
        before: &BTreeMap<super::types::PriceLevel, (Decimal, usize)>,
        after: &BTreeMap<super::types::PriceLevel, (Decimal, usize)>,
        is_bids: bool,
    ) -> Vec<BookLevelView> {
        let mut prices: Vec<super::types::PriceLevel> = before.keys().chain(after.keys()).cloned().collect();
        prices.sort();
        prices.dedup();
        if is_bids {
            prices.reverse();
        }

        prices
            .into_iter()
            .filter_map(|price| match (before.get(&price), after.get(&price)) {
                (Some(p), Some(c)) if p == c => None,
                (_, Some((quantity, order_count))) => Some(BookLevelView {
                    price: price.to_decimal(),
                    quantity: *quantity,
                    order_count: *order_count,
                }),
                (Some(_), None) => Some(BookLevelView {
                    price: price.to_decimal(),
                    quantity: Decimal::ZERO,
                    order_count: 0,
                }),
                (None, None) => None,
            })
            .collect()
    }

    fn record_delta(
        &self,
        from: u64,
        to: u64,
        bids_before: &BTreeMap<super::types::PriceLevel, (Decimal, usize)>,
        asks_before: &BTreeMap<super::types::PriceLevel, (Decimal, usize)>,
    ) {
        let bids_after = Self::level_snapshot(&self.bids.read());
        let asks_after = Self::level_snapshot(&self.asks.read());
        let delta = BookDelta {
            symbol: self.symbol.clone(),
            from_sequence: from,
            to_sequence: to,
            bids: Self::diff_levels(bids_before, &bids_after, true),
            asks: Self::diff_levels(asks_before, &asks_after, false),
        };
        let mut log = self.deltas.write();
        log.push_back((to, delta));
        while log.len() > MAX_DELTA_LOG {
            log.pop_front();
        }
    }

    /// Places a resting order at `price` for `remaining` quantity. Callers
    /// are expected to have already exhausted matching against the
    /// opposite side; this only ever adds liquidity.
    pub fn place(&self, side: Side, order_id: OrderId, user_id: UserId, price: Decimal, remaining: Decimal) {
        let price_level = super::types::PriceLevel::from_decimal(price);
        let sequence = self.next_insertion_seq.fetch_add(1, AtomicOrdering::Relaxed);
        let entry = OrderRef {
            order_id,
            user_id,
            price,
            remaining,
            sequence,
        };

        let before = self.sequence();
        let bids_before = Self::level_snapshot(&self.bids.read());
        let asks_before = Self::level_snapshot(&self.asks.read());
        match side {
            Side::Buy => self.bids.write().entry(price_level).or_default().push_back(entry),
            Side::Sell => self.asks.write().entry(price_level).or_default().push_back(entry),
        }
        self.order_index.insert(order_id, (side, price_level));
        self.order_count.fetch_add(1, AtomicOrdering::Relaxed);
        let after = self.bump_sequence();
        self.record_delta(before, after, &bids_before, &asks_before);
    }

    /// Removes a resting order. Returns its remaining quantity if found.
    pub fn remove(&self, order_id: OrderId) -> Option<Decimal> {
        let (side, price_level) = self.order_index.remove(&order_id)?.1;
        let before = self.sequence();
        let bids_before = Self::level_snapshot(&self.bids.read());
        let asks_before = Self::level_snapshot(&self.asks.read());

        let removed = match side {
            Side::Buy => remove_from_level(&mut self.bids.write(), price_level, order_id),
            Side::Sell => remove_from_level(&mut self.asks.write(), price_level, order_id),
        };

        if let Some(remaining) = removed {
            self.order_count.fetch_sub(1, AtomicOrdering::Relaxed);
            let after = self.bump_sequence();
            self.record_delta(before, after, &bids_before, &asks_before);
            Some(remaining)
        } else {
            None
        }
    }

    /// Restores a maker's consumed quantity after a downstream
    /// settlement failure forces the submission that produced its fill
    /// to be rewound. Tops up the maker's remaining quantity if it is
    /// still resting (a partial fill), or re-inserts it at the front of
    /// its price level's FIFO if matching had removed it entirely —
    /// consumption came off the front, so restoration puts it back
    /// there rather than at the tail.
    pub fn restore(&self, side: Side, order_id: OrderId, user_id: UserId, price: Decimal, quantity: Decimal) {
        let price_level = super::types::PriceLevel::from_decimal(price);
        let before = self.sequence();
        let bids_before = Self::level_snapshot(&self.bids.read());
        let asks_before = Self::level_snapshot(&self.asks.read());
        let mut guard = match side {
            Side::Buy => self.bids.write(),
            Side::Sell => self.asks.write(),
        };
        let queue = guard.entry(price_level).or_default();
        if let Some(existing) = queue.iter_mut().find(|o| o.order_id == order_id) {
            existing.remaining += quantity;
        } else {
            let sequence = self.next_insertion_seq.fetch_add(1, AtomicOrdering::Relaxed);
            queue.push_front(OrderRef {
                order_id,
                user_id,
                price,
                remaining: quantity,
                sequence,
            });
            self.order_index.insert(order_id, (side, price_level));
            self.order_count.fetch_add(1, AtomicOrdering::Relaxed);
        }
        drop(guard);
        let after = self.bump_sequence();
        self.record_delta(before, after, &bids_before, &asks_before);
    }

    /// Matches an incoming order of `side` for `quantity` against the
    /// resting opposite side, respecting `limit_price` if present
    /// (`None` means match through the book unconditionally, i.e. a
    /// market order). Mutates resting orders in place and returns the
    /// trades generated plus quantity left unfilled.
    pub fn match_against(
        &self,
        taker_order_id: OrderId,
        taker_user_id: UserId,
        side: Side,
        mut quantity: Decimal,
        limit_price: Option<Decimal>,
        clock: &dyn Clock,
        next_trade_id: &dyn Fn() -> TradeId,
    ) -> (Vec<TradeExecution>, Decimal) {
        let mut trades = Vec::new();
        let before = self.sequence();
        let bids_before = Self::level_snapshot(&self.bids.read());
        let asks_before = Self::level_snapshot(&self.asks.read());
        let now = clock.now_millis();

        match side {
            Side::Buy => self.match_side(&mut self.asks.write(), &mut quantity, limit_price, true, taker_order_id, taker_user_id, now, next_trade_id, &mut trades),
            Side::Sell => self.match_side(&mut self.bids.write(), &mut quantity, limit_price, false, taker_order_id, taker_user_id, now, next_trade_id, &mut trades),
        }

        if !trades.is_empty() {
            let after = self.bump_sequence();
            self.record_delta(before, after, &bids_before, &asks_before);
        }

        (trades, quantity)
    }

    /// Market-buy variant that caps on quote value spent rather than
    /// base quantity bought (spec §4.B step 2: "freeze a caller-supplied
    /// quote amount" for a buy market order with no quantity given).
    /// Always walks the ask side ascending. Returns trades, quantity
    /// filled, and quote budget left unspent.
    pub fn match_budget(
        &self,
        taker_order_id: OrderId,
        taker_user_id: UserId,
        mut budget: Decimal,
        clock: &dyn Clock,
        next_trade_id: &dyn Fn() -> TradeId,
    ) -> (Vec<TradeExecution>, Decimal, Decimal) {
        let mut trades = Vec::new();
        let before = self.sequence();
        let bids_before = Self::level_snapshot(&self.bids.read());
        let asks_before = Self::level_snapshot(&self.asks.read());
        let now = clock.now_millis();
        let mut filled_quantity = Decimal::ZERO;

        {
            let mut asks = self.asks.write();
            let levels: Vec<super::types::PriceLevel> = asks.keys().cloned().collect();

            'levels: for level in levels {
                if budget <= Decimal::ZERO {
                    break;
                }
                let Some(queue) = asks.get_mut(&level) else { continue };
                while let Some(maker) = queue.front_mut() {
                    if budget <= Decimal::ZERO {
                        break 'levels;
                    }
                    let full_cost = maker.remaining * maker.price;
                    let (trade_qty, trade_cost) = if full_cost <= budget {
                        (maker.remaining, full_cost)
                    } else {
                        (budget / maker.price, budget)
                    };

                    trades.push(TradeExecution {
                        trade_id: next_trade_id(),
                        maker_order_id: maker.order_id,
                        taker_order_id,
                        maker_user_id: maker.user_id,
                        taker_user_id,
                        price: maker.price,
                        quantity: trade_qty,
                        timestamp: now,
                    });

                    budget -= trade_cost;
                    filled_quantity += trade_qty;
                    maker.remaining -= trade_qty;
                    self.set_last_trade_price(maker.price);

                    if maker.remaining <= Decimal::ZERO {
                        let maker_id = maker.order_id;
                        queue.pop_front();
                        self.order_index.remove(&maker_id);
                        self.order_count.fetch_sub(1, AtomicOrdering::Relaxed);
                    } else {
                        break;
                    }
                }
                if queue.is_empty() {
                    asks.remove(&level);
                }
            }
        }

        if !trades.is_empty() {
            let after = self.bump_sequence();
            self.record_delta(before, after, &bids_before, &asks_before);
        }

        (trades, filled_quantity, budget)
    }

    #[allow(clippy::too_many_arguments)]
    fn match_side(
        &self,
        book: &mut BTreeMap<super::types::PriceLevel, VecDeque<OrderRef>>,
        quantity: &mut Decimal,
        limit_price: Option<Decimal>,
        taker_is_buy: bool,
        taker_order_id: OrderId,
        taker_user_id: UserId,
        now: i64,
        next_trade_id: &dyn Fn() -> TradeId,
        trades: &mut Vec<TradeExecution>,
    ) {
        let levels: Vec<super::types::PriceLevel> = if taker_is_buy {
            book.keys().cloned().collect()
        } else {
            book.keys().rev().cloned().collect()
        };

        for level in levels {
            if *quantity <= Decimal::ZERO {
                break;
            }
            let level_price = level.to_decimal();
            if let Some(limit) = limit_price {
                let through = if taker_is_buy { level_price > limit } else { level_price < limit };
                if through {
                    break;
                }
            }

            let Some(queue) = book.get_mut(&level) else { continue };
            while let Some(maker) = queue.front_mut() {
                if *quantity <= Decimal::ZERO {
                    break;
                }
                let trade_qty = (*quantity).min(maker.remaining);
                let trade_price = maker.price;
                let maker_user_id = maker.user_id;

                trades.push(TradeExecution {
                    trade_id: next_trade_id(),
                    maker_order_id: maker.order_id,
                    taker_order_id,
                    maker_user_id,
                    taker_user_id,
                    price: trade_price,
                    quantity: trade_qty,
                    timestamp: now,
                });

                *quantity -= trade_qty;
                maker.remaining -= trade_qty;
                self.set_last_trade_price(trade_price);

                if maker.remaining <= Decimal::ZERO {
                    let maker_id = maker.order_id;
                    queue.pop_front();
                    self.order_index.remove(&maker_id);
                    self.order_count.fetch_sub(1, AtomicOrdering::Relaxed);
                } else {
                    break;
                }
            }
            if queue.is_empty() {
                book.remove(&level);
            }
        }
    }

    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let bids = self.level_views(&self.bids.read(), true, Some(depth));
        let asks = self.level_views(&self.asks.read(), false, Some(depth));
        OrderBookSnapshot {
            symbol: self.symbol.clone(),
            sequence: self.sequence(),
            bids,
            asks,
            timestamp: 0,
        }
    }

    /// Deltas strictly after `from_sequence`, merged into one. Returns
    /// `None` if `from_sequence` has aged out of the ring buffer — the
    /// caller must fall back to a full `snapshot`.
    pub fn delta_since(&self, from_sequence: u64) -> Option<BookDelta> {
        let log = self.deltas.read();
        let oldest = log.front()?.0;
        if from_sequence < oldest.saturating_sub(1) && !log.is_empty() && from_sequence + 1 < oldest {
            return None;
        }
        log.back().map(|(_, delta)| BookDelta {
            symbol: delta.symbol.clone(),
            from_sequence,
            to_sequence: delta.to_sequence,
            bids: delta.bids.clone(),
            asks: delta.asks.clone(),
        })
    }

    fn level_views(
        &self,
        book: &BTreeMap<super::types::PriceLevel, VecDeque<OrderRef>>,
        is_bids: bool,
        depth: Option<usize>,
    ) -> Vec<BookLevelView> {
        let iter: Box<dyn Iterator<Item = (&super::types::PriceLevel, &VecDeque<OrderRef>)>> = if is_bids {
            Box::new(book.iter().rev())
        } else {
            Box::new(book.iter())
        };
        let views = iter.map(|(price, orders)| BookLevelView {
            price: price.to_decimal(),
            quantity: orders.iter().map(|o| o.remaining).sum(),
            order_count: orders.len(),
        });
        match depth {
            Some(d) => views.take(d).collect(),
            None => views.collect(),
        }
    }
}

fn remove_from_level(
    book: &mut BTreeMap<super::types::PriceLevel, VecDeque<OrderRef>>,
    level: super::types::PriceLevel,
    order_id: OrderId,
) -> Option<Decimal> {
    let queue = book.get_mut(&level)?;
    let pos = queue.iter().position(|o| o.order_id == order_id)?;
    let entry = queue.remove(pos)?;
    if queue.is_empty() {
        book.remove(&level);
    }
    Some(entry.remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64 as StdAtomicU64, Ordering as StdOrdering};

    fn trade_id_source() -> impl Fn() -> TradeId {
        let counter = StdAtomicU64::new(1);
        move || TradeId(counter.fetch_add(1, StdOrdering::Relaxed))
    }

    #[test]
    fn place_and_remove_round_trips() {
        let book = Orderbook::new("BTCUSDT");
        book.place(Side::Buy, OrderId(1), UserId(1), dec!(100.0), dec!(1.0));
        assert_eq!(book.order_count(), 1);
        assert!(book.has_order(OrderId(1)));

        let remaining = book.remove(OrderId(1));
        assert_eq!(remaining, Some(dec!(1.0)));
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn best_bid_ask_and_spread() {
        let book = Orderbook::new("BTCUSDT");
        book.place(Side::Buy, OrderId(1), UserId(1), dec!(100.0), dec!(1.0));
        book.place(Side::Buy, OrderId(2), UserId(1), dec!(101.0), dec!(1.0));
        book.place(Side::Sell, OrderId(3), UserId(2), dec!(102.0), dec!(1.0));
        book.place(Side::Sell, OrderId(4), UserId(2), dec!(103.0), dec!(1.0));

        assert_eq!(book.best_bid(), Some(dec!(101.0)));
        assert_eq!(book.best_ask(), Some(dec!(102.0)));
    }

    #[test]
    fn match_against_respects_price_time_priority() {
        let book = Orderbook::new("BTCUSDT");
        let clock = SystemClock;
        let trade_id = trade_id_source();

        book.place(Side::Sell, OrderId(1), UserId(10), dec!(100.0), dec!(1.0));
        book.place(Side::Sell, OrderId(2), UserId(10), dec!(101.0), dec!(2.0));

        let (trades, remaining) = book.match_against(
            OrderId(100),
            UserId(20),
            Side::Buy,
            dec!(1.5),
            Some(dec!(101.0)),
            &clock,
            &trade_id,
        );

        assert_eq!(trades.len(), 2);
        assert_eq!(remaining, dec!(0.0));
        assert_eq!(trades[0].price, dec!(100.0));
        assert_eq!(trades[0].quantity, dec!(1.0));
        assert_eq!(trades[1].price, dec!(101.0));
        assert_eq!(trades[1].quantity, dec!(0.5));

        assert!(!book.has_order(OrderId(1)));
        assert!(book.has_order(OrderId(2)));
    }

    #[test]
    fn market_order_has_no_limit_price() {
        let book = Orderbook::new("BTCUSDT");
        let clock = SystemClock;
        let trade_id = trade_id_source();

        book.place(Side::Sell, OrderId(1), UserId(10), dec!(50.0), dec!(1.0));

        let (trades, remaining) = book.match_against(
            OrderId(200),
            UserId(20),
            Side::Buy,
            dec!(1.0),
            None,
            &clock,
            &trade_id,
        );

        assert_eq!(trades.len(), 1);
        assert_eq!(remaining, dec!(0.0));
    }

    #[test]
    fn snapshot_aggregates_quantity_per_level() {
        let book = Orderbook::new("BTCUSDT");
        book.place(Side::Buy, OrderId(1), UserId(1), dec!(100.0), dec!(1.0));
        book.place(Side::Buy, OrderId(2), UserId(1), dec!(100.0), dec!(2.0));
        book.place(Side::Sell, OrderId(3), UserId(2), dec!(102.0), dec!(1.5));

        let snapshot = book.snapshot(10);
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.bids[0].quantity, dec!(3.0));
        assert_eq!(snapshot.asks[0].quantity, dec!(1.5));
    }

    #[test]
    fn match_budget_spends_exactly_the_budget_or_exhausts_book() {
        let book = Orderbook::new("BTCUSDT");
        let clock = SystemClock;
        let trade_id = trade_id_source();

        book.place(Side::Sell, OrderId(1), UserId(10), dec!(100.0), dec!(2.0));
        book.place(Side::Sell, OrderId(2), UserId(10), dec!(110.0), dec!(2.0));

        // budget only covers the first level plus a bit of the second
        let (trades, filled_qty, leftover) = book.match_budget(
            OrderId(300),
            UserId(20),
            dec!(255.0),
            &clock,
            &trade_id,
        );

        assert_eq!(trades.len(), 2);
        assert_eq!(filled_qty, dec!(2.5));
        assert_eq!(leftover, dec!(0.0));
        assert!(book.has_order(OrderId(2)));
    }

    #[test]
    fn delta_reports_removed_level_as_zero_quantity() {
        let book = Orderbook::new("BTCUSDT");
        book.place(Side::Buy, OrderId(1), UserId(1), dec!(100.0), dec!(1.0));
        book.place(Side::Buy, OrderId(2), UserId(1), dec!(101.0), dec!(1.0));
        let seq_before_remove = book.sequence();

        book.remove(OrderId(2));
        let delta = book.delta_since(seq_before_remove - 1).unwrap();

        // only the removed level appears; the untouched 100.0 level is
        // not repeated since it never changed.
        assert_eq!(delta.bids.len(), 1);
        assert_eq!(delta.bids[0].price, dec!(101.0));
        assert_eq!(delta.bids[0].quantity, dec!(0));
        assert!(delta.asks.is_empty());
    }

    #[test]
    fn sequence_bumps_on_every_mutation() {
        let book = Orderbook::new("BTCUSDT");
        assert_eq!(book.sequence(), 0);
        book.place(Side::Buy, OrderId(1), UserId(1), dec!(100.0), dec!(1.0));
        assert_eq!(book.sequence(), 1);
        book.remove(OrderId(1));
        assert_eq!(book.sequence(), 2);
    }

    #[test]
    fn restore_reinserts_a_fully_consumed_maker() {
        let book = Orderbook::new("BTCUSDT");
        book.place(Side::Sell, OrderId(1), UserId(10), dec!(100.0), dec!(1.0));
        assert!(book.remove(OrderId(1)).is_some());

        book.restore(Side::Sell, OrderId(1), UserId(10), dec!(100.0), dec!(1.0));
        assert!(book.has_order(OrderId(1)));
        assert_eq!(book.best_ask(), Some(dec!(100.0)));
    }

    #[test]
    fn restore_tops_up_a_still_resting_maker() {
        let book = Orderbook::new("BTCUSDT");
        book.place(Side::Sell, OrderId(1), UserId(10), dec!(100.0), dec!(0.4));

        book.restore(Side::Sell, OrderId(1), UserId(10), dec!(100.0), dec!(0.6));
        let snapshot = book.snapshot(10);
        assert_eq!(snapshot.asks[0].quantity, dec!(1.0));
    }
}
