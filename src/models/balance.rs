//! Per-(user, asset) balance row
//!
//! Grounded on the teacher's `Balance`/`BalanceResponse` split in
//! `models/balance.rs`, adapted from wallet-address keys to numeric
//! `UserId` and from a DB-row shape to the ledger's in-memory row, which
//! additionally carries a monotonic `version` the write-behind persister
//! uses for idempotent upserts (spec §6: `asset:{userId}:{symbol} ->
//! {available, frozen, version}`).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub user_id: UserId,
    pub symbol: String,
    pub available: Decimal,
    pub frozen: Decimal,
    pub version: u64,
}

impl Asset {
    pub fn new(user_id: UserId, symbol: impl Into<String>) -> Self {
        Self {
            user_id,
            symbol: symbol.into(),
            available: Decimal::ZERO,
            frozen: Decimal::ZERO,
            version: 0,
        }
    }

    pub fn total(&self) -> Decimal {
        self.available + self.frozen
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetResponse {
    pub symbol: String,
    pub available: Decimal,
    pub frozen: Decimal,
    pub total: Decimal,
}

impl From<&Asset> for AssetResponse {
    fn from(asset: &Asset) -> Self {
        Self {
            symbol: asset.symbol.clone(),
            available: asset.available,
            frozen: asset.frozen,
            total: asset.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_available_plus_frozen() {
        let mut asset = Asset::new(UserId(1), "USDT");
        asset.available = Decimal::new(500, 0);
        asset.frozen = Decimal::new(100, 0);
        assert_eq!(asset.total(), Decimal::new(600, 0));
    }
}
