pub mod autotrader;
pub mod ledger;
pub mod matching;
pub mod persistence;
