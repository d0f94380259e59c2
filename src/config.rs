//! Engine configuration
//!
//! Grounded on the teacher's `AppConfig` in `main.rs`: `config::Config`
//! layered over defaults, a config file, and environment variables,
//! loaded behind `dotenvy::dotenv()`. Covers every option spec §6
//! enumerates.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::TradingPair;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub max_queue_depth: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { max_queue_depth: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub database_url: String,
    pub redis_url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            poll_interval_ms: 100,
            database_url: "postgres://localhost/spot_engine".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    pub ttl_seconds: i64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self { ttl_seconds: 86_400 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTraderSettings {
    pub enabled: bool,
    pub layers: u32,
    pub spread_step_bps: u32,
    pub layer_quantity: Decimal,
    pub max_quote_age_secs: i64,
    pub reprice_threshold_bps: u32,
    pub daily_notional_cap: Decimal,
    pub tick_interval_secs: u64,
    pub min_reserve: Decimal,
}

impl Default for AutoTraderSettings {
    fn default() -> Self {
        let d = crate::services::autotrader::AutoTraderConfig::default();
        Self {
            enabled: d.enabled,
            layers: d.layers,
            spread_step_bps: d.spread_step_bps,
            layer_quantity: d.layer_quantity,
            max_quote_age_secs: d.max_quote_age_secs,
            reprice_threshold_bps: d.reprice_threshold_bps,
            daily_notional_cap: d.daily_notional_cap,
            tick_interval_secs: d.tick_interval_secs,
            min_reserve: d.min_reserve,
        }
    }
}

impl From<&AutoTraderSettings> for crate::services::autotrader::AutoTraderConfig {
    fn from(settings: &AutoTraderSettings) -> Self {
        Self {
            enabled: settings.enabled,
            layers: settings.layers,
            spread_step_bps: settings.spread_step_bps,
            layer_quantity: settings.layer_quantity,
            max_quote_age_secs: settings.max_quote_age_secs,
            reprice_threshold_bps: settings.reprice_threshold_bps,
            daily_notional_cap: settings.daily_notional_cap,
            tick_interval_secs: settings.tick_interval_secs,
            min_reserve: settings.min_reserve,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub is_active: bool,
}

impl From<&SymbolConfig> for TradingPair {
    fn from(s: &SymbolConfig) -> Self {
        TradingPair {
            symbol: s.symbol.clone(),
            base: s.base.clone(),
            quote: s.quote.clone(),
            price_precision: s.price_precision,
            quantity_precision: s.quantity_precision,
            min_quantity: s.min_quantity,
            max_quantity: s.max_quantity,
            is_active: s.is_active,
        }
    }
}

fn default_symbols() -> Vec<SymbolConfig> {
    vec![SymbolConfig {
        symbol: "BTCUSDT".into(),
        base: "BTC".into(),
        quote: "USDT".into(),
        price_precision: 2,
        quantity_precision: 6,
        min_quantity: Decimal::new(1, 4),
        max_quantity: Decimal::new(1000, 0),
        is_active: true,
    }]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub order: OrderConfig,
    #[serde(default)]
    pub autotrader: AutoTraderSettings,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<SymbolConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            persistence: PersistenceConfig::default(),
            order: OrderConfig::default(),
            autotrader: AutoTraderSettings::default(),
            symbols: default_symbols(),
        }
    }
}

impl EngineConfig {
    /// Loads defaults, overlays an optional `config/engine.toml`, then
    /// environment variables prefixed `ENGINE__` (double underscore
    /// separates nesting, e.g. `ENGINE__MATCHING__MAX_QUEUE_DEPTH`).
    /// `.env` is loaded first via `dotenvy`, matching the teacher's
    /// startup order.
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();

        let defaults = EngineConfig::default();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::with_name("config/engine").required(false))
            .add_source(config::Environment::with_prefix("ENGINE").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn trading_pairs(&self) -> HashMap<String, TradingPair> {
        self.symbols.iter().map(|s| (s.symbol.clone(), TradingPair::from(s))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_enumerated_options() {
        let config = EngineConfig::default();
        assert_eq!(config.matching.max_queue_depth, 10_000);
        assert_eq!(config.persistence.batch_size, 500);
        assert_eq!(config.persistence.poll_interval_ms, 100);
        assert_eq!(config.order.ttl_seconds, 86_400);
        assert!(!config.symbols.is_empty());
    }
}
