//! Process entry point
//!
//! No HTTP layer, per Non-goals — the engine's contract is the plain
//! Rust `SymbolActorHandle`/`MatchingEngine` API, not a wire protocol.
//! `main` still follows the teacher's `#[tokio::main]` +
//! `tracing_subscriber` + `dotenvy` startup shape, since a runnable
//! crate needs *a* process entry point.

mod cache;
mod clock;
mod config;
mod error;
mod models;
mod services;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::models::{TradingPairRegistry, SYSTEM_ACCOUNT};
use crate::services::autotrader::{StaticPriceFeed, SymbolAutoTrader};
use crate::services::ledger::AssetLedger;
use crate::services::matching::{MatchingEngine, SymbolActorHandle};
use crate::services::persistence::cache_store::RedisCacheStore;
use crate::services::persistence::durable_store::PostgresDurableStore;
use crate::services::persistence::{Persister, PersisterConfig};

#[tokio::main]
async fn main() -> ExitCode {
    match run_standalone().await {
        Ok(()) => ExitCode::from(0),
        Err(StartupError::Config(e)) => {
            eprintln!("configuration error: {e}");
            ExitCode::from(1)
        }
        Err(StartupError::CacheUnavailable(e)) => {
            eprintln!("cache tier unavailable at startup: {e}");
            ExitCode::from(2)
        }
        Err(StartupError::DurableUnreachable(e)) => {
            eprintln!("durable store unreachable during initial snapshot load: {e}");
            ExitCode::from(3)
        }
    }
}

#[derive(Debug)]
enum StartupError {
    Config(String),
    CacheUnavailable(String),
    DurableUnreachable(String),
}

/// The startup sequence spec §6 documents via exit codes: connect to
/// the cache tier, connect to the durable store, wire the matching
/// engine, persister, and auto-traders, then block forever driving
/// background workers. Returns once a fatal startup step fails or
/// (never, in normal operation) the process is asked to drain.
async fn run_standalone() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spot_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::load().map_err(|e| StartupError::Config(e.to_string()))?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting matching engine");

    let redis_client = crate::cache::redis_client::RedisClient::from_url(&config.persistence.redis_url)
        .await
        .map_err(|e| StartupError::CacheUnavailable(e.to_string()))?;
    let cache_store = Arc::new(RedisCacheStore::new(Arc::new(redis_client)));
    tracing::info!("cache tier connected");

    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.persistence.database_url)
        .await
        .map_err(|e| StartupError::DurableUnreachable(e.to_string()))?;
    let durable_store = Arc::new(PostgresDurableStore::new(pg_pool));
    tracing::info!("durable store connected");

    let mut registry = TradingPairRegistry::new();
    for pair in config.trading_pairs().into_values() {
        registry.insert(pair);
    }
    let registry = Arc::new(registry);

    let (dirty_tx, dirty_rx) = crossbeam::channel::unbounded();
    let ledger = Arc::new(AssetLedger::new(dirty_tx));
    let clock = Arc::new(SystemClock);
    let engine = Arc::new(MatchingEngine::new(Arc::clone(&registry), Arc::clone(&ledger), clock.clone() as Arc<dyn crate::clock::Clock>));
    // Held for its lifetime: nothing in this minimal entry point submits
    // through it yet, but it's how a future API layer would reach the
    // engine with serialized per-symbol access.
    let _actor = Arc::new(SymbolActorHandle::new(Arc::clone(&engine), config.matching.max_queue_depth));
    tracing::info!(symbols = registry.symbols().count(), "matching engine initialized");

    let persister = Persister::new(
        Arc::clone(&cache_store),
        Arc::clone(&durable_store),
        PersisterConfig {
            batch_size: config.persistence.batch_size,
            poll_interval_ms: config.persistence.poll_interval_ms,
        },
    );
    persister.spawn_trade_ingest(engine.subscribe_trades());
    persister.spawn_asset_ingest(dirty_rx, Arc::clone(&ledger));
    persister.spawn_trade_drain();
    persister.spawn_asset_drain();
    tracing::info!("persister workers started");

    spawn_expiry_worker(Arc::clone(&engine), config.order.ttl_seconds);

    let autotrader_config: crate::services::autotrader::AutoTraderConfig = (&config.autotrader).into();
    for symbol in registry.symbols() {
        let feed = Arc::new(StaticPriceFeed::new(rust_decimal::Decimal::ZERO));
        let trader = SymbolAutoTrader::new(
            symbol.to_string(),
            Arc::clone(&engine),
            feed,
            autotrader_config.clone(),
            clock.clone() as Arc<dyn crate::clock::Clock>,
            SYSTEM_ACCOUNT,
        );
        trader.spawn();
    }
    tracing::info!("auto-traders started");

    std::future::pending::<()>().await;
    Ok(())
}

/// Periodically cancels resting orders older than `ttl_seconds` across
/// every symbol, per spec §4.B "Expiry".
fn spawn_expiry_worker(engine: Arc<MatchingEngine>, ttl_seconds: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let expired = engine.expire_stale_orders(ttl_seconds);
            if !expired.is_empty() {
                tracing::info!(count = expired.len(), "expired stale resting orders");
            }
        }
    });
}
