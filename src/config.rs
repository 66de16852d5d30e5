// ===============================
// src/config.rs
// ===============================
//
// Environment-driven configuration. The tick file is the one positional CLI
// argument; everything else comes from ENV (with .env support), each knob
// with a sensible default:
//
//   MD_FEED_LATENCY=50us        STRATEGY_PROC_LATENCY=5us
//   ORDER_NET_LATENCY=20us      EXCH_ACK_LATENCY=10us
//   EXCH_FILL_LATENCY=15us      ACK_NET_LATENCY=20us
//   STRATEGIES=basic_taker,mean_reversion   (or STRATEGY=basic_taker)
//   SYMBOL=EURUSD               ORDER_QTY=1000
//   STRATEGY_QUEUE_CAP=10000    ORDER_QUEUE_CAP=0 (0 = unbounded)
//   TRADES_FILE=sim_trades.csv  LATENCY_FILE=sim_latency.csv
//   PNL_FILE=sim_pnl.csv        RECORD_FILE=replay.jsonl (optional)

use std::env;

use dotenvy::dotenv;
use tracing::warn;

use crate::latency::LatencyConfig;
use crate::time::{parse_duration, SimDuration};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StrategyMode {
    BasicTaker,
    MeanReversion,
}

impl StrategyMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic_taker" | "basictaker" | "taker" | "basic" => Some(StrategyMode::BasicTaker),
            "mean_reversion" | "meanreversion" | "mr" => Some(StrategyMode::MeanReversion),
            _ => None,
        }
    }

    /// Read strategies from `STRATEGIES` (comma separated) or fall back to
    /// `STRATEGY` (single).
    pub fn parse_many(env_key_list: &str, env_key_single: &str, default_list: Vec<Self>) -> Vec<Self> {
        if let Ok(val) = env::var(env_key_list) {
            let mut out: Vec<Self> = val.split(',').filter_map(Self::parse_one).collect();
            out.dedup();
            if !out.is_empty() {
                return out;
            }
        }
        if let Ok(one) = env::var(env_key_single) {
            if let Some(mode) = Self::parse_one(&one) {
                return vec![mode];
            }
        }
        default_list
    }

    pub fn label(&self) -> &'static str {
        match self {
            StrategyMode::BasicTaker => "basic_taker",
            StrategyMode::MeanReversion => "mean_reversion",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // primary symbol for the stock strategies
    pub symbol: String,
    pub order_qty: u64,

    // outputs
    pub trades_file: String,
    pub latency_file: String,
    pub pnl_file: String,
    pub record_file: Option<String>,

    // queues
    pub strategy_queue_capacity: usize,
    pub order_queue_capacity: usize,

    // strategy selection
    pub strategy_modes: Vec<StrategyMode>,
}

pub fn load() -> (Args, LatencyConfig) {
    // make sure .env is read before any env lookups
    let _ = dotenv();

    let symbol = env::var("SYMBOL").unwrap_or_else(|_| "EURUSD".to_string());
    let order_qty = parse_env("ORDER_QTY", 1_000u64);

    let trades_file = env::var("TRADES_FILE").unwrap_or_else(|_| "sim_trades.csv".to_string());
    let latency_file = env::var("LATENCY_FILE").unwrap_or_else(|_| "sim_latency.csv".to_string());
    let pnl_file = env::var("PNL_FILE").unwrap_or_else(|_| "sim_pnl.csv".to_string());
    let record_file = env::var("RECORD_FILE").ok();

    let strategy_queue_capacity = parse_env("STRATEGY_QUEUE_CAP", 10_000usize);
    let order_queue_capacity = parse_env("ORDER_QUEUE_CAP", 0usize);

    let strategy_modes =
        StrategyMode::parse_many("STRATEGIES", "STRATEGY", vec![StrategyMode::BasicTaker]);

    let args = Args {
        symbol,
        order_qty,
        trades_file,
        latency_file,
        pnl_file,
        record_file,
        strategy_queue_capacity,
        order_queue_capacity,
        strategy_modes,
    };

    let defaults = LatencyConfig::default();
    let latency = LatencyConfig {
        market_data_feed_latency: env_duration("MD_FEED_LATENCY", defaults.market_data_feed_latency),
        strategy_processing_latency: env_duration(
            "STRATEGY_PROC_LATENCY",
            defaults.strategy_processing_latency,
        ),
        order_network_latency_strat_to_exch: env_duration(
            "ORDER_NET_LATENCY",
            defaults.order_network_latency_strat_to_exch,
        ),
        exchange_order_processing_latency: env_duration(
            "EXCH_ACK_LATENCY",
            defaults.exchange_order_processing_latency,
        ),
        exchange_fill_processing_latency: env_duration(
            "EXCH_FILL_LATENCY",
            defaults.exchange_fill_processing_latency,
        ),
        ack_network_latency_exch_to_strat: env_duration(
            "ACK_NET_LATENCY",
            defaults.ack_network_latency_exch_to_strat,
        ),
    };

    (args, latency)
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_duration(key: &str, default: SimDuration) -> SimDuration {
    match env::var(key) {
        Ok(val) => match parse_duration(&val) {
            Ok(d) => d,
            Err(e) => {
                warn!(%key, value = %val, error = %e, "bad duration in env, using default");
                default
            }
        },
        Err(_) => default,
    }
}
