// ===============================
// src/main.rs
// ===============================
//
// market-replay: deterministic market replay simulator.
//
//   market-replay <path_to_tick_data.csv>
//
// Replays a historical tick file through a time-ordered event dispatcher,
// injects configurable latencies at every hop (feed, strategy, order wire,
// exchange, ack wire), runs the configured strategies concurrently, and
// simulates order lifecycles against per-symbol top-of-book state. Writes
// trade, latency, and PnL CSV reports on completion; optionally mirrors the
// whole event stream to a JSONL record.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use market_replay::config::{self, StrategyMode};
use market_replay::dispatcher::Dispatcher;
use market_replay::feed::TickReader;
use market_replay::latency::LatencyModel;
use market_replay::metrics::MetricsCollector;
use market_replay::recorder;
use market_replay::strategy::{BasicTaker, MeanReversion, Strategy};

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ---- Config ----
    let (args, latency_config) = config::load();

    let Some(data_file) = std::env::args().nth(1) else {
        error!("usage: market-replay <path_to_tick_data.csv>");
        return ExitCode::FAILURE;
    };

    info!(
        data_file = %data_file,
        symbol = %args.symbol,
        strategies = ?args.strategy_modes.iter().map(StrategyMode::label).collect::<Vec<_>>(),
        md_feed_latency = %latency_config.market_data_feed_latency,
        strategy_proc_latency = %latency_config.strategy_processing_latency,
        order_net_latency = %latency_config.order_network_latency_strat_to_exch,
        exch_ack_latency = %latency_config.exchange_order_processing_latency,
        exch_fill_latency = %latency_config.exchange_fill_processing_latency,
        ack_net_latency = %latency_config.ack_network_latency_exch_to_strat,
        "startup config"
    );

    // ---- Metrics ----
    let metrics = Arc::new(MetricsCollector::new(
        args.trades_file.clone(),
        args.latency_file.clone(),
        args.pnl_file.clone(),
    ));

    // ---- Tick feed (fatal if unopenable; still flush report headers) ----
    let ticks = match TickReader::open(&data_file) {
        Ok(reader) => reader,
        Err(e) => {
            error!(error = %e, "startup failed");
            metrics.report_final_metrics();
            return ExitCode::FAILURE;
        }
    };

    // ---- Recorder (optional) ----
    let mut record_task = None;
    let record_tx = args.record_file.clone().map(|path| {
        let (tx, rx) = tokio::sync::mpsc::channel(recorder::RECORD_CHANNEL_CAPACITY);
        record_task = Some(tokio::spawn(recorder::run(rx, path)));
        tx
    });

    // ---- Dispatcher & strategies ----
    let mut dispatcher = Dispatcher::new(
        LatencyModel::new(latency_config),
        Arc::clone(&metrics),
        args.strategy_queue_capacity,
        args.order_queue_capacity,
        record_tx,
    );

    for (i, mode) in args.strategy_modes.iter().enumerate() {
        let id = format!("{}_{}", mode.label(), i + 1);
        let strategy: Box<dyn Strategy> = match mode {
            StrategyMode::BasicTaker => Box::new(BasicTaker::new(&args.symbol, args.order_qty)),
            StrategyMode::MeanReversion => {
                Box::new(MeanReversion::new(&args.symbol, 64, 0.0003, args.order_qty))
            }
        };
        dispatcher.add_strategy(id, strategy);
    }

    // ---- Run ----
    info!("starting simulation run");
    let started = Instant::now();
    let final_sim_time = dispatcher.run(ticks).await;
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        final_sim_time = %final_sim_time,
        "simulation run finished"
    );

    // the dispatcher dropped its sender; the recorder drains and flushes
    if let Some(task) = record_task {
        let _ = task.await;
    }

    // ---- Reports ----
    metrics.report_final_metrics();

    info!("market replay finished");
    ExitCode::SUCCESS
}
