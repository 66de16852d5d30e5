// ===============================
// src/metrics.rs
// ===============================
//
// Append-only trade and latency logs plus per-(strategy, symbol) PnL books,
// all behind one mutex (writes are rare: one trade per fill). PnL is
// average-cost: fills in the direction of the position move the average,
// position-reducing fills realize against it. Unrealized PnL is marked from
// the last observed quote mid. Three CSV reports at the end of a run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;

use ahash::AHashMap;
use tracing::{error, info};

use crate::domain::{OrderId, Price, Quantity, Side, StrategyId};
use crate::time::{SimDuration, SimTime};

#[derive(Debug, Clone)]
pub struct SimulatedTrade {
    /// Arrival time of the fill ack at the strategy.
    pub timestamp: SimTime,
    pub strategy_id: StrategyId,
    pub symbol: String,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub client_order_id: OrderId,
    pub exchange_order_id: OrderId,
}

#[derive(Debug, Clone)]
pub struct LatencyRecord {
    pub event_time: SimTime,
    pub source: String,
    pub latency: SimDuration,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pnl {
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_volume_traded: f64,
    pub current_position: i64,
}

#[derive(Debug, Default)]
struct PnlBook {
    pnl: Pnl,
    avg_cost: f64,
}

impl PnlBook {
    fn apply_fill(&mut self, price: Price, quantity: Quantity, side: Side) {
        let signed = side.sign() * quantity as i64;
        let prev = self.pnl.current_position;
        let next = prev + signed;

        self.pnl.total_volume_traded += price * quantity as f64;

        if prev == 0 || prev.signum() == signed.signum() {
            // same direction: blend into the average cost
            let prev_abs = prev.unsigned_abs() as f64;
            let add = quantity as f64;
            self.avg_cost = if prev == 0 {
                price
            } else {
                (self.avg_cost * prev_abs + price * add) / (prev_abs + add)
            };
        } else {
            // reducing (or flipping): realize against the average
            let closed = quantity.min(prev.unsigned_abs()) as f64;
            self.pnl.realized_pnl += (price - self.avg_cost) * closed * prev.signum() as f64;
            if next == 0 {
                self.avg_cost = 0.0;
            } else if next.signum() == signed.signum() {
                // flipped through flat: remainder opens at the fill price
                self.avg_cost = price;
            }
        }
        self.pnl.current_position = next;
    }

    fn mark(&mut self, mid: Price) {
        if self.pnl.current_position != 0 && self.avg_cost != 0.0 {
            self.pnl.unrealized_pnl = (mid - self.avg_cost) * self.pnl.current_position as f64;
        } else {
            self.pnl.unrealized_pnl = 0.0;
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    trades: Vec<SimulatedTrade>,
    latencies: Vec<LatencyRecord>,
    pnl: AHashMap<(StrategyId, String), PnlBook>,
    last_mid: AHashMap<String, Price>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    trades_path: String,
    latency_path: String,
    pnl_path: String,
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new(
        trades_path: impl Into<String>,
        latency_path: impl Into<String>,
        pnl_path: impl Into<String>,
    ) -> Self {
        let collector = Self {
            trades_path: trades_path.into(),
            latency_path: latency_path.into(),
            pnl_path: pnl_path.into(),
            inner: Mutex::new(Inner::default()),
        };
        info!(
            trades = %collector.trades_path,
            latency = %collector.latency_path,
            pnl = %collector.pnl_path,
            "metrics collector initialized"
        );
        collector
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Logs the trade and folds it into the PnL book.
    pub fn record_trade(&self, trade: SimulatedTrade) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let book = inner
            .pnl
            .entry((trade.strategy_id.clone(), trade.symbol.clone()))
            .or_default();
        book.apply_fill(trade.price, trade.quantity, trade.side);
        if let Some(mid) = inner.last_mid.get(&trade.symbol) {
            book.mark(*mid);
        }
        inner.trades.push(trade);
    }

    pub fn record_latency(
        &self,
        source: impl Into<String>,
        latency: SimDuration,
        event_time: SimTime,
        notes: impl Into<String>,
    ) {
        self.lock().latencies.push(LatencyRecord {
            event_time,
            source: source.into(),
            latency,
            notes: notes.into(),
        });
    }

    pub fn update_pnl(
        &self,
        strategy_id: &str,
        symbol: &str,
        fill_price: Price,
        filled_quantity: Quantity,
        side: Side,
    ) {
        let mut inner = self.lock();
        let book = inner
            .pnl
            .entry((strategy_id.to_string(), symbol.to_string()))
            .or_default();
        book.apply_fill(fill_price, filled_quantity, side);
    }

    /// Mark every position in `symbol` to the new mid.
    pub fn update_market_price(&self, symbol: &str, mid: Price) {
        if !mid.is_finite() || mid <= 0.0 {
            return;
        }
        let mut inner = self.lock();
        inner.last_mid.insert(symbol.to_string(), mid);
        for ((_, sym), book) in inner.pnl.iter_mut() {
            if sym == symbol {
                book.mark(mid);
            }
        }
    }

    pub fn pnl(&self, strategy_id: &str, symbol: &str) -> Option<Pnl> {
        self.lock()
            .pnl
            .get(&(strategy_id.to_string(), symbol.to_string()))
            .map(|b| b.pnl)
    }

    pub fn trade_count(&self) -> usize {
        self.lock().trades.len()
    }

    /// Write the three CSV reports. Individual file failures are logged and
    /// the remaining reports are still attempted.
    pub fn report_final_metrics(&self) {
        let inner = self.lock();
        info!(
            trades = inner.trades.len(),
            latencies = inner.latencies.len(),
            positions = inner.pnl.len(),
            "writing final metrics reports"
        );
        write_trades(&self.trades_path, &inner.trades);
        write_latencies(&self.latency_path, &inner.latencies);
        write_pnl(&self.pnl_path, &inner.pnl);
    }
}

fn open_report(path: &str) -> Option<BufWriter<File>> {
    match File::create(path) {
        Ok(f) => Some(BufWriter::new(f)),
        Err(e) => {
            error!(%path, error = %e, "failed to open report file");
            None
        }
    }
}

fn write_trades(path: &str, trades: &[SimulatedTrade]) {
    let Some(mut out) = open_report(path) else {
        return;
    };
    let mut write = || -> std::io::Result<()> {
        writeln!(
            out,
            "TimestampNS,StrategyID,Symbol,Side,Price,Quantity,ClientOrderID,ExchangeOrderID"
        )?;
        for t in trades {
            writeln!(
                out,
                "{},{},{},{},{:.5},{},{},{}",
                t.timestamp,
                t.strategy_id,
                t.symbol,
                t.side.label(),
                t.price,
                t.quantity,
                t.client_order_id,
                t.exchange_order_id
            )?;
        }
        out.flush()
    };
    if let Err(e) = write() {
        error!(%path, error = %e, "failed to write trades report");
    } else {
        info!(%path, "trades report written");
    }
}

fn write_latencies(path: &str, latencies: &[LatencyRecord]) {
    let Some(mut out) = open_report(path) else {
        return;
    };
    let mut write = || -> std::io::Result<()> {
        writeln!(out, "EventTimestampNS,SourceDescription,LatencyNS,Notes")?;
        for r in latencies {
            writeln!(
                out,
                "{},{},{},{}",
                r.event_time,
                r.source,
                r.latency.as_nanos(),
                r.notes
            )?;
        }
        out.flush()
    };
    if let Err(e) = write() {
        error!(%path, error = %e, "failed to write latency report");
    } else {
        info!(%path, "latency report written");
    }
}

fn write_pnl(path: &str, pnl: &AHashMap<(StrategyId, String), PnlBook>) {
    let Some(mut out) = open_report(path) else {
        return;
    };
    // deterministic row order regardless of hasher
    let mut keys: Vec<&(StrategyId, String)> = pnl.keys().collect();
    keys.sort();

    let mut write = || -> std::io::Result<()> {
        writeln!(
            out,
            "StrategyID,Symbol,FinalPosition,TotalVolumeTraded,RealizedPnL,UnrealizedPnL"
        )?;
        for key in keys {
            let book = &pnl[key];
            writeln!(
                out,
                "{},{},{},{:.2},{:.2},{:.2}",
                key.0,
                key.1,
                book.pnl.current_position,
                book.pnl.total_volume_traded,
                book.pnl.realized_pnl,
                book.pnl.unrealized_pnl
            )?;
        }
        out.flush()
    };
    if let Err(e) = write() {
        error!(%path, error = %e, "failed to write pnl report");
    } else {
        info!(%path, "pnl report written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        let dir = std::env::temp_dir();
        let tag = format!(
            "{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        );
        MetricsCollector::new(
            dir.join(format!("mr_trades_{tag}.csv")).display().to_string(),
            dir.join(format!("mr_latency_{tag}.csv")).display().to_string(),
            dir.join(format!("mr_pnl_{tag}.csv")).display().to_string(),
        )
    }

    fn trade(side: Side, price: f64, qty: u64) -> SimulatedTrade {
        SimulatedTrade {
            timestamp: SimTime(1),
            strategy_id: "s1".into(),
            symbol: "EURUSD".into(),
            side,
            price,
            quantity: qty,
            client_order_id: 1,
            exchange_order_id: 1,
        }
    }

    #[test]
    fn buys_build_position_at_average_cost() {
        let m = collector();
        m.update_pnl("s1", "EURUSD", 1.0, 100, Side::Buy);
        m.update_pnl("s1", "EURUSD", 2.0, 100, Side::Buy);

        let pnl = m.pnl("s1", "EURUSD").unwrap();
        assert_eq!(pnl.current_position, 200);
        assert_eq!(pnl.realized_pnl, 0.0);
        assert!((pnl.total_volume_traded - 300.0).abs() < 1e-9);
    }

    #[test]
    fn reducing_fill_realizes_against_average() {
        let m = collector();
        m.update_pnl("s1", "EURUSD", 1.0, 100, Side::Buy);
        m.update_pnl("s1", "EURUSD", 1.5, 60, Side::Sell);

        let pnl = m.pnl("s1", "EURUSD").unwrap();
        assert_eq!(pnl.current_position, 40);
        assert!((pnl.realized_pnl - 30.0).abs() < 1e-9); // (1.5 - 1.0) * 60
    }

    #[test]
    fn short_position_realizes_on_buyback() {
        let m = collector();
        m.update_pnl("s1", "EURUSD", 2.0, 50, Side::Sell);
        m.update_pnl("s1", "EURUSD", 1.0, 50, Side::Buy);

        let pnl = m.pnl("s1", "EURUSD").unwrap();
        assert_eq!(pnl.current_position, 0);
        assert!((pnl.realized_pnl - 50.0).abs() < 1e-9); // (1.0 - 2.0) * 50 * -1
    }

    #[test]
    fn flip_through_flat_reopens_at_fill_price() {
        let m = collector();
        m.update_pnl("s1", "EURUSD", 1.0, 100, Side::Buy);
        m.update_pnl("s1", "EURUSD", 2.0, 150, Side::Sell);

        let pnl = m.pnl("s1", "EURUSD").unwrap();
        assert_eq!(pnl.current_position, -50);
        assert!((pnl.realized_pnl - 100.0).abs() < 1e-9);

        // mark at the reopen price: flat unrealized
        m.update_market_price("EURUSD", 2.0);
        let pnl = m.pnl("s1", "EURUSD").unwrap();
        assert!(pnl.unrealized_pnl.abs() < 1e-9);
    }

    #[test]
    fn mark_to_market_tracks_mid() {
        let m = collector();
        m.update_pnl("s1", "EURUSD", 1.0, 100, Side::Buy);
        m.update_market_price("EURUSD", 1.25);

        let pnl = m.pnl("s1", "EURUSD").unwrap();
        assert!((pnl.unrealized_pnl - 25.0).abs() < 1e-9);

        // other symbols untouched
        m.update_pnl("s1", "GBPUSD", 1.0, 10, Side::Buy);
        m.update_market_price("EURUSD", 1.30);
        assert_eq!(m.pnl("s1", "GBPUSD").unwrap().unrealized_pnl, 0.0);
    }

    #[test]
    fn record_trade_feeds_the_pnl_book() {
        let m = collector();
        m.record_trade(trade(Side::Buy, 1.07105, 1_000));
        assert_eq!(m.trade_count(), 1);
        let pnl = m.pnl("s1", "EURUSD").unwrap();
        assert_eq!(pnl.current_position, 1_000);
    }

    #[test]
    fn reports_contain_headers_and_rows() {
        let m = collector();
        m.record_trade(trade(Side::Buy, 1.07105, 1_000));
        m.record_latency("s1_order_fill_ack", SimDuration::micros(60), SimTime(5), "decision_to_fill_ack");
        m.report_final_metrics();

        let trades = std::fs::read_to_string(&m.trades_path).unwrap();
        assert!(trades.starts_with("TimestampNS,StrategyID,Symbol,Side"));
        assert!(trades.contains("s1,EURUSD,BUY,1.07105,1000,1,1"));

        let latency = std::fs::read_to_string(&m.latency_path).unwrap();
        assert!(latency.contains("5,s1_order_fill_ack,60000,decision_to_fill_ack"));

        let pnl = std::fs::read_to_string(&m.pnl_path).unwrap();
        assert!(pnl.starts_with("StrategyID,Symbol,FinalPosition"));
        assert!(pnl.contains("s1,EURUSD,1000,"));
    }

    #[test]
    fn empty_run_reports_headers_only() {
        let m = collector();
        m.report_final_metrics();
        let trades = std::fs::read_to_string(&m.trades_path).unwrap();
        assert_eq!(trades.lines().count(), 1);
        let pnl = std::fs::read_to_string(&m.pnl_path).unwrap();
        assert_eq!(pnl.lines().count(), 1);
    }
}
