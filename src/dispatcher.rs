// ===============================
// src/dispatcher.rs
// ===============================
//
// The event dispatcher. One task owns the main event priority queue (MEPQ),
// the simulation clock, and the per-symbol order books. It replays the tick
// file in effective-time order, fans market data out to every strategy's
// inbound queue, turns order requests into latency-scheduled acks and fills,
// and winds everything down once the feed and all in-flight activity are
// exhausted.
//
// The MEPQ has exactly one mutator; it is a plain binary heap, not a
// concurrent structure. Order requests arrive on an mpsc channel and are
// drained non-blocking at the top of every loop iteration, so order handling
// stays timely even when market data is sparse.

use std::collections::BinaryHeap;
use std::io::BufRead;
use std::sync::Arc;

use ahash::AHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::book::SimpleOrderBook;
use crate::domain::{
    ControlEvent, ControlKind, Event, HeapEntry, OrderAckEvent, OrderId, OrderRequest,
    OrderStatus, OrderType, StrategyId,
};
use crate::feed::TickReader;
use crate::latency::LatencyModel;
use crate::metrics::MetricsCollector;
use crate::queue::{BlockingQueue, PushOutcome};
use crate::recorder::ReplayRecord;
use crate::strategy::{run_strategy, OrderSender, Strategy};
use crate::time::{SimDuration, SimTime};

/// Sim-time interval between keep-alive order-request sweeps.
const ORDER_SWEEP_INTERVAL: SimDuration = SimDuration::millis(10);
/// Wall-clock nap while waiting for strategies to go quiet.
const IDLE_SLEEP: std::time::Duration = std::time::Duration::from_millis(1);

pub enum OrderReceiver {
    Bounded(mpsc::Receiver<OrderRequest>),
    Unbounded(mpsc::UnboundedReceiver<OrderRequest>),
}

impl OrderReceiver {
    fn try_recv(&mut self) -> Option<OrderRequest> {
        match self {
            OrderReceiver::Bounded(rx) => rx.try_recv().ok(),
            OrderReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Order channel between strategies and the dispatcher; capacity 0 means
/// unbounded.
pub fn order_channel(capacity: usize) -> (OrderSender, OrderReceiver) {
    if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (OrderSender::Unbounded(tx), OrderReceiver::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (OrderSender::Bounded(tx), OrderReceiver::Bounded(rx))
    }
}

// ---- MEPQ ----

#[derive(Default)]
struct Mepq {
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl Mepq {
    fn push(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry { seq, event });
    }

    fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|entry| entry.event)
    }

    fn peek_ts(&self) -> Option<SimTime> {
        self.heap.peek().map(|entry| entry.effective_ts())
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

struct RunnerHandle {
    id: StrategyId,
    inbound: Arc<BlockingQueue<Event>>,
    task: JoinHandle<()>,
}

pub struct Dispatcher {
    latency: LatencyModel,
    metrics: Arc<MetricsCollector>,
    strategies: Vec<(StrategyId, Box<dyn Strategy>)>,
    strategy_queue_capacity: usize,
    order_queue_capacity: usize,
    record_tx: Option<mpsc::Sender<ReplayRecord>>,

    mepq: Mepq,
    order_books: AHashMap<String, SimpleOrderBook>,
    current_sim_time: SimTime,
    next_exchange_order_id: OrderId,
}

impl Dispatcher {
    pub fn new(
        latency: LatencyModel,
        metrics: Arc<MetricsCollector>,
        strategy_queue_capacity: usize,
        order_queue_capacity: usize,
        record_tx: Option<mpsc::Sender<ReplayRecord>>,
    ) -> Self {
        Self {
            latency,
            metrics,
            strategies: Vec::new(),
            strategy_queue_capacity,
            order_queue_capacity,
            record_tx,
            mepq: Mepq::default(),
            order_books: AHashMap::new(),
            current_sim_time: SimTime(0),
            next_exchange_order_id: 1,
        }
    }

    /// Register a strategy before `run`. Ids must be unique; a duplicate is
    /// rejected with a warning.
    pub fn add_strategy(&mut self, id: impl Into<StrategyId>, strategy: Box<dyn Strategy>) {
        let id = id.into();
        if self.strategies.iter().any(|(existing, _)| *existing == id) {
            warn!(strategy = %id, "duplicate strategy id, not added");
            return;
        }
        info!(strategy = %id, "strategy registered");
        self.strategies.push((id, strategy));
    }

    /// Run the simulation to completion. Returns the final simulation time.
    pub async fn run<R: BufRead>(mut self, mut ticks: TickReader<R>) -> SimTime {
        if self.strategies.is_empty() {
            warn!("no strategies registered, replaying without consumers");
        }

        let (order_tx, mut order_rx) = order_channel(self.order_queue_capacity);

        // one runner task per strategy, blocked on its inbound queue
        let mut runners: Vec<RunnerHandle> = Vec::new();
        for (id, strategy) in std::mem::take(&mut self.strategies) {
            let inbound = Arc::new(BlockingQueue::new(self.strategy_queue_capacity));
            let task = tokio::spawn(run_strategy(
                id.clone(),
                strategy,
                Arc::clone(&inbound),
                order_tx.clone(),
                Some(Arc::clone(&self.metrics)),
                self.current_sim_time,
            ));
            runners.push(RunnerHandle { id, inbound, task });
        }
        drop(order_tx);

        self.load_ticks(&mut ticks);

        // keep the order-request drain alive through quiet market stretches
        let seed_ts = self.mepq.peek_ts().unwrap_or(self.current_sim_time);
        self.mepq.push(Event::Control(ControlEvent::new(
            seed_ts,
            ControlKind::ProcessOrderRequests,
        )));

        info!(events = self.mepq.len(), "dispatcher: starting main event loop");
        let mut eof_pushed = false;
        let mut eof_consumed = false;

        loop {
            self.drain_order_requests(&mut order_rx);

            if self.mepq.is_empty() {
                if eof_consumed {
                    break;
                }
                if !eof_pushed && self.feed_is_quiescent(&runners, &mut order_rx).await {
                    info!(
                        at = %self.current_sim_time,
                        "dispatcher: feed exhausted and quiescent, scheduling end of data feed"
                    );
                    self.mepq.push(Event::Control(ControlEvent::new(
                        self.current_sim_time + SimDuration::nanos(1),
                        ControlKind::EndOfDataFeed,
                    )));
                    eof_pushed = true;
                }
                if self.mepq.is_empty() {
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
                continue;
            }

            let event = match self.mepq.pop() {
                Some(event) => event,
                None => continue,
            };
            self.advance_clock(event.effective_ts());
            debug!(event = event.kind_label(), at = %self.current_sim_time, "dispatching");
            if self.record_tx.is_some() {
                self.record(ReplayRecord::Event(event.clone()));
            }

            match event {
                Event::Quote(quote) => {
                    let book = self.book_for(&quote.symbol);
                    book.update_quote(
                        quote.bid_price,
                        quote.bid_size,
                        quote.ask_price,
                        quote.ask_size,
                    );
                    self.metrics.update_market_price(&quote.symbol, quote.mid());
                    fan_out(&runners, Event::Quote(quote)).await;
                }
                Event::Trade(trade) => {
                    // trades do not alter posted liquidity here
                    fan_out(&runners, Event::Trade(trade)).await;
                }
                Event::OrderAck(ack) => {
                    route_ack(&runners, ack).await;
                }
                Event::Control(control) => match control.kind {
                    ControlKind::ProcessOrderRequests => {
                        self.drain_order_requests(&mut order_rx);
                        if !eof_pushed && !self.mepq.is_empty() {
                            self.mepq.push(Event::Control(ControlEvent::new(
                                self.current_sim_time + ORDER_SWEEP_INTERVAL,
                                ControlKind::ProcessOrderRequests,
                            )));
                        }
                    }
                    ControlKind::EndOfDataFeed => {
                        info!(at = %self.current_sim_time, "dispatcher: end of data feed reached");
                        eof_consumed = true;
                        for runner in &runners {
                            let shutdown = ControlEvent {
                                arrival_ts: control.arrival_ts,
                                kind: ControlKind::StrategyShutdown,
                                target_strategy_id: Some(runner.id.clone()),
                            };
                            if runner.inbound.push(Event::Control(shutdown)).await
                                == PushOutcome::Refused
                            {
                                warn!(strategy = %runner.id, "shutdown signal refused, queue already down");
                            }
                        }
                    }
                    ControlKind::StrategyShutdown => {
                        // strategy-bound; nothing for the dispatcher itself
                        debug!("dispatcher: ignoring strategy shutdown control in MEPQ");
                    }
                },
            }
        }

        info!(at = %self.current_sim_time, "dispatcher: main event loop finished");
        self.shutdown_runners(runners).await;
        info!("dispatcher: run complete");
        self.current_sim_time
    }

    fn load_ticks<R: BufRead>(&mut self, ticks: &mut TickReader<R>) {
        let mut count = 0u64;
        while let Some(mut event) = ticks.read_next() {
            let delay = self.latency.market_data_latency(&event);
            match &mut event {
                Event::Quote(q) => q.arrival_ts = q.exchange_ts + delay,
                Event::Trade(t) => t.arrival_ts = t.exchange_ts + delay,
                _ => {}
            }
            self.mepq.push(event);
            count += 1;
        }
        if count == 0 {
            warn!("dispatcher: no market data loaded, simulation will be empty");
        } else {
            info!(count, "dispatcher: loaded market events");
        }
    }

    fn drain_order_requests(&mut self, order_rx: &mut OrderReceiver) -> usize {
        let mut drained = 0;
        while let Some(req) = order_rx.try_recv() {
            if self.record_tx.is_some() {
                self.record(ReplayRecord::Order(req.clone()));
            }
            self.simulate_order_lifecycle(req);
            drained += 1;
        }
        drained
    }

    /// True when nothing can produce further work without new market data:
    /// every strategy queue is drained and a grace nap surfaces no new order
    /// requests. Guards the end-of-feed signal against racing a strategy
    /// that is still reacting to the last tick.
    async fn feed_is_quiescent(
        &mut self,
        runners: &[RunnerHandle],
        order_rx: &mut OrderReceiver,
    ) -> bool {
        if !runners.iter().all(|r| r.inbound.is_empty()) {
            return false;
        }
        tokio::time::sleep(IDLE_SLEEP).await;
        if self.drain_order_requests(order_rx) > 0 || !self.mepq.is_empty() {
            return false;
        }
        runners.iter().all(|r| r.inbound.is_empty())
    }

    fn advance_clock(&mut self, ts: SimTime) {
        if ts < self.current_sim_time {
            // insertion invariants should make this impossible
            warn!(
                event_ts = %ts,
                clock = %self.current_sim_time,
                "dispatcher: event effective time precedes simulation clock"
            );
            return;
        }
        self.current_sim_time = ts;
    }

    fn book_for(&mut self, symbol: &str) -> &mut SimpleOrderBook {
        if !self.order_books.contains_key(symbol) {
            info!(%symbol, "dispatcher: creating order book");
        }
        self.order_books
            .entry(symbol.to_string())
            .or_insert_with(|| SimpleOrderBook::new(symbol))
    }

    /// Turn one order request into scheduled acks: an ACKNOWLEDGED at the
    /// ack-latency path, and (when the book crosses) a fill ack at the
    /// fill-latency path, nudged at least 1ns after the ACKNOWLEDGED so a
    /// fill can never be observed before its ack.
    fn simulate_order_lifecycle(&mut self, req: OrderRequest) {
        let exchange_order_id = self.next_exchange_order_id;
        self.next_exchange_order_id += 1;

        let decision_ts = req.request_ts;
        let sent_ts = decision_ts + self.latency.strategy_processing_latency();
        let exch_arrival_ts = self.latency.order_arrival_at_exchange_ts(sent_ts);
        let ack_ts = self.latency.ack_arrival_at_strategy_ts(exch_arrival_ts);

        debug!(
            strategy = %req.strategy_id,
            client_order_id = req.client_order_id,
            exchange_order_id,
            symbol = %req.symbol,
            side = req.side.label(),
            order_type = ?req.order_type,
            decision_ts = %decision_ts,
            ack_ts = %ack_ts,
            "simulating order lifecycle"
        );

        let mut ack = OrderAckEvent::new(
            ack_ts,
            req.strategy_id.clone(),
            req.client_order_id,
            exchange_order_id,
            req.symbol.clone(),
            OrderStatus::Acknowledged,
        );
        ack.leaves_quantity = req.quantity;
        self.mepq.push(Event::OrderAck(ack));

        // matching uses the live BBO at drain time, not a snapshot of the
        // book at exch_arrival_ts
        let book = self.book_for(&req.symbol);
        let (fill_price, filled_qty) = match req.order_type {
            OrderType::Market => book.match_market_order(req.side, req.quantity),
            OrderType::Limit => book.match_limit_order(req.side, req.price, req.quantity),
        };

        if filled_qty > 0 && !fill_price.is_nan() {
            let fill_ts = self
                .latency
                .fill_arrival_at_strategy_ts(exch_arrival_ts)
                .max(ack_ts + SimDuration::nanos(1));

            let status = if filled_qty == req.quantity {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            let mut fill = OrderAckEvent::new(
                fill_ts,
                req.strategy_id.clone(),
                req.client_order_id,
                exchange_order_id,
                req.symbol.clone(),
                status,
            );
            fill.last_filled_price = fill_price;
            fill.last_filled_quantity = filled_qty;
            fill.cumulative_filled_quantity = filled_qty;
            fill.leaves_quantity = req.quantity - filled_qty;
            self.mepq.push(Event::OrderAck(fill));

            self.metrics.record_latency(
                format!("{}_order_fill_ack", req.strategy_id),
                fill_ts - decision_ts,
                fill_ts,
                "decision_to_fill_ack",
            );
        } else if req.order_type == OrderType::Limit {
            debug!(
                client_order_id = req.client_order_id,
                symbol = %req.symbol,
                "limit order is passive, acknowledged only"
            );
        } else {
            // unfilled market order stays acknowledged; the book has already
            // logged the missing liquidity
            debug!(
                client_order_id = req.client_order_id,
                symbol = %req.symbol,
                "market order unfilled, remains acknowledged"
            );
        }
    }

    async fn shutdown_runners(&mut self, runners: Vec<RunnerHandle>) {
        info!("dispatcher: shutting down strategy runners");
        for runner in &runners {
            if !runner.inbound.is_shutdown() {
                // fallback signal for runners that never saw the event chain
                let shutdown = ControlEvent {
                    arrival_ts: self.current_sim_time + SimDuration::nanos(1),
                    kind: ControlKind::StrategyShutdown,
                    target_strategy_id: Some(runner.id.clone()),
                };
                let _ = runner.inbound.push(Event::Control(shutdown)).await;
            }
            runner.inbound.shutdown();
        }
        for runner in runners {
            if let Err(e) = runner.task.await {
                warn!(strategy = %runner.id, error = %e, "strategy task join failed");
            } else {
                debug!(strategy = %runner.id, "strategy task joined");
            }
        }
        info!("dispatcher: all strategy runners joined");
    }

    fn record(&self, record: ReplayRecord) {
        if let Some(tx) = &self.record_tx {
            // lossy on purpose
            let _ = tx.try_send(record);
        }
    }
}

async fn fan_out(runners: &[RunnerHandle], event: Event) {
    for runner in runners {
        if runner.inbound.push(event.clone()).await == PushOutcome::Refused {
            warn!(strategy = %runner.id, "inbound queue refused event after shutdown");
        }
    }
}

async fn route_ack(runners: &[RunnerHandle], ack: OrderAckEvent) {
    let Some(runner) = runners.iter().find(|r| r.id == ack.strategy_id) else {
        warn!(
            strategy = %ack.strategy_id,
            client_order_id = ack.client_order_id,
            "no strategy registered for ack, dropping"
        );
        return;
    };
    if runner.inbound.push(Event::OrderAck(ack)).await == PushOutcome::Refused {
        warn!(strategy = %runner.id, "inbound queue refused ack after shutdown");
    }
}
