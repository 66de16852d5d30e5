// ===============================
// src/strategy.rs
// ===============================
//
// Strategy contract and runner.
//
// A strategy is a synchronous state machine: per-variant hooks that may queue
// order requests on their context. The async runner task drives it (pops the
// inbound queue, invokes the hook, forwards queued requests on the order
// channel), so strategy code never touches a channel or the dispatcher.
//
// Two stock strategies ship with the engine:
// - basic_taker:     market BUY of one symbol on its first quote
// - mean_reversion:  rolling mid-price window, trades the edges
//
// Strategies never see each other; ordering across strategies at the same
// effective timestamp is unspecified.

use std::collections::VecDeque;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::{debug, info, warn};

use crate::domain::{
    ControlEvent, ControlKind, Event, OrderAckEvent, OrderId, OrderRequest, OrderStatus,
    OrderType, Price, Quantity, QuoteEvent, Side, StrategyId, TradeEvent, INVALID_PRICE,
};
use crate::metrics::{MetricsCollector, SimulatedTrade};
use crate::queue::BlockingQueue;
use crate::time::SimTime;

pub trait Strategy: Send {
    fn on_init(&mut self, _ctx: &mut StrategyContext, _now: SimTime) {}
    fn on_quote(&mut self, _ctx: &mut StrategyContext, _quote: &QuoteEvent, _arrival_ts: SimTime) {}
    fn on_trade(&mut self, _ctx: &mut StrategyContext, _trade: &TradeEvent, _arrival_ts: SimTime) {}
    fn on_order_ack(
        &mut self,
        _ctx: &mut StrategyContext,
        _ack: &OrderAckEvent,
        _arrival_ts: SimTime,
    ) {
    }
    fn on_sim_control(
        &mut self,
        _ctx: &mut StrategyContext,
        _control: &ControlEvent,
        _arrival_ts: SimTime,
    ) {
    }
    fn on_shutdown(&mut self, _ctx: &mut StrategyContext, _now: SimTime) {}
}

/// Route an event to the matching hook. The arrival timestamp handed to the
/// hook is the event's effective timestamp.
pub fn dispatch_event(strategy: &mut dyn Strategy, ctx: &mut StrategyContext, event: &Event) {
    let arrival_ts = event.effective_ts();
    match event {
        Event::Quote(q) => strategy.on_quote(ctx, q, arrival_ts),
        Event::Trade(t) => strategy.on_trade(ctx, t, arrival_ts),
        Event::OrderAck(a) => strategy.on_order_ack(ctx, a, arrival_ts),
        Event::Control(c) => strategy.on_sim_control(ctx, c, arrival_ts),
    }
}

/// Per-strategy state owned by the runner: identity, the client-order-id
/// counter, the outbox of pending requests, and the sides of in-flight
/// orders (so fills can be booked without guessing).
pub struct StrategyContext {
    id: StrategyId,
    next_client_order_id: OrderId,
    outbox: Vec<OrderRequest>,
    open_order_sides: AHashMap<OrderId, Side>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl StrategyContext {
    pub fn new(id: StrategyId, metrics: Option<Arc<MetricsCollector>>) -> Self {
        Self {
            id,
            next_client_order_id: 1,
            outbox: Vec::new(),
            open_order_sides: AHashMap::new(),
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue an order request. `decision_ts` is the simulated moment the
    /// strategy decided, usually the arrival timestamp of the event that
    /// triggered it; the dispatcher charges processing latency on top.
    pub fn submit_order(
        &mut self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
        decision_ts: SimTime,
    ) -> OrderId {
        let client_order_id = self.next_client_order_id;
        self.next_client_order_id += 1;
        self.open_order_sides.insert(client_order_id, side);

        debug!(
            strategy = %self.id,
            client_order_id,
            symbol,
            side = side.label(),
            ?order_type,
            price,
            quantity,
            decision_ts = %decision_ts,
            "submitting order"
        );
        self.outbox.push(OrderRequest {
            strategy_id: self.id.clone(),
            client_order_id,
            symbol: symbol.to_string(),
            side,
            order_type,
            price,
            quantity,
            request_ts: decision_ts,
        });
        client_order_id
    }

    fn take_outbox(&mut self) -> Vec<OrderRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// Book a fill ack with the metrics sink, using the side remembered at
    /// submission time.
    fn record_fill(&mut self, ack: &OrderAckEvent) {
        if !ack.is_fill() {
            return;
        }
        let Some(side) = self.open_order_sides.get(&ack.client_order_id).copied() else {
            warn!(
                strategy = %self.id,
                client_order_id = ack.client_order_id,
                "fill ack for unknown client order, not booked"
            );
            return;
        };
        if ack.status == OrderStatus::Filled {
            self.open_order_sides.remove(&ack.client_order_id);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_trade(SimulatedTrade {
                timestamp: ack.arrival_ts,
                strategy_id: self.id.clone(),
                symbol: ack.symbol.clone(),
                side,
                price: ack.last_filled_price,
                quantity: ack.last_filled_quantity,
                client_order_id: ack.client_order_id,
                exchange_order_id: ack.exchange_order_id,
            });
        }
    }
}

/// Sender half of the dispatcher's order channel, bounded or unbounded.
#[derive(Clone)]
pub enum OrderSender {
    Bounded(tokio::sync::mpsc::Sender<OrderRequest>),
    Unbounded(tokio::sync::mpsc::UnboundedSender<OrderRequest>),
}

impl OrderSender {
    /// Forward one request; false when the dispatcher is gone (the request
    /// is silently dropped, submission after shutdown is not an error).
    pub async fn send(&self, req: OrderRequest) -> bool {
        match self {
            OrderSender::Bounded(tx) => tx.send(req).await.is_ok(),
            OrderSender::Unbounded(tx) => tx.send(req).is_ok(),
        }
    }
}

/// The per-strategy task: init, pop/dispatch loop, shutdown. Breaks on a
/// StrategyShutdown control or when the inbound queue is shut down and
/// drained.
pub async fn run_strategy(
    id: StrategyId,
    mut strategy: Box<dyn Strategy>,
    inbound: Arc<BlockingQueue<Event>>,
    order_tx: OrderSender,
    metrics: Option<Arc<MetricsCollector>>,
    start_time: SimTime,
) {
    info!(strategy = %id, "strategy task starting");
    let mut ctx = StrategyContext::new(id.clone(), metrics);
    let mut current_ts = start_time;

    strategy.on_init(&mut ctx, start_time);
    flush_outbox(&mut ctx, &order_tx).await;

    while let Some(event) = inbound.wait_and_pop().await {
        current_ts = event.effective_ts();

        if let Event::Control(control) = &event {
            if control.kind == ControlKind::StrategyShutdown {
                info!(strategy = %id, at = %current_ts, "shutdown signal received");
                break;
            }
        }
        if let Event::OrderAck(ack) = &event {
            ctx.record_fill(ack);
        }

        dispatch_event(strategy.as_mut(), &mut ctx, &event);
        flush_outbox(&mut ctx, &order_tx).await;
    }

    strategy.on_shutdown(&mut ctx, current_ts);
    info!(strategy = %id, "strategy task exited");
}

async fn flush_outbox(ctx: &mut StrategyContext, order_tx: &OrderSender) {
    for req in ctx.take_outbox() {
        if !order_tx.send(req).await {
            warn!(strategy = %ctx.id, "order channel closed, request dropped");
        }
    }
}

// -----------------------------------------------------------------------------
// basic_taker: market BUY of one symbol on its first quote. The smallest
// strategy that exercises the whole order path end to end.
// -----------------------------------------------------------------------------
pub struct BasicTaker {
    symbol: String,
    quantity: Quantity,
    order_sent: bool,
}

impl BasicTaker {
    pub fn new(symbol: impl Into<String>, quantity: Quantity) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            order_sent: false,
        }
    }
}

impl Strategy for BasicTaker {
    fn on_init(&mut self, ctx: &mut StrategyContext, now: SimTime) {
        info!(strategy = %ctx.id(), at = %now, symbol = %self.symbol, "basic taker initialized");
    }

    fn on_quote(&mut self, ctx: &mut StrategyContext, quote: &QuoteEvent, arrival_ts: SimTime) {
        if self.order_sent || quote.symbol != self.symbol {
            return;
        }
        if quote.ask_price > 0.0 && quote.ask_size > 0 {
            info!(strategy = %ctx.id(), symbol = %self.symbol, "first quote seen, sending market buy");
            ctx.submit_order(
                &quote.symbol,
                Side::Buy,
                OrderType::Market,
                INVALID_PRICE,
                self.quantity,
                arrival_ts,
            );
            self.order_sent = true;
        }
    }

    fn on_order_ack(&mut self, ctx: &mut StrategyContext, ack: &OrderAckEvent, _arrival_ts: SimTime) {
        match ack.status {
            OrderStatus::Rejected => warn!(
                strategy = %ctx.id(),
                client_order_id = ack.client_order_id,
                reason = %ack.reject_reason,
                "order rejected"
            ),
            _ => debug!(
                strategy = %ctx.id(),
                client_order_id = ack.client_order_id,
                status = ?ack.status,
                last_px = ack.last_filled_price,
                last_qty = ack.last_filled_quantity,
                leaves = ack.leaves_quantity,
                "order ack"
            ),
        }
    }

    fn on_shutdown(&mut self, ctx: &mut StrategyContext, now: SimTime) {
        info!(strategy = %ctx.id(), at = %now, "basic taker shutting down");
    }
}

// -----------------------------------------------------------------------------
// mean_reversion: rolling mid-price average over a fixed window; buys the ask
// when it dips `edge` under fair, sells the bid when it pops `edge` over.
// Orders go out as aggressive limits at the touch.
// -----------------------------------------------------------------------------
pub struct MeanReversion {
    symbol: String,
    window_len: usize,
    edge: f64,
    quantity: Quantity,
    window: VecDeque<f64>,
    sum: f64,
}

impl MeanReversion {
    pub fn new(symbol: impl Into<String>, window_len: usize, edge: f64, quantity: Quantity) -> Self {
        Self {
            symbol: symbol.into(),
            window_len,
            edge,
            quantity,
            window: VecDeque::with_capacity(window_len),
            sum: 0.0,
        }
    }

    fn fair(&self) -> Option<f64> {
        (self.window.len() >= self.window_len).then(|| self.sum / self.window_len as f64)
    }

    fn observe(&mut self, mid: f64) {
        if self.window.len() == self.window_len {
            if let Some(x) = self.window.pop_front() {
                self.sum -= x;
            }
        }
        self.window.push_back(mid);
        self.sum += mid;
    }
}

impl Strategy for MeanReversion {
    fn on_quote(&mut self, ctx: &mut StrategyContext, quote: &QuoteEvent, arrival_ts: SimTime) {
        if quote.symbol != self.symbol {
            return;
        }
        self.observe(quote.mid());
        let Some(fair) = self.fair() else { return };

        if quote.ask_price > 0.0 && quote.ask_price < fair - self.edge {
            ctx.submit_order(
                &quote.symbol,
                Side::Buy,
                OrderType::Limit,
                quote.ask_price,
                self.quantity,
                arrival_ts,
            );
        } else if quote.bid_price > 0.0 && quote.bid_price > fair + self.edge {
            ctx.submit_order(
                &quote.symbol,
                Side::Sell,
                OrderType::Limit,
                quote.bid_price,
                self.quantity,
                arrival_ts,
            );
        }
    }

    fn on_shutdown(&mut self, ctx: &mut StrategyContext, now: SimTime) {
        info!(strategy = %ctx.id(), at = %now, "mean reversion shutting down");
    }
}
