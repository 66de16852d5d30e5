// ===============================
// src/domain.rs
// ===============================
//
// Core event and order types. Every event carries two clocks: the exchange
// timestamp (when it happened at the venue) and the arrival timestamp (when
// its consumer gets to see it). The arrival timestamp is the effective time
// used for all ordering in the engine.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::time::SimTime;

pub type Price = f64;
pub type Quantity = u64;
pub type OrderId = u64;
pub type StrategyId = String;

pub const PRICE_EPSILON: f64 = 1e-9;
pub const INVALID_PRICE: Price = f64::NAN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingNew,
    New,
    Acknowledged,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteEvent {
    pub exchange_ts: SimTime,
    pub arrival_ts: SimTime,
    pub symbol: String,
    pub bid_price: Price,
    pub bid_size: Quantity,
    pub ask_price: Price,
    pub ask_size: Quantity,
}

impl QuoteEvent {
    pub fn mid(&self) -> Price {
        (self.bid_price + self.ask_price) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub exchange_ts: SimTime,
    pub arrival_ts: SimTime,
    pub symbol: String,
    pub price: Price,
    pub size: Quantity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAckEvent {
    pub exchange_ts: SimTime,
    pub arrival_ts: SimTime,
    pub strategy_id: StrategyId,
    pub client_order_id: OrderId,
    pub exchange_order_id: OrderId,
    pub symbol: String,
    pub status: OrderStatus,
    pub last_filled_price: Price,
    pub last_filled_quantity: Quantity,
    pub cumulative_filled_quantity: Quantity,
    pub leaves_quantity: Quantity,
    pub reject_reason: String,
}

impl OrderAckEvent {
    pub fn new(
        arrival_ts: SimTime,
        strategy_id: StrategyId,
        client_order_id: OrderId,
        exchange_order_id: OrderId,
        symbol: String,
        status: OrderStatus,
    ) -> Self {
        Self {
            exchange_ts: arrival_ts,
            arrival_ts,
            strategy_id,
            client_order_id,
            exchange_order_id,
            symbol,
            status,
            last_filled_price: 0.0,
            last_filled_quantity: 0,
            cumulative_filled_quantity: 0,
            leaves_quantity: 0,
            reject_reason: String::new(),
        }
    }

    pub fn is_fill(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Filled | OrderStatus::PartiallyFilled
        ) && self.last_filled_quantity > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    EndOfDataFeed,
    ProcessOrderRequests,
    StrategyShutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub arrival_ts: SimTime,
    pub kind: ControlKind,
    pub target_strategy_id: Option<StrategyId>,
}

impl ControlEvent {
    pub fn new(arrival_ts: SimTime, kind: ControlKind) -> Self {
        Self {
            arrival_ts,
            kind,
            target_strategy_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Quote(QuoteEvent),
    Trade(TradeEvent),
    OrderAck(OrderAckEvent),
    Control(ControlEvent),
}

impl Event {
    /// The simulated moment this event is delivered to its consumer; the
    /// MEPQ sort key.
    pub fn effective_ts(&self) -> SimTime {
        match self {
            Event::Quote(q) => q.arrival_ts,
            Event::Trade(t) => t.arrival_ts,
            Event::OrderAck(a) => a.arrival_ts,
            Event::Control(c) => c.arrival_ts,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Event::Quote(_) => "quote",
            Event::Trade(_) => "trade",
            Event::OrderAck(_) => "order_ack",
            Event::Control(_) => "control",
        }
    }
}

/// A strategy's wish to trade. Not an MEPQ event: it travels the order
/// channel and the dispatcher turns it into scheduled acks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub strategy_id: StrategyId,
    pub client_order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub quantity: Quantity,
    /// Simulated time at which the strategy decided to submit.
    pub request_ts: SimTime,
}

// ---- MEPQ ordering ----

/// Heap entry: min-order on (effective_ts, insertion seq) so equal
/// timestamps pop in insertion order.
#[derive(Debug)]
pub struct HeapEntry {
    pub seq: u64,
    pub event: Event,
}

impl HeapEntry {
    pub fn effective_ts(&self) -> SimTime {
        self.event.effective_ts()
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap; reverse both keys to pop least-first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .effective_ts()
            .cmp(&self.effective_ts())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn control_at(ns: i64) -> Event {
        Event::Control(ControlEvent::new(
            SimTime(ns),
            ControlKind::ProcessOrderRequests,
        ))
    }

    #[test]
    fn heap_pops_effective_timestamps_non_decreasing() {
        let mut heap = BinaryHeap::new();
        for (seq, ns) in [(0u64, 500i64), (1, 100), (2, 300), (3, 100), (4, 900)] {
            heap.push(HeapEntry {
                seq,
                event: control_at(ns),
            });
        }

        let mut last = SimTime::MIN;
        while let Some(entry) = heap.pop() {
            assert!(entry.effective_ts() >= last);
            last = entry.effective_ts();
        }
    }

    #[test]
    fn equal_timestamps_pop_in_insertion_order() {
        let mut heap = BinaryHeap::new();
        for seq in 0..5u64 {
            heap.push(HeapEntry {
                seq,
                event: control_at(42),
            });
        }

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn ack_fill_flag_requires_quantity() {
        let mut ack = OrderAckEvent::new(
            SimTime(0),
            "s1".into(),
            1,
            1,
            "EURUSD".into(),
            OrderStatus::Filled,
        );
        assert!(!ack.is_fill());
        ack.last_filled_quantity = 10;
        assert!(ack.is_fill());
        ack.status = OrderStatus::Acknowledged;
        assert!(!ack.is_fill());
    }
}
