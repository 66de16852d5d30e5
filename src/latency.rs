// ===============================
// src/latency.rs
// ===============================
//
// Deterministic latency model: a fixed duration per hop, composed into the
// timestamps at which an order's consequences materialize. No state, no
// randomness; the transforms are monotone in their inputs.

use crate::domain::Event;
use crate::time::{SimDuration, SimTime};

#[derive(Debug, Clone, Copy)]
pub struct LatencyConfig {
    /// Exchange source to strategy input queue.
    pub market_data_feed_latency: SimDuration,
    /// Time the strategy "thinks" before its order is on the wire.
    pub strategy_processing_latency: SimDuration,
    /// Strategy output to exchange input.
    pub order_network_latency_strat_to_exch: SimDuration,
    /// Exchange internal, plain ack.
    pub exchange_order_processing_latency: SimDuration,
    /// Exchange internal, fill (usually > ack).
    pub exchange_fill_processing_latency: SimDuration,
    /// Exchange output back to strategy input, for acks and fills alike.
    pub ack_network_latency_exch_to_strat: SimDuration,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            market_data_feed_latency: SimDuration::micros(50),
            strategy_processing_latency: SimDuration::micros(5),
            order_network_latency_strat_to_exch: SimDuration::micros(20),
            exchange_order_processing_latency: SimDuration::micros(10),
            exchange_fill_processing_latency: SimDuration::micros(15),
            ack_network_latency_exch_to_strat: SimDuration::micros(20),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyModel {
    config: LatencyConfig,
}

impl LatencyModel {
    pub fn new(config: LatencyConfig) -> Self {
        Self { config }
    }

    /// Feed latency for a market-data event. Takes the event so a richer
    /// model could vary by symbol or venue; the base model is flat.
    pub fn market_data_latency(&self, _event: &Event) -> SimDuration {
        self.config.market_data_feed_latency
    }

    pub fn strategy_processing_latency(&self) -> SimDuration {
        self.config.strategy_processing_latency
    }

    /// When an order sent at `decision_ts` lands at the exchange.
    pub fn order_arrival_at_exchange_ts(&self, decision_ts: SimTime) -> SimTime {
        decision_ts + self.config.order_network_latency_strat_to_exch
    }

    /// When the plain ack for an order that reached the exchange at
    /// `exch_arrival_ts` lands back at the strategy.
    pub fn ack_arrival_at_strategy_ts(&self, exch_arrival_ts: SimTime) -> SimTime {
        exch_arrival_ts
            + self.config.exchange_order_processing_latency
            + self.config.ack_network_latency_exch_to_strat
    }

    /// When the fill ack lands back at the strategy.
    pub fn fill_arrival_at_strategy_ts(&self, exch_arrival_ts: SimTime) -> SimTime {
        exch_arrival_ts
            + self.config.exchange_fill_processing_latency
            + self.config.ack_network_latency_exch_to_strat
    }
}
