// ===============================
// src/book.rs
// ===============================
//
// Per-symbol top-of-book. Quotes replace each side wholesale; matching
// consumes size from the opposing best and clears the side when it runs dry.
// No resting orders live here: a passive limit order simply does not match.

use tracing::{debug, warn};

use crate::domain::{Price, Quantity, Side, INVALID_PRICE, PRICE_EPSILON};

#[derive(Debug, Clone)]
pub struct SimpleOrderBook {
    symbol: String,
    best_bid_price: Option<Price>,
    best_bid_size: Option<Quantity>,
    best_ask_price: Option<Price>,
    best_ask_size: Option<Quantity>,
}

impl SimpleOrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            best_bid_price: None,
            best_bid_size: None,
            best_ask_price: None,
            best_ask_size: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bid_price(&self) -> Option<Price> {
        self.best_bid_price
    }
    pub fn bid_size(&self) -> Option<Quantity> {
        self.best_bid_size
    }
    pub fn ask_price(&self) -> Option<Price> {
        self.best_ask_price
    }
    pub fn ask_size(&self) -> Option<Quantity> {
        self.best_ask_size
    }

    /// Replace each side with the quoted level; a non-positive price or a
    /// zero size clears that side.
    pub fn update_quote(
        &mut self,
        bid_price: Price,
        bid_size: Quantity,
        ask_price: Price,
        ask_size: Quantity,
    ) {
        if bid_price > 0.0 && bid_size > 0 {
            self.best_bid_price = Some(bid_price);
            self.best_bid_size = Some(bid_size);
        } else {
            self.best_bid_price = None;
            self.best_bid_size = None;
        }

        if ask_price > 0.0 && ask_size > 0 {
            self.best_ask_price = Some(ask_price);
            self.best_ask_size = Some(ask_size);
        } else {
            self.best_ask_price = None;
            self.best_ask_size = None;
        }
    }

    /// Match a market order against the opposing best. Returns the fill
    /// price and quantity; (NaN, 0) when there is no liquidity.
    pub fn match_market_order(&mut self, side: Side, quantity: Quantity) -> (Price, Quantity) {
        if quantity == 0 {
            return (INVALID_PRICE, 0);
        }

        let filled = match side {
            Side::Buy => self.consume_ask(quantity),
            Side::Sell => self.consume_bid(quantity),
        };

        match filled {
            Some((price, qty)) => {
                debug!(
                    symbol = %self.symbol,
                    side = side.label(),
                    qty,
                    price,
                    "matched market order"
                );
                (price, qty)
            }
            None => {
                warn!(
                    symbol = %self.symbol,
                    side = side.label(),
                    qty = quantity,
                    "cannot match market order, no opposing liquidity"
                );
                (INVALID_PRICE, 0)
            }
        }
    }

    /// Match a limit order: aggressive (crossing the opposing best within
    /// epsilon) behaves like a market order at the opposing best, passive
    /// returns (NaN, 0) and rests nowhere.
    pub fn match_limit_order(
        &mut self,
        side: Side,
        limit_price: Price,
        quantity: Quantity,
    ) -> (Price, Quantity) {
        if quantity == 0 || limit_price.is_nan() {
            return (INVALID_PRICE, 0);
        }

        let crosses = match side {
            Side::Buy => self
                .best_ask_price
                .map(|ask| limit_price >= ask - PRICE_EPSILON)
                .unwrap_or(false),
            Side::Sell => self
                .best_bid_price
                .map(|bid| limit_price <= bid + PRICE_EPSILON)
                .unwrap_or(false),
        };

        if !crosses {
            debug!(
                symbol = %self.symbol,
                side = side.label(),
                limit = limit_price,
                qty = quantity,
                "limit order is passive, no immediate fill"
            );
            return (INVALID_PRICE, 0);
        }

        let filled = match side {
            Side::Buy => self.consume_ask(quantity),
            Side::Sell => self.consume_bid(quantity),
        };
        filled.unwrap_or((INVALID_PRICE, 0))
    }

    fn consume_ask(&mut self, quantity: Quantity) -> Option<(Price, Quantity)> {
        let price = self.best_ask_price?;
        let size = self.best_ask_size.filter(|s| *s > 0)?;
        let filled = quantity.min(size);
        let remaining = size - filled;
        if remaining == 0 {
            self.best_ask_price = None;
            self.best_ask_size = None;
        } else {
            self.best_ask_size = Some(remaining);
        }
        Some((price, filled))
    }

    fn consume_bid(&mut self, quantity: Quantity) -> Option<(Price, Quantity)> {
        let price = self.best_bid_price?;
        let size = self.best_bid_size.filter(|s| *s > 0)?;
        let filled = quantity.min(size);
        let remaining = size - filled;
        if remaining == 0 {
            self.best_bid_price = None;
            self.best_bid_size = None;
        } else {
            self.best_bid_size = Some(remaining);
        }
        Some((price, filled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with_quote() -> SimpleOrderBook {
        let mut book = SimpleOrderBook::new("EURUSD");
        book.update_quote(1.07100, 100_000, 1.07105, 100_000);
        book
    }

    #[test]
    fn quote_update_sets_both_sides() {
        let book = book_with_quote();
        assert_eq!(book.bid_price(), Some(1.07100));
        assert_eq!(book.bid_size(), Some(100_000));
        assert_eq!(book.ask_price(), Some(1.07105));
        assert_eq!(book.ask_size(), Some(100_000));
    }

    #[test]
    fn non_positive_price_clears_that_side() {
        let mut book = book_with_quote();
        book.update_quote(0.0, 100, 1.07105, 50);
        assert_eq!(book.bid_price(), None);
        assert_eq!(book.bid_size(), None);
        assert_eq!(book.ask_price(), Some(1.07105));

        book.update_quote(1.07100, 100, -1.0, 50);
        assert_eq!(book.ask_price(), None);
    }

    #[test]
    fn zero_size_clears_that_side() {
        let mut book = book_with_quote();
        book.update_quote(1.07100, 0, 1.07105, 100);
        assert_eq!(book.bid_price(), None);
    }

    #[test]
    fn market_buy_fills_at_ask_and_decrements() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_market_order(Side::Buy, 1_000);
        assert_eq!(px, 1.07105);
        assert_eq!(qty, 1_000);
        assert_eq!(book.ask_size(), Some(99_000));
        assert_eq!(book.bid_size(), Some(100_000));
    }

    #[test]
    fn market_sell_fills_at_bid() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_market_order(Side::Sell, 2_500);
        assert_eq!(px, 1.07100);
        assert_eq!(qty, 2_500);
        assert_eq!(book.bid_size(), Some(97_500));
    }

    #[test]
    fn oversized_market_order_partially_fills_and_clears_side() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_market_order(Side::Buy, 200_000);
        assert_eq!(px, 1.07105);
        assert_eq!(qty, 100_000);
        assert_eq!(book.ask_price(), None);
        assert_eq!(book.ask_size(), None);
    }

    #[test]
    fn market_order_without_liquidity_returns_invalid_price() {
        let mut book = SimpleOrderBook::new("EURUSD");
        let (px, qty) = book.match_market_order(Side::Buy, 100);
        assert!(px.is_nan());
        assert_eq!(qty, 0);
    }

    #[test]
    fn zero_quantity_is_a_no_op() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_market_order(Side::Buy, 0);
        assert!(px.is_nan());
        assert_eq!(qty, 0);
        assert_eq!(book.ask_size(), Some(100_000));
    }

    #[test]
    fn aggressive_buy_limit_fills_at_ask() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_limit_order(Side::Buy, 1.07110, 500);
        assert_eq!(px, 1.07105);
        assert_eq!(qty, 500);
    }

    #[test]
    fn limit_at_exactly_the_ask_crosses_within_epsilon() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_limit_order(Side::Buy, 1.07105, 500);
        assert_eq!(px, 1.07105);
        assert_eq!(qty, 500);
    }

    #[test]
    fn passive_buy_limit_does_not_fill_or_mutate() {
        let mut book = SimpleOrderBook::new("XYZ");
        book.update_quote(100.0, 10, 101.0, 10);
        let (px, qty) = book.match_limit_order(Side::Buy, 100.5, 10);
        assert!(px.is_nan());
        assert_eq!(qty, 0);
        assert_eq!(book.ask_size(), Some(10));
        assert_eq!(book.bid_size(), Some(10));
    }

    #[test]
    fn aggressive_sell_limit_fills_at_bid() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_limit_order(Side::Sell, 1.07095, 300);
        assert_eq!(px, 1.07100);
        assert_eq!(qty, 300);
        assert_eq!(book.bid_size(), Some(99_700));
    }

    #[test]
    fn nan_limit_price_is_rejected() {
        let mut book = book_with_quote();
        let (px, qty) = book.match_limit_order(Side::Buy, f64::NAN, 10);
        assert!(px.is_nan());
        assert_eq!(qty, 0);
    }
}
