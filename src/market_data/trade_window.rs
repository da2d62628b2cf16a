// =============================================================================
// Trade Window: Rolling one-minute aggregate of aggressor flow
// =============================================================================
//
// Trades enter at the back of a FIFO and leave from the front once their age
// exceeds the window. Each side keeps two running sums (notional and volume).
// A retired trade subtracts the exact notional stored at admission, so the
// sums never drift from the retained set.
// =============================================================================

use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::error::{self, RecorderError};
use crate::types::TradeRecord;

/// Default trailing window in milliseconds.
pub const DEFAULT_WINDOW_MS: i64 = 60_000;

/// Point-in-time view of the four window statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WindowStats {
    pub avg_buy_price: Decimal,
    pub avg_sell_price: Decimal,
    pub total_buy_volume: Decimal,
    pub total_sell_volume: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    trade: TradeRecord,
    notional: Decimal,
}

/// Sliding-window aggregator over trade prints.
///
/// Not synchronised: the owner wraps it in a single lock when it is shared
/// so that the FIFO and all four sums change together.
#[derive(Debug)]
pub struct TradeWindow {
    window_ms: i64,
    trades: VecDeque<WindowEntry>,
    /// Highest reference time seen by `evict_expired`.
    reference_time: Option<i64>,
    sum_buy_price_volume: Decimal,
    sum_sell_price_volume: Decimal,
    sum_buy_volume: Decimal,
    sum_sell_volume: Decimal,
}

impl TradeWindow {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            trades: VecDeque::new(),
            reference_time: None,
            sum_buy_price_volume: Decimal::ZERO,
            sum_sell_price_volume: Decimal::ZERO,
            sum_buy_volume: Decimal::ZERO,
            sum_sell_volume: Decimal::ZERO,
        }
    }

    /// Admit a trade. Timestamps are expected to be non-decreasing; an
    /// out-of-order trade is kept but may outlive its window until the
    /// trades in front of it expire.
    ///
    /// A trade whose notional or side sums would overflow `Decimal` is
    /// rejected and leaves the window untouched.
    pub fn add_trade(&mut self, trade: TradeRecord) -> error::Result<()> {
        let overflow = || RecorderError::Overflow {
            timestamp: trade.timestamp,
        };

        let (sum_pv, sum_v) = if trade.is_sell {
            (self.sum_sell_price_volume, self.sum_sell_volume)
        } else {
            (self.sum_buy_price_volume, self.sum_buy_volume)
        };
        let notional = trade.price.checked_mul(trade.volume).ok_or_else(overflow)?;
        let sum_pv = sum_pv.checked_add(notional).ok_or_else(overflow)?;
        let sum_v = sum_v.checked_add(trade.volume).ok_or_else(overflow)?;

        if trade.is_sell {
            self.sum_sell_price_volume = sum_pv;
            self.sum_sell_volume = sum_v;
        } else {
            self.sum_buy_price_volume = sum_pv;
            self.sum_buy_volume = sum_v;
        }

        self.trades.push_back(WindowEntry { trade, notional });
        Ok(())
    }

    /// Drop every trade older than the window relative to `reference_time`.
    ///
    /// The reference never moves backwards: an earlier `reference_time` than
    /// one already seen is treated as the latest one. Returns the number of
    /// trades evicted.
    pub fn evict_expired(&mut self, reference_time: i64) -> usize {
        let now = self
            .reference_time
            .map_or(reference_time, |prev| prev.max(reference_time));
        self.reference_time = Some(now);

        let mut evicted = 0;
        while self
            .trades
            .front()
            .is_some_and(|e| now.saturating_sub(e.trade.timestamp) > self.window_ms)
        {
            if let Some(entry) = self.trades.pop_front() {
                self.retire(entry);
                evicted += 1;
            }
        }
        evicted
    }

    // Admitted amounts are non-negative, so each sum stays at or above the
    // part being removed.
    fn retire(&mut self, entry: WindowEntry) {
        if entry.trade.is_sell {
            self.sum_sell_price_volume -= entry.notional;
            self.sum_sell_volume -= entry.trade.volume;
        } else {
            self.sum_buy_price_volume -= entry.notional;
            self.sum_buy_volume -= entry.trade.volume;
        }
    }

    /// Volume-weighted average price of aggressive buys (0 when none).
    pub fn avg_buy_price(&self) -> Decimal {
        ratio_or_zero(self.sum_buy_price_volume, self.sum_buy_volume)
    }

    /// Volume-weighted average price of aggressive sells (0 when none).
    pub fn avg_sell_price(&self) -> Decimal {
        ratio_or_zero(self.sum_sell_price_volume, self.sum_sell_volume)
    }

    pub fn total_buy_volume(&self) -> Decimal {
        self.sum_buy_volume
    }

    pub fn total_sell_volume(&self) -> Decimal {
        self.sum_sell_volume
    }

    pub fn stats(&self) -> WindowStats {
        WindowStats {
            avg_buy_price: self.avg_buy_price(),
            avg_sell_price: self.avg_sell_price(),
            total_buy_volume: self.total_buy_volume(),
            total_sell_volume: self.total_sell_volume(),
        }
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    #[cfg(test)]
    pub fn reference_time(&self) -> Option<i64> {
        self.reference_time
    }

    /// Retained trades, oldest first.
    #[cfg(test)]
    pub fn trades(&self) -> impl Iterator<Item = &TradeRecord> + '_ {
        self.trades.iter().map(|e| &e.trade)
    }
}

impl Default for TradeWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

/// Zero volume yields 0. The quotient of two retained sums is bounded by the
/// largest admitted price, so `checked_div` only fails on rounding extremes,
/// which also report 0.
fn ratio_or_zero(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn buy(ts: i64, price: Decimal, volume: Decimal) -> TradeRecord {
        TradeRecord::new(ts, price, volume, false)
    }

    fn sell(ts: i64, price: Decimal, volume: Decimal) -> TradeRecord {
        TradeRecord::new(ts, price, volume, true)
    }

    #[test]
    fn evicts_trade_older_than_one_minute() {
        let mut w = TradeWindow::default();
        w.add_trade(buy(0, dec!(10), dec!(1))).unwrap();
        w.add_trade(sell(30_000, dec!(12), dec!(1))).unwrap();
        w.add_trade(buy(61_000, dec!(14), dec!(2))).unwrap();

        assert_eq!(w.evict_expired(61_000), 1);
        assert_eq!(w.len(), 2);
        assert_eq!(w.avg_buy_price(), dec!(14));
        assert_eq!(w.total_buy_volume(), dec!(2));
        assert_eq!(w.avg_sell_price(), dec!(12));
        assert_eq!(w.total_sell_volume(), dec!(1));
    }

    #[test]
    fn boundary_age_is_retained() {
        let mut w = TradeWindow::default();
        w.add_trade(buy(1_000, dec!(5), dec!(1))).unwrap();

        assert_eq!(w.evict_expired(61_000), 0);
        assert_eq!(w.len(), 1);

        assert_eq!(w.evict_expired(61_001), 1);
        assert!(w.is_empty());
    }

    #[test]
    fn vwap_weights_by_volume() {
        let mut w = TradeWindow::default();
        w.add_trade(buy(0, dec!(100), dec!(1))).unwrap();
        w.add_trade(buy(1, dec!(110), dec!(3))).unwrap();
        w.evict_expired(1);

        assert_eq!(w.avg_buy_price(), dec!(107.5));
        assert_eq!(w.total_buy_volume(), dec!(4));
        assert_eq!(w.avg_sell_price(), Decimal::ZERO);
    }

    #[test]
    fn empty_after_eviction_reports_zero() {
        let mut w = TradeWindow::default();
        w.add_trade(buy(0, dec!(1.23), dec!(0.7))).unwrap();
        w.add_trade(sell(10, dec!(1.24), dec!(0.3))).unwrap();
        w.evict_expired(200_000);

        assert!(w.is_empty());
        assert_eq!(w.avg_buy_price(), Decimal::ZERO);
        assert_eq!(w.avg_sell_price(), Decimal::ZERO);
        assert!(w.total_buy_volume().is_zero());
        assert!(w.total_sell_volume().is_zero());
    }

    #[test]
    fn reference_time_never_moves_backwards() {
        let mut w = TradeWindow::default();
        w.add_trade(buy(0, dec!(1), dec!(1))).unwrap();
        w.add_trade(buy(50_000, dec!(2), dec!(1))).unwrap();

        w.evict_expired(100_000);
        assert_eq!(w.len(), 1);
        assert_eq!(w.reference_time(), Some(100_000));

        // A stale reference must not resurrect or re-evaluate against an
        // older clock.
        w.evict_expired(10_000);
        assert_eq!(w.reference_time(), Some(100_000));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn stats_match_accessors() {
        let mut w = TradeWindow::new(5_000);
        w.add_trade(buy(0, dec!(20), dec!(2))).unwrap();
        w.add_trade(sell(1_000, dec!(21), dec!(4))).unwrap();
        w.evict_expired(1_000);

        let s = w.stats();
        assert_eq!(s.avg_buy_price, w.avg_buy_price());
        assert_eq!(s.avg_sell_price, w.avg_sell_price());
        assert_eq!(s.total_buy_volume, dec!(2));
        assert_eq!(s.total_sell_volume, dec!(4));
    }

    #[test]
    fn overflowing_trade_is_rejected_without_side_effects() {
        let mut w = TradeWindow::default();
        w.add_trade(buy(0, dec!(2), dec!(3))).unwrap();

        // Notional overflows.
        let err = w.add_trade(buy(1, Decimal::MAX, dec!(2))).unwrap_err();
        assert!(matches!(err, RecorderError::Overflow { timestamp: 1 }));

        // Notional fits but the side sum does not.
        w.add_trade(sell(2, Decimal::MAX, dec!(1))).unwrap();
        assert!(w.add_trade(sell(3, Decimal::MAX, dec!(1))).is_err());

        assert_eq!(w.len(), 2);
        assert_eq!(w.avg_buy_price(), dec!(2));
        assert_eq!(w.total_buy_volume(), dec!(3));
        assert_eq!(w.total_sell_volume(), dec!(1));
        assert_eq!(w.avg_sell_price(), Decimal::MAX);

        w.evict_expired(100_000);
        assert!(w.is_empty());
        assert!(w.total_sell_volume().is_zero());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { gap: i64, cents: i64, milli: i64, is_sell: bool },
        Evict { ahead: i64 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0i64..20_000, 1i64..10_000_000, 1i64..500_000, any::<bool>())
                .prop_map(|(gap, cents, milli, is_sell)| Op::Add { gap, cents, milli, is_sell }),
            1 => (0i64..30_000).prop_map(|ahead| Op::Evict { ahead }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn accumulators_match_brute_force(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let mut w = TradeWindow::default();
            let mut admitted: Vec<TradeRecord> = Vec::new();
            let mut last_ts = 0i64;

            for op in ops {
                match op {
                    Op::Add { gap, cents, milli, is_sell } => {
                        last_ts += gap;
                        let t = TradeRecord::new(
                            last_ts,
                            Decimal::new(cents, 2),
                            Decimal::new(milli, 3),
                            is_sell,
                        );
                        admitted.push(t);
                        w.add_trade(t).unwrap();
                    }
                    Op::Evict { ahead } => {
                        w.evict_expired(last_ts + ahead);
                        let now = w.reference_time().unwrap_or_default();

                        let expected: Vec<TradeRecord> = admitted
                            .iter()
                            .copied()
                            .filter(|r| now - r.timestamp <= DEFAULT_WINDOW_MS)
                            .collect();
                        let retained: Vec<TradeRecord> = w.trades().copied().collect();
                        prop_assert_eq!(&retained, &expected);

                        let side_sums = |sell: bool| {
                            expected.iter().filter(|r| r.is_sell == sell).fold(
                                (Decimal::ZERO, Decimal::ZERO),
                                |(pv, v), r| (pv + r.price * r.volume, v + r.volume),
                            )
                        };
                        let (buy_pv, buy_v) = side_sums(false);
                        let (sell_pv, sell_v) = side_sums(true);

                        prop_assert_eq!(w.total_buy_volume(), buy_v);
                        prop_assert_eq!(w.total_sell_volume(), sell_v);
                        prop_assert_eq!(w.avg_buy_price(), ratio_or_zero(buy_pv, buy_v));
                        prop_assert_eq!(w.avg_sell_price(), ratio_or_zero(sell_pv, sell_v));
                        if buy_v.is_zero() {
                            prop_assert_eq!(w.avg_buy_price(), Decimal::ZERO);
                        }
                    }
                }
            }
        }
    }
}
