use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::models::{Candle, TickType, Timeframe, TradeUpdate};

use super::technical::{IndicatorParams, IndicatorValues, TechnicalAnalysis, TechnicalError};

/// Bounded candle buffer for one symbol and timeframe, fed by trades.
#[derive(Debug, Clone)]
pub struct Candles {
    timeframe: Timeframe,
    limit: usize,
    raw: VecDeque<Candle>,
}

impl Candles {
    pub fn new(timeframe: Timeframe, limit: usize) -> Self {
        Self {
            timeframe,
            limit: limit.max(1),
            raw: VecDeque::with_capacity(limit),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Candle at `index`; negative indexes count from the most recent.
    pub fn get(&self, index: isize) -> Option<&Candle> {
        let len = self.raw.len() as isize;
        let pos = if index < 0 { len + index } else { index };
        if pos < 0 {
            return None;
        }
        self.raw.get(pos as usize)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.raw.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.raw.iter()
    }

    pub fn set_snapshot(&mut self, candles: Vec<Candle>) {
        self.raw.clear();
        let skip = candles.len().saturating_sub(self.limit);

        let mut prev: Option<Candle> = None;
        for candle in candles.into_iter().skip(skip) {
            if let Some(prev) = &prev {
                self.fill_gap(prev.timestamp, prev.close, candle.timestamp - prev.timestamp);
            }
            self.append(candle.clone());
            prev = Some(candle);
        }
    }

    /// Applies a trade and reports how the buffer changed.
    /// Returns `None` for the very first trade, which only opens a candle.
    pub fn update(&mut self, trade: &TradeUpdate) -> Option<TickType> {
        let step = self.timeframe.millis();

        let Some(last) = self.raw.back_mut() else {
            let timestamp = trade.timestamp - trade.timestamp.rem_euclid(step);
            self.append(Candle::flat(timestamp, trade.price));
            return None;
        };

        if trade.timestamp < last.timestamp + step {
            last.close = trade.price;
            last.volume += trade.quantity;
            if trade.price > last.high {
                last.high = trade.price;
            }
            if trade.price < last.low {
                last.low = trade.price;
            }
            return Some(TickType::SameCandle);
        }

        let (last_ts, last_close) = (last.timestamp, last.close);

        if trade.timestamp >= last_ts + step * 2 {
            let opened = self.fill_gap(last_ts, last_close, trade.timestamp - last_ts);
            self.append(Self::open_candle(opened + step, trade));
            return Some(TickType::MissingCandle);
        }

        self.append(Self::open_candle(last_ts + step, trade));
        Some(TickType::NewCandle)
    }

    pub fn indicator(&self, name: &str, params: &IndicatorParams, index: isize) -> Result<IndicatorValues, TechnicalError> {
        TechnicalAnalysis::new(self.raw.iter()).indicator(name, params, index)
    }

    fn open_candle(timestamp: i64, trade: &TradeUpdate) -> Candle {
        Candle {
            timestamp,
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.quantity,
        }
    }

    /// Appends flat candles for every whole period missing after `from`.
    /// Returns the timestamp of the last candle in the buffer afterwards.
    fn fill_gap(&mut self, from: i64, price: Decimal, distance: i64) -> i64 {
        let step = self.timeframe.millis();
        let missing = distance / step - 1;
        let mut timestamp = from;
        for n in 1..=missing {
            timestamp = from + step * n;
            self.append(Candle::flat(timestamp, price));
        }
        timestamp
    }

    fn append(&mut self, candle: Candle) {
        self.raw.push_back(candle);
        while self.raw.len() > self.limit {
            self.raw.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINUTE: i64 = 60_000;

    fn trade(timestamp: i64, price: Decimal, quantity: Decimal) -> TradeUpdate {
        TradeUpdate {
            price,
            quantity,
            timestamp,
            is_buyer_maker: false,
        }
    }

    fn candle(timestamp: i64, close: Decimal) -> Candle {
        Candle::flat(timestamp, close)
    }

    #[test]
    fn test_first_trade_opens_aligned_candle() {
        let mut candles = Candles::new(Timeframe::M1, 10);
        assert_eq!(candles.update(&trade(MINUTE * 5 + 1234, dec!(10), dec!(1))), None);
        let first = candles.last().unwrap();
        assert_eq!(first.timestamp, MINUTE * 5);
        assert_eq!(first.volume, Decimal::ZERO);
    }

    #[test]
    fn test_same_candle_updates_ohlcv() {
        let mut candles = Candles::new(Timeframe::M1, 10);
        candles.update(&trade(0, dec!(10), dec!(1)));
        assert_eq!(candles.update(&trade(10, dec!(12), dec!(2))), Some(TickType::SameCandle));
        assert_eq!(candles.update(&trade(20, dec!(8), dec!(3))), Some(TickType::SameCandle));

        let last = candles.last().unwrap();
        assert_eq!((last.open, last.high, last.low, last.close), (dec!(10), dec!(12), dec!(8), dec!(8)));
        assert_eq!(last.volume, dec!(5));
    }

    #[test]
    fn test_new_candle_starts_on_boundary() {
        let mut candles = Candles::new(Timeframe::M1, 10);
        candles.update(&trade(0, dec!(10), dec!(1)));
        assert_eq!(candles.update(&trade(MINUTE + 5, dec!(11), dec!(2))), Some(TickType::NewCandle));
        let last = candles.last().unwrap();
        assert_eq!(last.timestamp, MINUTE);
        assert_eq!(last.volume, dec!(2));
    }

    #[test]
    fn test_missing_candles_are_filled_flat() {
        let mut candles = Candles::new(Timeframe::M1, 10);
        candles.update(&trade(0, dec!(10), dec!(1)));
        assert_eq!(candles.update(&trade(MINUTE * 3 + 1, dec!(15), dec!(1))), Some(TickType::MissingCandle));

        assert_eq!(candles.len(), 4);
        assert_eq!(candles.get(1).unwrap(), &candle(MINUTE, dec!(10)));
        assert_eq!(candles.get(2).unwrap(), &candle(MINUTE * 2, dec!(10)));
        assert_eq!(candles.get(-1).unwrap().timestamp, MINUTE * 3);
        assert_eq!(candles.get(-1).unwrap().close, dec!(15));
        assert_eq!(candles.get(-1).unwrap().volume, dec!(1));
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut candles = Candles::new(Timeframe::M1, 3);
        candles.update(&trade(0, dec!(1), dec!(1)));
        for n in 1..6 {
            candles.update(&trade(MINUTE * n, Decimal::from(n), dec!(1)));
        }
        assert_eq!(candles.len(), 3);
        assert_eq!(candles.get(0).unwrap().timestamp, MINUTE * 3);
        assert!(candles.get(-4).is_none());
    }

    #[test]
    fn test_snapshot_keeps_tail_and_fills_gaps() {
        let mut candles = Candles::new(Timeframe::M5, 4);
        let step = Timeframe::M5.millis();
        candles.set_snapshot(vec![
            candle(0, dec!(1)),
            candle(step, dec!(2)),
            candle(step * 2, dec!(3)),
            candle(step * 4, dec!(4)),
        ]);
        // oldest candle dropped by the limit, one gap filled at the end
        let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![step, step * 2, step * 3, step * 4]);
        assert_eq!(candles.get(2).unwrap().close, dec!(3));
    }
}
