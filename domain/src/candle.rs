//! Candle — one OHLCV bar.

use crate::timeframe::Timeframe;
use crate::{Amount, DateTime, Price};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Amount,
}

/// Sorts venue candles into chronological order, regardless of the order
/// the venue delivered them in.
pub fn sort_chronological(mut candles: Vec<Candle>, _timeframe: Timeframe) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(seconds: i64) -> DateTime {
        chrono::DateTime::from_timestamp(seconds, 0).unwrap()
    }

    fn bar(seconds: i64) -> Candle {
        Candle {
            timestamp: at(seconds),
            open: dec!(1),
            high: dec!(2),
            low: dec!(0.5),
            close: dec!(1.5),
            volume: dec!(10),
        }
    }

    /// A venue returning candles newest-first must be reordered
    /// chronologically (oldest first) before it reaches the caller.
    #[test]
    fn reorders_newest_first_candles_chronologically() {
        let candles = vec![bar(300), bar(200), bar(100)];
        let sorted = sort_chronological(candles, Timeframe::Minute1);
        let timestamps: Vec<DateTime> = sorted.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![at(100), at(200), at(300)]);
    }

    #[test]
    fn leaves_already_chronological_candles_untouched() {
        let candles = vec![bar(100), bar(200), bar(300)];
        let sorted = sort_chronological(candles, Timeframe::Minute1);
        let timestamps: Vec<DateTime> = sorted.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![at(100), at(200), at(300)]);
    }
}
