//! Canonical candle timeframes.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Second1,
    Minute1,
    Minute3,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

impl Timeframe {
    pub fn seconds(self) -> u64 {
        match self {
            Timeframe::Second1 => 1,
            Timeframe::Minute1 => 60,
            Timeframe::Minute3 => 3 * 60,
            Timeframe::Minute5 => 5 * 60,
            Timeframe::Minute15 => 15 * 60,
            Timeframe::Minute30 => 30 * 60,
            Timeframe::Hour1 => 60 * 60,
            Timeframe::Hour2 => 2 * 60 * 60,
            Timeframe::Hour4 => 4 * 60 * 60,
            Timeframe::Hour6 => 6 * 60 * 60,
            Timeframe::Hour8 => 8 * 60 * 60,
            Timeframe::Hour12 => 12 * 60 * 60,
            Timeframe::Day1 => 24 * 60 * 60,
            Timeframe::Day3 => 3 * 24 * 60 * 60,
            Timeframe::Week1 => 7 * 24 * 60 * 60,
            Timeframe::Month1 => 30 * 24 * 60 * 60,
        }
    }

    /// The canonical short code, e.g. "1m", "4h", "1d" — the vocabulary
    /// every adapter's own timeframe table translates to and from.
    pub fn code(self) -> &'static str {
        match self {
            Timeframe::Second1 => "1s",
            Timeframe::Minute1 => "1m",
            Timeframe::Minute3 => "3m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour2 => "2h",
            Timeframe::Hour4 => "4h",
            Timeframe::Hour6 => "6h",
            Timeframe::Hour8 => "8h",
            Timeframe::Hour12 => "12h",
            Timeframe::Day1 => "1d",
            Timeframe::Day3 => "3d",
            Timeframe::Week1 => "1w",
            Timeframe::Month1 => "1M",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Some(match code {
            "1s" => Timeframe::Second1,
            "1m" => Timeframe::Minute1,
            "3m" => Timeframe::Minute3,
            "5m" => Timeframe::Minute5,
            "15m" => Timeframe::Minute15,
            "30m" => Timeframe::Minute30,
            "1h" => Timeframe::Hour1,
            "2h" => Timeframe::Hour2,
            "4h" => Timeframe::Hour4,
            "6h" => Timeframe::Hour6,
            "8h" => Timeframe::Hour8,
            "12h" => Timeframe::Hour12,
            "1d" => Timeframe::Day1,
            "3d" => Timeframe::Day3,
            "1w" => Timeframe::Week1,
            "1M" => Timeframe::Month1,
            _ => return None,
        })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_consistent_with_code() {
        assert_eq!(Timeframe::Hour1.seconds(), 3600);
        assert_eq!(Timeframe::Day1.code(), "1d");
    }

    #[test]
    fn parse_round_trips_every_canonical_code() {
        let all = [
            Timeframe::Second1,
            Timeframe::Minute1,
            Timeframe::Minute3,
            Timeframe::Minute5,
            Timeframe::Minute15,
            Timeframe::Minute30,
            Timeframe::Hour1,
            Timeframe::Hour2,
            Timeframe::Hour4,
            Timeframe::Hour6,
            Timeframe::Hour8,
            Timeframe::Hour12,
            Timeframe::Day1,
            Timeframe::Day3,
            Timeframe::Week1,
            Timeframe::Month1,
        ];
        for tf in all {
            assert_eq!(Timeframe::parse(tf.code()), Some(tf));
        }
    }

    #[test]
    fn parse_rejects_unknown_code() {
        assert_eq!(Timeframe::parse("7h"), None);
    }
}
