//! Canonical currency codes and the "BASE/QUOTE" symbol vocabulary.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Uppercase canonical currency code, e.g. `USDT`, `BTC`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: &str) -> Self {
        let upper = code.to_uppercase();
        Self(SHORT_CODE_TRANSLATION.get(upper.as_str()).copied().unwrap_or(&upper).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(value: &str) -> Self {
        CurrencyCode::new(value)
    }
}

/// Venue short-codes that mean a different canonical currency.
static SHORT_CODE_TRANSLATION: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([("UST", "USDT"), ("EUT", "EURT"), ("XBT", "BTC")])
});

/// Canonical "BASE/QUOTE" symbol, unique within a venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CurrencyPair {
    pub base: CurrencyCode,
    pub quote: CurrencyCode,
}

impl CurrencyPair {
    pub fn new(base: impl Into<CurrencyCode>, quote: impl Into<CurrencyCode>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Parses the canonical "BASE/QUOTE" textual form.
    pub fn parse(symbol: &str) -> Option<Self> {
        let (base, quote) = symbol.split_once('/')?;
        Some(Self::new(base, quote))
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn short_code_translated_to_canonical() {
        assert_eq!(CurrencyCode::new("ust").as_str(), "USDT");
        assert_eq!(CurrencyCode::new("eut").as_str(), "EURT");
        assert_eq!(CurrencyCode::new("BTC").as_str(), "BTC");
    }

    #[rstest]
    #[case("ust", "USDT")]
    #[case("UST", "USDT")]
    #[case("eut", "EURT")]
    #[case("xbt", "BTC")]
    #[case("eth", "ETH")]
    fn short_code_table(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(CurrencyCode::new(input).as_str(), expected);
    }

    #[test]
    fn pair_display_is_canonical_symbol() {
        let pair = CurrencyPair::new("btc", "usdt");
        assert_eq!(pair.to_string(), "BTC/USDT");
    }

    #[test]
    fn parse_round_trips_display() {
        let pair = CurrencyPair::parse("ETH/USDT").expect("in test");
        assert_eq!(pair.to_string(), "ETH/USDT");
    }
}
