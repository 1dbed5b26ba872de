//! Balance — free/used/total per currency.

use crate::currency::CurrencyCode;
use crate::{Amount, DateTime};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceAmounts {
    pub free: Amount,
    pub used: Amount,
}

impl BalanceAmounts {
    /// `free + used == total`, so `total` is never stored separately — it
    /// is always derived.
    pub fn total(&self) -> Amount {
        self.free + self.used
    }
}

#[derive(Debug, Clone)]
pub struct Balance {
    pub venue_id: String,
    pub by_currency: HashMap<CurrencyCode, BalanceAmounts>,
    pub timestamp: Option<DateTime>,
    /// Opaque venue passthrough.
    pub info: Value,
}

impl Balance {
    pub fn new(venue_id: impl Into<String>) -> Self {
        Self {
            venue_id: venue_id.into(),
            by_currency: HashMap::new(),
            timestamp: None,
            info: Value::Null,
        }
    }

    pub fn get(&self, currency: &CurrencyCode) -> Option<BalanceAmounts> {
        self.by_currency.get(currency).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_is_free_plus_used() {
        let amounts = BalanceAmounts {
            free: dec!(1.5),
            used: dec!(0.5),
        };
        assert_eq!(amounts.total(), dec!(2));
    }

    #[test]
    fn missing_currency_returns_none() {
        let balance = Balance::new("binance");
        assert_eq!(balance.get(&CurrencyCode::new("BTC")), None);
    }

    #[test]
    fn set_and_get_roundtrip() {
        let mut balance = Balance::new("binance");
        let code = CurrencyCode::new("BTC");
        balance.by_currency.insert(
            code.clone(),
            BalanceAmounts { free: dec!(1), used: dec!(0) },
        );
        assert_eq!(balance.get(&code).unwrap().total(), dec!(1));
    }
}
