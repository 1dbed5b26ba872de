//! Order — lifecycle state machine.

use crate::currency::CurrencyPair;
use crate::error::{ExchangeError, ExchangeErrorKind};
use crate::trade::Trade;
use crate::{Amount, DateTime, Price};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Canonical order types. Not every venue supports every
/// variant — `ExchangeFeatures`/`describe().has` is where that's surfaced;
/// `createOrder` with a type the venue doesn't offer raises `InvalidOrder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopLimit,
    TrailingStop,
    Fok,
    Ioc,
    LimitMaker,
}

impl OrderType {
    pub fn canonical_str(self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
            OrderType::StopLimit => "STOP_LIMIT",
            OrderType::TrailingStop => "TRAILING_STOP",
            OrderType::Fok => "FOK",
            OrderType::Ioc => "IOC",
            OrderType::LimitMaker => "LIMIT_MAKER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
    PostOnly,
}

/// Order lifecycle state. Status is monotonic:
/// `NEW -> PartiallyFilled -> Filled` or `-> Canceled/Rejected/Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone)]
pub struct Fee {
    pub cost: Amount,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub venue_id: String,
    pub client_order_id: Option<String>,
    pub symbol: CurrencyPair,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: Option<TimeInForce>,
    pub status: OrderStatus,
    pub price: Option<Price>,
    pub amount: Amount,
    pub filled: Amount,
    pub cost: Option<Price>,
    pub timestamp: DateTime,
    pub fee: Option<Fee>,
    /// The fills that make up `filled`, when the venue returns them inline.
    pub trades: Option<Vec<Trade>>,
    pub info: Value,
}

impl Order {
    /// `remaining = amount - filled`, derived rather than stored.
    pub fn remaining(&self) -> Amount {
        self.amount - self.filled
    }

    /// `average = cost / filled` when filled > 0.
    pub fn average(&self) -> Option<Price> {
        if self.filled.is_zero() {
            return None;
        }
        self.cost.map(|cost| cost / self.filled)
    }

    /// Validates `filled + remaining == amount` and the NEW/FILLED edge
    /// invariants.
    pub fn check_invariant(&self) -> Result<(), ExchangeError> {
        if self.filled + self.remaining() != self.amount {
            return Err(self.fault(format!(
                "filled ({}) + remaining ({}) != amount ({})",
                self.filled,
                self.remaining(),
                self.amount
            )));
        }
        if self.status == OrderStatus::New && !self.filled.is_zero() {
            return Err(self.fault("status is NEW but filled != 0".to_owned()));
        }
        if self.status == OrderStatus::Filled && !self.remaining().is_zero() {
            return Err(self.fault("status is FILLED but remaining != 0".to_owned()));
        }
        Ok(())
    }

    fn fault(&self, message: String) -> ExchangeError {
        ExchangeError::new(ExchangeErrorKind::Fault, self.venue_id.clone(), None, message)
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_order() -> Order {
        Order {
            venue_id: "o-1".into(),
            client_order_id: None,
            symbol: CurrencyPair::new("BTC", "USDT"),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            time_in_force: Some(TimeInForce::GoodTillCancel),
            status: OrderStatus::PartiallyFilled,
            price: Some(dec!(30000)),
            amount: dec!(1),
            filled: dec!(0.4),
            cost: Some(dec!(12000)),
            timestamp: chrono::DateTime::from_timestamp(0, 0).unwrap(),
            fee: None,
            trades: None,
            info: Value::Null,
        }
    }

    #[test]
    fn remaining_is_derived() {
        assert_eq!(base_order().remaining(), dec!(0.6));
    }

    #[test]
    fn average_is_cost_over_filled() {
        assert_eq!(base_order().average(), Some(dec!(30000)));
    }

    #[test]
    fn average_is_none_when_unfilled() {
        let mut order = base_order();
        order.filled = dec!(0);
        assert_eq!(order.average(), None);
    }

    #[test]
    fn accepts_consistent_fill_split() {
        assert!(base_order().check_invariant().is_ok());
    }

    #[test]
    fn new_status_requires_zero_filled() {
        let mut order = base_order();
        order.status = OrderStatus::New;
        assert!(order.check_invariant().is_err());
        order.filled = dec!(0);
        order.amount = dec!(0);
        assert!(order.check_invariant().is_ok());
    }

    #[test]
    fn filled_status_requires_zero_remaining() {
        let mut order = base_order();
        order.status = OrderStatus::Filled;
        assert!(order.check_invariant().is_err());
        order.filled = order.amount;
        assert!(order.check_invariant().is_ok());
    }

    #[test]
    fn closed_statuses_report_is_closed() {
        for status in [
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert!(status.is_closed());
        }
        assert!(!OrderStatus::New.is_closed());
        assert!(!OrderStatus::PartiallyFilled.is_closed());
    }
}
