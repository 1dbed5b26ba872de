//! Trading-fee schedule, as returned by `fetchTradingFees`.

use crate::currency::CurrencyPair;
use crate::Amount;

/// Maker/taker rates, expressed as fractions (e.g. `0.001` == 10 bps).
/// `symbol` is `None` when the venue quotes one flat schedule account-wide
/// rather than a per-market one.
#[derive(Debug, Clone)]
pub struct TradingFee {
    pub symbol: Option<CurrencyPair>,
    pub maker: Amount,
    pub taker: Amount,
}
