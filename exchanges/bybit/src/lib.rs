//! Bybit venue adapter — the literal B2 table row
//! (`timestamp + apiKey + recvWindow + query-or-body`, HMAC-SHA256 hex,
//! signature carried entirely in headers), distinct from Binance's B2
//! variant despite sharing the letter.

mod adapter;

pub use adapter::BybitAdapter;
