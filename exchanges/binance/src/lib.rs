//! Binance venue adapter.

mod adapter;

pub use adapter::BinanceAdapter;
