#![deny(
    non_ascii_idents,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

//! Canonical data model and error taxonomy shared by every venue adapter.
//!
//! Nothing in this crate knows about HTTP, WebSockets, or any particular
//! venue. It only defines the normalized shapes callers see (`Market`,
//! `Ticker`, `OrderBook`, ...) and the rules for deriving them.

pub mod balance;
pub mod candle;
pub mod currency;
pub mod error;
pub mod fee;
pub mod market;
pub mod order;
pub mod order_book;
pub mod ticker;
pub mod timeframe;
pub mod trade;

pub type DateTime = chrono::DateTime<chrono::Utc>;
pub type Price = rust_decimal::Decimal;
pub type Amount = rust_decimal::Decimal;
