#![deny(
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
    unused_qualifications,
    unused_must_use
)]

//! Venue-agnostic plumbing: the HTTP pipeline, the websocket client, the
//! token-bucket throttler, signing primitives and the `VenueAdapter` trait
//! that per-exchange crates implement. Nothing in this crate knows the name
//! of a single exchange.

pub mod config;
pub mod connectivity;
pub mod events;
pub mod rest_client;
pub mod signing;
pub mod subscription;
pub mod throttle;
pub mod venue;
