//! Gate.io venue adapter — "G family" signing
//! (`METHOD\nPATH\nQUERY\nSHA512(body)\nTIMESTAMP`, HMAC-SHA512 hex).

mod adapter;

pub use adapter::GateAdapter;
