//! OKX venue adapter (K-family signing: ISO-8601 timestamp + method +
//! requestPath + body, HMAC-SHA256 base64, passphrase header).

mod adapter;

pub use adapter::OkxAdapter;
