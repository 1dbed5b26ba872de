//! Request-signing primitives.
//!
//! Each venue adapter picks the primitive matching its documented auth
//! scheme and wires it up inside its own `sign` implementation — this
//! module only knows HMAC variants and encodings, never a query format.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};

/// HMAC-SHA256 over `payload`, rendered as lowercase hex.
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA256 over `payload`, rendered as base64.
pub fn hmac_sha256_base64(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// HMAC-SHA384 over `payload`, rendered as lowercase hex.
pub fn hmac_sha384_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha384>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA512 over `payload`, rendered as lowercase hex.
pub fn hmac_sha512_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC-SHA256 with the venue secret given as base64 text that must be
/// decoded before use as the HMAC key.
pub fn hmac_sha256_base64_secret(secret_b64: &str, payload: &[u8]) -> anyhow::Result<String> {
    let secret = BASE64_STANDARD.decode(secret_b64)?;
    Ok(hmac_sha256_base64(&secret, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Classic Binance signing — HMAC-SHA256 hex over
    /// the exact query string `symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559`
    /// with secret `NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j`
    /// produces the documented signature.
    #[test]
    fn binance_scenario_signature() {
        let secret = b"NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let payload = b"symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = hmac_sha256_hex(secret, payload);
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b1"
        );
    }

    #[test]
    fn distinct_algorithms_produce_distinct_signatures() {
        let secret = b"secret";
        let payload = b"payload";
        let sha256 = hmac_sha256_hex(secret, payload);
        let sha384 = hmac_sha384_hex(secret, payload);
        let sha512 = hmac_sha512_hex(secret, payload);
        assert_ne!(sha256, sha384);
        assert_ne!(sha384, sha512);
    }
}
