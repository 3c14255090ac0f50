//! HMAC signature generation and verification.
//!
//! Payloads are signed as `sha256=<hex hmac>` over their canonical JSON
//! encoding. `serde_json` serializes object keys in sorted order, so the
//! encoding is deterministic: the body the receiver reads off the wire is
//! byte-for-byte the text that was signed, and the signature can be
//! recomputed from it directly.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix identifying the signature scheme.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signs a payload with the given secret.
pub fn sign(payload: &Value, secret: &str) -> String {
    sign_body(payload.to_string().as_bytes(), secret)
}

/// Signs a raw request body with the given secret.
pub fn sign_body(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a signature against a payload.
pub fn verify(payload: &Value, signature: &str, secret: &str) -> bool {
    verify_body(payload.to_string().as_bytes(), signature, secret)
}

/// Verifies a signature against a raw request body.
///
/// Comparison is constant-time to avoid leaking how much of a forged
/// signature matched.
pub fn verify_body(body: &[u8], signature: &str, secret: &str) -> bool {
    let expected = sign_body(body, secret);
    constant_time_compare(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
