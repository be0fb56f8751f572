use hmac::{Hmac, Mac};
use sha2::Sha256;

/// HMAC-SHA256 signature over the request body, base64-encoded, as the provider expects it in the
/// `X-Rgw-Signature` header.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload);
    base64::encode(mac.finalize().into_bytes())
}
