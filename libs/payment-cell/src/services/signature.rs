use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Canonical message: `name=value` pairs joined by commas, in the given order.
pub fn signing_message(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",")
}

/// Base64 of HMAC-SHA256 over `message` with the shared secret.
pub fn sign(secret: &str, message: &str) -> Result<String, GatewayError> {
    let mut mac = new_mac(secret)?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64 signature.
pub fn verify(secret: &str, message: &str, signature: &str) -> Result<(), GatewayError> {
    let expected = STANDARD
        .decode(signature.trim())
        .map_err(|_| GatewayError::SignatureMismatch)?;

    let mut mac = new_mac(secret)?;
    mac.update(message.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| GatewayError::SignatureMismatch)
}

fn new_mac(secret: &str) -> Result<HmacSha256, GatewayError> {
    if secret.is_empty() {
        return Err(GatewayError::NotConfigured("gateway secret key is not set".to_string()));
    }
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::NotConfigured(e.to_string()))
}
