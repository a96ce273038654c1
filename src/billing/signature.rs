/// Webhook signature verification
///
/// The provider signs each delivery with an HMAC-SHA256 over
/// `"{timestamp}.{raw_body}"` and sends `t=<ts>,v1=<hex>` in the
/// signature header. Verification is a hard gate: it runs before any
/// event handler and a failure rejects the request with no state change.
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for a timestamped payload
pub(crate) fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the signature header against the raw request body.
///
/// All failure modes return the same error so the response does not leak
/// which part of the check failed.
pub fn verify(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> ApiResult<()> {
    let (timestamp, candidates) = parse_header(header)?;

    if (now.timestamp() - timestamp).abs() > tolerance_secs {
        return Err(invalid_signature());
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    for candidate in candidates {
        let Ok(bytes) = hex::decode(&candidate) else {
            continue;
        };
        // verify_slice is constant-time
        if mac.clone().verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(invalid_signature())
}

/// Parse `t=<ts>,v1=<hex>[,v1=<hex>...]`
fn parse_header(header: &str) -> ApiResult<(i64, Vec<String>)> {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse::<i64>().ok();
            }
            Some(("v1", value)) => {
                candidates.push(value.to_string());
            }
            _ => {}
        }
    }

    match (timestamp, candidates.is_empty()) {
        (Some(timestamp), false) => Ok((timestamp, candidates)),
        _ => Err(invalid_signature()),
    }
}

fn invalid_signature() -> ApiError {
    ApiError::Validation("Webhook signature verification failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn header_for(payload: &[u8], timestamp: i64) -> String {
        format!("t={},v1={}", timestamp, compute_signature(SECRET, timestamp, payload))
    }

    #[test]
    fn test_valid_signature_passes() {
        let now = Utc::now();
        let payload = br#"{"id":"evt_1","type":"customer.subscription.updated"}"#;
        let header = header_for(payload, now.timestamp());

        assert!(verify(SECRET, payload, &header, 300, now).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let now = Utc::now();
        let payload = b"{}";
        let timestamp = now.timestamp();
        let header = format!(
            "t={},v1={}",
            timestamp,
            compute_signature("whsec_other", timestamp, payload)
        );

        assert!(verify(SECRET, payload, &header, 300, now).is_err());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let now = Utc::now();
        let header = header_for(b"original", now.timestamp());

        assert!(verify(SECRET, b"tampered", &header, 300, now).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let now = Utc::now();
        let payload = b"{}";
        let stale = now.timestamp() - 3600;
        let header = header_for(payload, stale);

        assert!(verify(SECRET, payload, &header, 300, now).is_err());
    }

    #[test]
    fn test_malformed_header_rejected() {
        let now = Utc::now();

        assert!(verify(SECRET, b"{}", "", 300, now).is_err());
        assert!(verify(SECRET, b"{}", "t=abc,v1=00", 300, now).is_err());
        assert!(verify(SECRET, b"{}", "v1=00", 300, now).is_err());
        assert!(verify(SECRET, b"{}", "t=123", 300, now).is_err());
    }

    #[test]
    fn test_any_matching_candidate_passes() {
        let now = Utc::now();
        let payload = b"{}";
        let timestamp = now.timestamp();
        let good = compute_signature(SECRET, timestamp, payload);
        let header = format!("t={},v1={},v1={}", timestamp, "00".repeat(32), good);

        assert!(verify(SECRET, payload, &header, 300, now).is_ok());
    }
}
