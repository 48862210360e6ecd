use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &[u8]) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(key).ok()
}

/// Compare a presented token with the configured secret without leaking
/// where they differ. Both sides are MACed under the same key so the
/// comparison runs over fixed-length tags.
pub fn verify_shared_secret(expected: &str, presented: &str) -> bool {
    let Some(mut reference) = keyed(expected.as_bytes()) else {
        return false;
    };
    let Some(mut candidate) = keyed(expected.as_bytes()) else {
        return false;
    };
    reference.update(expected.as_bytes());
    candidate.update(presented.as_bytes());
    candidate
        .verify_slice(&reference.finalize().into_bytes())
        .is_ok()
}

/// Issues and checks the OAuth `state` parameter.
///
/// Token layout before base64url: `<nonce>.<issued-at-seconds>.<hex hmac>`,
/// where the MAC covers `<nonce>.<issued-at-seconds>`.
#[derive(Clone)]
pub struct StateSigner {
    key: Vec<u8>,
    max_age: Duration,
}

impl StateSigner {
    pub fn new(key: impl Into<Vec<u8>>, max_age: Duration) -> Self {
        Self {
            key: key.into(),
            max_age,
        }
    }

    pub fn issue(&self, now: DateTime<Utc>) -> String {
        let payload = format!("{}.{}", Uuid::new_v4().simple(), now.timestamp());
        let signature = self.sign(payload.as_bytes()).unwrap_or_default();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!("{payload}.{signature}"))
    }

    pub fn verify(&self, state: &str, now: DateTime<Utc>) -> bool {
        let Ok(decoded) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(state) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((payload, signature)) = decoded.rsplit_once('.') else {
            return false;
        };
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };

        let Some(mut mac) = keyed(&self.key) else {
            return false;
        };
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            return false;
        }

        let Some(issued_at) = payload
            .rsplit_once('.')
            .and_then(|(_, ts)| ts.parse::<i64>().ok())
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        else {
            return false;
        };

        issued_at <= now && now - issued_at <= self.max_age
    }

    fn sign(&self, payload: &[u8]) -> Option<String> {
        let mut mac = keyed(&self.key)?;
        mac.update(payload);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}
