//! HMAC handshake between the gateway and remote agent processes.
//!
//! Both sides share a secret. The agent signs `agentId:platform:timestamp`
//! with HMAC-SHA256; the gateway recomputes and compares in constant time,
//! after first bounding the timestamp to the replay window. On success the
//! gateway replies with its own signature over the acknowledgement so the
//! agent can verify server authenticity.

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    hmac::{Hmac, Mac},
    serde::Serialize,
    sha2::Sha256,
};

use beacon_protocol::{REPLAY_WINDOW_MS, frames::AgentAuthPayload};

use crate::error::HandshakeError;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str) -> HmacSha256 {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        // HMAC accepts keys of any length.
        Err(_) => unreachable!(),
    }
}

/// Sign an arbitrary payload with the shared secret; base64 output.
pub fn sign(secret: &str, payload: &str) -> String {
    let mut m = mac(secret);
    m.update(payload.as_bytes());
    BASE64.encode(m.finalize().into_bytes())
}

/// Canonical payload an agent signs when handshaking.
fn handshake_payload(agent_id: &str, platform: &str, timestamp: i64) -> String {
    format!("{agent_id}:{platform}:{timestamp}")
}

/// Compute the handshake signature an agent must present. Exposed so the
/// CLI (and agent implementations) produce exactly what the gateway checks.
pub fn sign_handshake(secret: &str, agent_id: &str, platform: &str, timestamp: i64) -> String {
    sign(secret, &handshake_payload(agent_id, platform, timestamp))
}

/// A handshake attempt with all required fields present.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub agent_id: String,
    pub platform: String,
    pub timestamp: i64,
    pub signature: String,
}

impl TryFrom<AgentAuthPayload> for HandshakeRequest {
    type Error = HandshakeError;

    fn try_from(p: AgentAuthPayload) -> Result<Self, HandshakeError> {
        let (Some(agent_id), Some(platform), Some(timestamp), Some(signature)) =
            (p.agent_id, p.platform, p.timestamp, p.signature)
        else {
            return Err(HandshakeError::MissingFields);
        };
        if agent_id.is_empty() || platform.is_empty() || signature.is_empty() {
            return Err(HandshakeError::MissingFields);
        }
        Ok(Self {
            agent_id,
            platform,
            timestamp,
            signature,
        })
    }
}

/// Server-signed acknowledgement returned on a successful handshake.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    pub status: &'static str,
    pub agent_id: String,
    pub timestamp: i64,
    pub signature: String,
}

impl HandshakeAck {
    pub fn new(secret: &str, agent_id: &str, now: i64) -> Self {
        let status = "authenticated";
        let signature = sign(secret, &format!("{status}:{agent_id}:{now}"));
        Self {
            status,
            agent_id: agent_id.to_string(),
            timestamp: now,
            signature,
        }
    }
}

/// Verify a handshake attempt.
///
/// The replay window is checked before the signature, so a stale or
/// future-dated attempt is rejected even when its signature is valid. The
/// signature comparison itself is constant-time (`Mac::verify_slice`).
/// There is deliberately no secondary acceptance scheme.
pub fn verify_handshake(
    secret: &str,
    req: &HandshakeRequest,
    now: i64,
) -> Result<(), HandshakeError> {
    if (now - req.timestamp).abs() > REPLAY_WINDOW_MS {
        return Err(HandshakeError::StaleTimestamp);
    }

    let decoded = BASE64
        .decode(req.signature.as_bytes())
        .map_err(|_| HandshakeError::InvalidSignature)?;

    let mut m = mac(secret);
    m.update(handshake_payload(&req.agent_id, &req.platform, req.timestamp).as_bytes());
    m.verify_slice(&decoded)
        .map_err(|_| HandshakeError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    fn request(timestamp: i64) -> HandshakeRequest {
        HandshakeRequest {
            agent_id: "ag-1".into(),
            platform: "linux".into(),
            timestamp,
            signature: sign_handshake(SECRET, "ag-1", "linux", timestamp),
        }
    }

    #[test]
    fn accepts_valid_signature_inside_window() {
        let now = 1_700_000_000_000;
        assert!(verify_handshake(SECRET, &request(now - 1_000), now).is_ok());
    }

    #[test]
    fn rejects_stale_timestamp_despite_valid_signature() {
        let now = 1_700_000_000_000;
        let req = request(now - 400_000);
        assert_eq!(
            verify_handshake(SECRET, &req, now),
            Err(HandshakeError::StaleTimestamp)
        );
    }

    #[test]
    fn rejects_future_dated_timestamp() {
        let now = 1_700_000_000_000;
        let req = request(now + 400_000);
        assert_eq!(
            verify_handshake(SECRET, &req, now),
            Err(HandshakeError::StaleTimestamp)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = 1_700_000_000_000;
        let mut req = request(now);
        req.signature = sign_handshake("other-secret", "ag-1", "linux", now);
        assert_eq!(
            verify_handshake(SECRET, &req, now),
            Err(HandshakeError::InvalidSignature)
        );
    }

    #[test]
    fn rejects_tampered_field() {
        let now = 1_700_000_000_000;
        let mut req = request(now);
        req.platform = "windows".into();
        assert_eq!(
            verify_handshake(SECRET, &req, now),
            Err(HandshakeError::InvalidSignature)
        );
    }

    #[test]
    fn rejects_garbage_base64() {
        let now = 1_700_000_000_000;
        let mut req = request(now);
        req.signature = "!!not-base64!!".into();
        assert_eq!(
            verify_handshake(SECRET, &req, now),
            Err(HandshakeError::InvalidSignature)
        );
    }

    #[test]
    fn missing_fields_rejected_before_any_check() {
        let payload = AgentAuthPayload {
            agent_id: Some("ag-1".into()),
            ..Default::default()
        };
        assert!(matches!(
            HandshakeRequest::try_from(payload),
            Err(HandshakeError::MissingFields)
        ));
    }

    #[test]
    fn ack_signature_verifies_with_shared_secret() {
        let now = 1_700_000_000_000;
        let ack = HandshakeAck::new(SECRET, "ag-1", now);
        assert_eq!(ack.status, "authenticated");
        assert_eq!(ack.signature, sign(SECRET, &format!("authenticated:ag-1:{now}")));
    }
}
