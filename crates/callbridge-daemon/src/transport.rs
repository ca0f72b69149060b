//! Signed HTTP transport to the per-tenant agency backends
//!
//! Every request carries the JSON payload inside a signed envelope:
//! `base64(payload) "." base64(hmac_sha1(payload))`, keyed by
//! `sha1("saltysigner" + tenant secret)`. POST requests put the envelope in
//! a JSON body, GET requests put it in the query string. The backends use
//! the same envelope for requests they originate, so verification lives
//! here as well.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use callbridge_common::{BridgeError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::debug;

type HmacSha1 = Hmac<Sha1>;

const KEY_SALT: &str = "saltysigner";

/// HTTP method accepted by the agency backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Wire shape of a signed request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignedRequest {
    data: String,
    company_id: String,
}

fn derive_key(secret: &str) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(KEY_SALT.as_bytes());
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Wrap a raw payload in the signed envelope format
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let key = derive_key(secret);
    let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(payload);
    let signature = mac.finalize().into_bytes();
    format!("{}.{}", BASE64.encode(payload), BASE64.encode(signature))
}

/// Verify a signed envelope and return the enclosed payload.
///
/// An envelope with fewer than two dot-separated parts, undecodable parts,
/// or a signature that does not match the given secret is rejected.
pub fn verify_signed(envelope: &str, secret: &str) -> Result<Vec<u8>> {
    let parts: Vec<&str> = envelope.split('.').collect();
    if parts.len() < 2 {
        return Err(BridgeError::Signature("malformed envelope".to_string()));
    }

    let payload = BASE64
        .decode(parts[0])
        .map_err(|_| BridgeError::Signature("bad signature".to_string()))?;
    let signature = BASE64
        .decode(parts[1])
        .map_err(|_| BridgeError::Signature("bad signature".to_string()))?;

    let key = derive_key(secret);
    let mut mac = HmacSha1::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(&payload);
    mac.verify_slice(&signature)
        .map_err(|_| BridgeError::Signature("bad signature".to_string()))?;

    Ok(payload)
}

/// HTTP client speaking the signed-envelope protocol
#[derive(Debug, Clone)]
pub struct SignedTransport {
    client: reqwest::Client,
}

impl SignedTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Sign `payload` and deliver it to `url` on behalf of a tenant.
    ///
    /// Returns the response body on any 2xx status; a non-2xx status is a
    /// transport error carrying the status code.
    pub async fn send_signed<T: Serialize>(
        &self,
        payload: &T,
        url: &str,
        method: HttpMethod,
        secret: &str,
        tenant_id: &str,
    ) -> Result<String> {
        let raw = serde_json::to_vec(payload)?;
        let request = SignedRequest {
            data: sign_payload(&raw, secret),
            company_id: tenant_id.to_string(),
        };

        debug!(url, ?method, "sending signed request");
        let builder = match method {
            HttpMethod::Post => self.client.post(url).json(&request),
            HttpMethod::Get => self.client.get(url).query(&request),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::RemoteStatus(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "tenant-secret";

    #[test]
    fn test_sign_then_verify_returns_payload() {
        let payload = br#"{"number":"1023"}"#;
        let envelope = sign_payload(payload, SECRET);
        let verified = verify_signed(&envelope, SECRET).unwrap();
        assert_eq!(verified, payload);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let envelope = sign_payload(b"payload", SECRET);
        let err = verify_signed(&envelope, "other-secret").unwrap_err();
        assert!(matches!(err, BridgeError::Signature(_)));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let envelope = sign_payload(b"payload", SECRET);
        let signature = envelope.split('.').nth(1).unwrap();
        let forged = format!("{}.{}", BASE64.encode(b"tampered"), signature);
        let err = verify_signed(&forged, SECRET).unwrap_err();
        assert!(matches!(err, BridgeError::Signature(_)));
    }

    #[test]
    fn test_verify_rejects_malformed_envelope() {
        for envelope in ["", "justonepart", "not base64 either"] {
            let err = verify_signed(envelope, SECRET).unwrap_err();
            assert!(matches!(err, BridgeError::Signature(_)), "{envelope:?}");
        }
    }

    #[tokio::test]
    async fn test_post_carries_verifiable_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/save_phone_call"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = SignedTransport::new(Duration::from_secs(5)).unwrap();
        let payload = serde_json::json!({"unique_id": "123.45"});
        let body = transport
            .send_signed(
                &payload,
                &format!("{}/save_phone_call", server.uri()),
                HttpMethod::Post,
                SECRET,
                "77",
            )
            .await
            .unwrap();
        assert_eq!(body, "ok");

        let requests = server.received_requests().await.unwrap();
        let sent: SignedRequest = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent.company_id, "77");
        let verified = verify_signed(&sent.data, SECRET).unwrap();
        assert_eq!(verified, serde_json::to_vec(&payload).unwrap());
    }

    #[tokio::test]
    async fn test_get_sends_envelope_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_employees_inner_phone"))
            .and(query_param("CompanyId", "12"))
            .respond_with(ResponseTemplate::new(200).set_body_string("1023,1024"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = SignedTransport::new(Duration::from_secs(5)).unwrap();
        let body = transport
            .send_signed(
                &(),
                &format!("{}/get_employees_inner_phone", server.uri()),
                HttpMethod::Get,
                SECRET,
                "12",
            )
            .await
            .unwrap();
        assert_eq!(body, "1023,1024");
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let transport = SignedTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .send_signed(&(), &server.uri(), HttpMethod::Post, SECRET, "1")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::RemoteStatus(502)));
    }
}
