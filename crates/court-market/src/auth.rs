//! CLOB API authentication.
//!
//! Two header schemes:
//!
//! - **L1** — an EIP-712 signature over the CLOB attestation message.
//!   Used once, to create or derive API credentials.
//! - **L2** — HMAC-SHA256 over `timestamp + method + path + body` with the
//!   derived API secret, attached to every trading request.

use alloy_primitives::{keccak256, Address, B256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::info;

const AUTH_DOMAIN_NAME: &str = "ClobAuthDomain";
const AUTH_DOMAIN_VERSION: &str = "1";
const AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid private key")]
    InvalidKey,

    #[error("API credentials not set — derive them first")]
    MissingCredentials,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("credential request failed: {0}")]
    Request(String),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Derived API credentials for L2 auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    #[serde(alias = "apiKey")]
    pub api_key: String,
    #[serde(alias = "secret")]
    pub api_secret: String,
    #[serde(alias = "passphrase")]
    pub api_passphrase: String,
}

/// Header set for an authenticated CLOB request.
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub api_key: Option<String>,
    pub passphrase: Option<String>,
}

impl AuthHeaders {
    /// Attach the headers to a request.
    pub fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut r = req
            .header("POLY_ADDRESS", &self.address)
            .header("POLY_SIGNATURE", &self.signature)
            .header("POLY_TIMESTAMP", &self.timestamp);
        if let Some(key) = &self.api_key {
            r = r.header("POLY_API_KEY", key);
        }
        if let Some(pass) = &self.passphrase {
            r = r.header("POLY_PASSPHRASE", pass);
        }
        if !self.nonce.is_empty() {
            r = r.header("POLY_NONCE", &self.nonce);
        }
        r
    }
}

/// Signer + credential holder for the CLOB.
pub struct ClobAuth {
    signer: PrivateKeySigner,
    address: Address,
    chain_id: u64,
    credentials: Option<ApiCredentials>,
}

impl ClobAuth {
    /// Build from a hex private key. An empty key yields a random signer,
    /// which is only useful for dry-run and tests.
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self, AuthError> {
        let signer = if private_key.is_empty() {
            PrivateKeySigner::random()
        } else {
            private_key
                .strip_prefix("0x")
                .unwrap_or(private_key)
                .parse::<PrivateKeySigner>()
                .map_err(|_| AuthError::InvalidKey)?
        };
        let address = signer.address();
        Ok(Self {
            signer,
            address,
            chain_id,
            credentials: None,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn api_key(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.api_key.as_str())
    }

    pub fn set_credentials(&mut self, creds: ApiCredentials) {
        self.credentials = Some(creds);
    }

    /// L1 headers: EIP-712 attestation signature with nonce 0.
    pub async fn l1_headers(&self) -> Result<AuthHeaders, AuthError> {
        let timestamp = Utc::now().timestamp().to_string();
        let digest = self.attestation_digest(&timestamp);
        let sig = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        let mut sig_bytes = sig.as_bytes();
        // Exchange expects Ethereum-style v (27/28), not a raw recovery id.
        if sig_bytes[64] < 27 {
            sig_bytes[64] += 27;
        }

        Ok(AuthHeaders {
            address: format!("{:?}", self.address),
            signature: format!("0x{}", hex::encode(sig_bytes)),
            timestamp,
            nonce: "0".to_string(),
            api_key: None,
            passphrase: None,
        })
    }

    /// L2 headers: HMAC-SHA256 of `timestamp + METHOD + path + body` with
    /// the URL-safe-base64 API secret. Query strings are excluded from the
    /// signed path.
    pub fn l2_headers(&self, method: &str, path: &str, body: &str) -> Result<AuthHeaders, AuthError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(AuthError::MissingCredentials)?;

        let timestamp = Utc::now().timestamp().to_string();
        let path_only = path.split('?').next().unwrap_or(path);
        let payload = format!("{}{}{}{}", timestamp, method.to_uppercase(), path_only, body);

        let secret = base64::engine::general_purpose::URL_SAFE.decode(&creds.api_secret)?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&secret)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        mac.update(payload.as_bytes());
        let signature =
            base64::engine::general_purpose::URL_SAFE.encode(mac.finalize().into_bytes());

        Ok(AuthHeaders {
            address: format!("{:?}", self.address),
            signature,
            timestamp,
            nonce: String::new(),
            api_key: Some(creds.api_key.clone()),
            passphrase: Some(creds.api_passphrase.clone()),
        })
    }

    /// Create or derive API credentials from the CLOB host.
    ///
    /// Tries POST /auth/api-key first (new key), then falls back to
    /// GET /auth/derive-api-key (existing key for this address).
    pub async fn derive_credentials(&mut self, host: &str) -> Result<ApiCredentials, AuthError> {
        let http = reqwest::Client::new();

        let headers = self.l1_headers().await?;
        let resp = headers
            .apply(http.post(format!("{}/auth/api-key", host)))
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        if resp.status().is_success() {
            if let Ok(creds) = resp.json::<ApiCredentials>().await {
                if !creds.api_key.is_empty() {
                    info!(address = %self.address, "CLOB API key created");
                    self.credentials = Some(creds.clone());
                    return Ok(creds);
                }
            }
        }

        let headers = self.l1_headers().await?;
        let resp = headers
            .apply(http.get(format!("{}/auth/derive-api-key", host)))
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Request(format!("HTTP {status}: {body}")));
        }

        let creds: ApiCredentials = resp
            .json()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;
        info!(address = %self.address, "CLOB API key derived");
        self.credentials = Some(creds.clone());
        Ok(creds)
    }

    /// EIP-712 digest of the attestation message.
    ///
    /// Struct: `ClobAuth(address address,string timestamp,uint256 nonce,string message)`
    /// — the timestamp is typed as `string` on the wire.
    fn attestation_digest(&self, timestamp: &str) -> B256 {
        let type_hash =
            keccak256("ClobAuth(address address,string timestamp,uint256 nonce,string message)");

        let mut encoded = Vec::with_capacity(5 * 32);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(&left_pad_address(self.address));
        encoded.extend_from_slice(keccak256(timestamp.as_bytes()).as_slice());
        encoded.extend_from_slice(&[0u8; 32]); // nonce = 0
        encoded.extend_from_slice(keccak256(AUTH_MESSAGE.as_bytes()).as_slice());
        let struct_hash = keccak256(&encoded);

        let mut input = Vec::with_capacity(66);
        input.push(0x19);
        input.push(0x01);
        input.extend_from_slice(self.domain_separator().as_slice());
        input.extend_from_slice(struct_hash.as_slice());
        keccak256(&input)
    }

    fn domain_separator(&self) -> B256 {
        let domain_type = keccak256("EIP712Domain(string name,string version,uint256 chainId)");
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(domain_type.as_slice());
        buf.extend_from_slice(keccak256(AUTH_DOMAIN_NAME.as_bytes()).as_slice());
        buf.extend_from_slice(keccak256(AUTH_DOMAIN_VERSION.as_bytes()).as_slice());
        let mut chain = [0u8; 32];
        chain[24..].copy_from_slice(&self.chain_id.to_be_bytes());
        buf.extend_from_slice(&chain);
        keccak256(&buf)
    }
}

fn left_pad_address(addr: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.as_slice());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_l1_headers_sign() {
        let auth = ClobAuth::new("", 137).unwrap();
        let headers = auth.l1_headers().await.unwrap();
        assert!(headers.signature.starts_with("0x"));
        assert_eq!(headers.nonce, "0");
        assert!(headers.api_key.is_none());
    }

    #[test]
    fn test_l2_requires_credentials() {
        let auth = ClobAuth::new("", 137).unwrap();
        assert!(matches!(
            auth.l2_headers("GET", "/orders", ""),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_l2_signs_path_without_query() {
        let mut auth = ClobAuth::new("", 137).unwrap();
        let secret = base64::engine::general_purpose::URL_SAFE.encode(b"test-secret");
        auth.set_credentials(ApiCredentials {
            api_key: "key".into(),
            api_secret: secret,
            api_passphrase: "pass".into(),
        });

        let a = auth.l2_headers("GET", "/order/abc?x=1", "").unwrap();
        let b = auth.l2_headers("GET", "/order/abc", "").unwrap();
        // Same second + same signed payload -> same signature. Timestamps
        // can straddle a second boundary; only compare when they match.
        if a.timestamp == b.timestamp {
            assert_eq!(a.signature, b.signature);
        }
        assert_eq!(a.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(matches!(
            ClobAuth::new("not-hex", 137),
            Err(AuthError::InvalidKey)
        ));
    }
}
