use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AuditError, Result};
use crate::event::SignatureAlgorithm;

type HmacSha256 = Hmac<Sha256>;

/// Polymorphic signing capability (design note "KMS optionality"): callers
/// never observe which variant is in use except through the algorithm
/// recorded alongside the signature.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, hash_hex: &str) -> Result<(String, SignatureAlgorithm)>;
    async fn verify(&self, hash_hex: &str, signature: &str, algorithm: SignatureAlgorithm) -> Result<bool>;
}

/// Local HMAC-SHA256 signer (§4.2 "If KMS disabled").
pub struct LocalHmac {
    key: Vec<u8>,
}

impl LocalHmac {
    pub fn new(key: Vec<u8>) -> Result<Self> {
        if key.is_empty() {
            return Err(AuditError::Config("signing key must not be empty".to_string()));
        }
        Ok(Self { key })
    }

    fn hmac_hex(&self, hash_hex: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AuditError::Crypto(format!("invalid HMAC key: {e}")))?;
        mac.update(hash_hex.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl Signer for LocalHmac {
    async fn sign(&self, hash_hex: &str) -> Result<(String, SignatureAlgorithm)> {
        Ok((self.hmac_hex(hash_hex)?, SignatureAlgorithm::HmacSha256))
    }

    async fn verify(&self, hash_hex: &str, signature: &str, algorithm: SignatureAlgorithm) -> Result<bool> {
        if algorithm != SignatureAlgorithm::HmacSha256 {
            return Ok(false);
        }
        let expected = self.hmac_hex(hash_hex)?;
        Ok(crate::crypto::canonical::constant_time_eq(&expected, signature))
    }
}

/// Remote KMS-backed signer (§4.2 "If KMS enabled"). Transient network
/// failures surface as retryable `NETWORK_ERROR`; anything else is fatal.
pub struct RemoteKms {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    default_algorithm: SignatureAlgorithm,
}

impl RemoteKms {
    pub fn new(base_url: String, access_token: String, default_algorithm: SignatureAlgorithm) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            access_token,
            default_algorithm,
        }
    }
}

#[derive(serde::Serialize)]
struct KmsSignRequest<'a> {
    hash: &'a str,
    algorithm: &'static str,
}

#[derive(serde::Deserialize)]
struct KmsSignResponse {
    signature: String,
}

#[derive(serde::Serialize)]
struct KmsVerifyRequest<'a> {
    hash: &'a str,
    signature: &'a str,
    algorithm: &'static str,
}

#[derive(serde::Deserialize)]
struct KmsVerifyResponse {
    valid: bool,
}

fn algorithm_wire_name(alg: SignatureAlgorithm) -> &'static str {
    match alg {
        SignatureAlgorithm::HmacSha256 => "HMAC-SHA256",
        SignatureAlgorithm::RsaPssSha256 => "RSASSA_PSS_SHA_256",
        SignatureAlgorithm::RsaPssSha384 => "RSASSA_PSS_SHA_384",
        SignatureAlgorithm::RsaPssSha512 => "RSASSA_PSS_SHA_512",
        SignatureAlgorithm::RsaPkcs1Sha256 => "RSASSA_PKCS1_V1_5_SHA_256",
        SignatureAlgorithm::RsaPkcs1Sha384 => "RSASSA_PKCS1_V1_5_SHA_384",
        SignatureAlgorithm::RsaPkcs1Sha512 => "RSASSA_PKCS1_V1_5_SHA_512",
    }
}

#[async_trait]
impl Signer for RemoteKms {
    #[tracing::instrument(skip(self, hash_hex))]
    async fn sign(&self, hash_hex: &str) -> Result<(String, SignatureAlgorithm)> {
        let url = format!("{}/sign", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&KmsSignRequest {
                hash: hash_hex,
                algorithm: algorithm_wire_name(self.default_algorithm),
            })
            .send()
            .await
            .map_err(|e| AuditError::Network(format!("KMS sign request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AuditError::Crypto(format!(
                "KMS sign returned status {}",
                resp.status()
            )));
        }

        let body: KmsSignResponse = resp
            .json()
            .await
            .map_err(|e| AuditError::Network(format!("KMS sign response decode failed: {e}")))?;
        Ok((body.signature, self.default_algorithm))
    }

    #[tracing::instrument(skip(self, hash_hex, signature))]
    async fn verify(&self, hash_hex: &str, signature: &str, algorithm: SignatureAlgorithm) -> Result<bool> {
        let url = format!("{}/verify", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&KmsVerifyRequest {
                hash: hash_hex,
                signature,
                algorithm: algorithm_wire_name(algorithm),
            })
            .send()
            .await
            .map_err(|e| AuditError::Network(format!("KMS verify request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AuditError::Crypto(format!(
                "KMS verify returned status {}",
                resp.status()
            )));
        }

        let body: KmsVerifyResponse = resp
            .json()
            .await
            .map_err(|e| AuditError::Network(format!("KMS verify response decode failed: {e}")))?;
        Ok(body.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_hmac_signs_and_verifies() {
        let signer = LocalHmac::new(b"test-key-material".to_vec()).unwrap();
        let (sig, alg) = signer.sign("deadbeef").await.unwrap();
        assert_eq!(alg, SignatureAlgorithm::HmacSha256);
        assert!(signer.verify("deadbeef", &sig, alg).await.unwrap());
    }

    #[tokio::test]
    async fn local_hmac_rejects_tampered_hash() {
        let signer = LocalHmac::new(b"test-key-material".to_vec()).unwrap();
        let (sig, alg) = signer.sign("deadbeef").await.unwrap();
        assert!(!signer.verify("cafebabe", &sig, alg).await.unwrap());
    }

    #[test]
    fn empty_key_rejected() {
        assert!(LocalHmac::new(vec![]).is_err());
    }
}
