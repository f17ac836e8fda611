//! Hashing and Ed25519 helpers for the provenance chain. Keys, signatures and
//! digests travel as lowercase hex.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};

/// SHA-256 of `data` as hex
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Canonical serialization of an ordered field list: a compact JSON array
pub fn canonical_json(values: &[Value]) -> String {
    Value::Array(values.to_vec()).to_string()
}

/// Verify a hex signature over `message` with a hex public key
pub fn verify_ed25519(public_key_hex: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| PipelineError::validation("Malformed public key"))?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| PipelineError::validation("Malformed public key"))?;

    let signature_bytes = hex::decode(signature_hex)
        .map_err(|_| PipelineError::validation("Malformed signature"))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| PipelineError::validation("Malformed signature"))?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| PipelineError::validation("Signature verification failed"))
}

/// Hex-encode an Ed25519 signature over `message`
pub fn sign_hex(signing_key: &SigningKey, message: &[u8]) -> String {
    hex::encode(signing_key.sign(message).to_bytes())
}

/// The server's signing identity
#[derive(Clone)]
pub struct ServerKeys {
    signing_key: SigningKey,
}

impl std::fmt::Debug for ServerKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerKeys")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl ServerKeys {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Load from a hex-encoded 32-byte secret key
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes: [u8; 32] = hex::decode(secret_hex.trim())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                PipelineError::Configuration("Server private key must be 32 bytes of hex".into())
            })?;
        Ok(Self::new(SigningKey::from_bytes(&bytes)))
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign_hex(&self, message: &[u8]) -> String {
        sign_hex(&self.signing_key, message)
    }
}
