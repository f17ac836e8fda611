use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::crypto::{verify_ed25519, ServerKeys};
use super::types::{
    AuthorDigest, AuthorSignature, DigestFields, Reference, ServerVerification,
};
use crate::constants::provenance::{REL_CONTENT, REL_REQUEST};
use crate::error::{PipelineError, Result};
use crate::storage::{MetadataStorageType, StorageGateway};

/// A verified digest -> signature -> server verification chain
#[derive(Debug, Clone)]
pub struct VerifiedChain<T> {
    pub digest: AuthorDigest<T>,
    pub signature: AuthorSignature,
    pub verification: ServerVerification,
    /// Where the server verification was uploaded
    pub verification_ref: String,
    /// Exact JSON that was uploaded
    pub payload: String,
}

/// Builds and checks provenance chains against content-addressed storage
#[derive(Debug, Clone)]
pub struct ProvenanceVerifier {
    gateway: StorageGateway,
    keys: Arc<ServerKeys>,
    server_domain: String,
}

impl ProvenanceVerifier {
    pub fn new(gateway: StorageGateway, keys: Arc<ServerKeys>, server_domain: impl Into<String>) -> Self {
        Self {
            gateway,
            keys,
            server_domain: server_domain.into(),
        }
    }

    pub fn server_domain(&self) -> &str {
        &self.server_domain
    }

    pub fn gateway(&self) -> &StorageGateway {
        &self.gateway
    }

    /// Fetch, decode and re-hash an author digest
    pub async fn validate_author_digest<T: DigestFields>(
        &self,
        storage_type: MetadataStorageType,
        reference: &str,
    ) -> Result<AuthorDigest<T>> {
        let raw = self.gateway.get(storage_type, reference).await?;
        let digest: AuthorDigest<T> = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::validation(format!("Invalid author digest: {e}")))?;
        digest.verify()?;
        debug!(reference, digest = %digest.digest, "Author digest validated");
        Ok(digest)
    }

    /// Fetch, decode and cryptographically check an author signature
    pub async fn validate_author_signature(
        &self,
        storage_type: MetadataStorageType,
        reference: &str,
    ) -> Result<AuthorSignature> {
        let raw = self.gateway.get(storage_type, reference).await?;
        let signature: AuthorSignature = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::validation(format!("Invalid author signature: {e}")))?;
        signature.verify()?;
        debug!(reference, public_key = %signature.public_key, "Author signature validated");
        Ok(signature)
    }

    /// Countersign a validated author signature, embedding both source
    /// documents so the chain can be re-walked from the verification alone.
    pub fn generate_server_verification<T: DigestFields>(
        &self,
        digest: &AuthorDigest<T>,
        digest_ref: &str,
        signature: &AuthorSignature,
        signature_ref: &str,
    ) -> Result<ServerVerification> {
        if signature.digest != digest.digest {
            return Err(PipelineError::validation(
                "Author signature does not sign the referenced digest",
            ));
        }
        let reference = vec![
            Reference {
                refer: digest_ref.to_string(),
                rel: REL_CONTENT.to_string(),
                body: serde_json::to_value(digest)?,
            },
            Reference {
                refer: signature_ref.to_string(),
                rel: REL_REQUEST.to_string(),
                body: serde_json::to_value(signature)?,
            },
        ];
        Ok(ServerVerification::build(
            &self.keys,
            &self.server_domain,
            signature,
            reference,
        ))
    }

    /// Validate both author documents, countersign, and upload the result.
    ///
    /// Neither ref: the author did not sign, `Ok(None)`. Exactly one ref is a
    /// validation error.
    pub async fn generate_and_upload<T: DigestFields>(
        &self,
        storage_type: MetadataStorageType,
        digest_ref: Option<&str>,
        signature_ref: Option<&str>,
    ) -> Result<Option<VerifiedChain<T>>> {
        let (digest_ref, signature_ref) = match (non_empty(digest_ref), non_empty(signature_ref)) {
            (None, None) => return Ok(None),
            (Some(digest_ref), Some(signature_ref)) => (digest_ref, signature_ref),
            _ => {
                return Err(PipelineError::validation(
                    "Author digest and author signature must be supplied together",
                ))
            }
        };

        let digest = self
            .validate_author_digest::<T>(storage_type, digest_ref)
            .await?;
        let signature = self
            .validate_author_signature(storage_type, signature_ref)
            .await?;
        let verification =
            self.generate_server_verification(&digest, digest_ref, &signature, signature_ref)?;

        let payload = serde_json::to_string(&verification)?;
        let verification_ref = self
            .gateway
            .upload(
                storage_type,
                &format!("server-verification-{}.json", verification.signature),
                &payload,
            )
            .await?;

        info!(
            digest = %digest.digest,
            verification_ref = %verification_ref,
            "🔏 Server verification generated"
        );

        Ok(Some(VerifiedChain {
            digest,
            signature,
            verification,
            verification_ref,
            payload,
        }))
    }

    /// Re-walk a server verification: both embedded documents, the digest
    /// link, the author signature and the server signature.
    pub fn verify_server_verification<T: DigestFields>(
        verification: &ServerVerification,
    ) -> Result<(AuthorDigest<T>, AuthorSignature)> {
        let content = verification
            .reference(REL_CONTENT)
            .ok_or_else(|| PipelineError::validation("Missing content reference"))?;
        let request = verification
            .reference(REL_REQUEST)
            .ok_or_else(|| PipelineError::validation("Missing request reference"))?;

        let digest: AuthorDigest<T> = serde_json::from_value(content.body.clone())
            .map_err(|e| PipelineError::validation(format!("Invalid embedded digest: {e}")))?;
        let signature: AuthorSignature = serde_json::from_value(request.body.clone())
            .map_err(|e| PipelineError::validation(format!("Invalid embedded signature: {e}")))?;

        digest.verify()?;
        signature.verify()?;
        if signature.digest != digest.digest {
            return Err(PipelineError::validation(
                "Author signature does not sign the embedded digest",
            ));
        }

        let payload = ServerVerification::signing_payload(
            &signature.signature,
            &verification.claim,
            &verification.nonce,
        );
        verify_ed25519(
            &verification.public_key,
            payload.as_bytes(),
            &verification.signature,
        )?;
        Ok((digest, signature))
    }

    /// Push a document to a notarization backend, returning its reference
    pub async fn upload_certificate<D: Serialize>(
        &self,
        storage_type: MetadataStorageType,
        content_key: &str,
        document: &D,
    ) -> Result<String> {
        let payload = serde_json::to_string(document)?;
        self.gateway.upload(storage_type, content_key, &payload).await
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
