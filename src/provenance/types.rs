//! Provenance documents: author digest, author signature and server
//! verification. Each document is stored as JSON in content-addressed storage
//! and refers to its predecessor.

use ed25519_dalek::SigningKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::crypto::{canonical_json, sha256_hex, sign_hex, verify_ed25519, ServerKeys};
use crate::constants::provenance as vocab;
use crate::error::{PipelineError, Result};
use crate::models::{PostContent, SiteInfo};

/// Content fields covered by an author digest, in hashing order
pub trait DigestFields: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// `@type` of the digest document
    const DIGEST_TYPE: &'static str;

    fn canonical_fields(&self) -> Vec<Value>;
}

/// Post fields hashed in order: title, summary, content, cover, categories,
/// tags, license
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDigestFields {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub license: String,
}

impl DigestFields for PostDigestFields {
    const DIGEST_TYPE: &'static str = vocab::AUTHOR_POST_DIGEST_TYPE;

    fn canonical_fields(&self) -> Vec<Value> {
        vec![
            json!(self.title),
            json!(self.summary),
            json!(self.content),
            json!(self.cover),
            json!(self.categories),
            json!(self.tags),
            json!(self.license),
        ]
    }
}

impl From<&PostContent> for PostDigestFields {
    fn from(content: &PostContent) -> Self {
        Self {
            title: content.title.clone(),
            summary: content.summary.clone(),
            content: content.content.clone(),
            cover: content.cover.clone(),
            categories: content.categories.clone(),
            tags: content.tags.clone(),
            license: content.license.clone(),
        }
    }
}

impl From<PostDigestFields> for PostContent {
    fn from(fields: PostDigestFields) -> Self {
        Self {
            title: fields.title,
            content: fields.content,
            summary: fields.summary,
            cover: fields.cover,
            categories: fields.categories,
            tags: fields.tags,
            license: fields.license,
        }
    }
}

/// Site fields hashed in order: title, subtitle, description, author,
/// keywords, favicon, domain
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDigestFields {
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub domain: String,
}

impl DigestFields for SiteDigestFields {
    const DIGEST_TYPE: &'static str = vocab::AUTHOR_SITE_DIGEST_TYPE;

    fn canonical_fields(&self) -> Vec<Value> {
        vec![
            json!(self.title),
            json!(self.subtitle),
            json!(self.description),
            json!(self.author),
            json!(self.keywords),
            json!(self.favicon),
            json!(self.domain),
        ]
    }
}

impl From<&SiteInfo> for SiteDigestFields {
    fn from(info: &SiteInfo) -> Self {
        Self {
            title: info.title.clone(),
            subtitle: info.subtitle.clone(),
            description: info.description.clone(),
            author: info.author.clone(),
            keywords: info.keywords.clone(),
            favicon: info.favicon.clone(),
            domain: info.domain.clone(),
        }
    }
}

/// Author digest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDigest<T> {
    #[serde(rename = "@type")]
    pub doc_type: String,
    #[serde(rename = "@version")]
    pub version: String,
    pub algorithm: String,
    #[serde(flatten)]
    pub fields: T,
    pub ts: i64,
    pub digest: String,
}

impl<T: DigestFields> AuthorDigest<T> {
    pub fn new(fields: T, ts: i64) -> Self {
        let digest = Self::compute_digest(&fields, ts);
        Self {
            doc_type: T::DIGEST_TYPE.to_string(),
            version: vocab::DOCUMENT_VERSION.to_string(),
            algorithm: vocab::DIGEST_ALGORITHM.to_string(),
            fields,
            ts,
            digest,
        }
    }

    pub fn compute_digest(fields: &T, ts: i64) -> String {
        let mut values = fields.canonical_fields();
        values.push(json!(ts));
        sha256_hex(canonical_json(&values).as_bytes())
    }

    /// Recompute the hash over the embedded fields and compare
    pub fn verify(&self) -> Result<()> {
        if self.doc_type != T::DIGEST_TYPE {
            return Err(PipelineError::validation(format!(
                "Unexpected digest type {}",
                self.doc_type
            )));
        }
        if self.algorithm != vocab::DIGEST_ALGORITHM {
            return Err(PipelineError::validation(format!(
                "Unsupported digest algorithm {}",
                self.algorithm
            )));
        }
        if Self::compute_digest(&self.fields, self.ts) != self.digest {
            return Err(PipelineError::validation("Author digest mismatch"));
        }
        Ok(())
    }
}

/// Author signature document over a digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSignature {
    #[serde(rename = "@type")]
    pub doc_type: String,
    #[serde(rename = "@version")]
    pub version: String,
    pub signing_algorithm: String,
    pub public_key: String,
    pub digest: String,
    pub ts: i64,
    pub claim: String,
    pub nonce: String,
    pub signature: String,
}

impl AuthorSignature {
    /// Sign `digest` as the author
    pub fn sign(
        signing_key: &SigningKey,
        digest: impl Into<String>,
        ts: i64,
        claim: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        let mut document = Self {
            doc_type: vocab::AUTHOR_DIGEST_SIGN_TYPE.to_string(),
            version: vocab::DOCUMENT_VERSION.to_string(),
            signing_algorithm: vocab::SIGNATURE_ALGORITHM.to_string(),
            public_key: hex::encode(signing_key.verifying_key().to_bytes()),
            digest: digest.into(),
            ts,
            claim: claim.into(),
            nonce: nonce.into(),
            signature: String::new(),
        };
        document.signature = sign_hex(signing_key, document.signing_payload().as_bytes());
        document
    }

    pub fn signing_payload(&self) -> String {
        canonical_json(&[
            json!(self.digest),
            json!(self.ts),
            json!(self.claim),
            json!(self.nonce),
        ])
    }

    /// Check the signature against the embedded public key
    pub fn verify(&self) -> Result<()> {
        if self.doc_type != vocab::AUTHOR_DIGEST_SIGN_TYPE {
            return Err(PipelineError::validation(format!(
                "Unexpected signature type {}",
                self.doc_type
            )));
        }
        if self.signing_algorithm != vocab::SIGNATURE_ALGORITHM {
            return Err(PipelineError::validation(format!(
                "Unsupported signing algorithm {}",
                self.signing_algorithm
            )));
        }
        verify_ed25519(
            &self.public_key,
            self.signing_payload().as_bytes(),
            &self.signature,
        )
    }
}

/// Pointer from a server verification to one of its source documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub refer: String,
    pub rel: String,
    pub body: Value,
}

/// Server verification document: the server's countersignature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVerification {
    #[serde(rename = "@type")]
    pub doc_type: String,
    #[serde(rename = "@version")]
    pub version: String,
    pub signing_algorithm: String,
    pub public_key: String,
    pub claim: String,
    pub nonce: String,
    pub ts: i64,
    pub signature: String,
    pub reference: Vec<Reference>,
}

impl ServerVerification {
    pub fn claim_for(server_domain: &str) -> String {
        format!(
            "I, {server_domain}, verified the author signature and agree to publish the content."
        )
    }

    /// Deterministic: the same author signature and domain always yield the
    /// same nonce, so the whole document serializes identically.
    pub fn nonce_for(author_signature: &str, server_domain: &str) -> String {
        sha256_hex(format!("{author_signature}{server_domain}").as_bytes())
    }

    pub fn signing_payload(author_signature: &str, claim: &str, nonce: &str) -> String {
        canonical_json(&[json!(author_signature), json!(claim), json!(nonce)])
    }

    pub fn build(
        keys: &ServerKeys,
        server_domain: &str,
        author_signature: &AuthorSignature,
        reference: Vec<Reference>,
    ) -> Self {
        let claim = Self::claim_for(server_domain);
        let nonce = Self::nonce_for(&author_signature.signature, server_domain);
        let signature = keys.sign_hex(
            Self::signing_payload(&author_signature.signature, &claim, &nonce).as_bytes(),
        );
        Self {
            doc_type: vocab::SERVER_VERIFICATION_SIGN_TYPE.to_string(),
            version: vocab::DOCUMENT_VERSION.to_string(),
            signing_algorithm: vocab::SIGNATURE_ALGORITHM.to_string(),
            public_key: keys.public_key_hex(),
            claim,
            nonce,
            ts: author_signature.ts,
            signature,
            reference,
        }
    }

    pub fn reference(&self, rel: &str) -> Option<&Reference> {
        self.reference.iter().find(|r| r.rel == rel)
    }
}
