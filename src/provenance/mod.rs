//! # Provenance
//!
//! Author digest -> author signature -> server verification chain. Author
//! documents are fetched from metadata storage, checked, countersigned by the
//! server key and the countersignature is uploaded next to them.

pub mod crypto;
pub mod types;
pub mod verifier;

pub use crypto::{canonical_json, sha256_hex, verify_ed25519, ServerKeys};
pub use types::{
    AuthorDigest, AuthorSignature, DigestFields, PostDigestFields, Reference, ServerVerification,
    SiteDigestFields,
};
pub use verifier::{ProvenanceVerifier, VerifiedChain};
