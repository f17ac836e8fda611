//! Author digest -> author signature -> server verification chains built
//! against content-addressed storage.

mod common;

use common::*;
use metaspace_pipeline::provenance::{
    AuthorDigest, AuthorSignature, PostDigestFields, ProvenanceVerifier, ServerVerification,
};
use metaspace_pipeline::storage::MetadataStorageType;

fn fields(title: &str) -> PostDigestFields {
    PostDigestFields::from(&post_content(title))
}

#[tokio::test]
async fn test_chain_embeds_both_author_documents() {
    let h = Harness::new();
    let chain = upload_author_chain(&h.gateway, fields("provenance"), 1_700_000_000).await;

    let verified = h
        .verifier
        .generate_and_upload::<PostDigestFields>(
            MetadataStorageType::Ipfs,
            Some(&chain.digest_ref),
            Some(&chain.signature_ref),
        )
        .await
        .unwrap()
        .unwrap();

    let verification = &verified.verification;
    assert_eq!(verification.reference.len(), 2);
    let content = verification.reference("content").unwrap();
    assert_eq!(content.refer, chain.digest_ref);
    assert_eq!(content.body["digest"], chain.digest.digest.as_str());
    let request = verification.reference("request").unwrap();
    assert_eq!(request.refer, chain.signature_ref);
    assert_eq!(request.body["signature"], chain.signature.signature.as_str());
    assert!(verification.claim.contains(SERVER_DOMAIN));
    assert_eq!(verification.ts, 1_700_000_000);

    // the uploaded document is what was returned, and it re-walks cleanly
    let stored = h
        .gateway
        .get(MetadataStorageType::Ipfs, &verified.verification_ref)
        .await
        .unwrap();
    assert_eq!(stored, verified.payload);
    let parsed: ServerVerification = serde_json::from_str(&stored).unwrap();
    let (digest, signature) =
        ProvenanceVerifier::verify_server_verification::<PostDigestFields>(&parsed).unwrap();
    assert_eq!(digest, chain.digest);
    assert_eq!(signature, chain.signature);
}

#[tokio::test]
async fn test_unsigned_content_has_no_chain() {
    let h = Harness::new();
    let none = h
        .verifier
        .generate_and_upload::<PostDigestFields>(MetadataStorageType::Ipfs, None, Some(""))
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_verification_is_deterministic() {
    let h = Harness::new();
    let chain = upload_author_chain(&h.gateway, fields("same"), 9).await;

    let mut refs = Vec::new();
    for _ in 0..2 {
        let verified = h
            .verifier
            .generate_and_upload::<PostDigestFields>(
                MetadataStorageType::Ipfs,
                Some(&chain.digest_ref),
                Some(&chain.signature_ref),
            )
            .await
            .unwrap()
            .unwrap();
        refs.push(verified.verification_ref);
    }
    assert_eq!(refs[0], refs[1]);
}

#[tokio::test]
async fn test_edited_digest_fields_are_rejected() {
    let h = Harness::new();
    let chain = upload_author_chain(&h.gateway, fields("original"), 11).await;

    let mut tampered = chain.digest.clone();
    tampered.fields.content.push_str("\n\nadded later");
    let tampered_ref = upload_json(&h.gateway, "author-digest.json", &tampered).await;

    let err = h
        .verifier
        .generate_and_upload::<PostDigestFields>(
            MetadataStorageType::Ipfs,
            Some(&tampered_ref),
            Some(&chain.signature_ref),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_signature_over_other_digest_is_rejected() {
    let h = Harness::new();
    let signed = upload_author_chain(&h.gateway, fields("signed"), 12).await;
    let other = upload_author_chain(&h.gateway, fields("other"), 13).await;

    let err = h
        .verifier
        .generate_and_upload::<PostDigestFields>(
            MetadataStorageType::Ipfs,
            Some(&other.digest_ref),
            Some(&signed.signature_ref),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_forged_signature_is_rejected() {
    let h = Harness::new();
    let chain = upload_author_chain(&h.gateway, fields("forged"), 14).await;

    let mut forged = chain.signature.clone();
    forged.claim = "I did not write this".into();
    let forged_ref = upload_json(&h.gateway, "author-signature.json", &forged).await;

    let err = h
        .verifier
        .generate_and_upload::<PostDigestFields>(
            MetadataStorageType::Ipfs,
            Some(&chain.digest_ref),
            Some(&forged_ref),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_missing_document_is_storage_error() {
    let h = Harness::new();
    let chain = upload_author_chain(&h.gateway, fields("missing"), 15).await;
    let err = h
        .verifier
        .generate_and_upload::<PostDigestFields>(
            MetadataStorageType::Ipfs,
            Some("mem://does-not-exist"),
            Some(&chain.signature_ref),
        )
        .await
        .unwrap_err();
    assert!(!err.is_validation());
}

#[tokio::test]
async fn test_rewalk_detects_tampered_server_verification() {
    let h = Harness::new();
    let chain = upload_author_chain(&h.gateway, fields("rewalk"), 16).await;
    let verified = h
        .verifier
        .generate_and_upload::<PostDigestFields>(
            MetadataStorageType::Ipfs,
            Some(&chain.digest_ref),
            Some(&chain.signature_ref),
        )
        .await
        .unwrap()
        .unwrap();

    let mut reclaimed = verified.verification.clone();
    reclaimed.claim = "I, elsewhere.example, verified nothing.".into();
    assert!(ProvenanceVerifier::verify_server_verification::<PostDigestFields>(&reclaimed).is_err());

    let mut swapped = verified.verification.clone();
    let other: AuthorDigest<PostDigestFields> = AuthorDigest::new(fields("swapped"), 16);
    for reference in swapped.reference.iter_mut() {
        if reference.rel == "content" {
            reference.body = serde_json::to_value(&other).unwrap();
        }
    }
    assert!(ProvenanceVerifier::verify_server_verification::<PostDigestFields>(&swapped).is_err());

    let mut stripped = verified.verification;
    stripped.reference.retain(|reference| reference.rel != "request");
    assert!(ProvenanceVerifier::verify_server_verification::<PostDigestFields>(&stripped).is_err());
}

#[test]
fn test_author_signature_is_bound_to_key() {
    let digest = AuthorDigest::new(fields("key"), 1);
    let signature = AuthorSignature::sign(&author_key(), digest.digest.clone(), 1, "claim", "nonce");
    assert!(signature.verify().is_ok());

    let mut other_key = signature.clone();
    other_key.public_key = hex::encode(
        ed25519_dalek::SigningKey::from_bytes(&[9u8; 32])
            .verifying_key()
            .to_bytes(),
    );
    assert!(other_key.verify().is_err());
}
