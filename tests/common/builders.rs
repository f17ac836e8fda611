//! Fixtures for sites, repositories, posts and author provenance chains.

#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use serde::Serialize;

use metaspace_pipeline::models::{
    GitRepoSetting, PostAction, PostContent, SiteConfig, SiteInfo, SiteStatus, TemplateType,
    ThemeTemplate,
};
use metaspace_pipeline::provenance::{AuthorDigest, AuthorSignature, DigestFields};
use metaspace_pipeline::providers::GitProviderType;
use metaspace_pipeline::storage::{MetadataStorageType, StorageGateway};
use metaspace_pipeline::coordinator::SubmitPostRequest;

pub const USER_ID: i64 = 1;
pub const SITE_ID: i64 = 10;
pub const STORAGE_REPO_ID: i64 = 100;
pub const PUBLISHER_REPO_ID: i64 = 101;

/// Builder for a site config owned by [`USER_ID`]
pub struct SiteBuilder {
    site: SiteConfig,
}

impl SiteBuilder {
    pub fn new() -> Self {
        Self {
            site: SiteConfig {
                id: SITE_ID,
                user_id: USER_ID,
                site_info: SiteInfo {
                    title: "Alice's notes".into(),
                    author: "alice".into(),
                    domain: "alice.metaspaces.life".into(),
                    ..Default::default()
                },
                template: ThemeTemplate {
                    id: 1,
                    template_name: "landscape".into(),
                    template_type: TemplateType::Hexo,
                    repo_url: "https://github.com/hexojs/hexo-theme-landscape".into(),
                    branch_name: "master".into(),
                    theme_name: "landscape".into(),
                },
                storage_type: Some(GitProviderType::Github),
                storage_provider_id: Some(STORAGE_REPO_ID),
                publisher_type: Some(GitProviderType::Github),
                publisher_provider_id: Some(PUBLISHER_REPO_ID),
                status: SiteStatus::Configured,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.site.id = id;
        self
    }

    pub fn with_template(mut self, template_type: TemplateType) -> Self {
        self.site.template.template_type = template_type;
        self
    }

    pub fn without_storage(mut self) -> Self {
        self.site.storage_type = None;
        self.site.storage_provider_id = None;
        self
    }

    pub fn without_domain(mut self) -> Self {
        self.site.site_info.domain.clear();
        self
    }

    pub fn build(self) -> SiteConfig {
        self.site
    }
}

pub fn repo(id: i64, repo_name: &str, is_repo_empty: bool) -> GitRepoSetting {
    GitRepoSetting {
        id,
        user_id: USER_ID,
        provider_type: GitProviderType::Github,
        user_name: "alice".into(),
        repo_name: repo_name.into(),
        branch_name: "main".into(),
        access_token: "ghp_test".into(),
        is_repo_empty,
        custom_domain: None,
    }
}

pub fn post_content(title: &str) -> PostContent {
    PostContent {
        title: title.into(),
        content: format!("# {title}\n\nbody"),
        tags: vec!["notes".into()],
        ..Default::default()
    }
}

/// Unsigned CREATE request for [`SITE_ID`]
pub fn unsigned_post(title: &str) -> SubmitPostRequest {
    SubmitPostRequest {
        user_id: USER_ID,
        site_config_id: SITE_ID,
        action: PostAction::Create,
        content: post_content(title),
        is_draft: false,
        storage_type: MetadataStorageType::Ipfs,
        author_digest_ref: None,
        author_signature_ref: None,
    }
}

pub fn author_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

/// Digest and signature documents uploaded the way an author's client does
pub struct AuthorChain<T> {
    pub digest: AuthorDigest<T>,
    pub signature: AuthorSignature,
    pub digest_ref: String,
    pub signature_ref: String,
}

pub async fn upload_author_chain<T: DigestFields>(
    gateway: &StorageGateway,
    fields: T,
    ts: i64,
) -> AuthorChain<T> {
    let digest = AuthorDigest::new(fields, ts);
    let signature = AuthorSignature::sign(
        &author_key(),
        digest.digest.clone(),
        ts,
        "I authored this content",
        format!("nonce-{ts}"),
    );
    let digest_ref = upload_json(gateway, "author-digest.json", &digest).await;
    let signature_ref = upload_json(gateway, "author-signature.json", &signature).await;
    AuthorChain {
        digest,
        signature,
        digest_ref,
        signature_ref,
    }
}

pub async fn upload_json<D: Serialize>(gateway: &StorageGateway, key: &str, doc: &D) -> String {
    gateway
        .upload(
            MetadataStorageType::Ipfs,
            key,
            &serde_json::to_string(doc).unwrap(),
        )
        .await
        .unwrap()
}
