//! # System Constants
//!
//! Identifiers and defaults shared across the pipeline: task id prefixes, event
//! names, queue names and the provenance document vocabulary.

/// Prefixes for task ids. Every task id is `<prefix><uuid>`.
pub mod task_prefixes {
    pub const CREATE_POSTS: &str = "wt4site-create-posts-";
    pub const UPDATE_POSTS: &str = "wt4site-update-posts-";
    pub const DELETE_POSTS: &str = "wt4site-delete-posts-";
    pub const DEPLOY_SITE: &str = "wt4site-deploy-site-";
    pub const PUBLISH_SITE: &str = "wt4site-publish-site-";
}

/// Names used when logging or publishing pipeline lifecycle events
pub mod events {
    pub const JOB_SUCCEEDED: &str = "pipeline.job_succeeded";
    pub const JOB_FAILED: &str = "pipeline.job_failed";
    pub const WORKER_ERRORED: &str = "pipeline.worker_errored";
    pub const TASK_FINISHED: &str = "pipeline.task_finished";
    pub const TASK_FAILED: &str = "pipeline.task_failed";
}

/// Provenance document vocabulary
pub mod provenance {
    pub const DOCUMENT_VERSION: &str = "1.0.0";
    pub const DIGEST_ALGORITHM: &str = "sha256";
    pub const SIGNATURE_ALGORITHM: &str = "ed25519";
    pub const AUTHOR_POST_DIGEST_TYPE: &str = "author-post-digest";
    pub const AUTHOR_SITE_DIGEST_TYPE: &str = "author-site-digest";
    pub const AUTHOR_DIGEST_SIGN_TYPE: &str = "author-digest-sign";
    pub const SERVER_VERIFICATION_SIGN_TYPE: &str = "server-verification-sign";
    pub const REL_CONTENT: &str = "content";
    pub const REL_REQUEST: &str = "request";
}

/// System-wide defaults
pub mod system {
    pub const DEFAULT_QUEUE_NAME: &str = "pipeline_worker_jobs";
    pub const DEFAULT_PAGE: u32 = 1;
    pub const DEFAULT_PAGE_LIMIT: u32 = 10;
    pub const MAX_PAGE_LIMIT: u32 = 100;
    pub const WORKER_NAME_PREFIX: &str = "pipeline-worker-";
    pub const WORKER_SECRET_BYTES: usize = 32;
    pub const DEFAULT_EVENT_CAPACITY: usize = 1000;
}

/// Environment variables injected into worker containers
pub mod worker_env {
    pub const TASK_ID: &str = "WORKER_TASK_ID";
    pub const WORKER_NAME: &str = "WORKER_NAME";
    pub const WORKER_SECRET: &str = "WORKER_SECRET";
    pub const BACKEND_URL: &str = "WORKER_BACKEND_URL";
}
