//! Post intake, batching, the post job chain and the hand-off to publishing.

mod common;

use std::collections::HashSet;

use common::*;
use metaspace_pipeline::coordinator::{DeploySiteRequest, SubmitPostRequest};
use metaspace_pipeline::error::PipelineError;
use metaspace_pipeline::models::{
    OrderTaskState, PipelineTask, PostAction, SiteStatus, TaskMethod, TemplateType,
};
use metaspace_pipeline::provenance::PostDigestFields;
use metaspace_pipeline::storage::MetadataStorageType;
use metaspace_pipeline::store::{
    PostOrderStore, SiteOrderStore, TaskStore, VerificationStore, WorkerJobStore,
};

fn steps_of(job: &metaspace_pipeline::models::WorkerJob) -> Vec<String> {
    serde_json::from_value(job.task_config["task"]["taskSteps"].clone()).unwrap()
}

#[tokio::test]
async fn test_submit_doing_finish_moves_submit_state() {
    let h = Harness::new();
    let order = h.posts.submit_post(unsigned_post("hello")).await.unwrap();
    assert_eq!(order.user_id, USER_ID);
    assert_eq!(order.submit_state, OrderTaskState::Pending);
    assert_eq!(order.publish_state, OrderTaskState::None);
    assert!(!order.is_verified());

    let task = PipelineTask::new(TaskMethod::CreatePosts, USER_ID, SITE_ID);
    h.store.create_task(&task).await.unwrap();
    let claimed = h
        .store
        .claim_pending_post_orders(USER_ID, SITE_ID, PostAction::Create, &task.id)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    h.posts.doing_post_task(&task.id).await.unwrap();
    let doing = h.store.get_post_order(&order.id).await.unwrap().unwrap();
    assert_eq!(doing.submit_state, OrderTaskState::Doing);

    h.posts.finish_post_task(&task.id, None).await.unwrap();
    let finished = h.store.get_post_order(&order.id).await.unwrap().unwrap();
    assert_eq!(finished.submit_state, OrderTaskState::Finished);
    assert_eq!(finished.publish_state, OrderTaskState::None);
}

#[tokio::test]
async fn test_flush_with_nothing_pending() {
    let h = Harness::new();
    assert!(h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .is_none());
    assert!(h.store.tasks().is_empty());
}

#[tokio::test]
async fn test_post_batch_runs_chain_and_publishes() {
    let h = Harness::new();
    let first = h.posts.submit_post(unsigned_post("one")).await.unwrap();
    let second = h.posts.submit_post(unsigned_post("two")).await.unwrap();

    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    assert!(batch.task_id.starts_with("wt4site-create-posts-"));
    assert_eq!(batch.order_ids, vec![first.id.clone(), second.id.clone()]);
    batch.chain.await.unwrap();

    let jobs = h.store.list_worker_jobs(&batch.task_id).await.unwrap();
    assert_eq!(jobs.len(), 3);
    assert_eq!(steps_of(&jobs[0]), vec!["GIT_CLONE_CHECKOUT"]);
    assert_eq!(steps_of(&jobs[1]), vec!["HEXO_CREATE_POST"]);
    assert_eq!(steps_of(&jobs[2]), vec!["GIT_COMMIT_PUSH"]);
    assert_eq!(
        jobs.iter().map(|j| j.is_last_task).collect::<Vec<_>>(),
        vec![false, false, true]
    );
    assert_eq!(jobs[1].task_config["posts"].as_array().unwrap().len(), 2);

    h.settle().await;

    let post_task = h.store.get_task(&batch.task_id).await.unwrap().unwrap();
    assert_eq!(post_task.state, OrderTaskState::Finished);

    for id in [&first.id, &second.id] {
        let order = h.store.get_post_order(id).await.unwrap().unwrap();
        assert_eq!(order.submit_state, OrderTaskState::Finished);
        assert_eq!(order.publish_state, OrderTaskState::Finished);
        assert!(order.publish_site_task_id.starts_with("wt4site-publish-site-"));
        assert!(!order.publish_site_order_id.is_empty());
    }

    assert_eq!(h.site_source.status(SITE_ID), Some(SiteStatus::Published));
    assert_eq!(h.notifier.sent.lock().len(), 1);
    let records = h.dns.records.lock();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record_type, "CNAME");
    assert_eq!(records[0].name, "alice.metaspaces.life");
    assert_eq!(records[0].content, "alice.github.io");
}

#[tokio::test]
async fn test_commit_failure_fails_task_and_orders() {
    let h = Harness::new();
    h.processor.fail_on_step("GIT_COMMIT_PUSH");
    let order = h.posts.submit_post(unsigned_post("doomed")).await.unwrap();

    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    batch.chain.await.unwrap();
    h.settle().await;

    let task = h.store.get_task(&batch.task_id).await.unwrap().unwrap();
    assert_eq!(task.state, OrderTaskState::Failed);
    let order = h.store.get_post_order(&order.id).await.unwrap().unwrap();
    assert_eq!(order.submit_state, OrderTaskState::Failed);
    assert_eq!(order.publish_state, OrderTaskState::None);

    // nothing was published and the workspace is free again
    assert!(h.notifier.sent.lock().is_empty());
    assert!(h.store.find_active_site_task(SITE_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkout_failure_skips_rest_of_chain() {
    let h = Harness::new();
    h.processor.fail_on_step("GIT_CLONE_CHECKOUT");
    h.posts.submit_post(unsigned_post("doomed")).await.unwrap();

    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    batch.chain.await.unwrap();
    h.settle().await;

    assert_eq!(h.processor.executed().len(), 1);
    let task = h.store.get_task(&batch.task_id).await.unwrap().unwrap();
    assert_eq!(task.state, OrderTaskState::Failed);
}

#[tokio::test]
async fn test_concurrent_flushes_claim_each_order_once() {
    let h = Harness::new();
    for i in 0..5 {
        h.posts
            .submit_post(unsigned_post(&format!("post-{i}")))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(
        h.posts.flush_pending_posts(USER_ID, SITE_ID),
        h.posts.flush_pending_posts(USER_ID, SITE_ID)
    );
    let batches: Vec<_> = [a, b]
        .into_iter()
        .filter_map(|outcome| match outcome {
            Ok(batch) => batch,
            Err(PipelineError::WorkspaceLocked { .. }) => None,
            Err(e) => panic!("unexpected flush error: {e}"),
        })
        .collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].order_ids.len(), 5);
}

#[tokio::test]
async fn test_concurrent_claims_are_disjoint() {
    let h = Harness::new();
    for i in 0..20 {
        h.posts
            .submit_post(unsigned_post(&format!("post-{i}")))
            .await
            .unwrap();
    }

    let store_a = h.store.clone();
    let store_b = h.store.clone();
    let a = tokio::spawn(async move {
        store_a
            .claim_pending_post_orders(USER_ID, SITE_ID, PostAction::Create, "task-a")
            .await
            .unwrap()
    });
    let b = tokio::spawn(async move {
        store_b
            .claim_pending_post_orders(USER_ID, SITE_ID, PostAction::Create, "task-b")
            .await
            .unwrap()
    });
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    let a: HashSet<_> = a.into_iter().map(|o| o.id).collect();
    let b: HashSet<_> = b.into_iter().map(|o| o.id).collect();
    assert!(a.is_disjoint(&b));
    assert_eq!(a.len() + b.len(), 20);
}

#[tokio::test]
async fn test_posts_submitted_while_busy_are_drained() {
    let h = Harness::new();
    let early = h.posts.submit_post(unsigned_post("early")).await.unwrap();
    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    batch.chain.await.unwrap();

    let late = h.posts.submit_post(unsigned_post("late")).await.unwrap();
    let err = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::WorkspaceLocked { .. }));

    h.settle().await;

    for id in [&early.id, &late.id] {
        let order = h.store.get_post_order(id).await.unwrap().unwrap();
        assert_eq!(order.submit_state, OrderTaskState::Finished);
        assert_eq!(order.publish_state, OrderTaskState::Finished);
    }
    let early = h.store.get_post_order(&early.id).await.unwrap().unwrap();
    let late = h.store.get_post_order(&late.id).await.unwrap().unwrap();
    assert_ne!(early.post_task_id, late.post_task_id);
    assert_eq!(h.notifier.sent.lock().len(), 2);
}

#[tokio::test]
async fn test_actions_are_batched_separately() {
    let h = Harness::new();
    h.posts.submit_post(unsigned_post("new")).await.unwrap();
    h.posts
        .submit_post(SubmitPostRequest {
            action: PostAction::Delete,
            ..unsigned_post("old")
        })
        .await
        .unwrap();

    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    assert!(batch.task_id.starts_with("wt4site-create-posts-"));
    assert_eq!(batch.order_ids.len(), 1);
    batch.chain.await.unwrap();
    h.settle().await;

    let delete_task = h
        .store
        .tasks()
        .into_iter()
        .find(|t| t.method == TaskMethod::DeletePosts)
        .expect("delete batch was drained");
    assert_eq!(delete_task.state, OrderTaskState::Finished);
}

#[tokio::test]
async fn test_signed_post_is_verified_and_idempotent() {
    let h = Harness::new();
    let content = post_content("signed");
    let chain = upload_author_chain(&h.gateway, PostDigestFields::from(&content), 1_700_000_000).await;
    let request = SubmitPostRequest {
        author_digest_ref: Some(chain.digest_ref.clone()),
        author_signature_ref: Some(chain.signature_ref.clone()),
        ..unsigned_post("signed")
    };

    let order = h.posts.submit_post(request.clone()).await.unwrap();
    assert_eq!(order.id, chain.signature.signature);
    assert!(order.is_verified());
    assert!(h
        .store
        .get_server_verification(&order.server_verification_id)
        .await
        .unwrap()
        .is_some());

    let again = h.posts.submit_post(request).await.unwrap();
    assert_eq!(again.id, order.id);
    let page = h
        .posts
        .page_post_orders(USER_ID, None, Default::default())
        .await
        .unwrap();
    assert_eq!(page.meta.total_items, 1);
}

#[tokio::test]
async fn test_signed_digest_must_match_content() {
    let h = Harness::new();
    let chain = upload_author_chain(
        &h.gateway,
        PostDigestFields::from(&post_content("what was signed")),
        1,
    )
    .await;
    let err = h
        .posts
        .submit_post(SubmitPostRequest {
            author_digest_ref: Some(chain.digest_ref),
            author_signature_ref: Some(chain.signature_ref),
            ..unsigned_post("something else")
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(h
        .posts
        .page_post_orders(USER_ID, None, Default::default())
        .await
        .unwrap()
        .items
        .is_empty());
}

#[tokio::test]
async fn test_half_signed_post_rejected() {
    let h = Harness::new();
    let chain = upload_author_chain(
        &h.gateway,
        PostDigestFields::from(&post_content("half")),
        1,
    )
    .await;
    let err = h
        .posts
        .submit_post(SubmitPostRequest {
            author_digest_ref: Some(chain.digest_ref),
            ..unsigned_post("half")
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_drafts_only_on_hexo() {
    let h = Harness::new();
    h.insert_site(SiteBuilder::new().with_template(TemplateType::Hugo).build());
    let err = h
        .posts
        .submit_post(SubmitPostRequest {
            is_draft: true,
            ..unsigned_post("draft")
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_foreign_site_is_not_found() {
    let h = Harness::new();
    let err = h
        .posts
        .submit_post(SubmitPostRequest {
            user_id: 99,
            ..unsigned_post("intruder")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::DataNotFound(_)));
}

#[tokio::test]
async fn test_verified_posts_are_certified_after_commit() {
    let h = Harness::with_options(HarnessOptions {
        certificate_storage: Some(MetadataStorageType::Arweave),
        ..Default::default()
    });
    let content = post_content("notarized");
    let chain = upload_author_chain(&h.gateway, PostDigestFields::from(&content), 42).await;
    let order = h
        .posts
        .submit_post(SubmitPostRequest {
            author_digest_ref: Some(chain.digest_ref),
            author_signature_ref: Some(chain.signature_ref),
            ..unsigned_post("notarized")
        })
        .await
        .unwrap();
    let unsigned = h.posts.submit_post(unsigned_post("plain")).await.unwrap();

    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    batch.chain.await.unwrap();
    h.settle().await;

    let certified = h.store.get_post_order(&order.id).await.unwrap().unwrap();
    assert_eq!(certified.certificate_state, OrderTaskState::Finished);
    assert_eq!(
        certified.certificate_storage_type,
        Some(MetadataStorageType::Arweave)
    );
    let certificate = h
        .gateway
        .get(
            MetadataStorageType::Arweave,
            certified.certificate_id.as_deref().unwrap(),
        )
        .await
        .unwrap();
    let certificate: serde_json::Value = serde_json::from_str(&certificate).unwrap();
    assert_eq!(certificate["reference"].as_array().unwrap().len(), 2);

    let plain = h.store.get_post_order(&unsigned.id).await.unwrap().unwrap();
    assert_eq!(plain.certificate_state, OrderTaskState::None);
}

#[tokio::test]
async fn test_certify_twice_is_rejected() {
    let h = Harness::with_options(HarnessOptions {
        certificate_storage: Some(MetadataStorageType::Ipfs),
        ..Default::default()
    });
    let content = post_content("once");
    let chain = upload_author_chain(&h.gateway, PostDigestFields::from(&content), 7).await;
    let order = h
        .posts
        .submit_post(SubmitPostRequest {
            author_digest_ref: Some(chain.digest_ref),
            author_signature_ref: Some(chain.signature_ref),
            ..unsigned_post("once")
        })
        .await
        .unwrap();

    let certified = h.posts.certify_post_order(&order.id).await.unwrap();
    assert_eq!(certified.certificate_state, OrderTaskState::Finished);
    assert!(h.posts.certify_post_order(&order.id).await.is_err());
}

#[tokio::test]
async fn test_unreadable_site_after_commit_fails_post_task() {
    let h = Harness::new();
    let order = h.posts.submit_post(unsigned_post("stranded")).await.unwrap();
    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    batch.chain.await.unwrap();

    h.site_source.fail_reads(true);
    let errors = h.settle_collecting_errors().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("site config service unavailable"));

    let task = h.store.get_task(&batch.task_id).await.unwrap().unwrap();
    assert_eq!(task.state, OrderTaskState::Failed);
    let order = h.store.get_post_order(&order.id).await.unwrap().unwrap();
    assert_eq!(order.submit_state, OrderTaskState::Failed);
    assert!(h.store.find_active_site_task(SITE_ID).await.unwrap().is_none());

    h.site_source.fail_reads(false);
    h.sites
        .deploy_site(DeploySiteRequest::unsigned(USER_ID, SITE_ID))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_publish_deferred_by_deploy_starts_after_it() {
    let h = Harness::new();
    let post = h.posts.submit_post(unsigned_post("queued")).await.unwrap();
    let batch = h
        .posts
        .flush_pending_posts(USER_ID, SITE_ID)
        .await
        .unwrap()
        .unwrap();
    batch.chain.await.unwrap();

    // posts committed, then a deploy takes the workspace before the publish starts
    let publish_order = h
        .sites
        .create_publish_site_order(USER_ID, SITE_ID)
        .await
        .unwrap();
    h.posts
        .finish_post_task(&batch.task_id, Some(&publish_order.id))
        .await
        .unwrap();
    h.sites
        .deploy_site(DeploySiteRequest::unsigned(USER_ID, SITE_ID))
        .await
        .unwrap();

    let again = h
        .sites
        .create_publish_site_order(USER_ID, SITE_ID)
        .await
        .unwrap();
    assert_eq!(again.id, publish_order.id);

    h.settle().await;

    let publish_order = h
        .store
        .get_publish_site_order(&publish_order.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(publish_order.submit_state, OrderTaskState::Finished);
    assert!(publish_order.publish_site_task_id.starts_with("wt4site-publish-site-"));
    assert!(h
        .store
        .find_pending_publish_site_order(SITE_ID)
        .await
        .unwrap()
        .is_none());

    let post = h.store.get_post_order(&post.id).await.unwrap().unwrap();
    assert_eq!(post.publish_state, OrderTaskState::Finished);
    assert_eq!(post.publish_site_order_id, publish_order.id);
    assert_eq!(h.site_source.status(SITE_ID), Some(SiteStatus::Published));
    assert_eq!(h.notifier.sent.lock().len(), 1);
}
