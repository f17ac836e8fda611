//! Paging of a user's post orders, newest first.

mod common;

use common::*;
use metaspace_pipeline::coordinator::SubmitPostRequest;
use metaspace_pipeline::models::PageRequest;

async fn submit_many(h: &Harness, site_config_id: i64, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let order = h
            .posts
            .submit_post(SubmitPostRequest {
                site_config_id,
                ..unsigned_post(&format!("post {i}"))
            })
            .await
            .unwrap();
        ids.push(order.id);
    }
    ids
}

#[tokio::test]
async fn test_second_page_of_ten() {
    let h = Harness::new();
    let ids = submit_many(&h, SITE_ID, 10).await;

    let page = h
        .posts
        .page_post_orders(USER_ID, None, PageRequest::new(2, 2))
        .await
        .unwrap();
    let page_ids: Vec<_> = page.items.iter().map(|o| o.id.clone()).collect();
    assert_eq!(page_ids, vec![ids[7].clone(), ids[6].clone()]);
    assert_eq!(page.meta.total_items, 10);
    assert_eq!(page.meta.item_count, 2);
    assert_eq!(page.meta.items_per_page, 2);
    assert_eq!(page.meta.total_pages, 5);
    assert_eq!(page.meta.current_page, 2);

    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["meta"]["totalPages"], 5);
}

#[tokio::test]
async fn test_page_past_the_end_is_empty() {
    let h = Harness::new();
    submit_many(&h, SITE_ID, 3).await;
    let page = h
        .posts
        .page_post_orders(USER_ID, None, PageRequest::new(4, 2))
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.meta.total_pages, 2);
}

#[tokio::test]
async fn test_filter_by_site() {
    let h = Harness::new();
    h.insert_site(SiteBuilder::new().with_id(SITE_ID + 1).build());
    let first = submit_many(&h, SITE_ID, 3).await;
    let second = submit_many(&h, SITE_ID + 1, 2).await;

    let page = h
        .posts
        .page_post_orders(USER_ID, Some(SITE_ID + 1), PageRequest::default())
        .await
        .unwrap();
    let page_ids: Vec<_> = page.items.iter().map(|o| o.id.clone()).collect();
    assert_eq!(page_ids, vec![second[1].clone(), second[0].clone()]);

    let all = h
        .posts
        .page_post_orders(USER_ID, None, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(all.meta.total_items, (first.len() + second.len()) as u64);
}

#[tokio::test]
async fn test_other_users_orders_are_invisible() {
    let h = Harness::new();
    submit_many(&h, SITE_ID, 2).await;
    let page = h
        .posts
        .page_post_orders(USER_ID + 1, None, PageRequest::default())
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.meta.total_items, 0);
    assert_eq!(page.meta.total_pages, 0);
}
