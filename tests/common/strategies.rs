#![allow(dead_code)]

use proptest::prelude::*;

use metaspace_pipeline::models::OrderTaskState;
use metaspace_pipeline::provenance::PostDigestFields;

/// Strategy for generating post digest fields, unicode bodies included
pub fn post_fields_strategy() -> impl Strategy<Value = PostDigestFields> {
    (
        "[a-zA-Z0-9 ]{1,40}",
        "[a-zA-Z0-9 ]{0,80}",
        "\\PC{0,200}",
        prop::collection::vec("[a-z]{1,10}", 0..4),
        prop::collection::vec("[a-z]{1,10}", 0..4),
        prop_oneof![Just(String::new()), Just("CC-BY-4.0".to_string())],
    )
        .prop_map(|(title, summary, content, categories, tags, license)| PostDigestFields {
            title,
            summary,
            content,
            cover: String::new(),
            categories,
            tags,
            license,
        })
}

/// Strategy for generating order/task states
pub fn state_strategy() -> impl Strategy<Value = OrderTaskState> {
    prop_oneof![
        Just(OrderTaskState::None),
        Just(OrderTaskState::Pending),
        Just(OrderTaskState::Doing),
        Just(OrderTaskState::Finished),
        Just(OrderTaskState::Failed),
    ]
}
