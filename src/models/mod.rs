//! # Pipeline Models
//!
//! Persisted records of the publishing pipeline: immutable post snapshots, the
//! per-intent orders with their progress flags, the batch tasks handed to
//! workers, the queued worker jobs and the write-once server verifications.
//!
//! Enum columns are stored as TEXT; [`impl_text_column`] wires an enum with
//! `as_str`/`FromStr` into SQLx so models can keep deriving `FromRow`.

/// Implement SQLx TEXT encoding for an enum exposing `as_str()` and `FromStr`
macro_rules! impl_text_column {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> ::std::result::Result<Self, sqlx::error::BoxDynError> {
                let raw = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
                Ok(raw.parse::<$ty>().map_err(|e| e.to_string())?)
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> ::std::result::Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }
    };
}
pub(crate) use impl_text_column;

pub mod pagination;
pub mod post;
pub mod site;
pub mod task;
pub mod verification;
pub mod worker_job;

pub use crate::state_machine::OrderTaskState;
pub use pagination::{PageRequest, Pagination, PaginationMeta};
pub use post::{PostAction, PostContent, PostMetadata, PostOrder};
pub use site::{
    DeploySiteOrder, GitRepoSetting, PublishSiteOrder, SiteConfig, SiteInfo, SiteStatus,
    TemplateType, ThemeTemplate,
};
pub use task::{PipelineTask, TaskKind, TaskMethod, TaskWorkspace};
pub use verification::ServerVerificationEntity;
pub use worker_job::{WorkerJob, WorkerJobState};

impl_text_column!(crate::state_machine::OrderTaskState);
