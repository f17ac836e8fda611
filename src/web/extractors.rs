//! # Custom Axum Extractors

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use crate::dispatcher::WorkerCredential;
use crate::web::response_types::ApiError;

/// Worker credential from `Authorization: Basic base64(workerName:secret)`.
///
/// Only parses the header; the dispatcher checks the secret against the job.
#[derive(Debug, Clone)]
pub struct WorkerAuth(pub WorkerCredential);

#[async_trait]
impl<S> FromRequestParts<S> for WorkerAuth
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid authorization header format"))?;

        let credential = WorkerCredential::from_basic_header(header)?;
        debug!(worker_name = %credential.worker_name, "Extracted worker credential");
        Ok(Self(credential))
    }
}
