use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Write-once record of a server verification payload, keyed by its signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ServerVerificationEntity {
    pub id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl ServerVerificationEntity {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
