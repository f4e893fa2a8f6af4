//! Identity entity and repository trait.
//!
//! Maps to the `identities` table. Identities are created by the external
//! account service; this core only reads them and touches `last_seen_at`
//! when the final session disconnects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;

/// A stable account reference, independent of any live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Snowflake ID (primary key)
    pub id: i64,

    /// Unique login name
    pub username: String,

    /// Optional display name shown to peers
    pub display_name: Option<String>,

    pub avatar_url: Option<String>,

    /// Last time the identity's final session disconnected
    pub last_seen_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Repository trait for Identity lookups.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Find an identity by its Snowflake ID.
    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>, AppError>;

    /// Check whether an identity exists.
    async fn exists(&self, id: i64) -> Result<bool, AppError>;

    /// Record the time the identity's last session disconnected.
    async fn touch_last_seen(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError>;
}
