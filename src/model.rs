use chrono::{DateTime, offset::Utc};
use diesel::{Identifiable, Queryable};
use serde::Serialize;
use uuid::Uuid;

use crate::schema::*;

/// Metadata record of a hosted video.
///
/// Records are created by the separate video creation endpoint; the upload pipeline only ever
/// writes the two media reference URLs, and only for the owning user.
#[derive(Identifiable, Queryable, Serialize, Clone, Debug, PartialEq, Eq)]
#[diesel(table_name = video)]
#[diesel(primary_key(id))]
pub struct Video {
    pub id: Uuid,
    pub fk_owner: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
}
