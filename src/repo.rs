use async_trait::async_trait;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::{AsyncDieselConnectionManager, deadpool::Pool},
};
use uuid::Uuid;

use crate::{config::Config, error::Error, model::Video, schema::video};

/// Narrow interface to the metadata store holding the video records.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Loads the video record for the given id.
    async fn get_video(&self, video_id: Uuid) -> Result<Video, Error>;
    /// Persists the media reference URLs of the given record and returns the updated row.
    ///
    /// Only the two reference columns are written, all other columns belong to the video
    /// creation endpoint.
    async fn update_video(&self, record: &Video) -> Result<Video, Error>;
}

pub struct PgVideoStore {
    pool: Pool<AsyncPgConnection>,
}

impl PgVideoStore {
    pub fn new(config: &Config) -> Result<PgVideoStore, Error> {
        let connection_manager =
            AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
        let pool = Pool::builder(connection_manager)
            .max_size(config.max_db_connections)
            .build()
            .map_err(|_| Error::DatabaseConnectionError)?;

        Ok(PgVideoStore { pool })
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get_video(&self, video_id: Uuid) -> Result<Video, Error> {
        let mut connection = self
            .pool
            .get()
            .await
            .map_err(|_| Error::DatabaseConnectionError)?;
        video::table
            .filter(video::id.eq(video_id))
            .get_result::<Video>(&mut connection)
            .await
            .optional()
            .map_err(|e| Error::QueryError(e.to_string()))?
            .ok_or(Error::VideoNotFoundError(video_id))
    }

    async fn update_video(&self, record: &Video) -> Result<Video, Error> {
        let mut connection = self
            .pool
            .get()
            .await
            .map_err(|_| Error::DatabaseConnectionError)?;
        diesel::update(video::table.filter(video::id.eq(record.id)))
            .set((
                video::thumbnail_url.eq(record.thumbnail_url.clone()),
                video::video_url.eq(record.video_url.clone()),
            ))
            .get_result::<Video>(&mut connection)
            .await
            .map_err(|e| Error::MetadataUpdateError(e.to_string()))
    }
}
