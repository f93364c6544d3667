use std::path::Path;

use async_trait::async_trait;
use s3::{Bucket, Region, creds::Credentials};

use crate::{config::Config, error::Error};

/// Narrow interface to the object store holding the uploaded media payloads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams the file at the given path to the store under the given key, tagged with the
    /// given content type. Never retried, a failed write surfaces to the caller.
    async fn put_object(
        &self,
        object_key: &str,
        content_type: &str,
        source: &Path,
    ) -> Result<(), Error>;

    /// Removes the object stored under the given key.
    async fn delete_object(&self, object_key: &str) -> Result<(), Error>;
}

pub struct S3ObjectStore {
    bucket: Bucket,
}

impl S3ObjectStore {
    pub fn new(config: &Config) -> Result<S3ObjectStore, Error> {
        create_bucket(
            &config.s3_bucket,
            &config.s3_endpoint,
            &config.s3_access_key,
            &config.s3_secret_key,
            config.s3_is_aws_region,
        )
        .map(|bucket| S3ObjectStore { bucket })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        object_key: &str,
        content_type: &str,
        source: &Path,
    ) -> Result<(), Error> {
        let mut reader = tokio::fs::File::open(source)
            .await
            .map_err(|e| Error::IoError(format!("Failed to open staged file: {e}")))?;

        log::info!("Starting object store upload for {}", object_key);
        let status = self
            .bucket
            .put_object_stream_with_content_type(&mut reader, object_key, content_type)
            .await
            .map_err(|e| Error::S3Error(e.to_string()))?;
        if status >= 300 {
            return Err(Error::S3ResponseError(status));
        }
        log::info!("Finished object store upload for {}", object_key);

        Ok(())
    }

    async fn delete_object(&self, object_key: &str) -> Result<(), Error> {
        let delete_response = self
            .bucket
            .delete_object(object_key)
            .await
            .map_err(|e| Error::S3Error(e.to_string()))?;
        let status_code = delete_response.status_code();
        if status_code >= 300 {
            return Err(Error::S3ResponseError(status_code));
        }

        Ok(())
    }
}

pub fn create_bucket(
    bucket_name: &str,
    endpoint: &str,
    access_key: &str,
    secret_key: &str,
    is_aws_region: bool,
) -> Result<Bucket, Error> {
    let region = if is_aws_region {
        endpoint
            .parse::<Region>()
            .map_err(|e| Error::S3Error(e.to_string()))
    } else {
        Ok(Region::Custom {
            region: String::from(""),
            endpoint: String::from(endpoint),
        })
    }?;

    let credentials = Credentials {
        access_key: Some(String::from(access_key)),
        secret_key: Some(String::from(secret_key)),
        security_token: None,
        session_token: None,
        expiration: None,
    };

    Bucket::new(bucket_name, region, credentials)
        .map_err(|e| Error::S3Error(e.to_string()))
        .map(|b| {
            if is_aws_region {
                b
            } else {
                b.with_path_style()
            }
        })
}
