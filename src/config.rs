use std::str::FromStr;

use url::Url;

use crate::{error::Error, util::join_url};

/// Process wide configuration read from the environment once at startup and passed to the
/// components that need it instead of being read from ambient global state.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub database_url: String,
    pub max_db_connections: usize,
    pub jwt_secret: u64,
    pub s3_bucket: String,
    /// AWS region name when [`Config::s3_is_aws_region`] is set, custom endpoint URL otherwise.
    pub s3_endpoint: String,
    pub s3_is_aws_region: bool,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    /// Base URL under which stored objects are publicly reachable, usually
    /// `https://{bucket}.{store_host}/`.
    pub object_public_base: Url,
    /// Attempt to delete the stored object when the subsequent metadata update fails. Off by
    /// default, in which case the orphaned object is only reported for operator reconciliation.
    pub delete_orphaned_objects: bool,
}

impl Config {
    pub fn from_env() -> Config {
        let port_str =
            std::env::var("API_PORT").expect("Missing environment variable API_PORT must be set.");
        let port = u16::from_str(&port_str).expect("API_PORT var is not a valid u16 value");

        let database_url = std::env::var("DATABASE_URL")
            .expect("Missing environment variable DATABASE_URL must be set to connect to postgres");
        let max_db_connections = std::env::var("MAX_DB_CONNECTIONS")
            .unwrap_or_else(|_| String::from("25"))
            .parse::<usize>()
            .expect("MAX_DB_CONNECTIONS is not a valid usize");

        let jwt_secret_str = std::env::var("JWT_SECRET")
            .expect("Missing environment variable JWT_SECRET must be set to validate JWT tokens.");
        let jwt_secret =
            u64::from_str(&jwt_secret_str).expect("JWT_SECRET var is not a valid u64 value");

        let s3_bucket = std::env::var("S3_BUCKET")
            .expect("Missing environment variable S3_BUCKET must be set to store uploads");
        let s3_endpoint = std::env::var("S3_ENDPOINT")
            .expect("Missing environment variable S3_ENDPOINT must be set to store uploads");
        let s3_is_aws_region = std::env::var("S3_IS_AWS_REGION")
            .map(|v| {
                v.parse::<bool>()
                    .expect("S3_IS_AWS_REGION is not a valid bool")
            })
            .unwrap_or(true);
        let s3_access_key = std::env::var("S3_ACCESS_KEY")
            .expect("Missing environment variable S3_ACCESS_KEY must be set to store uploads");
        let s3_secret_key = std::env::var("S3_SECRET_KEY")
            .expect("Missing environment variable S3_SECRET_KEY must be set to store uploads");

        let object_public_base = std::env::var("S3_PUBLIC_BASE").unwrap_or_else(|_| {
            if s3_is_aws_region {
                format!("https://{s3_bucket}.s3.{s3_endpoint}.amazonaws.com/")
            } else {
                let host = s3_endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://");
                format!("https://{s3_bucket}.{host}/")
            }
        });
        let object_public_base =
            Url::parse(&object_public_base).expect("S3_PUBLIC_BASE is not a valid URL");

        let delete_orphaned_objects = std::env::var("DELETE_ORPHANED_OBJECTS")
            .map(|v| {
                v.parse::<bool>()
                    .expect("DELETE_ORPHANED_OBJECTS is not a valid bool")
            })
            .unwrap_or(false);

        Config {
            port,
            cert_path: std::env::var("CERT_PATH").ok(),
            key_path: std::env::var("KEY_PATH").ok(),
            database_url,
            max_db_connections,
            jwt_secret,
            s3_bucket,
            s3_endpoint,
            s3_is_aws_region,
            s3_access_key,
            s3_secret_key,
            object_public_base,
            delete_orphaned_objects,
        }
    }

    /// Public URL under which the object stored for the given key can be fetched.
    pub fn object_url(&self, object_key: &str) -> Result<String, Error> {
        let mut url = self.object_public_base.clone();
        join_url(&mut url, object_key.split('/'))?;
        Ok(url.to_string())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        port: 8091,
        cert_path: None,
        key_path: None,
        database_url: String::from("postgres://localhost/vidvault_test"),
        max_db_connections: 2,
        jwt_secret: 5871320974134,
        s3_bucket: String::from("vidvault-test"),
        s3_endpoint: String::from("eu-central-1"),
        s3_is_aws_region: true,
        s3_access_key: String::from("test-access-key"),
        s3_secret_key: String::from("test-secret-key"),
        object_public_base: Url::parse("https://vidvault-test.s3.eu-central-1.amazonaws.com/")
            .unwrap(),
        delete_orphaned_objects: false,
    }
}
