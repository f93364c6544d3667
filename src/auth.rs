use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::{
    Filter, Rejection,
    filters::header::headers_cloned,
    http::header::{self, HeaderMap},
};

use crate::{config::Config, error::Error};

const JWT_BEARER_PREFIX: &str = "Bearer ";

/// Struct encoded in the JWT that contains its expiry and subject user.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    exp: usize,
    sub: String,
}

/// Warp filter for requests that require the calling user resolved from the auth header.
pub fn with_user(config: Arc<Config>) -> impl Filter<Extract = (Uuid,), Error = Rejection> + Clone {
    headers_cloned().and_then(move |header_map: HeaderMap| {
        let config = Arc::clone(&config);
        async move { user_from_auth_header(&config, &header_map).map_err(warp::reject::custom) }
    })
}

/// Decodes the bearer JWT from the auth header and resolves its subject claim to the user id.
///
/// The token is validated against the configured secret, rejecting expired or otherwise invalid
/// tokens with a 401.
fn user_from_auth_header(config: &Config, header_map: &HeaderMap) -> Result<Uuid, Error> {
    let auth_header = match header_map.get(header::AUTHORIZATION) {
        Some(h) => std::str::from_utf8(h.as_bytes()).map_err(|_| Error::UtfEncodingError)?,
        None => return Err(Error::MissingAuthHeaderError),
    };

    if !auth_header.starts_with(JWT_BEARER_PREFIX) {
        return Err(Error::InvalidAuthHeaderError);
    }

    let jwt_token = auth_header.trim_start_matches(JWT_BEARER_PREFIX);
    // fails if expired
    let token_data = decode::<Claims>(
        jwt_token,
        &DecodingKey::from_secret(&config.jwt_secret.to_be_bytes()),
        &Validation::new(Algorithm::HS512),
    )
    .map_err(|_| Error::InvalidJwtError)?;

    Uuid::parse_str(&token_data.claims.sub).map_err(|_| Error::InvalidJwtError)
}
