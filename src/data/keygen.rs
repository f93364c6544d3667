use data_encoding::BASE64URL_NOPAD;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::Error;

/// Number of random bytes backing the name segment of generated object keys.
const OBJECT_KEY_RANDOM_BYTES: usize = 32;

/// Generates a collision resistant object key of the form `{category}/{name}.{extension}`, or
/// `{name}.{extension}` when no category is given.
///
/// The name segment is drawn from the system CSPRNG and url-safe encoded without padding,
/// keeping keys unguessable. A failing random source is fatal and never retried.
pub fn generate_object_key(category: Option<&str>, extension: &str) -> Result<String, Error> {
    let mut random_bytes = [0u8; OBJECT_KEY_RANDOM_BYTES];
    SystemRandom::new()
        .fill(&mut random_bytes)
        .map_err(|_| Error::RandomSourceError)?;
    let name = BASE64URL_NOPAD.encode(&random_bytes);

    Ok(match category {
        Some(category) => format!("{category}/{name}.{extension}"),
        None => format!("{name}.{extension}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use regex::Regex;

    use super::generate_object_key;

    #[test]
    fn test_key_format_without_category() {
        let key_format = Regex::new(r"^[A-Za-z0-9_-]{43}\.png$").unwrap();
        let key = generate_object_key(None, "png").unwrap();
        assert!(key_format.is_match(&key), "unexpected key format: {key}");
    }

    #[test]
    fn test_key_format_with_category() {
        let key_format = Regex::new(r"^landscape/[A-Za-z0-9_-]{43}\.mp4$").unwrap();
        let key = generate_object_key(Some("landscape"), "mp4").unwrap();
        assert!(key_format.is_match(&key), "unexpected key format: {key}");
    }

    #[test]
    fn test_keys_carry_no_padding() {
        let key = generate_object_key(Some("other"), "mp4").unwrap();
        assert!(!key.contains('='));
    }

    #[test]
    fn test_keys_do_not_collide() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let key = generate_object_key(None, "jpg").unwrap();
            assert!(seen.insert(key), "generated a duplicate object key");
        }
    }
}
