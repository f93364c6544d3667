use mime::Mime;

use crate::error::Error;

/// Media types accepted for thumbnail uploads, each with its canonical file extension.
pub const THUMBNAIL_MEDIA_TYPES: &[(&str, &str)] = &[("image/jpeg", "jpg"), ("image/png", "png")];
/// Media types accepted for video uploads, each with its canonical file extension.
pub const VIDEO_MEDIA_TYPES: &[(&str, &str)] = &[("video/mp4", "mp4")];

/// A client declared media type that passed the allow list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMediaType {
    /// Base media type with parameters such as charset or boundary stripped.
    pub media_type: String,
    /// File extension used for the object key of stored payloads of this type.
    pub extension: &'static str,
}

/// Parses the declared content type and checks its base type against the given allow list.
///
/// This runs before any byte of the upload is staged or stored.
pub fn validate_media_type(
    content_type: &str,
    allowed: &'static [(&'static str, &'static str)],
) -> Result<ValidatedMediaType, Error> {
    let mime = content_type
        .parse::<Mime>()
        .map_err(|e| Error::InvalidMediaTypeError(e.to_string()))?;
    let base_type = mime.essence_str();

    allowed
        .iter()
        .find(|(media_type, _)| *media_type == base_type)
        .map(|(media_type, extension)| ValidatedMediaType {
            media_type: String::from(*media_type),
            extension,
        })
        .ok_or_else(|| Error::UnsupportedMediaTypeError(base_type.to_string()))
}
