use std::{path::Path, sync::Arc};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use lazy_static::lazy_static;
use mime::Mime;
use mpart_async::server::MultipartStream;
use rusty_pool::ThreadPool;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use warp::{Buf, Rejection, Reply};

use crate::{
    config::Config,
    data::{
        classify::{THUMBNAIL_MEDIA_TYPES, VIDEO_MEDIA_TYPES},
        probe::{AspectCategory, MediaProber},
        remux::MediaRemuxer,
        s3utils::ObjectStore,
    },
    error::Error,
    model::Video,
    repo::VideoStore,
    util::format_duration,
};

pub mod classify;
pub mod keygen;
pub mod probe;
pub mod remux;
pub mod s3utils;

pub const THUMBNAIL_FIELD_NAME: &str = "thumbnail";
pub const VIDEO_FIELD_NAME: &str = "video";

pub const MAX_THUMBNAIL_SIZE: u64 = 10 << 20;
pub const MAX_VIDEO_SIZE: u64 = 1 << 30;

lazy_static! {
    static ref PROCESS_POOL: ThreadPool = rusty_pool::Builder::new()
        .name(String::from("media_tool_pool"))
        .build();
}

/// Waits for a blocking media tool task on the dedicated thread pool so that child process
/// waits never occupy tokio workers.
pub(crate) async fn spawn_blocking<R: Send + 'static>(
    task: impl FnOnce() -> Result<R, Error> + Send + 'static,
) -> Result<R, Error> {
    let join_handle = PROCESS_POOL.evaluate(task);

    match join_handle.receiver.await {
        Ok(t) => t,
        Err(_) => Err(Error::CancellationError),
    }
}

/// Collaborators of the upload pipeline, created once at startup and shared by all requests.
pub struct UploadContext {
    pub config: Arc<Config>,
    pub videos: Arc<dyn VideoStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub prober: Arc<dyn MediaProber>,
    pub remuxer: Arc<dyn MediaRemuxer>,
}

pub async fn upload_thumbnail_handler(
    video_id: Uuid,
    user_id: Uuid,
    ctx: Arc<UploadContext>,
    mime: Mime,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
) -> Result<impl Reply, Rejection> {
    let boundary = mime
        .get_param("boundary")
        .map(|v| v.to_string())
        .ok_or_else(|| Error::InvalidUploadError(String::from("No mime boundary")))?;

    let mut stream = MultipartStream::new(
        boundary,
        body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining())),
    );

    while let Ok(Some(field)) = stream.try_next().await {
        if field
            .name()
            .map_err(|e| Error::InvalidUploadError(e.to_string()))?
            == THUMBNAIL_FIELD_NAME
        {
            let content_type = field
                .content_type()
                .map_err(|e| Error::InvalidUploadError(e.to_string()))?
                .to_string();

            let field = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            let video = store_thumbnail(&ctx, video_id, user_id, &content_type, field).await?;
            return Ok(warp::reply::json(&video));
        }
    }

    Err(warp::reject::custom(Error::InvalidUploadError(format!(
        "No file specified, no multipart form field found for name '{THUMBNAIL_FIELD_NAME}'"
    ))))
}

pub async fn upload_video_handler(
    video_id: Uuid,
    user_id: Uuid,
    ctx: Arc<UploadContext>,
    mime: Mime,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
) -> Result<impl Reply, Rejection> {
    let boundary = mime
        .get_param("boundary")
        .map(|v| v.to_string())
        .ok_or_else(|| Error::InvalidUploadError(String::from("No mime boundary")))?;

    let mut stream = MultipartStream::new(
        boundary,
        body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining())),
    );

    while let Ok(Some(field)) = stream.try_next().await {
        if field
            .name()
            .map_err(|e| Error::InvalidUploadError(e.to_string()))?
            == VIDEO_FIELD_NAME
        {
            let content_type = field
                .content_type()
                .map_err(|e| Error::InvalidUploadError(e.to_string()))?
                .to_string();

            let field = field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            let video = store_video(&ctx, video_id, user_id, &content_type, field).await?;
            return Ok(warp::reply::json(&video));
        }
    }

    Err(warp::reject::custom(Error::InvalidUploadError(format!(
        "No file specified, no multipart form field found for name '{VIDEO_FIELD_NAME}'"
    ))))
}

/// Stores an uploaded thumbnail for the given video and links it in the metadata record.
///
/// The declared content type is validated before any byte is staged, the record must exist and
/// belong to the uploading user before the payload touches disk.
async fn store_thumbnail<S>(
    ctx: &UploadContext,
    video_id: Uuid,
    user_id: Uuid,
    content_type: &str,
    body: S,
) -> Result<Video, Error>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let validated = classify::validate_media_type(content_type, THUMBNAIL_MEDIA_TYPES)?;

    let mut video = ctx.videos.get_video(video_id).await?;
    if video.fk_owner != user_id {
        return Err(Error::AccessDeniedError(video_id));
    }

    let staged = stage_upload(body).await?;
    log::info!(
        "Staged {} byte thumbnail for video {} by user {}",
        staged.size,
        video_id,
        user_id
    );

    let object_key = keygen::generate_object_key(None, validated.extension)?;
    ctx.objects
        .put_object(&object_key, &validated.media_type, staged.path())
        .await?;

    video.thumbnail_url = Some(ctx.config.object_url(&object_key)?);
    finish_metadata_update(ctx, &video, &object_key).await
}

/// Stores an uploaded video for the given record: the staged payload is probed for its aspect
/// ratio category, remuxed for fast start playback and uploaded under a key prefixed with
/// that category, then linked in the metadata record.
async fn store_video<S>(
    ctx: &UploadContext,
    video_id: Uuid,
    user_id: Uuid,
    content_type: &str,
    body: S,
) -> Result<Video, Error>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let validated = classify::validate_media_type(content_type, VIDEO_MEDIA_TYPES)?;

    let mut video = ctx.videos.get_video(video_id).await?;
    if video.fk_owner != user_id {
        return Err(Error::AccessDeniedError(video_id));
    }

    let staged = stage_upload(body).await?;
    log::info!(
        "Staged {} byte video upload for video {} by user {}",
        staged.size,
        video_id,
        user_id
    );

    let dimensions = ctx.prober.probe_dimensions(staged.path()).await?;
    let category = AspectCategory::from_dimensions(dimensions);

    let start_time = std::time::Instant::now();
    // the remuxed file is the payload that gets uploaded, the staged source is only kept for
    // cleanup; both are removed when this function returns
    let remuxed_path = ctx.remuxer.remux_fast_start(staged.path()).await?;
    log::debug!(
        "Remuxed upload for video {} after {}",
        video_id,
        format_duration(start_time.elapsed())
    );

    let object_key = keygen::generate_object_key(Some(category.as_str()), validated.extension)?;
    ctx.objects
        .put_object(&object_key, &validated.media_type, &remuxed_path)
        .await?;

    video.video_url = Some(ctx.config.object_url(&object_key)?);
    finish_metadata_update(ctx, &video, &object_key).await
}

/// Links the stored object by persisting the updated record.
///
/// When the update fails the already stored object would be orphaned; it is deleted when
/// compensation is enabled and reported for operator reconciliation otherwise. Either way the
/// metadata failure is the error surfaced to the caller.
async fn finish_metadata_update(
    ctx: &UploadContext,
    video: &Video,
    object_key: &str,
) -> Result<Video, Error> {
    match ctx.videos.update_video(video).await {
        Ok(updated) => Ok(updated),
        Err(e) => {
            if ctx.config.delete_orphaned_objects {
                log::warn!(
                    "Metadata update for video {} failed, going to delete stored object {}",
                    video.id,
                    object_key
                );
                if let Err(delete_error) = ctx.objects.delete_object(object_key).await {
                    log::error!(
                        "Failed to delete object {} after failed metadata update: {}",
                        object_key,
                        delete_error
                    );
                }
            } else {
                log::error!(
                    "Metadata update for video {} failed, object {} remains stored but unreferenced",
                    video.id,
                    object_key
                );
            }

            Err(e)
        }
    }
}

/// Locally staged upload payload. The backing temporary file is removed when dropped,
/// regardless of how the request ends.
struct StagedFile {
    file: NamedTempFile,
    size: u64,
}

impl StagedFile {
    fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Writes the upload stream to a temporary file exclusively owned by this request.
async fn stage_upload<S>(mut body: S) -> Result<StagedFile, Error>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let temp_file = tempfile::Builder::new()
        .prefix("upload")
        .tempfile()
        .map_err(|e| Error::IoError(format!("Failed to create temporary file: {e}")))?;

    let mut file = tokio::fs::File::create(temp_file.path())
        .await
        .map_err(|e| Error::IoError(format!("Failed to open temporary file: {e}")))?;
    let mut size = 0u64;
    while let Some(chunk) = body
        .try_next()
        .await
        .map_err(|e| Error::InvalidUploadError(e.to_string()))?
    {
        size += chunk.len() as u64;
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::IoError(format!("Failed to write temporary file: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| Error::IoError(format!("Failed to flush temporary file: {e}")))?;

    Ok(StagedFile {
        file: temp_file,
        size,
    })
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::Ordering};

    use regex::Regex;
    use uuid::Uuid;

    use super::test_support::{
        FailingProber, FailingRemuxer, FixedProber, InMemoryVideoStore, RecordingObjectStore,
        StubRemuxer, test_context, test_video, stub_context, upload_body,
    };
    use super::{store_thumbnail, store_video};
    use crate::{config::test_config, error::Error};

    #[tokio::test]
    async fn test_thumbnail_upload_updates_reference() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = stub_context(InMemoryVideoStore::with_video(video));

        let updated = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            owner,
            "image/jpeg",
            upload_body(b"jpeg bytes"),
        )
        .await
        .expect("upload by the owner must succeed");

        let puts = test_ctx.objects.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 1);
        let (object_key, content_type) = &puts[0];
        assert_eq!(content_type, "image/jpeg");

        let key_format = Regex::new(r"^[A-Za-z0-9_-]{43}\.jpg$").unwrap();
        assert!(key_format.is_match(object_key), "bad key: {object_key}");

        let thumbnail_url = updated.thumbnail_url.expect("reference must be set");
        assert!(thumbnail_url.contains(object_key));
        assert!(thumbnail_url.starts_with("https://vidvault-test.s3.eu-central-1.amazonaws.com/"));
        assert_eq!(updated.video_url, None);

        assert_eq!(test_ctx.videos.update_count.load(Ordering::SeqCst), 1);
        assert_eq!(test_ctx.videos.stored(video_id).unwrap().thumbnail_url.as_deref(), Some(thumbnail_url.as_str()));
    }

    #[tokio::test]
    async fn test_repeated_uploads_overwrite_with_fresh_keys() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = stub_context(InMemoryVideoStore::with_video(video));

        let first = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            owner,
            "image/png",
            upload_body(b"first"),
        )
        .await
        .unwrap();
        let second = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            owner,
            "image/png",
            upload_body(b"second"),
        )
        .await
        .unwrap();

        let keys = test_ctx.objects.put_keys();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
        assert_ne!(first.thumbnail_url, second.thumbnail_url);
        assert_eq!(
            test_ctx.videos.stored(video_id).unwrap().thumbnail_url,
            second.thumbnail_url
        );
    }

    #[tokio::test]
    async fn test_unsupported_media_type_rejected_before_any_store_call() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = stub_context(InMemoryVideoStore::with_video(video));

        let result = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            owner,
            "application/pdf",
            upload_body(b"%PDF-1.4"),
        )
        .await;

        assert!(matches!(result, Err(Error::UnsupportedMediaTypeError(_))));
        assert!(test_ctx.objects.puts.lock().unwrap().is_empty());
        assert!(test_ctx.objects.source_paths.lock().unwrap().is_empty());
        assert_eq!(test_ctx.videos.update_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upload_by_non_owner_is_denied() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = stub_context(InMemoryVideoStore::with_video(video));

        let result = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            Uuid::new_v4(),
            "image/jpeg",
            upload_body(b"jpeg bytes"),
        )
        .await;

        assert!(matches!(result, Err(Error::AccessDeniedError(id)) if id == video_id));
        assert!(test_ctx.objects.puts.lock().unwrap().is_empty());
        assert_eq!(test_ctx.videos.update_count.load(Ordering::SeqCst), 0);
        assert_eq!(test_ctx.videos.stored(video_id).unwrap().thumbnail_url, None);
    }

    #[tokio::test]
    async fn test_upload_for_missing_video_is_not_found() {
        let test_ctx = stub_context(InMemoryVideoStore::empty());
        let video_id = Uuid::new_v4();

        let result = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            Uuid::new_v4(),
            "image/jpeg",
            upload_body(b"jpeg bytes"),
        )
        .await;

        assert!(matches!(result, Err(Error::VideoNotFoundError(id)) if id == video_id));
        assert!(test_ctx.objects.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_video_upload_places_landscape_object_and_links_it() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = test_context(
            test_config(),
            InMemoryVideoStore::with_video(video),
            RecordingObjectStore::default(),
            Arc::new(FixedProber::reporting(1920, 1080)),
            Arc::new(StubRemuxer),
        );

        let updated = store_video(
            &test_ctx.ctx,
            video_id,
            owner,
            "video/mp4",
            upload_body(b"mp4 bytes"),
        )
        .await
        .expect("upload by the owner must succeed");

        let puts = test_ctx.objects.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 1);
        let (object_key, content_type) = &puts[0];
        assert_eq!(content_type, "video/mp4");

        let key_format = Regex::new(r"^landscape/[A-Za-z0-9_-]{43}\.mp4$").unwrap();
        assert!(key_format.is_match(object_key), "bad key: {object_key}");

        let video_url = updated.video_url.expect("reference must be set");
        assert!(video_url.contains(object_key));
        assert_eq!(updated.thumbnail_url, None);
        assert_eq!(test_ctx.videos.update_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_video_upload_places_portrait_object() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = test_context(
            test_config(),
            InMemoryVideoStore::with_video(video),
            RecordingObjectStore::default(),
            Arc::new(FixedProber::reporting(1080, 1920)),
            Arc::new(StubRemuxer),
        );

        store_video(
            &test_ctx.ctx,
            video_id,
            owner,
            "video/mp4",
            upload_body(b"mp4 bytes"),
        )
        .await
        .unwrap();

        let keys = test_ctx.objects.put_keys();
        assert!(keys[0].starts_with("portrait/"), "bad key: {}", keys[0]);
    }

    #[tokio::test]
    async fn test_probe_failure_stores_nothing_and_cleans_up() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let prober = Arc::new(FailingProber::new());
        let test_ctx = test_context(
            test_config(),
            InMemoryVideoStore::with_video(video),
            RecordingObjectStore::default(),
            prober.clone(),
            Arc::new(StubRemuxer),
        );

        let result = store_video(
            &test_ctx.ctx,
            video_id,
            owner,
            "video/mp4",
            upload_body(b"mp4 bytes"),
        )
        .await;

        assert!(matches!(result, Err(Error::ProbeProcessError(_))));
        assert!(test_ctx.objects.puts.lock().unwrap().is_empty());
        assert_eq!(test_ctx.videos.update_count.load(Ordering::SeqCst), 0);

        // the staged file handed to the prober must be gone after the pipeline returns
        let seen_paths = prober.seen_paths.lock().unwrap();
        assert_eq!(seen_paths.len(), 1);
        assert!(!seen_paths[0].exists());
    }

    #[tokio::test]
    async fn test_remux_failure_stores_nothing() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = test_context(
            test_config(),
            InMemoryVideoStore::with_video(video),
            RecordingObjectStore::default(),
            Arc::new(FixedProber::reporting(1920, 1080)),
            Arc::new(FailingRemuxer),
        );

        let result = store_video(
            &test_ctx.ctx,
            video_id,
            owner,
            "video/mp4",
            upload_body(b"mp4 bytes"),
        )
        .await;

        assert!(matches!(result, Err(Error::RemuxProcessError(_))));
        assert!(test_ctx.objects.puts.lock().unwrap().is_empty());
        assert_eq!(test_ctx.videos.update_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_leaves_record_unchanged_and_cleans_up() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = test_context(
            test_config(),
            InMemoryVideoStore::with_video(video),
            RecordingObjectStore::failing(),
            Arc::new(FixedProber::reporting(1920, 1080)),
            Arc::new(StubRemuxer),
        );

        let result = store_video(
            &test_ctx.ctx,
            video_id,
            owner,
            "video/mp4",
            upload_body(b"mp4 bytes"),
        )
        .await;

        assert!(matches!(result, Err(Error::S3Error(_))));
        assert_eq!(test_ctx.videos.update_count.load(Ordering::SeqCst), 0);
        assert_eq!(test_ctx.videos.stored(video_id).unwrap().video_url, None);

        // all temporary files accumulated up to the failed store call must be gone
        let source_paths = test_ctx.objects.source_paths.lock().unwrap();
        assert_eq!(source_paths.len(), 1);
        assert!(!source_paths[0].exists());
    }

    #[tokio::test]
    async fn test_metadata_failure_is_reported_without_compensation_by_default() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let test_ctx = test_context(
            test_config(),
            InMemoryVideoStore::failing_updates(video),
            RecordingObjectStore::default(),
            Arc::new(FixedProber::reporting(1920, 1080)),
            Arc::new(StubRemuxer),
        );

        let result = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            owner,
            "image/png",
            upload_body(b"png bytes"),
        )
        .await;

        // the failure is surfaced distinctly from a storage failure and the object is left in
        // place for reconciliation
        assert!(matches!(result, Err(Error::MetadataUpdateError(_))));
        assert_eq!(test_ctx.objects.puts.lock().unwrap().len(), 1);
        assert!(test_ctx.objects.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failure_deletes_object_when_compensation_enabled() {
        let owner = Uuid::new_v4();
        let video = test_video(owner);
        let video_id = video.id;
        let mut config = test_config();
        config.delete_orphaned_objects = true;
        let test_ctx = test_context(
            config,
            InMemoryVideoStore::failing_updates(video),
            RecordingObjectStore::default(),
            Arc::new(FixedProber::reporting(1920, 1080)),
            Arc::new(StubRemuxer),
        );

        let result = store_thumbnail(
            &test_ctx.ctx,
            video_id,
            owner,
            "image/png",
            upload_body(b"png bytes"),
        )
        .await;

        assert!(matches!(result, Err(Error::MetadataUpdateError(_))));
        let keys = test_ctx.objects.put_keys();
        let deletes = test_ctx.objects.deletes.lock().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(*deletes, keys);
    }
}
