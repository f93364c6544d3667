#[macro_use]
extern crate diesel;

use std::sync::Arc;

use mime::Mime;
use uuid::Uuid;
use warp::Filter;

use crate::{
    config::Config,
    data::{
        MAX_THUMBNAIL_SIZE, MAX_VIDEO_SIZE, UploadContext, probe::FfprobeProber,
        remux::FfmpegRemuxer, s3utils::S3ObjectStore,
    },
    repo::PgVideoStore,
    util::OptFmt,
};

mod auth;
mod config;
mod data;
mod error;
mod model;
mod repo;
mod schema;
mod util;

fn main() {
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());

    setup_logger();

    let videos =
        PgVideoStore::new(&config).expect("Failed to initialise metadata store connection pool");
    let objects = S3ObjectStore::new(&config).expect("Failed to initialise object store bucket");

    let ctx = Arc::new(UploadContext {
        config: Arc::clone(&config),
        videos: Arc::new(videos),
        objects: Arc::new(objects),
        prober: Arc::new(FfprobeProber),
        remuxer: Arc::new(FfmpegRemuxer),
    });

    setup_tokio_runtime(config, ctx);
}

/// Start a tokio runtime that runs a warp server.
#[tokio::main]
async fn setup_tokio_runtime(config: Arc<Config>, ctx: Arc<UploadContext>) {
    let filter = api_routes(Arc::clone(&config), ctx)
        .recover(error::handle_rejection)
        .with(warp::log::custom(|info| {
            let log_level = if info.elapsed().as_secs() >= 10 && !info.path().starts_with("/videos")
            {
                log::Level::Warn
            } else if info.elapsed().as_millis() >= 250 {
                log::Level::Info
            } else {
                log::Level::Debug
            };

            log::log!(
                target: "vidvault::api",
                log_level,
                "{} \"{} {} {:?}\" {} \"{}\" \"{}\" {:?}",
                OptFmt(info.remote_addr()),
                info.method(),
                info.path(),
                info.version(),
                info.status().as_u16(),
                OptFmt(info.referer()),
                OptFmt(info.user_agent()),
                info.elapsed(),
            );
        }));

    if config.cert_path.is_some() && config.key_path.is_some() {
        warp::serve(filter)
            .tls()
            .cert_path(config.cert_path.as_ref().unwrap())
            .key_path(config.key_path.as_ref().unwrap())
            .run(([0, 0, 0, 0], config.port))
            .await;
    } else {
        warp::serve(filter).run(([0, 0, 0, 0], config.port)).await;
    }
}

fn api_routes(
    config: Arc<Config>,
    ctx: Arc<UploadContext>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let with_ctx = warp::any().map(move || Arc::clone(&ctx));

    let upload_thumbnail_route = warp::path("videos")
        .and(warp::path::param::<Uuid>())
        .and(warp::path("thumbnail"))
        .and(warp::path::end())
        .and(warp::post())
        .and(auth::with_user(Arc::clone(&config)))
        .and(with_ctx.clone())
        .and(warp::header::<Mime>("content-type"))
        .and(warp::body::content_length_limit(MAX_THUMBNAIL_SIZE))
        .and(warp::body::stream())
        .and_then(data::upload_thumbnail_handler);

    let upload_video_route = warp::path("videos")
        .and(warp::path::param::<Uuid>())
        .and(warp::path("video"))
        .and(warp::path::end())
        .and(warp::post())
        .and(auth::with_user(config))
        .and(with_ctx)
        .and(warp::header::<Mime>("content-type"))
        .and(warp::body::content_length_limit(MAX_VIDEO_SIZE))
        .and(warp::body::stream())
        .and_then(data::upload_video_handler);

    upload_thumbnail_route.or(upload_video_route)
}

fn setup_logger() {
    // create logs dir as fern does not appear to handle that itself
    if !std::path::Path::new("logs/").exists() {
        std::fs::create_dir("logs").expect("Failed to create logs/ directory");
    }

    let logging_level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}]{}[{}] {}",
                record.level(),
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .level_for("vidvault", logging_level)
        .level_for("vidvault_server", logging_level)
        .chain(std::io::stdout())
        .chain(fern::DateBased::new("logs/", "logs_%Y-%m-%d.log"))
        .apply()
        .expect("Failed to set up logging");
}
