//! Drives the upload client against a real listener.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;

use photo_intake::client::{ClientError, LocalFile, UploadClient, UploadOptions, UploadStrategy};
use photo_intake::models::event::Event;
use photo_intake::models::photo::UploadMethod;
use photo_intake::services::event_store::SqliteEventStore;
use photo_intake::services::photo_store::{PhotoStore, SqlitePhotoStore};
use photo_intake::services::upload_service::{
    DEFAULT_MAX_FILE_SIZE, DEFAULT_SIZE_TOLERANCE, MIB, UploadLimits,
};
use photo_intake::{AppState, BodyLimits, app, db};

struct Server {
    base_url: String,
    dir: TempDir,
    events: SqliteEventStore,
    photos: SqlitePhotoStore,
}

async fn spawn_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::connect("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let pool = Arc::new(pool);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let state = AppState::local(
        pool.clone(),
        dir.path().join("chunks"),
        dir.path().join("objects"),
        base_url.clone(),
        UploadLimits {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            size_tolerance: DEFAULT_SIZE_TOLERANCE,
        },
    );
    let router = app(
        state,
        BodyLimits {
            chunk: 10 * MIB,
            direct: DEFAULT_MAX_FILE_SIZE,
        },
    );
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Server {
        base_url,
        events: SqliteEventStore::new(pool.clone()),
        photos: SqlitePhotoStore::new(pool),
        dir,
    }
}

fn write_file(dir: &Path, name: &str, size: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let bytes: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, bytes).unwrap();
    path
}

async fn open_event(server: &Server) -> Event {
    server.events.create_event("Wedding", "ativo").await.unwrap()
}

#[tokio::test]
async fn large_file_goes_through_chunk_pipeline() {
    let server = spawn_server().await;
    let event = open_event(&server).await;
    let src = tempfile::tempdir().unwrap();
    let path = write_file(src.path(), "ceremony.jpg", 12 * MIB as usize);

    let client = UploadClient::new(&server.base_url).unwrap();
    let file = LocalFile::open(&path).await.unwrap();
    let options = UploadOptions {
        event_id: event.id.to_string(),
        user_name: Some("Bruno".into()),
    };

    let mut progress = Vec::new();
    let receipt = client
        .upload_file(&file, &options, |p| progress.push(p))
        .await
        .unwrap();

    assert_eq!(receipt.strategy, UploadStrategy::Chunked);
    assert_eq!(receipt.chunks_sent, 3);
    assert_eq!(receipt.size, 12 * MIB);
    assert_eq!(progress.last().copied(), Some(100.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.contains(&90.0));

    let photos = server.photos.list_by_event(event.id).await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].upload_method, UploadMethod::Chunked);
    assert_eq!(photos[0].user_name, "Bruno");
    assert_eq!(photos[0].size, (12 * MIB) as i64);

    let served = reqwest::get(&receipt.url).await.unwrap();
    assert_eq!(served.status(), reqwest::StatusCode::OK);
    let body = served.bytes().await.unwrap();
    assert_eq!(body.len(), 12 * MIB as usize);
    assert_eq!(&body[..], &std::fs::read(&path).unwrap()[..]);

    let leftover = std::fs::read_dir(server.dir.path().join("chunks"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn small_file_goes_direct() {
    let server = spawn_server().await;
    let event = open_event(&server).await;
    let src = tempfile::tempdir().unwrap();
    let path = write_file(src.path(), "selfie.png", 2 * MIB as usize);

    let client = UploadClient::new(&server.base_url).unwrap();
    let file = LocalFile::open(&path).await.unwrap();
    let options = UploadOptions {
        event_id: event.id.to_string(),
        user_name: None,
    };

    let receipt = client.upload_file(&file, &options, |_| {}).await.unwrap();
    assert_eq!(receipt.strategy, UploadStrategy::Direct);
    assert_eq!(receipt.chunks_sent, 0);
    assert_eq!(receipt.size, 2 * MIB);
    assert!(!server.dir.path().join("chunks").exists());

    let photos = server.photos.list_by_event(event.id).await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].upload_method, UploadMethod::Direct);
    assert_eq!(photos[0].user_name, "anonymous");
}

#[tokio::test]
async fn closed_event_surfaces_server_message() {
    let server = spawn_server().await;
    let event = server
        .events
        .create_event("Archive", "encerrado")
        .await
        .unwrap();
    let src = tempfile::tempdir().unwrap();
    let path = write_file(src.path(), "late.jpg", 1024);

    let client = UploadClient::builder(&server.base_url).build().unwrap();
    let file = LocalFile::open(&path).await.unwrap();
    let options = UploadOptions {
        event_id: event.id.to_string(),
        user_name: None,
    };

    let err = client.upload_file(&file, &options, |_| {}).await.unwrap_err();
    match err {
        ClientError::Rejected { status, message } => {
            assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
            assert!(message.contains("no longer accepting"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn chunked_threshold_is_configurable() {
    let server = spawn_server().await;
    let event = open_event(&server).await;
    let src = tempfile::tempdir().unwrap();
    let path = write_file(src.path(), "burst.webp", 300 * 1024);

    let client = UploadClient::builder(&server.base_url)
        .threshold(100 * 1024)
        .chunk_size(128 * 1024)
        .build()
        .unwrap();
    let file = LocalFile::open(&path).await.unwrap();
    let options = UploadOptions {
        event_id: event.id.to_string(),
        user_name: None,
    };

    let receipt = client.upload_file(&file, &options, |_| {}).await.unwrap();
    assert_eq!(receipt.strategy, UploadStrategy::Chunked);
    assert_eq!(receipt.chunks_sent, 3);
    assert_eq!(receipt.size, 300 * 1024);
}
