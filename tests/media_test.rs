//! Integration tests for attachment downloads.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use x_timeline_archiver::media::MediaFetcher;
use x_timeline_archiver::store::{Attachment, MediaKind, Post};

fn post_with_attachment(id: &str, url: &str) -> Post {
    Post {
        id: id.to_string(),
        username: "alice".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        attachments: vec![Attachment {
            post_id: id.to_string(),
            kind: MediaKind::Photo,
            url: url.to_string(),
        }],
        raw_data: serde_json::json!({"rest_id": id}),
    }
}

#[tokio::test]
async fn test_download_writes_body_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/ABC.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake image bytes".to_vec()))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = MediaFetcher::new(temp.path().to_path_buf(), Duration::from_secs(5)).unwrap();
    let post = post_with_attachment("1", &format!("{}/media/ABC.jpg", server.uri()));

    fetcher.download_all(std::slice::from_ref(&post)).await.unwrap();

    let saved = temp.path().join("posts/x/alice/1.photo.ABC.jpg");
    assert_eq!(std::fs::read(&saved).unwrap(), b"fake image bytes");
    // No partial file left behind
    assert!(!temp.path().join("posts/x/alice/1.photo.ABC.jpg.part").exists());
}

#[tokio::test]
async fn test_second_download_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/ABC.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = MediaFetcher::new(temp.path().to_path_buf(), Duration::from_secs(5)).unwrap();
    let post = post_with_attachment("1", &format!("{}/media/ABC.jpg", server.uri()));

    fetcher.download_all(std::slice::from_ref(&post)).await.unwrap();
    fetcher.download_all(std::slice::from_ref(&post)).await.unwrap();

    // expect(1) verifies exactly one network fetch happened
    server.verify().await;
}

#[tokio::test]
async fn test_non_success_status_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/GONE.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = MediaFetcher::new(temp.path().to_path_buf(), Duration::from_secs(5)).unwrap();
    let post = post_with_attachment("1", &format!("{}/media/GONE.jpg", server.uri()));

    let err = fetcher.download_all(&[post]).await.unwrap_err();
    assert!(format!("{err:#}").contains("404"));
    assert!(!temp.path().join("posts/x/alice/1.photo.GONE.jpg").exists());
}

#[tokio::test]
async fn test_earlier_downloads_survive_a_later_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/OK.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/BAD.jpg"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let fetcher = MediaFetcher::new(temp.path().to_path_buf(), Duration::from_secs(5)).unwrap();
    let good = post_with_attachment("1", &format!("{}/media/OK.jpg", server.uri()));
    let bad = post_with_attachment("2", &format!("{}/media/BAD.jpg", server.uri()));

    assert!(fetcher.download_all(&[good, bad]).await.is_err());
    assert!(temp.path().join("posts/x/alice/1.photo.OK.jpg").exists());
    assert!(!temp.path().join("posts/x/alice/2.photo.BAD.jpg").exists());
}
