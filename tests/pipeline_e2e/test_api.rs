//! Inbound HTTP routes through `actix_web::test`.

use std::future::poll_fn;
use std::sync::Arc;

use actix_web::body::MessageBody;
use actix_web::{App, test, web};
use image_import_lib::api;
use image_import_lib::config::{GROUP_HEADER, SESSION_TOKEN_HEADER, USER_HEADER};
use image_import_lib::models::EventStatus;
use image_import_lib::services::{EventBus, ImportPipeline};
use serde_json::Value;

use super::fakes::{FakeConnector, FakeConverter, FakeRepository, RecordingStats};
use super::test_helpers::*;

const BOUNDARY: &str = "----import-test-boundary";

struct Part<'a> {
    name: &'a str,
    file_name: Option<&'a str>,
    data: &'a [u8],
}

fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.file_name {
            Some(file) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    part.name, file
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn content_type() -> (&'static str, String) {
    ("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
}

fn test_pipeline(dir: &std::path::Path) -> (web::Data<ImportPipeline>, Arc<FakeRepository>) {
    let repo = FakeRepository::new();
    let pipeline = ImportPipeline::new(
        &test_settings(dir),
        FakeConverter::new("Scope1", ACQUIRED),
        FakeConnector::new(repo.clone()),
        RecordingStats::new(),
        EventBus::new(100),
    );
    (web::Data::new(pipeline), repo)
}

macro_rules! test_app {
    ($pipeline:expr) => {
        test::init_service(
            App::new().app_data($pipeline.clone()).service(
                web::scope("/api/v1")
                    .configure(api::configure_health_routes)
                    .configure(api::configure_import_routes)
                    .configure(api::configure_event_routes),
            ),
        )
        .await
    };
}

#[actix_rt::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = test_pipeline(dir.path());
    let app = test_app!(pipeline);

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
}

#[actix_rt::test]
async fn test_import_requires_identity_headers() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = test_pipeline(dir.path());
    let app = test_app!(pipeline);

    let req = test::TestRequest::post()
        .uri("/api/v1/imports")
        .insert_header(content_type())
        .set_payload(multipart(&[Part {
            name: "file",
            file_name: Some("sample.ext"),
            data: b"abc",
        }]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_rt::test]
async fn test_import_is_accepted_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, repo) = test_pipeline(dir.path());
    let app = test_app!(pipeline);
    let mut sub = pipeline.bus().subscribe(None);

    let data = vec![7u8; 4096];
    let req = test::TestRequest::post()
        .uri("/api/v1/imports")
        .insert_header(content_type())
        .insert_header((USER_HEADER, "alice"))
        .insert_header((GROUP_HEADER, "microscopy"))
        .insert_header((SESSION_TOKEN_HEADER, "session-alice"))
        .set_payload(multipart(&[
            Part {
                name: "Operator",
                file_name: None,
                data: b"A",
            },
            Part {
                name: "file",
                file_name: Some("sample.ext"),
                data: &data,
            },
        ]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["accepted"], true);
    assert_eq!(body["files"], serde_json::json!(["sample.ext"]));
    assert!(body.get("reason").is_none());

    let events = collect_until_terminal(&mut sub, &["sample.ext".to_string()]).await;
    let mine = events_for(&events, "sample.ext");
    assert_eq!(terminal(&mine).status(), Some(EventStatus::Success));
    assert_eq!(repo.bytes(), 4096);
}

#[actix_rt::test]
async fn test_unsupported_only_request_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = test_pipeline(dir.path());
    let app = test_app!(pipeline);

    let req = test::TestRequest::post()
        .uri("/api/v1/imports")
        .insert_header(content_type())
        .insert_header((USER_HEADER, "alice"))
        .insert_header((SESSION_TOKEN_HEADER, "session-alice"))
        .set_payload(multipart(&[Part {
            name: "file",
            file_name: Some("notes.txt"),
            data: b"hello",
        }]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["accepted"], false);
    assert!(body["reason"].as_str().unwrap().contains("not supported"));
}

#[actix_rt::test]
async fn test_remove_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = test_pipeline(dir.path());
    let app = test_app!(pipeline);

    let user_dir = dir.path().join("alice");
    std::fs::create_dir_all(&user_dir).unwrap();
    std::fs::write(user_dir.join("left.ext"), b"x").unwrap();
    std::fs::write(user_dir.join("over.ext"), b"y").unwrap();

    let req = test::TestRequest::delete()
        .uri("/api/v1/imports/uploads")
        .insert_header((USER_HEADER, "alice"))
        .insert_header((SESSION_TOKEN_HEADER, "session-alice"))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["removed"], 2);
    assert!(!user_dir.exists());
}

#[actix_rt::test]
async fn test_event_stream_resumes_after_last_event_id() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _) = test_pipeline(dir.path());
    let app = test_app!(pipeline);

    let bus = pipeline.bus();
    bus.publish(image_import_lib::models::EventDraft::started("a.ext"));
    bus.publish(image_import_lib::models::EventDraft::uploading("a.ext"));

    let req = test::TestRequest::get()
        .uri("/api/v1/imports/events")
        .insert_header(("Last-Event-ID", "1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let mut body = Box::pin(resp.into_body());

    let hello = poll_fn(|cx| body.as_mut().poll_next(cx)).await.unwrap().unwrap();
    assert_eq!(&hello[..], b"retry: 1000\n\n");

    let frame = poll_fn(|cx| body.as_mut().poll_next(cx)).await.unwrap().unwrap();
    let text = std::str::from_utf8(&frame).unwrap();
    assert!(text.starts_with("id: 2\nevent: message\n"), "{}", text);
    assert!(text.contains("\"status\":\"uploading\""), "{}", text);
}
