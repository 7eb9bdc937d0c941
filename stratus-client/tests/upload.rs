use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stratus_client::{
    ApiError, CHUNK_WINDOW, ChunkAck, CredentialProvider, Event, OAuthParameters, Session,
    SessionConfig, SignatureMethod,
};

struct FixedCredentials;

impl CredentialProvider for FixedCredentials {
    fn signing_key(&self) -> String {
        "consumer-secret&token-secret".into()
    }

    fn signature_method(&self) -> SignatureMethod {
        SignatureMethod::Plaintext
    }

    fn oauth_parameters(&self) -> OAuthParameters {
        OAuthParameters {
            consumer_key: "consumer".into(),
            access_token: "token".into(),
            nonce: "fixed-nonce".into(),
            timestamp: 1_300_000_000,
        }
    }
}

fn session_for(server: &MockServer) -> (Session, UnboundedReceiver<Event>) {
    let config = SessionConfig::new("demo", "1.0")
        .with_api_base(server.uri())
        .with_content_base(server.uri());
    Session::new(config, Arc::new(FixedCredentials))
}

async fn next_terminal(events: &mut UnboundedReceiver<Event>) -> Event {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed");
        if event.is_terminal() {
            return event;
        }
    }
}

fn chunk_ack_response(upload_id: &str, offset: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "upload_id": upload_id,
        "offset": offset,
        "expires": "Tue, 19 Jul 2011 21:55:38 +0000"
    }))
}

#[tokio::test]
async fn five_mib_source_uploads_in_three_chunks_and_commits() {
    let total = 5 * 1024 * 1024u64;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/chunked_upload"))
        .and(query_param("offset", "0"))
        .and(header("content-length", "2097152"))
        .respond_with(chunk_ack_response("upload-1", CHUNK_WINDOW))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/chunked_upload"))
        .and(query_param("offset", "2097152"))
        .and(query_param("upload_id", "upload-1"))
        .and(header("content-length", "2097152"))
        .respond_with(chunk_ack_response("upload-1", 2 * CHUNK_WINDOW))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/chunked_upload"))
        .and(query_param("offset", "4194304"))
        .and(query_param("upload_id", "upload-1"))
        .and(header("content-length", "1048576"))
        .respond_with(chunk_ack_response("upload-1", total))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/commit_chunked_upload/drive/backups/big.bin"))
        .and(query_param("upload_id", "upload-1"))
        .and(query_param("overwrite", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "/backups/big.bin",
            "rev": "78f1a3c2b9d04e5",
            "bytes": total
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("big.bin");
    std::fs::write(&source, vec![3u8; total as usize]).unwrap();

    let (session, mut events) = session_for(&server);

    // The caller drives the sequence, carrying upload id and offset from
    // each ack into the next call.
    let mut last_ack: Option<ChunkAck> = None;
    let mut calls = 0;
    loop {
        let offset = last_ack.as_ref().map(|ack| ack.offset).unwrap_or(0);
        if offset >= total {
            break;
        }
        session.upload_chunk(&source, offset, last_ack.as_ref().map(|a| a.upload_id.as_str()));
        calls += 1;
        match next_terminal(&mut events).await {
            Event::ChunkUploaded { ack, .. } => {
                let previous = last_ack.as_ref().map(|a| a.offset).unwrap_or(0);
                assert!(ack.offset > previous, "acked offsets must strictly increase");
                assert_eq!(ack.expires_at().unwrap().year(), 2011);
                last_ack = Some(ack);
            }
            other => panic!("expected chunk ack, got {other:?}"),
        }
    }
    assert_eq!(calls, 3, "5 MiB should take exactly three 2 MiB windows");

    let last_ack = last_ack.expect("at least one ack");
    assert_eq!(last_ack.offset, total);
    session.commit_chunked_upload("/backups", "big.bin", &last_ack.upload_id, None);

    match next_terminal(&mut events).await {
        Event::ChunkedUploadCommitted { dest_path, metadata, .. } => {
            assert_eq!(dest_path, "/backups/big.bin");
            assert_eq!(metadata.path, "/backups/big.bin");
            assert!(metadata.rev.as_deref().is_some_and(|rev| !rev.is_empty()));
        }
        other => panic!("expected commit, got {other:?}"),
    }
    assert_eq!(session.outstanding(), 0);
}

#[tokio::test]
async fn direct_upload_streams_the_source_and_returns_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/files/drive/docs/"))
        .and(query_param("file", "a.txt"))
        .and(body_bytes(b"payload".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "/docs/a.txt",
            "rev": "35e97029684fe",
            "bytes": 7
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.txt");
    std::fs::write(&source, b"payload").unwrap();

    let (session, mut events) = session_for(&server);
    let id = session.upload_file("/docs", "a.txt", &source);

    match next_terminal(&mut events).await {
        Event::FileUploaded { id: got, dest_path, metadata } => {
            assert_eq!(got, id);
            assert_eq!(dest_path, "/docs/a.txt");
            assert_eq!(metadata.rev.as_deref(), Some("35e97029684fe"));
        }
        other => panic!("expected upload success, got {other:?}"),
    }
    assert_eq!(session.outstanding(), 0);
}

#[tokio::test]
async fn missing_source_fails_before_reaching_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/files/drive/docs/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (session, mut events) = session_for(&server);
    session.upload_file("/docs", "ghost.txt", dir.path().join("ghost.txt"));

    match next_terminal(&mut events).await {
        Event::UploadFailed { dest_path, error, .. } => {
            assert_eq!(dest_path, "/docs/ghost.txt");
            assert!(matches!(error, ApiError::FileNotFound(_)));
        }
        other => panic!("expected pre-flight failure, got {other:?}"),
    }
    assert_eq!(session.outstanding(), 0);
}

#[tokio::test]
async fn directory_sources_are_rejected_locally() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (session, mut events) = session_for(&server);
    session.upload_file("/docs", "dir", dir.path());

    match next_terminal(&mut events).await {
        Event::UploadFailed { error, .. } => {
            assert!(matches!(error, ApiError::IllegalFileType(_)));
        }
        other => panic!("expected pre-flight failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_chunk_source_is_a_typed_chunk_failure() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let (session, mut events) = session_for(&server);
    session.upload_chunk(dir.path().join("ghost.bin"), 0, None);

    match next_terminal(&mut events).await {
        Event::ChunkFailed { offset, error, .. } => {
            assert_eq!(offset, 0);
            assert!(matches!(error, ApiError::FileNotFound(_)));
        }
        other => panic!("expected chunk failure, got {other:?}"),
    }
    assert_eq!(session.outstanding(), 0);
}

#[tokio::test]
async fn commit_conflict_surfaces_as_a_typed_api_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/commit_chunked_upload/drive/docs/a.txt"))
        .and(query_param("parent_rev", "stale-rev"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "parent revision does not match"
        })))
        .mount(&server)
        .await;

    let (session, mut events) = session_for(&server);
    session.commit_chunked_upload("/docs", "a.txt", "upload-9", Some("stale-rev"));

    match next_terminal(&mut events).await {
        Event::CommitFailed { dest_path, error, .. } => {
            assert_eq!(dest_path, "/docs/a.txt");
            assert!(matches!(error, ApiError::Api { status: 409, .. }));
        }
        other => panic!("expected commit failure, got {other:?}"),
    }
}
