use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use stratus_core::sign::{Method, RequestBody, SignedRequest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("operation cancelled")]
    Cancelled,
}

/// Bytes transferred so far, plus the total when known.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Where the response body goes: buffered for interpretation, or streamed
/// straight to a local file (downloads, thumbnails).
#[derive(Debug, Clone)]
pub enum ReplySink {
    Buffer,
    File(PathBuf),
}

/// Raw transport outcome. For a `File` sink with a success status the body
/// has already been written to disk and `body` is empty; error statuses
/// keep their body buffered for interpretation either way.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Executes one signed request. Implementations must honor the
/// cancellation token promptly and report progress for streamed bodies.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: SignedRequest,
        sink: ReplySink,
        progress: Option<ProgressFn>,
        cancel: CancellationToken,
    ) -> Result<Reply, TransportError>;
}

/// The reqwest-backed transport used in production.
#[derive(Clone, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        request: SignedRequest,
        sink: ReplySink,
        progress: Option<ProgressFn>,
        cancel: CancellationToken,
    ) -> Result<Reply, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };
        let url = url::Url::parse(&request.url)?;
        let mut builder = self
            .http
            .request(method, url)
            .header(reqwest::header::USER_AGENT, &request.user_agent)
            .timeout(request.timeout);
        if let Some(content_type) = request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        if let Some(content_length) = request.content_length {
            builder = builder.header(reqwest::header::CONTENT_LENGTH, content_length);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::LocalFile(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let total = request.content_length;
                builder.body(upload_body(file, total, progress.clone()))
            }
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            sent = builder.send() => sent?,
        };
        let status = response.status().as_u16();

        if !(200..300).contains(&status) {
            // Error bodies stay buffered for interpretation regardless of
            // the requested sink.
            let body = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                body = response.bytes() => body?,
            };
            return Ok(Reply {
                status,
                body: body.to_vec(),
            });
        }

        match sink {
            ReplySink::Buffer => {
                let body = tokio::select! {
                    _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    body = response.bytes() => body?,
                };
                Ok(Reply {
                    status,
                    body: body.to_vec(),
                })
            }
            ReplySink::File(target) => {
                stream_to_file(response, &target, progress, cancel).await?;
                Ok(Reply {
                    status,
                    body: Vec::new(),
                })
            }
        }
    }
}

fn upload_body(
    file: tokio::fs::File,
    total: Option<u64>,
    progress: Option<ProgressFn>,
) -> reqwest::Body {
    let mut sent = 0u64;
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let (Ok(bytes), Some(report)) = (&chunk, &progress) {
            sent += bytes.len() as u64;
            report(sent, total);
        }
        chunk
    });
    reqwest::Body::wrap_stream(stream)
}

async fn stream_to_file(
    response: reqwest::Response,
    target: &Path,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let total = response.content_length();
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(target);
    let mut file = tokio::fs::File::create(&partial).await?;
    let mut stream = response.bytes_stream();
    let mut received = 0u64;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(TransportError::Cancelled);
            }
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
        if let Some(report) = &progress {
            report(received, total);
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    tokio::fs::rename(partial, target).await?;
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use stratus_core::sign::REQUEST_TIMEOUT;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: String, body: RequestBody) -> SignedRequest {
        SignedRequest {
            method: Method::Get,
            url,
            user_agent: "demo/1.0 stratus-sdk/0.1.0".into(),
            timeout: REQUEST_TIMEOUT,
            content_type: None,
            content_length: None,
            body,
        }
    }

    #[tokio::test]
    async fn buffers_success_bodies_and_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .and(header("user-agent", "demo/1.0 stratus-sdk/0.1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new();
        let reply = transport
            .execute(
                request(format!("{}/ok", server.uri()), RequestBody::Empty),
                ReplySink::Buffer,
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, b"payload");
    }

    #[tokio::test]
    async fn streams_download_to_file_with_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("nested/out.bin");
        let last = Arc::new(AtomicU64::new(0));
        let observed = last.clone();
        let progress: ProgressFn =
            Arc::new(move |transferred, _| observed.store(transferred, Ordering::SeqCst));

        let transport = HttpTransport::new();
        let reply = transport
            .execute(
                request(format!("{}/file", server.uri()), RequestBody::Empty),
                ReplySink::File(target.clone()),
                Some(progress),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(reply.status, 200);
        assert!(reply.body.is_empty());
        assert_eq!(std::fs::read(&target).unwrap().len(), 4096);
        assert_eq!(last.load(Ordering::SeqCst), 4096);
    }

    #[tokio::test]
    async fn error_bodies_stay_buffered_even_for_file_sinks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_bytes(b"{\"error\": \"not found\"}"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("never.bin");
        let transport = HttpTransport::new();
        let reply = transport
            .execute(
                request(format!("{}/missing", server.uri()), RequestBody::Empty),
                ReplySink::File(target.clone()),
                None,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(reply.status, 404);
        assert!(!reply.body.is_empty());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"late")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let aborter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            aborter.cancel();
        });

        let transport = HttpTransport::new();
        let err = transport
            .execute(
                request(format!("{}/slow", server.uri()), RequestBody::Empty),
                ReplySink::Buffer,
                None,
                cancel,
            )
            .await
            .expect_err("expected cancellation");
        assert!(matches!(err, TransportError::Cancelled));
    }
}
