use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::chunked::read_chunk;
use crate::config::{SessionConfig, normalize_folder};
use crate::credentials::{CredentialProvider, signing_context};
use crate::dispatch::{Dispatcher, Outcome};
use crate::error::ApiError;
use crate::events::Event;
use crate::registry::{Handle, OperationId, OperationKey, Registry, ThumbSize, TrackKey};
use crate::transport::{HttpTransport, ProgressFn, ReplySink, Transport, TransportError};
use stratus_core::sign::{Method, RequestBody, SignedRequest, sign_request, sign_upload};
use stratus_core::wire::{AccountInfo, ChunkAck, CopyRef, DeltaPage, Metadata, TimedLink};

type Params = Vec<(String, String)>;

/// Issues authenticated operations against the storage service and reports
/// results on the event receiver handed out at construction.
///
/// Every operation is fire-and-forget: it returns the id it was tracked
/// under and delivers exactly one terminal event later, or none if it is
/// cancelled before transport completes.
pub struct Session {
    config: SessionConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    events: UnboundedSender<Event>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> (Self, UnboundedReceiver<Event>) {
        Self::with_transport(config, credentials, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> (Self, UnboundedReceiver<Event>) {
        let (events, receiver) = unbounded_channel();
        (
            Self {
                config,
                credentials,
                transport,
                registry: Arc::new(Registry::new()),
                events,
            },
            receiver,
        )
    }

    // --- metadata -------------------------------------------------------

    pub fn load_metadata(&self, path: &str) -> OperationId {
        self.load_metadata_inner(path, None)
    }

    /// Conditional read: when the server's hash for a folder still equals
    /// `hash`, the operation finishes as `MetadataUnchanged`.
    pub fn load_metadata_if_changed(&self, path: &str, hash: &str) -> OperationId {
        self.load_metadata_inner(path, Some(hash))
    }

    fn load_metadata_inner(&self, path: &str, hash: Option<&str>) -> OperationId {
        let mut params: Params = vec![("list".into(), "true".into())];
        if let Some(hash) = hash {
            params.push(("hash".into(), hash.into()));
        }
        let request = self.api_request(&self.rooted("/metadata", path), Method::Get, &params);
        let path = path.to_string();
        self.run_json::<Metadata, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(metadata)) => Event::MetadataLoaded { id, metadata },
                Ok(Outcome::NotModified) => Event::MetadataUnchanged { id, path },
                Err(error) => Event::MetadataFailed { id, path, error },
            }
        })
    }

    // --- delta ----------------------------------------------------------

    /// Requests one page of the change feed. Pass `None` on the first call;
    /// afterwards always the cursor from the previous page. When the page
    /// says `has_more`, re-request immediately with the new cursor; when it
    /// says `reset`, discard all cached state first.
    pub fn load_delta(&self, cursor: Option<&str>) -> OperationId {
        let mut params: Params = Vec::new();
        if let Some(cursor) = cursor {
            params.push(("cursor".into(), cursor.into()));
        }
        let request = self.api_request("/delta", Method::Post, &params);
        self.run_json::<DeltaPage, _>(TrackKey::Generic, request, |id, outcome| match outcome {
            Ok(Outcome::Parsed(page)) => Event::DeltaLoaded { id, page },
            Ok(Outcome::NotModified) => Event::DeltaFailed {
                id,
                error: unexpected_not_modified(),
            },
            Err(error) => Event::DeltaFailed { id, error },
        })
    }

    // --- downloads ------------------------------------------------------

    /// Streams a file to `local_path`. Tracked in the download map under
    /// the source path: at most one live download per path, and starting a
    /// second one replaces (not cancels) the first in the registry.
    pub fn load_file(&self, path: &str, local_path: impl Into<PathBuf>) -> OperationId {
        self.load_file_inner(path, None, local_path.into())
    }

    pub fn load_file_revision(
        &self,
        path: &str,
        rev: &str,
        local_path: impl Into<PathBuf>,
    ) -> OperationId {
        self.load_file_inner(path, Some(rev), local_path.into())
    }

    fn load_file_inner(&self, path: &str, rev: Option<&str>, local_path: PathBuf) -> OperationId {
        let mut params: Params = Vec::new();
        if let Some(rev) = rev {
            params.push(("rev".into(), rev.into()));
        }
        let request = self.content_request(&self.rooted("/files", path), Method::Get, &params);
        let handle = self.registry.track(TrackKey::Download(path.to_string()));
        let id = handle.id;
        let path = path.to_string();
        let progress = self.progress_reporter(&handle, {
            let path = path.clone();
            move |id, transferred, total| Event::FileProgress {
                id,
                path: path.clone(),
                transferred,
                total,
            }
        });

        let dispatcher = self.dispatcher();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let outcome = transport
                .execute(
                    request,
                    ReplySink::File(local_path.clone()),
                    Some(progress),
                    handle.token.clone(),
                )
                .await;
            if matches!(outcome, Err(TransportError::Cancelled)) {
                dispatcher.drop_silently(&handle);
                return;
            }
            let event = match dispatcher.interpret_raw(outcome) {
                Ok(()) => Event::FileLoaded {
                    id,
                    path,
                    local_path,
                },
                Err(error) => Event::FileFailed { id, path, error },
            };
            dispatcher.deliver(&handle, event);
        });
        id
    }

    /// Streams a thumbnail to `local_path`. Keyed by (path, size): two
    /// sizes of the same path are independent operations.
    pub fn load_thumbnail(
        &self,
        path: &str,
        size: ThumbSize,
        local_path: impl Into<PathBuf>,
    ) -> OperationId {
        let local_path = local_path.into();
        let params: Params = vec![("size".into(), size.as_str().into())];
        let request = self.content_request(&self.rooted("/thumbnails", path), Method::Get, &params);
        let handle = self
            .registry
            .track(TrackKey::Thumbnail(path.to_string(), size));
        let id = handle.id;
        let path = path.to_string();

        let dispatcher = self.dispatcher();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let outcome = transport
                .execute(
                    request,
                    ReplySink::File(local_path.clone()),
                    None,
                    handle.token.clone(),
                )
                .await;
            if matches!(outcome, Err(TransportError::Cancelled)) {
                dispatcher.drop_silently(&handle);
                return;
            }
            let event = match dispatcher.interpret_raw(outcome) {
                Ok(()) => Event::ThumbnailLoaded {
                    id,
                    path,
                    size,
                    local_path,
                },
                Err(error) => Event::ThumbnailFailed {
                    id,
                    path,
                    size,
                    error,
                },
            };
            dispatcher.deliver(&handle, event);
        });
        id
    }

    // --- uploads --------------------------------------------------------

    /// Uploads a local file in one request. The destination is
    /// `{folder}/{filename}`; the operation is tracked in the upload map
    /// under that destination path. The local source is validated before
    /// anything reaches the network.
    pub fn upload_file(
        &self,
        dest_folder: &str,
        filename: &str,
        source: impl AsRef<Path>,
    ) -> OperationId {
        let source = source.as_ref().to_path_buf();
        let folder = normalize_folder(dest_folder);
        let dest_path = format!("{folder}{filename}");
        let handle = self.registry.track(TrackKey::Upload(dest_path.clone()));
        let id = handle.id;

        let length = match validate_source(&source) {
            Ok(length) => length,
            Err(error) => {
                // Local pre-flight failure: never reaches the network, but
                // still yields exactly one terminal event.
                self.dispatcher().deliver(
                    &handle,
                    Event::UploadFailed {
                        id,
                        dest_path,
                        error,
                    },
                );
                return id;
            }
        };

        let params: Params = vec![("file".into(), filename.into())];
        let request = self.upload_request(
            &self.rooted("/files", &folder),
            &params,
            RequestBody::LocalFile(source),
            length,
        );
        let progress = self.progress_reporter(&handle, {
            let dest_path = dest_path.clone();
            move |id, transferred, total| Event::UploadProgress {
                id,
                dest_path: dest_path.clone(),
                transferred,
                total,
            }
        });

        let dispatcher = self.dispatcher();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let outcome = transport
                .execute(request, ReplySink::Buffer, Some(progress), handle.token.clone())
                .await;
            if matches!(outcome, Err(TransportError::Cancelled)) {
                dispatcher.drop_silently(&handle);
                return;
            }
            let event = match dispatcher.interpret::<Metadata>(outcome).await {
                Ok(Outcome::Parsed(metadata)) => Event::FileUploaded {
                    id,
                    dest_path,
                    metadata,
                },
                Ok(Outcome::NotModified) => Event::UploadFailed {
                    id,
                    dest_path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::UploadFailed {
                    id,
                    dest_path,
                    error,
                },
            };
            dispatcher.deliver(&handle, event);
        });
        id
    }

    /// Sends one chunk of `source` starting at `offset`. Pass no upload id
    /// on the first chunk; the ack assigns one, along with the next offset
    /// and the server-side expiry. The caller carries that state between
    /// calls and restarts from scratch if it means to commit after expiry.
    pub fn upload_chunk(
        &self,
        source: impl AsRef<Path>,
        offset: u64,
        upload_id: Option<&str>,
    ) -> OperationId {
        let source = source.as_ref().to_path_buf();
        let mut params: Params = vec![("offset".into(), offset.to_string())];
        if let Some(upload_id) = upload_id {
            params.push(("upload_id".into(), upload_id.into()));
        }
        let handle = self.registry.track(TrackKey::Generic);
        let id = handle.id;

        let config = self.config.clone();
        let ctx = signing_context(self.credentials.as_ref());
        let progress = self.progress_reporter(&handle, move |id, transferred, _| {
            Event::ChunkProgress {
                id,
                offset,
                transferred,
            }
        });
        let dispatcher = self.dispatcher();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let chunk = match read_chunk(&source, offset).await {
                Ok(chunk) => chunk,
                Err(error) => {
                    dispatcher.deliver(&handle, Event::ChunkFailed { id, offset, error });
                    return;
                }
            };
            let length = chunk.len() as u64;
            let request = sign_upload(
                &ctx,
                &config.app,
                config.locale,
                &config.content_base,
                "/chunked_upload",
                &params,
                RequestBody::Bytes(chunk),
                length,
            );
            let outcome = transport
                .execute(request, ReplySink::Buffer, Some(progress), handle.token.clone())
                .await;
            if matches!(outcome, Err(TransportError::Cancelled)) {
                dispatcher.drop_silently(&handle);
                return;
            }
            let event = match dispatcher.interpret::<ChunkAck>(outcome).await {
                Ok(Outcome::Parsed(ack)) => Event::ChunkUploaded { id, ack },
                Ok(Outcome::NotModified) => Event::ChunkFailed {
                    id,
                    offset,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::ChunkFailed { id, offset, error },
            };
            dispatcher.deliver(&handle, event);
        });
        id
    }

    /// Consumes the upload id from the final chunk ack and materializes the
    /// file at `{folder}/{filename}`. `parent_rev` avoids conflicts; the
    /// default policy is do-not-overwrite (`overwrite=false`), so a
    /// mismatched revision fails instead of clobbering.
    pub fn commit_chunked_upload(
        &self,
        dest_folder: &str,
        filename: &str,
        upload_id: &str,
        parent_rev: Option<&str>,
    ) -> OperationId {
        let folder = normalize_folder(dest_folder);
        let dest_path = format!("{folder}{filename}");
        let mut params: Params = vec![
            ("upload_id".into(), upload_id.into()),
            ("overwrite".into(), "false".into()),
        ];
        if let Some(parent_rev) = parent_rev {
            params.push(("parent_rev".into(), parent_rev.into()));
        }
        let request = self.content_request(
            &self.rooted("/commit_chunked_upload", &dest_path),
            Method::Post,
            &params,
        );
        self.run_json::<Metadata, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(metadata)) => Event::ChunkedUploadCommitted {
                    id,
                    dest_path,
                    metadata,
                },
                Ok(Outcome::NotModified) => Event::CommitFailed {
                    id,
                    dest_path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::CommitFailed {
                    id,
                    dest_path,
                    error,
                },
            }
        })
    }

    // --- fileops --------------------------------------------------------

    pub fn move_path(&self, from: &str, to: &str) -> OperationId {
        let params = self.fileops_params(&[("from_path", from), ("to_path", to)]);
        let request = self.api_request("/fileops/move", Method::Post, &params);
        let from = from.to_string();
        let to = to.to_string();
        self.run_json::<Metadata, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(metadata)) => Event::Moved {
                    id,
                    from,
                    to,
                    metadata,
                },
                Ok(Outcome::NotModified) => Event::MoveFailed {
                    id,
                    from,
                    to,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::MoveFailed {
                    id,
                    from,
                    to,
                    error,
                },
            }
        })
    }

    pub fn copy_path(&self, from: &str, to: &str) -> OperationId {
        let params = self.fileops_params(&[("from_path", from), ("to_path", to)]);
        self.copy_inner(from.to_string(), to, params)
    }

    /// Server-side copy from a copy-ref obtained via `load_copy_ref`,
    /// possibly from another account.
    pub fn copy_from_ref(&self, copy_ref: &str, to: &str) -> OperationId {
        let params = self.fileops_params(&[("from_copy_ref", copy_ref), ("to_path", to)]);
        self.copy_inner(copy_ref.to_string(), to, params)
    }

    fn copy_inner(&self, from: String, to: &str, params: Params) -> OperationId {
        let request = self.api_request("/fileops/copy", Method::Post, &params);
        let to = to.to_string();
        self.run_json::<Metadata, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(metadata)) => Event::Copied {
                    id,
                    from,
                    to,
                    metadata,
                },
                Ok(Outcome::NotModified) => Event::CopyFailed {
                    id,
                    from,
                    to,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::CopyFailed {
                    id,
                    from,
                    to,
                    error,
                },
            }
        })
    }

    pub fn delete_path(&self, path: &str) -> OperationId {
        let params = self.fileops_params(&[("path", path)]);
        let request = self.api_request("/fileops/delete", Method::Post, &params);
        let path = path.to_string();
        self.run_json::<Metadata, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(metadata)) => Event::Deleted { id, path, metadata },
                Ok(Outcome::NotModified) => Event::DeleteFailed {
                    id,
                    path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::DeleteFailed { id, path, error },
            }
        })
    }

    pub fn create_folder(&self, path: &str) -> OperationId {
        let params = self.fileops_params(&[("path", path)]);
        let request = self.api_request("/fileops/create_folder", Method::Post, &params);
        let path = path.to_string();
        self.run_json::<Metadata, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(metadata)) => Event::FolderCreated { id, path, metadata },
                Ok(Outcome::NotModified) => Event::CreateFolderFailed {
                    id,
                    path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::CreateFolderFailed { id, path, error },
            }
        })
    }

    // --- links, search, revisions, account -----------------------------

    pub fn search(&self, path: &str, query: &str) -> OperationId {
        let params: Params = vec![("query".into(), query.into())];
        let request = self.api_request(&self.rooted("/search", path), Method::Get, &params);
        let path = path.to_string();
        let query = query.to_string();
        self.run_json::<Vec<Metadata>, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(results)) => Event::SearchLoaded {
                    id,
                    path,
                    query,
                    results,
                },
                Ok(Outcome::NotModified) => Event::SearchFailed {
                    id,
                    path,
                    query,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::SearchFailed {
                    id,
                    path,
                    query,
                    error,
                },
            }
        })
    }

    pub fn load_shared_link(&self, path: &str) -> OperationId {
        let request = self.api_request(&self.rooted("/shares", path), Method::Post, &[]);
        let path = path.to_string();
        self.run_json::<TimedLink, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(link)) => Event::SharedLinkLoaded { id, path, link },
                Ok(Outcome::NotModified) => Event::SharedLinkFailed {
                    id,
                    path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::SharedLinkFailed { id, path, error },
            }
        })
    }

    /// A direct, time-limited URL suitable for streaming playback.
    pub fn load_media_link(&self, path: &str) -> OperationId {
        let request = self.api_request(&self.rooted("/media", path), Method::Post, &[]);
        let path = path.to_string();
        self.run_json::<TimedLink, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(link)) => Event::MediaLinkLoaded { id, path, link },
                Ok(Outcome::NotModified) => Event::MediaLinkFailed {
                    id,
                    path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::MediaLinkFailed { id, path, error },
            }
        })
    }

    pub fn load_copy_ref(&self, path: &str) -> OperationId {
        let request = self.api_request(&self.rooted("/copy_ref", path), Method::Get, &[]);
        let path = path.to_string();
        self.run_json::<CopyRef, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(copy_ref)) => Event::CopyRefLoaded { id, path, copy_ref },
                Ok(Outcome::NotModified) => Event::CopyRefFailed {
                    id,
                    path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::CopyRefFailed { id, path, error },
            }
        })
    }

    pub fn load_revisions(&self, path: &str) -> OperationId {
        let request = self.api_request(&self.rooted("/revisions", path), Method::Get, &[]);
        let path = path.to_string();
        self.run_json::<Vec<Metadata>, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(revisions)) => Event::RevisionsLoaded {
                    id,
                    path,
                    revisions,
                },
                Ok(Outcome::NotModified) => Event::RevisionsFailed {
                    id,
                    path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::RevisionsFailed { id, path, error },
            }
        })
    }

    pub fn restore_path(&self, path: &str, rev: &str) -> OperationId {
        let params: Params = vec![("rev".into(), rev.into())];
        let request = self.api_request(&self.rooted("/restore", path), Method::Post, &params);
        let path = path.to_string();
        self.run_json::<Metadata, _>(TrackKey::Generic, request, move |id, outcome| {
            match outcome {
                Ok(Outcome::Parsed(metadata)) => Event::Restored { id, path, metadata },
                Ok(Outcome::NotModified) => Event::RestoreFailed {
                    id,
                    path,
                    error: unexpected_not_modified(),
                },
                Err(error) => Event::RestoreFailed { id, path, error },
            }
        })
    }

    /// Account info lives outside the access root.
    pub fn load_account_info(&self) -> OperationId {
        let request = self.api_request("/account/info", Method::Get, &[]);
        self.run_json::<AccountInfo, _>(TrackKey::Generic, request, |id, outcome| match outcome {
            Ok(Outcome::Parsed(info)) => Event::AccountInfoLoaded { id, info },
            Ok(Outcome::NotModified) => Event::AccountInfoFailed {
                id,
                error: unexpected_not_modified(),
            },
            Err(error) => Event::AccountInfoFailed { id, error },
        })
    }

    // --- cancellation ---------------------------------------------------

    pub fn cancel_operation(&self, id: OperationId) -> bool {
        self.registry.cancel(&OperationKey::Generic(id))
    }

    pub fn cancel_download(&self, path: &str) -> bool {
        self.registry.cancel(&OperationKey::Download(path.to_string()))
    }

    pub fn cancel_thumbnail(&self, path: &str, size: ThumbSize) -> bool {
        self.registry
            .cancel(&OperationKey::Thumbnail(path.to_string(), size))
    }

    pub fn cancel_upload(&self, dest_path: &str) -> bool {
        self.registry.cancel(&OperationKey::Upload(dest_path.to_string()))
    }

    /// Cancels every in-flight operation; safe during teardown and
    /// idempotent. No events arrive afterwards for anything tracked before
    /// the call.
    pub fn cancel_all(&self) {
        self.registry.cancel_all();
    }

    /// Number of live operations across all four key spaces.
    pub fn outstanding(&self) -> usize {
        self.registry.count()
    }

    // --- plumbing -------------------------------------------------------

    fn rooted(&self, prefix: &str, path: &str) -> String {
        let separator = if path.starts_with('/') { "" } else { "/" };
        format!("{prefix}/{}{separator}{path}", self.config.root.as_str())
    }

    fn fileops_params(&self, pairs: &[(&str, &str)]) -> Params {
        let mut params: Params = vec![("root".into(), self.config.root.as_str().into())];
        params.extend(pairs.iter().map(|(k, v)| ((*k).into(), (*v).into())));
        params
    }

    fn api_request(&self, path: &str, method: Method, params: &[(String, String)]) -> SignedRequest {
        let ctx = signing_context(self.credentials.as_ref());
        sign_request(
            &ctx,
            &self.config.app,
            self.config.locale,
            &self.config.api_base,
            path,
            method,
            params,
        )
    }

    fn content_request(
        &self,
        path: &str,
        method: Method,
        params: &[(String, String)],
    ) -> SignedRequest {
        let ctx = signing_context(self.credentials.as_ref());
        sign_request(
            &ctx,
            &self.config.app,
            self.config.locale,
            &self.config.content_base,
            path,
            method,
            params,
        )
    }

    fn upload_request(
        &self,
        path: &str,
        params: &[(String, String)],
        body: RequestBody,
        content_length: u64,
    ) -> SignedRequest {
        let ctx = signing_context(self.credentials.as_ref());
        sign_upload(
            &ctx,
            &self.config.app,
            self.config.locale,
            &self.config.content_base,
            path,
            params,
            body,
            content_length,
        )
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.events.clone(),
            self.credentials.clone(),
            self.registry.clone(),
        )
    }

    /// Progress callbacks deliver through the same event channel as
    /// terminal notifications, gated on the operation's token under the
    /// registry lock so a cancelled operation goes completely silent even
    /// when a report races `cancel_all`.
    fn progress_reporter<F>(&self, handle: &Handle, build: F) -> ProgressFn
    where
        F: Fn(OperationId, u64, Option<u64>) -> Event + Send + Sync + 'static,
    {
        let events = self.events.clone();
        let registry = self.registry.clone();
        let handle = handle.clone();
        let id = handle.id;
        Arc::new(move |transferred, total| {
            let event = build(id, transferred, total);
            let events = events.clone();
            registry.notify_if_live(&handle, move || {
                let _ = events.send(event);
            });
        })
    }

    /// Common lifecycle for operations whose success decodes a JSON body:
    /// track, execute, interpret off-context, deliver exactly once.
    fn run_json<T, F>(&self, key: TrackKey, request: SignedRequest, build: F) -> OperationId
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(OperationId, Result<Outcome<T>, ApiError>) -> Event + Send + 'static,
    {
        let handle = self.registry.track(key);
        let id = handle.id;
        let dispatcher = self.dispatcher();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let outcome = transport
                .execute(request, ReplySink::Buffer, None, handle.token.clone())
                .await;
            if matches!(outcome, Err(TransportError::Cancelled)) {
                dispatcher.drop_silently(&handle);
                return;
            }
            let event = build(id, dispatcher.interpret::<T>(outcome).await);
            dispatcher.deliver(&handle, event);
        });
        id
    }
}

/// A 304 outside a conditional metadata read means the server broke
/// protocol; surface it as an invalid response rather than panicking.
fn unexpected_not_modified() -> ApiError {
    ApiError::Api {
        status: 304,
        body: "unexpected not-modified response".into(),
    }
}

fn validate_source(source: &Path) -> Result<u64, ApiError> {
    match std::fs::metadata(source) {
        Ok(info) if info.is_file() => Ok(info.len()),
        Ok(_) => Err(ApiError::IllegalFileType(source.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::FileNotFound(source.to_path_buf()))
        }
        Err(err) => Err(ApiError::Transport(err.into())),
    }
}
