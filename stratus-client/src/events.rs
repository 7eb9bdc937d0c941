use std::path::PathBuf;

use crate::error::ApiError;
use crate::registry::{OperationId, ThumbSize};
use stratus_core::wire::{AccountInfo, ChunkAck, CopyRef, DeltaPage, Metadata, TimedLink};

/// One notification from a completed (or progressing) operation, delivered
/// on the caller's own receiver in transport-completion order.
///
/// Every operation produces exactly one terminal variant, success or
/// failure, unless it was cancelled before transport completed, in which
/// case nothing is delivered. Progress variants precede the terminal one.
#[derive(Debug)]
pub enum Event {
    MetadataLoaded {
        id: OperationId,
        metadata: Metadata,
    },
    /// Conditional read: the caller's hash still matches the server's.
    /// A distinct success shape, not an error and not a payload.
    MetadataUnchanged {
        id: OperationId,
        path: String,
    },
    MetadataFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },

    DeltaLoaded {
        id: OperationId,
        page: DeltaPage,
    },
    DeltaFailed {
        id: OperationId,
        error: ApiError,
    },

    FileProgress {
        id: OperationId,
        path: String,
        transferred: u64,
        total: Option<u64>,
    },
    FileLoaded {
        id: OperationId,
        path: String,
        local_path: PathBuf,
    },
    FileFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },

    ThumbnailLoaded {
        id: OperationId,
        path: String,
        size: ThumbSize,
        local_path: PathBuf,
    },
    ThumbnailFailed {
        id: OperationId,
        path: String,
        size: ThumbSize,
        error: ApiError,
    },

    UploadProgress {
        id: OperationId,
        dest_path: String,
        transferred: u64,
        total: Option<u64>,
    },
    FileUploaded {
        id: OperationId,
        dest_path: String,
        metadata: Metadata,
    },
    UploadFailed {
        id: OperationId,
        dest_path: String,
        error: ApiError,
    },

    ChunkProgress {
        id: OperationId,
        offset: u64,
        transferred: u64,
    },
    ChunkUploaded {
        id: OperationId,
        ack: ChunkAck,
    },
    ChunkFailed {
        id: OperationId,
        offset: u64,
        error: ApiError,
    },
    ChunkedUploadCommitted {
        id: OperationId,
        dest_path: String,
        metadata: Metadata,
    },
    CommitFailed {
        id: OperationId,
        dest_path: String,
        error: ApiError,
    },

    Moved {
        id: OperationId,
        from: String,
        to: String,
        metadata: Metadata,
    },
    MoveFailed {
        id: OperationId,
        from: String,
        to: String,
        error: ApiError,
    },
    Copied {
        id: OperationId,
        from: String,
        to: String,
        metadata: Metadata,
    },
    CopyFailed {
        id: OperationId,
        from: String,
        to: String,
        error: ApiError,
    },
    Deleted {
        id: OperationId,
        path: String,
        metadata: Metadata,
    },
    DeleteFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },
    FolderCreated {
        id: OperationId,
        path: String,
        metadata: Metadata,
    },
    CreateFolderFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },

    AccountInfoLoaded {
        id: OperationId,
        info: AccountInfo,
    },
    AccountInfoFailed {
        id: OperationId,
        error: ApiError,
    },

    SearchLoaded {
        id: OperationId,
        path: String,
        query: String,
        results: Vec<Metadata>,
    },
    SearchFailed {
        id: OperationId,
        path: String,
        query: String,
        error: ApiError,
    },

    SharedLinkLoaded {
        id: OperationId,
        path: String,
        link: TimedLink,
    },
    SharedLinkFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },
    MediaLinkLoaded {
        id: OperationId,
        path: String,
        link: TimedLink,
    },
    MediaLinkFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },
    CopyRefLoaded {
        id: OperationId,
        path: String,
        copy_ref: CopyRef,
    },
    CopyRefFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },

    RevisionsLoaded {
        id: OperationId,
        path: String,
        revisions: Vec<Metadata>,
    },
    RevisionsFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },
    Restored {
        id: OperationId,
        path: String,
        metadata: Metadata,
    },
    RestoreFailed {
        id: OperationId,
        path: String,
        error: ApiError,
    },
}

impl Event {
    /// The operation this event belongs to.
    pub fn operation_id(&self) -> OperationId {
        match self {
            Event::MetadataLoaded { id, .. }
            | Event::MetadataUnchanged { id, .. }
            | Event::MetadataFailed { id, .. }
            | Event::DeltaLoaded { id, .. }
            | Event::DeltaFailed { id, .. }
            | Event::FileProgress { id, .. }
            | Event::FileLoaded { id, .. }
            | Event::FileFailed { id, .. }
            | Event::ThumbnailLoaded { id, .. }
            | Event::ThumbnailFailed { id, .. }
            | Event::UploadProgress { id, .. }
            | Event::FileUploaded { id, .. }
            | Event::UploadFailed { id, .. }
            | Event::ChunkProgress { id, .. }
            | Event::ChunkUploaded { id, .. }
            | Event::ChunkFailed { id, .. }
            | Event::ChunkedUploadCommitted { id, .. }
            | Event::CommitFailed { id, .. }
            | Event::Moved { id, .. }
            | Event::MoveFailed { id, .. }
            | Event::Copied { id, .. }
            | Event::CopyFailed { id, .. }
            | Event::Deleted { id, .. }
            | Event::DeleteFailed { id, .. }
            | Event::FolderCreated { id, .. }
            | Event::CreateFolderFailed { id, .. }
            | Event::AccountInfoLoaded { id, .. }
            | Event::AccountInfoFailed { id, .. }
            | Event::SearchLoaded { id, .. }
            | Event::SearchFailed { id, .. }
            | Event::SharedLinkLoaded { id, .. }
            | Event::SharedLinkFailed { id, .. }
            | Event::MediaLinkLoaded { id, .. }
            | Event::MediaLinkFailed { id, .. }
            | Event::CopyRefLoaded { id, .. }
            | Event::CopyRefFailed { id, .. }
            | Event::RevisionsLoaded { id, .. }
            | Event::RevisionsFailed { id, .. }
            | Event::Restored { id, .. }
            | Event::RestoreFailed { id, .. } => *id,
        }
    }

    /// Progress events are not terminal; everything else is.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Event::FileProgress { .. } | Event::UploadProgress { .. } | Event::ChunkProgress { .. }
        )
    }
}
