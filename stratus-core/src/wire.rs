use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected response shape: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unparseable timestamp: {0}")]
    Timestamp(#[from] time::error::Parse),
}

/// Decodes a response body into a typed value. Used by the completion
/// dispatcher on a worker, never on the issuing context.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(body)?)
}

/// Parses the service's absolute timestamps, e.g.
/// `Sat, 21 Aug 2010 22:31:20 +0000`.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime, DecodeError> {
    let format = time::macros::format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] \
         [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
    );
    Ok(OffsetDateTime::parse(value, format)?)
}

/// File or folder metadata; the same shape comes back from metadata reads,
/// direct uploads, chunked-upload commits, fileops and restores.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Metadata {
    pub path: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub thumb_exists: bool,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub contents: Vec<Metadata>,
}

impl Metadata {
    pub fn filename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn modified_at(&self) -> Option<Result<OffsetDateTime, DecodeError>> {
        self.modified.as_deref().map(parse_timestamp)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaInfo {
    pub quota: u64,
    pub normal: u64,
    pub shared: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountInfo {
    pub uid: u64,
    pub display_name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub referral_link: Option<String>,
    pub quota_info: QuotaInfo,
}

/// One page of the incremental change feed.
///
/// Each entry pairs a path with its metadata; an absent metadata is a
/// tombstone (the path was deleted). `reset` means all previously cached
/// state must be discarded before applying the entries. `has_more` means
/// the caller should immediately re-request with the new cursor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeltaPage {
    pub entries: Vec<(String, Option<Metadata>)>,
    #[serde(default)]
    pub reset: bool,
    pub cursor: String,
    #[serde(default)]
    pub has_more: bool,
}

/// Acknowledgment of one uploaded chunk. `offset` is where the next chunk
/// starts; `expires` is when the server discards the orphaned upload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkAck {
    pub upload_id: String,
    pub offset: u64,
    pub expires: String,
}

impl ChunkAck {
    pub fn expires_at(&self) -> Result<OffsetDateTime, DecodeError> {
        parse_timestamp(&self.expires)
    }
}

/// Share and media links have the same shape: a URL plus its expiry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimedLink {
    pub url: String,
    #[serde(default)]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CopyRef {
    pub copy_ref: String,
    pub expires: String,
}
