use std::io;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

use crate::error::ApiError;

/// Upper bound on the bytes read and sent per chunk.
pub const CHUNK_WINDOW: u64 = 2 * 1024 * 1024;

/// Reads up to one chunk window starting at `offset`. A short read (end of
/// file) is valid and still sent; an empty read means the offset is at or
/// past the end.
///
/// Failures here never touch registry state for other chunks: the error
/// belongs to this one call.
pub(crate) async fn read_chunk(source: &Path, offset: u64) -> Result<Vec<u8>, ApiError> {
    let mut file = tokio::fs::File::open(source)
        .await
        .map_err(|err| open_error(source, err))?;
    let info = file
        .metadata()
        .await
        .map_err(|err| open_error(source, err))?;
    if !info.is_file() {
        return Err(ApiError::IllegalFileType(source.to_path_buf()));
    }
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|err| ApiError::Transport(err.into()))?;

    let mut chunk = Vec::with_capacity(CHUNK_WINDOW as usize);
    let mut reader = file.take(CHUNK_WINDOW);
    reader
        .read_to_end(&mut chunk)
        .await
        .map_err(|err| ApiError::Transport(err.into()))?;
    Ok(chunk)
}

fn open_error(source: &Path, err: io::Error) -> ApiError {
    if err.kind() == io::ErrorKind::NotFound {
        ApiError::FileNotFound(source.to_path_buf())
    } else {
        ApiError::Transport(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_a_full_window_from_the_offset() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("big.bin");
        let mut data = vec![0u8; CHUNK_WINDOW as usize];
        data.extend_from_slice(b"tail");
        std::fs::write(&source, &data).unwrap();

        let first = read_chunk(&source, 0).await.unwrap();
        assert_eq!(first.len() as u64, CHUNK_WINDOW);

        let second = read_chunk(&source, CHUNK_WINDOW).await.unwrap();
        assert_eq!(second, b"tail");
    }

    #[tokio::test]
    async fn short_reads_at_end_of_file_are_valid() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("small.bin");
        std::fs::write(&source, b"abcdef").unwrap();

        let chunk = read_chunk(&source, 4).await.unwrap();
        assert_eq!(chunk, b"ef");

        let past_end = read_chunk(&source, 100).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn missing_source_is_a_typed_error() {
        let dir = tempdir().unwrap();
        let err = read_chunk(&dir.path().join("nope.bin"), 0)
            .await
            .expect_err("expected missing file");
        assert!(matches!(err, ApiError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn directories_are_not_uploadable() {
        let dir = tempdir().unwrap();
        let err = read_chunk(dir.path(), 0)
            .await
            .expect_err("expected illegal file type");
        assert!(matches!(err, ApiError::IllegalFileType(_)));
    }
}
