//! Local file [`DataSource`] used to read cached spans.

use async_trait::async_trait;
use bridge_traits::{error::Result as BridgeResult, BridgeError, DataSource, DataSpec, ReadOutcome};
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Reads a byte range of a local file.
///
/// `spec.uri` is the file path and `spec.position` the offset within the
/// file.
#[derive(Debug, Default)]
pub struct FileDataSource {
    file: Option<File>,
    path: Option<PathBuf>,
    bytes_remaining: u64,
}

impl FileDataSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataSource for FileDataSource {
    async fn open(&mut self, spec: &DataSpec) -> BridgeResult<Option<u64>> {
        let path = PathBuf::from(&spec.uri);
        let mut file = File::open(&path).await?;
        let file_length = file.metadata().await?.len();

        if spec.position > file_length {
            return Err(BridgeError::PositionOutOfRange {
                position: spec.position,
            });
        }
        let available = file_length - spec.position;
        let length = match spec.length {
            Some(length) if length > available => {
                return Err(BridgeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{} holds {} bytes after {}, {} requested",
                        path.display(),
                        available,
                        spec.position,
                        length
                    ),
                )));
            }
            Some(length) => length,
            None => available,
        };

        file.seek(SeekFrom::Start(spec.position)).await?;
        self.file = Some(file);
        self.path = Some(path);
        self.bytes_remaining = length;
        Ok(Some(length))
    }

    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }
        if self.bytes_remaining == 0 {
            return Ok(ReadOutcome::EndOfInput);
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| BridgeError::OperationFailed("file source is not open".to_string()))?;

        let len = buf.len().min(self.bytes_remaining.min(usize::MAX as u64) as usize);
        let read = file.read(&mut buf[..len]).await?;
        if read == 0 {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file ended with {} bytes outstanding", self.bytes_remaining),
            )));
        }
        self.bytes_remaining -= read as u64;
        Ok(ReadOutcome::Bytes(read))
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.file = None;
        self.path = None;
        self.bytes_remaining = 0;
        Ok(())
    }

    fn uri(&self) -> Option<String> {
        self.path.as_ref().map(|path| path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(source: &mut FileDataSource) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        while let ReadOutcome::Bytes(n) = source.read(&mut buf).await.unwrap() {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn test_reads_requested_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("span");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut source = FileDataSource::new();
        let spec = DataSpec::new(path.display().to_string()).with_range(2, Some(5));
        assert_eq!(source.open(&spec).await.unwrap(), Some(5));
        assert_eq!(source.uri(), Some(path.display().to_string()));
        assert_eq!(read_all(&mut source).await, b"23456");

        source.close().await.unwrap();
        assert_eq!(source.uri(), None);
    }

    #[tokio::test]
    async fn test_open_ended_reads_to_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("span");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut source = FileDataSource::new();
        let spec = DataSpec::new(path.display().to_string()).with_range(7, None);
        assert_eq!(source.open(&spec).await.unwrap(), Some(3));
        assert_eq!(read_all(&mut source).await, b"789");
    }

    #[tokio::test]
    async fn test_position_beyond_file_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("span");
        std::fs::write(&path, b"01234").unwrap();

        let mut source = FileDataSource::new();
        let spec = DataSpec::new(path.display().to_string()).with_range(6, None);
        let err = source.open(&spec).await.unwrap_err();
        assert!(err.is_position_out_of_range());

        let spec = DataSpec::new(path.display().to_string()).with_range(2, Some(10));
        assert!(source.open(&spec).await.is_err());
    }
}
