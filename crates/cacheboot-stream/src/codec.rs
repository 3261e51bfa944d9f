//! Transfer stream framing
//!
//! A transfer is a header followed by tagged items:
//!
//! ```text
//! stream      := header cacheBlock* END
//! header      := MAGIC:u32 VERSION:u8
//! cacheBlock  := CACHE_NAME len:u32 name  record*
//! record      := RECORD len:u32 key len:u32 value
//! ```
//!
//! Integers are big-endian. The terminator is a tag of its own, so no cache
//! name can ever be mistaken for it.

use crate::error::{BootstrapError, BootstrapResult};

use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Magic number opening every transfer stream
pub const STREAM_MAGIC: u32 = 0x4342_5354; // "CBST"

/// Transfer stream version
pub const STREAM_VERSION: u8 = 1;

/// Item tag on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// End of stream; nothing may follow
    End = 0,
    /// Starts the block of a named cache
    CacheName = 1,
    /// Key/value pair for the current cache
    Record = 2,
}

impl TryFrom<u8> for Tag {
    type Error = BootstrapError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::End),
            1 => Ok(Self::CacheName),
            2 => Ok(Self::Record),
            _ => Err(BootstrapError::protocol(format!(
                "invalid item tag {value:#04x}"
            ))),
        }
    }
}

/// Decoded wire item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireItem {
    /// Following records belong to this cache
    CacheName(String),
    /// One entry of the current cache
    Record { key: Bytes, value: Bytes },
    /// Stream terminator
    End,
}

/// Writes the item sequence of one transfer
pub struct StreamWriter<W> {
    inner: W,
    in_cache_block: bool,
}

impl<W: AsyncWrite + Unpin> StreamWriter<W> {
    /// Write the stream header
    pub async fn begin(mut inner: W) -> std::io::Result<Self> {
        inner.write_u32(STREAM_MAGIC).await?;
        inner.write_u8(STREAM_VERSION).await?;
        Ok(Self {
            inner,
            in_cache_block: false,
        })
    }

    /// Open the block of `name`
    pub async fn write_cache_name(&mut self, name: &str) -> std::io::Result<()> {
        if name.is_empty() {
            return Err(invalid_input("cache name must not be empty"));
        }
        self.inner.write_u8(Tag::CacheName as u8).await?;
        self.write_chunk(name.as_bytes()).await?;
        self.in_cache_block = true;
        Ok(())
    }

    /// Write one entry of the current block
    pub async fn write_record(&mut self, key: &[u8], value: &[u8]) -> std::io::Result<()> {
        if !self.in_cache_block {
            return Err(invalid_input("record written before any cache name"));
        }
        self.inner.write_u8(Tag::Record as u8).await?;
        self.write_chunk(key).await?;
        self.write_chunk(value).await
    }

    /// Write the terminator, flush, and hand the sink back
    pub async fn finish(mut self) -> std::io::Result<W> {
        self.inner.write_u8(Tag::End as u8).await?;
        self.inner.flush().await?;
        Ok(self.inner)
    }

    async fn write_chunk(&mut self, data: &[u8]) -> std::io::Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| invalid_input("chunk longer than u32::MAX bytes"))?;
        self.inner.write_u32(len).await?;
        self.inner.write_all(data).await
    }
}

/// Reads the item sequence of one transfer
pub struct StreamReader<R> {
    inner: R,
    max_frame_bytes: u32,
    read_timeout: Option<Duration>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> StreamReader<R> {
    /// Read and check the stream header
    pub async fn begin(
        mut inner: R,
        max_frame_bytes: u32,
        read_timeout: Option<Duration>,
    ) -> BootstrapResult<Self> {
        let magic = bounded(read_timeout, inner.read_u32()).await?;
        if magic != STREAM_MAGIC {
            return Err(BootstrapError::protocol(format!(
                "bad stream magic: {magic:#010x}"
            )));
        }
        let version = bounded(read_timeout, inner.read_u8()).await?;
        if version != STREAM_VERSION {
            return Err(BootstrapError::protocol(format!(
                "unsupported stream version {version}"
            )));
        }

        Ok(Self {
            inner,
            max_frame_bytes,
            read_timeout,
            finished: false,
        })
    }

    /// Read the next item
    ///
    /// Calling this again after [`WireItem::End`] is a protocol error.
    pub async fn next_item(&mut self) -> BootstrapResult<WireItem> {
        if self.finished {
            return Err(BootstrapError::protocol("read past stream terminator"));
        }

        let tag = Tag::try_from(bounded(self.read_timeout, self.inner.read_u8()).await?)?;
        match tag {
            Tag::End => {
                self.finished = true;
                Ok(WireItem::End)
            }
            Tag::CacheName => {
                let raw = self.read_chunk().await?;
                let name = String::from_utf8(raw.to_vec())
                    .map_err(|_| BootstrapError::protocol("cache name is not valid UTF-8"))?;
                if name.is_empty() {
                    return Err(BootstrapError::protocol("empty cache name"));
                }
                Ok(WireItem::CacheName(name))
            }
            Tag::Record => {
                let key = self.read_chunk().await?;
                let value = self.read_chunk().await?;
                Ok(WireItem::Record { key, value })
            }
        }
    }

    /// Give the underlying source back
    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn read_chunk(&mut self) -> BootstrapResult<Bytes> {
        let len = bounded(self.read_timeout, self.inner.read_u32()).await?;
        if len > self.max_frame_bytes {
            return Err(BootstrapError::protocol(format!(
                "chunk of {len} bytes exceeds limit of {}",
                self.max_frame_bytes
            )));
        }

        let mut buf = vec![0u8; len as usize];
        bounded(self.read_timeout, self.inner.read_exact(&mut buf)).await?;
        Ok(Bytes::from(buf))
    }
}

async fn bounded<T>(
    limit: Option<Duration>,
    read: impl Future<Output = std::io::Result<T>>,
) -> BootstrapResult<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| BootstrapError::ReadTimeout(limit))?
            .map_err(BootstrapError::from),
        None => read.await.map_err(BootstrapError::from),
    }
}

fn invalid_input(msg: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LIMIT: u32 = 1024;

    async fn encode_two_caches() -> Vec<u8> {
        let mut writer = StreamWriter::begin(Vec::new()).await.unwrap();
        writer.write_cache_name("A").await.unwrap();
        writer.write_record(b"k1", b"v1").await.unwrap();
        writer.write_record(b"k2", b"v2").await.unwrap();
        writer.write_cache_name("B").await.unwrap();
        writer.finish().await.unwrap()
    }

    #[tokio::test]
    async fn test_item_sequence() {
        let data = encode_two_caches().await;
        let mut reader = StreamReader::begin(Cursor::new(data), LIMIT, None)
            .await
            .unwrap();

        let mut items = Vec::new();
        loop {
            let item = reader.next_item().await.unwrap();
            let end = item == WireItem::End;
            items.push(item);
            if end {
                break;
            }
        }

        assert_eq!(
            items,
            vec![
                WireItem::CacheName("A".into()),
                WireItem::Record {
                    key: Bytes::from_static(b"k1"),
                    value: Bytes::from_static(b"v1"),
                },
                WireItem::Record {
                    key: Bytes::from_static(b"k2"),
                    value: Bytes::from_static(b"v2"),
                },
                WireItem::CacheName("B".into()),
                WireItem::End,
            ]
        );

        // the terminator is the last byte on the wire
        assert!(reader.next_item().await.unwrap_err().is_protocol_violation());
        assert_eq!(reader.into_inner().position(), encode_two_caches().await.len() as u64);
    }

    #[tokio::test]
    async fn test_terminator_is_not_a_name() {
        // a cache may be named like a sentinel string without ending the stream
        let mut writer = StreamWriter::begin(Vec::new()).await.unwrap();
        writer.write_cache_name("${SOCKET_CLOSE}").await.unwrap();
        let data = writer.finish().await.unwrap();

        let mut reader = StreamReader::begin(Cursor::new(data), LIMIT, None)
            .await
            .unwrap();
        assert_eq!(
            reader.next_item().await.unwrap(),
            WireItem::CacheName("${SOCKET_CLOSE}".into())
        );
        assert_eq!(reader.next_item().await.unwrap(), WireItem::End);
    }

    #[tokio::test]
    async fn test_record_before_name_rejected_by_writer() {
        let mut writer = StreamWriter::begin(Vec::new()).await.unwrap();
        let err = writer.write_record(b"k", b"v").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let mut data = StreamWriter::begin(Vec::new())
            .await
            .unwrap()
            .inner;
        data.push(0x7f);

        let mut reader = StreamReader::begin(Cursor::new(data), LIMIT, None)
            .await
            .unwrap();
        assert!(reader.next_item().await.unwrap_err().is_protocol_violation());
    }

    #[tokio::test]
    async fn test_bad_magic() {
        let data = vec![0xde, 0xad, 0xbe, 0xef, STREAM_VERSION];
        let err = StreamReader::begin(Cursor::new(data), LIMIT, None)
            .await
            .err()
            .unwrap();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_oversized_chunk() {
        let mut writer = StreamWriter::begin(Vec::new()).await.unwrap();
        writer.write_cache_name("A").await.unwrap();
        writer.write_record(b"k", &[0u8; 64]).await.unwrap();
        let data = writer.finish().await.unwrap();

        let mut reader = StreamReader::begin(Cursor::new(data), 16, None)
            .await
            .unwrap();
        reader.next_item().await.unwrap();
        assert!(reader.next_item().await.unwrap_err().is_protocol_violation());
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let mut data = encode_two_caches().await;
        data.truncate(data.len() - 1);

        let mut reader = StreamReader::begin(Cursor::new(data), LIMIT, None)
            .await
            .unwrap();
        let err = loop {
            match reader.next_item().await {
                Ok(WireItem::End) => panic!("terminator read from truncated stream"),
                Ok(_) => {}
                Err(e) => break e,
            }
        };
        assert!(matches!(err, BootstrapError::ConnectionFailure(_)));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_u32(STREAM_MAGIC).await.unwrap();
        server.write_u8(STREAM_VERSION).await.unwrap();

        let mut reader = StreamReader::begin(client, LIMIT, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(matches!(
            reader.next_item().await,
            Err(BootstrapError::ReadTimeout(_))
        ));
        drop(server);
    }
}
