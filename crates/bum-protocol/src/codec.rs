//! Byte-level encodings carried inside frame bodies and subprocess pipes.
//!
//! Two formats share the same big-endian length prefix style:
//!
//! - packed sequences, `u32 length | bytes` repeated, used for batched image
//!   replies;
//! - cover records, `u32 path_length | u32 data_length | path | data`
//!   repeated, spoken with the cover-extraction subprocess. A record with
//!   zero-length data means the path has no cover art.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::MAX_BODY_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::read_full;

/// Packs a sequence of byte blocks, one length-prefixed block per item.
pub fn pack_sequence<I, T>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut packed = Vec::new();
    for item in items {
        let item = item.as_ref();
        packed.extend_from_slice(&(item.len() as u32).to_be_bytes());
        packed.extend_from_slice(item);
    }
    packed
}

/// Splits a packed sequence back into its blocks.
pub fn unpack_sequence(mut data: &[u8]) -> ProtocolResult<Vec<Vec<u8>>> {
    let mut items = Vec::new();
    while !data.is_empty() {
        if data.len() < 4 {
            return Err(ProtocolError::truncated("sequence length", 4, data.len()));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        data = &data[4..];
        if data.len() < len {
            return Err(ProtocolError::truncated("sequence item", len, data.len()));
        }
        items.push(data[..len].to_vec());
        data = &data[len..];
    }
    Ok(items)
}

/// One `(path, data)` record exchanged with the cover subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverRecord {
    pub path: Vec<u8>,
    pub data: Vec<u8>,
}

impl CoverRecord {
    pub fn new(path: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }

    /// Returns the cover bytes, or `None` if the record says "no art".
    pub fn into_data(self) -> Option<Vec<u8>> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data)
        }
    }

    /// Encodes the record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.path.len() + self.data.len());
        buf.extend_from_slice(&(self.path.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.path);
        buf.extend_from_slice(&self.data);
        buf
    }
}

/// Writes one cover record.
pub async fn write_cover_record<W>(writer: &mut W, record: &CoverRecord) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&record.encode()).await?;
    Ok(())
}

/// Rejects a declared length before anything is allocated for it.
fn checked_len(len: u32) -> ProtocolResult<usize> {
    if len > MAX_BODY_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_BODY_SIZE,
        });
    }
    Ok(len as usize)
}

/// Reads one cover record.
///
/// Returns `Ok(None)` at a clean end of stream; a record cut short is
/// [`ProtocolError::Truncated`].
pub async fn read_cover_record<R>(reader: &mut R) -> ProtocolResult<Option<CoverRecord>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 8];
    let received = read_full(reader, &mut header).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < header.len() {
        return Err(ProtocolError::truncated("cover record header", 8, received));
    }

    let path_len = checked_len(u32::from_be_bytes([header[0], header[1], header[2], header[3]]))?;
    let data_len = checked_len(u32::from_be_bytes([header[4], header[5], header[6], header[7]]))?;

    let mut path = vec![0u8; path_len];
    let received = read_full(reader, &mut path).await?;
    if received < path_len {
        return Err(ProtocolError::truncated("cover record path", path_len, received));
    }

    let mut data = vec![0u8; data_len];
    let received = read_full(reader, &mut data).await?;
    if received < data_len {
        return Err(ProtocolError::truncated("cover record data", data_len, received));
    }

    Ok(Some(CoverRecord { path, data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn packed_sequence_keeps_order_and_empty_entries() {
        let packed = pack_sequence([b"one".as_slice(), b"", b"three"]);
        assert_eq!(&packed[0..4], &3u32.to_be_bytes());

        let items = unpack_sequence(&packed).unwrap();
        assert_eq!(items, vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]);
    }

    #[test]
    fn empty_sequence() {
        assert!(pack_sequence(Vec::<Vec<u8>>::new()).is_empty());
        assert!(unpack_sequence(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_sequence_is_an_error() {
        let mut packed = pack_sequence([b"abcdef"]);
        packed.truncate(7);
        assert!(matches!(
            unpack_sequence(&packed),
            Err(ProtocolError::Truncated { expected: 6, received: 3, .. })
        ));

        assert!(matches!(
            unpack_sequence(&[0, 0]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn cover_records_stream() {
        let mut buffer = Vec::new();
        write_cover_record(&mut buffer, &CoverRecord::new("/a/cover.jpg", b"jpeg".to_vec()))
            .await
            .unwrap();
        write_cover_record(&mut buffer, &CoverRecord::new("/b/track.flac", Vec::new()))
            .await
            .unwrap();

        let mut reader = Cursor::new(buffer);
        let first = read_cover_record(&mut reader).await.unwrap().unwrap();
        assert_eq!(first.path, b"/a/cover.jpg");
        assert_eq!(first.into_data(), Some(b"jpeg".to_vec()));

        let second = read_cover_record(&mut reader).await.unwrap().unwrap();
        assert_eq!(second.path, b"/b/track.flac");
        assert_eq!(second.into_data(), None);

        assert!(read_cover_record(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_record_lengths_are_rejected() {
        let mut header = Vec::new();
        header.extend_from_slice(&4u32.to_be_bytes());
        header.extend_from_slice(&u32::MAX.to_be_bytes());
        header.extend_from_slice(b"/a/b");

        let result = read_cover_record(&mut Cursor::new(header)).await;
        assert!(matches!(
            result,
            Err(ProtocolError::FrameTooLarge { size: u32::MAX, max: MAX_BODY_SIZE })
        ));

        let mut header = Vec::new();
        header.extend_from_slice(&(MAX_BODY_SIZE + 1).to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        let result = read_cover_record(&mut Cursor::new(header)).await;
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn truncated_trailing_record() {
        let mut buffer = CoverRecord::new("/a", b"0123456789".to_vec()).encode();
        buffer.truncate(buffer.len() - 3);

        let mut reader = Cursor::new(buffer);
        let result = read_cover_record(&mut reader).await;
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated {
                what: "cover record data",
                ..
            })
        ));
    }
}
