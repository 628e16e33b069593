//! Record-level I/O on a connection's byte stream.
//!
//! `RecordReader` pulls one complete record at a time off an `AsyncRead`,
//! enforcing the per-read timeout, rejecting bad version bytes, and
//! consuming padding. `RecordWriter` serialises records onto an
//! `AsyncWrite`. Both halves are owned exclusively by one connection
//! worker.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::protocol::error::ProtocolError;
use crate::protocol::record::{Record, RecordHeader, RecordType, HEADER_LEN};

/// Reads complete records from a byte stream.
pub struct RecordReader<R> {
    stream: R,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(stream: R, read_timeout: Duration) -> RecordReader<R> {
        RecordReader {
            stream,
            read_timeout,
        }
    }

    /// Read the next record: header, content, then discard padding.
    ///
    /// A peer close on a record boundary surfaces as `ConnectionClosed`;
    /// a close anywhere inside a record is `ShortRead`. Each underlying
    /// read is bounded by the configured timeout.
    pub async fn read_record(&mut self) -> Result<Record, ProtocolError> {
        let mut raw_header = [0u8; HEADER_LEN];
        self.fill(&mut raw_header, true).await?;
        let header = RecordHeader::parse(&raw_header)?;

        let mut content = vec![0u8; header.content_length as usize];
        self.fill(&mut content, false).await?;

        if header.padding_length > 0 {
            let mut padding = [0u8; u8::MAX as usize];
            self.fill(&mut padding[..header.padding_length as usize], false)
                .await?;
        }

        Ok(Record::new(
            header.record_type,
            header.request_id,
            Bytes::from(content),
        ))
    }

    /// Fill `buf` completely, one timed read at a time.
    ///
    /// `at_boundary` distinguishes a clean peer close (no bytes of the next
    /// header yet) from a mid-record truncation.
    async fn fill(&mut self, buf: &mut [u8], at_boundary: bool) -> Result<(), ProtocolError> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = timeout(self.read_timeout, self.stream.read(&mut buf[filled..]))
                .await
                .map_err(|_| ProtocolError::Timeout(self.read_timeout.as_millis() as u64))??;
            if read == 0 {
                if at_boundary && filled == 0 {
                    return Err(ProtocolError::ConnectionClosed);
                }
                return Err(ProtocolError::ShortRead);
            }
            filled += read;
        }
        Ok(())
    }
}

/// Writes records onto a byte stream, reusing one encode buffer.
pub struct RecordWriter<W> {
    stream: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    pub fn new(stream: W) -> RecordWriter<W> {
        RecordWriter {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Serialise and write one record, flushing the socket.
    pub async fn write_record(&mut self, record: &Record) -> Result<(), ProtocolError> {
        self.buf.clear();
        record.encode_into(&mut self.buf)?;
        self.stream.write_all(&self.buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Convenience for records built in place.
    pub async fn write(
        &mut self,
        record_type: RecordType,
        request_id: u16,
        content: Bytes,
    ) -> Result<(), ProtocolError> {
        self.write_record(&Record::new(record_type, request_id, content))
            .await
    }
}
