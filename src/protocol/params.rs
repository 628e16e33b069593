//! Name/value pair sublanguage used by `PARAMS` and `GET_VALUES` content.
//!
//! Each pair is `<nameLen><valueLen><nameBytes><valueBytes>`. A length is
//! one byte when below 128, otherwise four bytes big-endian with the top
//! bit of the first byte set. Names and values are opaque byte strings.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::error::ProtocolError;

/// Largest length a 4-byte field can carry once the marker bit is masked.
const MAX_PAIR_LEN: u64 = 0x7FFF_FFFF;

/// Decode one length field, advancing `buf` past it.
pub fn decode_length(buf: &mut &[u8]) -> Result<usize, ProtocolError> {
    if buf.is_empty() {
        return Err(ProtocolError::TruncatedParams);
    }
    let first = buf[0];
    if first < 0x80 {
        buf.advance(1);
        return Ok(first as usize);
    }
    if buf.len() < 4 {
        return Err(ProtocolError::TruncatedParams);
    }
    // The top bit is the four-byte marker, so decoded lengths are always
    // below 2^31; anything larger is unrepresentable on the wire.
    Ok((buf.get_u32() & 0x7FFF_FFFF) as usize)
}

/// Encode one length field. Lengths above 2^31 - 1 cannot be represented.
pub fn encode_length(buf: &mut BytesMut, len: usize) -> Result<(), ProtocolError> {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else if len as u64 <= MAX_PAIR_LEN {
        buf.put_u32(len as u32 | 0x8000_0000);
    } else {
        return Err(ProtocolError::OversizeParameter(len as u64));
    }
    Ok(())
}

/// Append one encoded pair to `buf`.
pub fn encode_pair(buf: &mut BytesMut, name: &[u8], value: &[u8]) -> Result<(), ProtocolError> {
    encode_length(buf, name.len())?;
    encode_length(buf, value.len())?;
    buf.put_slice(name);
    buf.put_slice(value);
    Ok(())
}

/// Encode an ordered sequence of pairs as one block.
pub fn encode_block<'a, I>(pairs: I) -> Result<Bytes, ProtocolError>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut buf = BytesMut::new();
    for (name, value) in pairs {
        encode_pair(&mut buf, name, value)?;
    }
    Ok(buf.freeze())
}

/// Parse a complete block into its pairs, in wire order.
///
/// The whole buffer must be consumed; a pair running past the end of the
/// block is a framing error.
pub fn parse_block(block: &Bytes) -> Result<Vec<(Bytes, Bytes)>, ProtocolError> {
    let mut pairs = Vec::new();
    let mut cursor: &[u8] = block;
    while !cursor.is_empty() {
        let name_len = decode_length(&mut cursor)?;
        let value_len = decode_length(&mut cursor)?;
        if cursor.len() < name_len + value_len {
            return Err(ProtocolError::TruncatedParams);
        }
        let offset = block.len() - cursor.len();
        let name = block.slice(offset..offset + name_len);
        let value = block.slice(offset + name_len..offset + name_len + value_len);
        cursor.advance(name_len + value_len);
        pairs.push((name, value));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lengths_take_one_byte() {
        for len in [0usize, 1, 127] {
            let mut buf = BytesMut::new();
            encode_length(&mut buf, len).unwrap();
            assert_eq!(buf.len(), 1);
            let mut cursor: &[u8] = &buf;
            assert_eq!(decode_length(&mut cursor).unwrap(), len);
        }
    }

    #[test]
    fn long_lengths_take_four_bytes() {
        for len in [128usize, 65536, 0x7FFF_FFFF] {
            let mut buf = BytesMut::new();
            encode_length(&mut buf, len).unwrap();
            assert_eq!(buf.len(), 4);
            assert_eq!(buf[0] & 0x80, 0x80);
            let mut cursor: &[u8] = &buf;
            assert_eq!(decode_length(&mut cursor).unwrap(), len);
        }
    }

    #[test]
    fn oversize_length_is_rejected_on_encode() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_length(&mut buf, 0x8000_0000),
            Err(ProtocolError::OversizeParameter(_))
        ));
    }

    #[test]
    fn block_roundtrip() {
        let long_value = vec![b'v'; 300];
        let block = encode_block([
            (&b"REQUEST_METHOD"[..], &b"GET"[..]),
            (&b"QUERY_STRING"[..], &b""[..]),
            (&b"HTTP_COOKIE"[..], &long_value[..]),
        ])
        .unwrap();

        let pairs = parse_block(&block).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(&pairs[0].0[..], b"REQUEST_METHOD");
        assert_eq!(&pairs[0].1[..], b"GET");
        assert_eq!(&pairs[1].1[..], b"");
        assert_eq!(pairs[2].1.len(), 300);
    }

    #[test]
    fn truncated_block_is_a_framing_error() {
        let block = encode_block([(&b"NAME"[..], &b"value"[..])]).unwrap();
        let cut = block.slice(..block.len() - 1);
        assert!(matches!(
            parse_block(&cut),
            Err(ProtocolError::TruncatedParams)
        ));

        // A lone length byte with no payload behind it.
        let stub = Bytes::from_static(&[5]);
        assert!(parse_block(&stub).is_err());
    }
}
