//! Framing for LIST replies: length prefix (8 bytes LE) + bincode listing. No length cap.

use crate::record::Listing;

/// Size of the length prefix.
pub const LEN_SIZE: usize = 8;

/// Encode a listing into a single frame: 8 bytes LE length + bincode payload.
pub fn encode_listing(listing: &Listing) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(listing).map_err(FrameEncodeError::Encode)?;
    let len = payload.len() as u64;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Error encoding a listing into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
}

/// Payload length announced by a frame header.
pub fn payload_len(header: [u8; LEN_SIZE]) -> u64 {
    u64::from_le_bytes(header)
}

/// Decode a listing from a complete payload (header already stripped).
pub fn decode_listing_payload(payload: &[u8]) -> Result<Listing, FrameDecodeError> {
    bincode::deserialize(payload).map_err(FrameDecodeError::Decode)
}

/// Decode one frame from the front of `bytes`. Returns the listing and the number of bytes consumed.
/// Call with partial buffer; returns error if not enough bytes (caller should try again after more data).
pub fn decode_listing(bytes: &[u8]) -> Result<(Listing, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let mut header = [0u8; LEN_SIZE];
    header.copy_from_slice(&bytes[..LEN_SIZE]);
    let len = usize::try_from(payload_len(header)).map_err(|_| FrameDecodeError::TooLarge)?;
    let end = LEN_SIZE.checked_add(len).ok_or(FrameDecodeError::TooLarge)?;
    if bytes.len() < end {
        return Err(FrameDecodeError::NeedMore);
    }
    let listing = decode_listing_payload(&bytes[LEN_SIZE..end])?;
    Ok((listing, end))
}

/// Error decoding a frame (need more bytes, unaddressable length, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large for this platform")]
    TooLarge,
    #[error("listing truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::hash_hex;
    use crate::record::FileRecord;

    fn listing_of(n: usize) -> Listing {
        (0..n)
            .map(|i| {
                let name = format!("file-{i:05}.dat");
                let hash = hash_hex(name.as_bytes());
                (name, FileRecord { hash, size: i as u64 })
            })
            .collect()
    }

    #[test]
    fn large_listing_is_not_truncated() {
        let listing = listing_of(10_000);
        let frame = encode_listing(&listing).unwrap();
        // Far beyond any fixed receive buffer.
        assert!(frame.len() > 65536);
        let (decoded, n) = decode_listing(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded.len(), 10_000);
        assert_eq!(decoded, listing);
    }

    #[test]
    fn empty_listing() {
        let frame = encode_listing(&Listing::new()).unwrap();
        let (decoded, _) = decode_listing(&frame).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_listing(&listing_of(3)).unwrap();
        assert!(matches!(
            decode_listing(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_listing(&frame[..LEN_SIZE]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_listing(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&4u64.to_le_bytes());
        frame.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(
            decode_listing(&frame),
            Err(FrameDecodeError::Decode(_))
        ));
    }
}
