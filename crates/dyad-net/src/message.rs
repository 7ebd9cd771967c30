use bytes::{BufMut, Bytes, BytesMut};
use dyad_types::{DyadCode, Status, StatusCode};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::NetError;

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Magic number stored in the low byte of every checksum.
pub const FRAME_MAGIC_NUM: u8 = 0x86;

/// Maximum body size of a single frame (4 GiB).
pub const FRAME_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameKind {
    /// A call; `word` holds `service_id << 16 | method_id`.
    Request = 1,
    /// One response body of a call. A call may produce any number of these.
    Data = 2,
    /// Terminal response: no more data.
    End = 3,
    /// Terminal response: the call failed with `code`, body is the message.
    Error = 4,
    /// Tag-matched payload; `word` holds the tag.
    Tagged = 5,
}

impl FrameKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, FrameKind::End | FrameKind::Error)
    }
}

/// Wire header prepended to every frame, little-endian:
///
/// ```text
/// [kind u8][flags u8][code u16][checksum u32][word u64][size u64]
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u8,
    pub code: u16,
    pub checksum: u32,
    pub word: u64,
    pub size: u64,
}

impl FrameHeader {
    pub fn for_body(kind: FrameKind, code: u16, word: u64, body: &[u8]) -> Self {
        Self {
            kind,
            flags: 0,
            code,
            checksum: calc_checksum(body),
            word,
            size: body.len() as u64,
        }
    }

    /// Parse and sanity-check a header. The body checksum is verified
    /// separately by [`FrameHeader::validate`] once the body is read.
    pub fn from_bytes(data: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, NetError> {
        let kind = FrameKind::try_from(data[0]).map_err(|_| NetError::InvalidFrameKind(data[0]))?;
        let checksum = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if (checksum & 0xFF) as u8 != FRAME_MAGIC_NUM {
            return Err(NetError::InvalidMagic((checksum & 0xFF) as u8));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&data[8..16]);
        let mut size = [0u8; 8];
        size.copy_from_slice(&data[16..24]);
        let size = u64::from_le_bytes(size);
        if size > FRAME_MAX_SIZE {
            return Err(NetError::MessageTooLarge {
                size,
                max: FRAME_MAX_SIZE,
            });
        }
        Ok(Self {
            kind,
            flags: data[1],
            code: u16::from_le_bytes([data[2], data[3]]),
            checksum,
            word: u64::from_le_bytes(word),
            size,
        })
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = self.kind.into();
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.code.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.word.to_le_bytes());
        buf[16..24].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn validate(&self, body: &[u8]) -> Result<(), NetError> {
        let expected = calc_checksum(body);
        if self.checksum != expected {
            return Err(NetError::ChecksumMismatch {
                expected,
                actual: self.checksum,
            });
        }
        Ok(())
    }
}

/// CRC32C of `data` with the low byte replaced by [`FRAME_MAGIC_NUM`].
pub fn calc_checksum(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    (crc & !0xff) | FRAME_MAGIC_NUM as u32
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub code: u16,
    pub word: u64,
    pub body: Bytes,
}

impl Frame {
    pub fn request(service_id: u16, method_id: u16, body: Bytes) -> Self {
        Self {
            kind: FrameKind::Request,
            code: StatusCode::OK,
            word: ((service_id as u64) << 16) | method_id as u64,
            body,
        }
    }

    pub fn data(body: Bytes) -> Self {
        Self {
            kind: FrameKind::Data,
            code: StatusCode::OK,
            word: 0,
            body,
        }
    }

    pub fn end() -> Self {
        Self {
            kind: FrameKind::End,
            code: DyadCode::NO_DATA,
            word: 0,
            body: Bytes::new(),
        }
    }

    pub fn error(status: &Status) -> Self {
        Self {
            kind: FrameKind::Error,
            code: status.code(),
            word: 0,
            body: status
                .message()
                .map(|m| Bytes::copy_from_slice(m.as_bytes()))
                .unwrap_or_default(),
        }
    }

    pub fn tagged(tag: u64, body: Bytes) -> Self {
        Self {
            kind: FrameKind::Tagged,
            code: StatusCode::OK,
            word: tag,
            body,
        }
    }

    /// `(service_id, method_id)` of a request frame.
    pub fn service_method(&self) -> (u16, u16) {
        ((self.word >> 16) as u16, self.word as u16)
    }

    /// Status carried by an error frame.
    pub fn to_status(&self) -> Status {
        if self.body.is_empty() {
            Status::new(self.code)
        } else {
            Status::with_message(self.code, String::from_utf8_lossy(&self.body).into_owned())
        }
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader::for_body(self.kind, self.code, self.word, &self.body)
    }

    /// Header and body as one contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.body.len());
        buf.put_slice(&self.header().to_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode one complete frame from `data`.
    pub fn decode(data: &[u8]) -> Result<Self, NetError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(NetError::IncompleteHeader {
                need: FRAME_HEADER_SIZE,
                have: data.len(),
            });
        }
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::from_bytes(&raw)?;
        let body = &data[FRAME_HEADER_SIZE..];
        if (body.len() as u64) < header.size {
            return Err(NetError::IncompleteBody {
                need: header.size,
                have: body.len() as u64,
            });
        }
        let body = &body[..header.size as usize];
        header.validate(body)?;
        Ok(Self {
            kind: header.kind,
            code: header.code,
            word: header.word,
            body: Bytes::copy_from_slice(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let hdr = FrameHeader::for_body(FrameKind::Tagged, 0, (3u64 << 32) | 7, b"abc");
        let bytes = hdr.to_bytes();
        assert_eq!(bytes[0], 5);
        assert_eq!(bytes[4], FRAME_MAGIC_NUM);
        assert_eq!(u64::from_le_bytes(bytes[16..24].try_into().unwrap()), 3);
        assert_eq!(FrameHeader::from_bytes(&bytes).unwrap(), hdr);
    }

    #[test]
    fn test_request_word() {
        let frame = Frame::request(2, 9, Bytes::from_static(b"x"));
        assert_eq!(frame.service_method(), (2, 9));
    }

    #[test]
    fn test_error_frame_carries_status() {
        let status = Status::with_message(DyadCode::BAD_FIO, "read /x: gone");
        let frame = Frame::decode(&Frame::error(&status).encode()).unwrap();
        assert_eq!(frame.kind, FrameKind::Error);
        assert_eq!(frame.to_status(), status);
        assert_eq!(Frame::error(&Status::new(DyadCode::NO_TRANSFER_NEEDED)).to_status().message(), None);
    }

    #[test]
    fn test_end_frame_is_terminal() {
        let end = Frame::end();
        assert!(end.kind.is_terminal());
        assert_eq!(end.code, DyadCode::NO_DATA);
        assert!(!FrameKind::Data.is_terminal());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = Frame::data(Bytes::from_static(b"hi")).encode().to_vec();
        bytes[4] = 0x11;
        assert!(matches!(Frame::decode(&bytes), Err(NetError::InvalidMagic(0x11))));
    }

    #[test]
    fn test_bad_kind() {
        let mut bytes = Frame::end().encode().to_vec();
        bytes[0] = 42;
        assert!(matches!(Frame::decode(&bytes), Err(NetError::InvalidFrameKind(42))));
    }

    #[test]
    fn test_corrupted_body() {
        let mut bytes = Frame::data(Bytes::from_static(b"payload")).encode().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(Frame::decode(&bytes), Err(NetError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_truncated() {
        let bytes = Frame::data(Bytes::from_static(b"payload")).encode();
        assert!(matches!(
            Frame::decode(&bytes[..10]),
            Err(NetError::IncompleteHeader { need: 24, have: 10 })
        ));
        assert!(matches!(
            Frame::decode(&bytes[..FRAME_HEADER_SIZE + 3]),
            Err(NetError::IncompleteBody { need: 7, have: 3 })
        ));
    }

    #[test]
    fn test_too_large() {
        let mut hdr = FrameHeader::for_body(FrameKind::Data, 0, 0, b"");
        hdr.size = FRAME_MAX_SIZE + 1;
        assert!(matches!(
            FrameHeader::from_bytes(&hdr.to_bytes()),
            Err(NetError::MessageTooLarge { .. })
        ));
    }
}
