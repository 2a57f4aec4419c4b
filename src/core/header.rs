//! Packet header codec.
//!
//! ## Layout
//! ```text
//! [flags(1)] [sequence(4, BE)] [reserved(1)] [id(1 | 2 | 4)] ... [acks(4n, BE)] [n(1)]
//! ```
//! The id is one byte for High, `FF` + one byte for Medium and `FF FF` + a
//! big-endian u16 for Low. Zero-coding covers everything from the id up to the
//! first ack. Appended acks sit at the very end of the datagram and are never
//! zero-coded.

use crate::error::constants::{ERR_ACK_TRAILER, ERR_LOW_ID_SHORTCUT, ERR_SHORT_HEADER};
use crate::error::{ProtocolError, Result};
use crate::schema::Frequency;
use crate::utils::compression;
use bytes::{BufMut, Bytes, BytesMut};

pub const MSG_ZEROCODED: u8 = 0x80;
pub const MSG_RELIABLE: u8 = 0x40;
pub const MSG_RESENT: u8 = 0x20;
pub const MSG_APPENDED_ACKS: u8 = 0x10;

/// Flags, sequence and reserved byte; never compressed
pub const FIXED_HEADER_LEN: usize = 6;

/// Byte offset of the first id byte; zero-coding starts here
const ID_OFFSET: usize = FIXED_HEADER_LEN;

const ESCAPE: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub reliable: bool,
    pub resent: bool,
    pub zerocoded: bool,
    /// Set on decode when the datagram carried an ack trailer. Encoding
    /// writes the trailer flag whenever `acks` is non-empty.
    pub appended_acks: bool,
    pub sequence: u32,
    pub frequency: Frequency,
    pub id: u16,
    pub acks: Vec<u32>,
}

impl Header {
    pub fn new(frequency: Frequency, id: u16, sequence: u32) -> Self {
        Header {
            reliable: false,
            resent: false,
            zerocoded: false,
            appended_acks: false,
            sequence,
            frequency,
            id,
            acks: Vec::new(),
        }
    }

    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.zerocoded {
            flags |= MSG_ZEROCODED;
        }
        if self.reliable {
            flags |= MSG_RELIABLE;
        }
        if self.resent {
            flags |= MSG_RESENT;
        }
        if !self.acks.is_empty() {
            flags |= MSG_APPENDED_ACKS;
        }
        flags
    }

    /// Bytes taken by the ack trailer of a decoded datagram
    pub fn ack_trailer_len(&self) -> usize {
        if self.appended_acks {
            1 + 4 * self.acks.len()
        } else {
            0
        }
    }

    /// Write flags, sequence and the zero reserved byte
    pub fn encode_fixed(&self, dst: &mut BytesMut) {
        dst.reserve(FIXED_HEADER_LEN);
        dst.put_u8(self.flags());
        dst.put_u32(self.sequence);
        dst.put_u8(0);
    }

    /// Write the fixed bytes followed by the plain frequency id
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.frequency.header_len());
        self.encode_fixed(dst);
        encode_id(self.frequency, self.id, dst);
    }

    /// Append the ack trailer: each ack big-endian, then the count byte.
    /// At most 255 acks fit; callers batch larger sets.
    pub fn encode_acks(&self, dst: &mut BytesMut) {
        let count = self.acks.len().min(u8::MAX as usize);
        if count == 0 {
            return;
        }
        dst.reserve(count * 4 + 1);
        for ack in &self.acks[..count] {
            dst.put_u32(*ack);
        }
        dst.put_u8(count as u8);
    }

    /// Decode the header of a raw datagram and return it with the packet body.
    ///
    /// Acks are peeled from the raw tail first. On a zero-coded datagram
    /// everything between the fixed header and the acks is expanded before the
    /// id is read, so the returned body is always plain.
    ///
    /// A zero-coded Low id whose high byte is `0x00` shows up raw as
    /// `FF FF 00 01 lo`; the run count after that zero must be `0x01`.
    pub fn decode(raw: &Bytes) -> Result<(Header, Bytes)> {
        if raw.len() < ID_OFFSET + 1 {
            return Err(ProtocolError::malformed(ERR_SHORT_HEADER));
        }

        let flags = raw[0];
        let sequence = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let zerocoded = flags & MSG_ZEROCODED != 0;
        let appended_acks = flags & MSG_APPENDED_ACKS != 0;

        let (acks, body_end) = if appended_acks {
            decode_ack_trailer(raw)?
        } else {
            (Vec::new(), raw.len())
        };

        let region = if zerocoded {
            let coded = &raw[ID_OFFSET..body_end];
            if coded.starts_with(&[ESCAPE, ESCAPE, 0x00]) && coded.get(3) != Some(&0x01) {
                return Err(ProtocolError::malformed(ERR_LOW_ID_SHORTCUT));
            }
            let mut expanded = BytesMut::with_capacity(coded.len() * 2);
            compression::expand_into(coded, &mut expanded)?;
            expanded.freeze()
        } else {
            raw.slice(ID_OFFSET..body_end)
        };

        let (frequency, id, id_len) = decode_id(&region)?;

        let header = Header {
            reliable: flags & MSG_RELIABLE != 0,
            resent: flags & MSG_RESENT != 0,
            zerocoded,
            appended_acks,
            sequence,
            frequency,
            id,
            acks,
        };
        Ok((header, region.slice(id_len..)))
    }
}

/// Write the frequency id: one byte for High, `FF` + one byte for Medium,
/// `FF FF` + big-endian u16 otherwise
pub fn encode_id(frequency: Frequency, id: u16, dst: &mut BytesMut) {
    match frequency.wire() {
        Frequency::High => dst.put_u8(id as u8),
        Frequency::Medium => {
            dst.put_u8(ESCAPE);
            dst.put_u8(id as u8);
        }
        _ => {
            dst.put_u8(ESCAPE);
            dst.put_u8(ESCAPE);
            dst.put_u16(id);
        }
    }
}

/// Read the frequency id at the start of `buf`. Returns the wire frequency,
/// the id and the number of bytes it took.
pub fn decode_id(buf: &[u8]) -> Result<(Frequency, u16, usize)> {
    let byte = |offset: usize| -> Result<u8> {
        buf.get(offset)
            .copied()
            .ok_or_else(|| ProtocolError::malformed(ERR_SHORT_HEADER))
    };

    if byte(0)? != ESCAPE {
        Ok((Frequency::High, byte(0)? as u16, 1))
    } else if byte(1)? != ESCAPE {
        Ok((Frequency::Medium, byte(1)? as u16, 2))
    } else {
        let id = u16::from_be_bytes([byte(2)?, byte(3)?]);
        Ok((Frequency::Low, id, 4))
    }
}

/// Peel the ack trailer off the tail. Returns the acks in wire order and the
/// offset of the first ack byte.
fn decode_ack_trailer(buf: &[u8]) -> Result<(Vec<u32>, usize)> {
    let count = buf[buf.len() - 1] as usize;
    let trailer = 1 + count * 4;
    let start = buf
        .len()
        .checked_sub(trailer)
        .filter(|&start| start > ID_OFFSET)
        .ok_or_else(|| ProtocolError::malformed(ERR_ACK_TRAILER))?;

    let acks = buf[start..buf.len() - 1]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((acks, start))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn encoded(header: &Header) -> Vec<u8> {
        let mut dst = BytesMut::new();
        header.encode(&mut dst);
        header.encode_acks(&mut dst);
        dst.to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<(Header, Bytes)> {
        Header::decode(&Bytes::copy_from_slice(bytes))
    }

    #[test]
    fn test_high_header() {
        let mut header = Header::new(Frequency::High, 1, 0x0102_0304);
        header.reliable = true;
        let bytes = encoded(&header);
        assert_eq!(bytes, vec![MSG_RELIABLE, 1, 2, 3, 4, 0, 1]);

        let (decoded, body) = decode(&bytes).unwrap();
        assert!(body.is_empty());
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_medium_and_low_lengths() {
        let mut medium = encoded(&Header::new(Frequency::Medium, 9, 1));
        assert_eq!(&medium[6..], &[0xFF, 9]);
        medium.push(0xAB);
        assert_eq!(&decode(&medium).unwrap().1[..], &[0xAB]);

        let low = encoded(&Header::new(Frequency::Low, 0x0150, 1));
        assert_eq!(&low[6..], &[0xFF, 0xFF, 0x01, 0x50]);
        let (header, body) = decode(&low).unwrap();
        assert_eq!((header.frequency, header.id), (Frequency::Low, 0x0150));
        assert!(body.is_empty());
    }

    #[test]
    fn test_fixed_uses_low_layout() {
        let bytes = encoded(&Header::new(Frequency::Fixed, 0xFFFB, 1));
        assert_eq!(&bytes[6..], &[0xFF, 0xFF, 0xFF, 0xFB]);
        let (header, _) = decode(&bytes).unwrap();
        assert_eq!((header.frequency, header.id), (Frequency::Low, 0xFFFB));
    }

    #[test]
    fn test_reserved_byte_is_zero() {
        let bytes = encoded(&Header::new(Frequency::High, 3, u32::MAX));
        assert_eq!(bytes[5], 0);
    }

    #[test]
    fn test_appended_acks_peeled_from_tail() {
        let mut header = Header::new(Frequency::High, 4, 10);
        header.acks = vec![7, 0x0102_0304];
        let mut bytes = BytesMut::new();
        header.encode(&mut bytes);
        bytes.put_slice(&[0xAA, 0xBB]);
        header.encode_acks(&mut bytes);

        let (decoded, body) = decode(&bytes).unwrap();
        assert!(decoded.appended_acks);
        assert_eq!(decoded.acks, vec![7, 0x0102_0304]);
        assert_eq!(&body[..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_ack_count_past_start_rejected() {
        let bytes = [MSG_APPENDED_ACKS, 0, 0, 0, 1, 0, 5, 0, 0, 0, 9, 3];
        assert!(decode(&bytes).unwrap_err().is_malformed());
    }

    #[test]
    fn test_zerocoded_low_id_shortcut() {
        // id 0x0003 zero-coded: the high byte becomes the run 00 01
        let bytes = [MSG_ZEROCODED, 0, 0, 0, 1, 0, 0xFF, 0xFF, 0x00, 0x01, 0x03, 0x2A];
        let (header, body) = decode(&bytes).unwrap();
        assert_eq!((header.frequency, header.id), (Frequency::Low, 3));
        assert_eq!(&body[..], &[0x2A]);
    }

    #[test]
    fn test_zerocoded_low_id_shortcut_bad_run() {
        let bytes = [MSG_ZEROCODED, 0, 0, 0, 1, 0, 0xFF, 0xFF, 0x00, 0x02, 0x03];
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_zerocoded_id_low_byte_joins_body_run() {
        // id 0x0100 then three zero body bytes: one run of four
        let bytes = [MSG_ZEROCODED, 0, 0, 0, 1, 0, 0xFF, 0xFF, 0x01, 0x00, 0x04, 0x07];
        let (header, body) = decode(&bytes).unwrap();
        assert_eq!((header.frequency, header.id), (Frequency::Low, 0x0100));
        assert_eq!(&body[..], &[0, 0, 0, 7]);
    }

    #[test]
    fn test_zerocoded_medium_id_zero() {
        let bytes = [MSG_ZEROCODED, 0, 0, 0, 1, 0, 0xFF, 0x00, 0x02];
        let (header, body) = decode(&bytes).unwrap();
        assert_eq!((header.frequency, header.id), (Frequency::Medium, 0));
        assert_eq!(&body[..], &[0]);
    }

    #[test]
    fn test_decode_id_widths() {
        assert_eq!(decode_id(&[5, 9]).unwrap(), (Frequency::High, 5, 1));
        assert_eq!(decode_id(&[0xFF, 5]).unwrap(), (Frequency::Medium, 5, 2));
        assert_eq!(decode_id(&[0xFF, 0xFF, 1, 0]).unwrap(), (Frequency::Low, 0x100, 4));
        assert!(decode_id(&[0xFF, 0xFF, 1]).is_err());
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0, 0, 0, 0, 1, 0]).is_err());
        assert!(decode(&[0, 0, 0, 0, 1, 0, 0xFF]).is_err());
        assert!(decode(&[0, 0, 0, 0, 1, 0, 0xFF, 0xFF, 0x01]).is_err());
    }
}
