//! Whole-datagram codec.
//!
//! UDP preserves message boundaries, so the decoder treats everything in the
//! source buffer as exactly one datagram and always consumes it, even when
//! decoding fails.
//!
//! ## Outbound
//! ```text
//! region = id ++ packet fields   (schema walk)
//! if zerocoded: region = zero-code(region)
//! datagram = flags ++ sequence ++ 00 ++ region ++ acks ++ ack count
//! ```
//! When the zero-coded datagram would not fit the MTU, the packet goes out
//! unencoded with the zerocoded flag cleared.

use super::header::{encode_id, Header, FIXED_HEADER_LEN};
use super::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::schema::Catalogue;
use crate::utils::compression;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Default maximum datagram size
pub const DEFAULT_MTU: usize = 1200;

/// A header together with the packet it carries
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub header: Header,
    pub packet: Packet,
}

impl Datagram {
    /// Wrap `packet` with a header derived from its schema
    pub fn new(packet: Packet, sequence: u32, reliable: bool) -> Self {
        let schema = packet.schema();
        let mut header = Header::new(schema.frequency.wire(), schema.id, sequence);
        header.reliable = reliable;
        header.zerocoded = schema.zerocoded;
        Datagram { header, packet }
    }
}

/// Encodes and decodes datagrams against a shared catalogue
#[derive(Debug, Clone)]
pub struct MessageCodec {
    catalogue: Arc<Catalogue>,
    mtu: usize,
}

impl MessageCodec {
    pub fn new(catalogue: Arc<Catalogue>) -> Self {
        Self::with_mtu(catalogue, DEFAULT_MTU)
    }

    pub fn with_mtu(catalogue: Arc<Catalogue>, mtu: usize) -> Self {
        Self { catalogue, mtu }
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        &self.catalogue
    }

    /// Encode a datagram into a fresh buffer
    pub fn encode_datagram(&mut self, datagram: Datagram) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode(datagram, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode one datagram from a byte slice
    pub fn decode_datagram(&mut self, raw: &[u8]) -> Result<Datagram> {
        let mut src = BytesMut::from(raw);
        self.decode(&mut src)?
            .ok_or_else(|| ProtocolError::malformed(crate::error::constants::ERR_SHORT_HEADER))
    }

    fn decode_raw(&self, raw: Bytes) -> Result<Datagram> {
        let (header, body) = Header::decode(&raw)?;
        let schema = self.catalogue.require(header.frequency, header.id)?;
        let packet = Packet::decode_body(schema, body)?;
        trace!(
            packet = %schema.name,
            sequence = header.sequence,
            bytes = raw.len(),
            "Decoded datagram"
        );
        Ok(Datagram { header, packet })
    }
}

impl Decoder for MessageCodec {
    type Item = Datagram;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Datagram>> {
        if src.is_empty() {
            return Ok(None);
        }
        let raw = src.split().freeze();
        self.decode_raw(raw).map(Some)
    }
}

impl Encoder<Datagram> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Datagram, dst: &mut BytesMut) -> Result<()> {
        let Datagram { mut header, packet } = item;

        let mut region = BytesMut::new();
        encode_id(header.frequency, header.id, &mut region);
        packet.encode_body(&mut region)?;

        let ack_len = if header.acks.is_empty() {
            0
        } else {
            1 + 4 * header.acks.len().min(u8::MAX as usize)
        };

        let compressed = if header.zerocoded {
            let budget = self.mtu.saturating_sub(FIXED_HEADER_LEN + ack_len);
            let compressed = compression::maybe_compress(&region, budget);
            if compressed.is_none() {
                debug!(
                    packet = %packet.name(),
                    mtu = self.mtu,
                    "Zero-coded datagram exceeds MTU, sending unencoded"
                );
                header.zerocoded = false;
            }
            compressed
        } else {
            None
        };

        let region = compressed.unwrap_or(region);
        dst.reserve(FIXED_HEADER_LEN + region.len() + ack_len);
        header.encode_fixed(dst);
        dst.put_slice(&region);
        header.encode_acks(dst);
        Ok(())
    }
}
