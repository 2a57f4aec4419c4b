//! Zero-coding: run-length compression of zero bytes.
//!
//! Every `0x00` on the wire is followed by a count byte `k` (1-255) meaning
//! "`k` zero bytes". All other bytes are literal. Runs longer than 255 split
//! into several `(0x00, count)` pairs.

use crate::error::constants::ERR_ZERO_RUN;
use crate::error::{ProtocolError, Result};
use bytes::{BufMut, BytesMut};

/// Upper bound on an expanded body, so a tiny datagram of `00 FF` pairs cannot
/// force an unbounded allocation
pub const MAX_EXPANDED_SIZE: usize = 64 * 1024;

/// Longest zero run a single `(0x00, count)` pair can describe
const MAX_RUN: usize = u8::MAX as usize;

/// Zero-code `data` onto the end of `dst`
pub fn compress_into(data: &[u8], dst: &mut BytesMut) {
    dst.reserve(data.len());
    let mut run = 0usize;

    for &byte in data {
        if byte == 0 {
            run += 1;
            if run == MAX_RUN {
                dst.put_u8(0);
                dst.put_u8(MAX_RUN as u8);
                run = 0;
            }
            continue;
        }
        if run > 0 {
            dst.put_u8(0);
            dst.put_u8(run as u8);
            run = 0;
        }
        dst.put_u8(byte);
    }

    if run > 0 {
        dst.put_u8(0);
        dst.put_u8(run as u8);
    }
}

/// Expand zero-coded `data` onto the end of `dst`
///
/// # Errors
/// `MalformedPacket` if a zero byte has no count, a count is zero, or the
/// expansion would exceed [`MAX_EXPANDED_SIZE`].
pub fn expand_into(data: &[u8], dst: &mut BytesMut) -> Result<()> {
    let start = dst.len();
    let mut iter = data.iter();

    while let Some(&byte) = iter.next() {
        if byte != 0 {
            dst.put_u8(byte);
            continue;
        }
        let count = match iter.next() {
            Some(&count) if count > 0 => count as usize,
            _ => return Err(ProtocolError::malformed(ERR_ZERO_RUN)),
        };
        if dst.len() - start + count > MAX_EXPANDED_SIZE {
            return Err(ProtocolError::MalformedPacket(format!(
                "Zero-coded body expands beyond {MAX_EXPANDED_SIZE} bytes"
            )));
        }
        dst.put_bytes(0, count);
    }

    Ok(())
}

/// Zero-code `data` into a new buffer
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(data.len());
    compress_into(data, &mut out);
    out.to_vec()
}

/// Expand zero-coded `data` into a new buffer
pub fn expand(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = BytesMut::with_capacity(data.len() * 2);
    expand_into(data, &mut out)?;
    Ok(out.to_vec())
}

/// Zero-code `data` only if the result fits in `budget` bytes.
///
/// Returns `None` when the encoded form is larger than `budget`; the caller
/// then sends the data unencoded.
pub fn maybe_compress(data: &[u8], budget: usize) -> Option<BytesMut> {
    let mut out = BytesMut::with_capacity(data.len());
    compress_into(data, &mut out);
    if out.len() <= budget {
        Some(out)
    } else {
        None
    }
}
