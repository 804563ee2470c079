//! Big-endian integer and variable-length-quantity decoding over a byte
//! source.
//!
//! Fixed-width reads serve the chunk headers; VLQs carry delta times and
//! meta/SysEx payload lengths. The 4-byte VLQ bound is the strict SMF limit,
//! not a general VLQ bound.

use crate::error::{Error, Result};
use crate::reader::ByteSource;

/// Standard SMF VLQs terminate within 4 bytes.
const VLQ_MAX_BYTES: usize = 4;

/// Read a big-endian `u16`.
pub fn read_u16(src: &mut dyn ByteSource) -> Result<u16> {
    Ok(u16::from_be_bytes([src.read_fast()?, src.read_fast()?]))
}

/// Read a big-endian `u32`.
pub fn read_u32(src: &mut dyn ByteSource) -> Result<u32> {
    Ok(u32::from_be_bytes([
        src.read_fast()?,
        src.read_fast()?,
        src.read_fast()?,
        src.read_fast()?,
    ]))
}

/// Read a big-endian `u64`.
pub fn read_u64(src: &mut dyn ByteSource) -> Result<u64> {
    let hi = read_u32(src)?;
    let lo = read_u32(src)?;
    Ok(u64::from(hi) << 32 | u64::from(lo))
}

/// Decode a MIDI variable-length quantity: 7 payload bits per byte,
/// big-endian, high bit set on every byte but the last.
pub fn read_vlq(src: &mut dyn ByteSource) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..VLQ_MAX_BYTES {
        let byte = src.read_fast()?;
        value = (value << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::VlqTooLong)
}

/// Append the canonical SMF encoding of `value`. Used by tests and fixture
/// builders; the decoder itself is one-directional.
pub fn encode_vlq(value: u32, out: &mut Vec<u8>) {
    let mut groups = [0u8; 5];
    let mut count = 0;
    let mut rest = value;
    loop {
        groups[count] = (rest & 0x7F) as u8;
        count += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (1..count).rev() {
        out.push(groups[i] | 0x80);
    }
    out.push(groups[0]);
}
