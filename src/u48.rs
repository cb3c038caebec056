//! Six-byte little-endian unsigned integers, as used throughout the
//! `.template` trailer for sizes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Reads a 6-byte LE unsigned integer, widened into a `u64`.
pub fn read_u48_le<R: Read>(mut r: R) -> io::Result<u64> {
    r.read_uint::<LittleEndian>(6)
}

/// Writes `value` as a 6-byte LE unsigned integer. Panics if `value`
/// does not fit in 48 bits (callers only ever write sizes the decoder
/// itself produced).
pub fn write_u48_le<W: Write>(mut w: W, value: u64) -> io::Result<()> {
    assert!(value < (1u64 << 48), "value {} does not fit in 48 bits", value);
    w.write_uint::<LittleEndian>(value, 6)
}
