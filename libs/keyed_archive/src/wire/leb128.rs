//! LEB128 variable-length integers.
//!
//! Every length, index, and integer field in the container uses this encoding.
//! Signed values are zig-zag mapped first so small negative numbers stay short.
//!
//! See also: <https://en.wikipedia.org/wiki/LEB128>

use super::FormatError;
use super::read::SliceRead;

/// Returns the low 7 bits of `x`.
#[allow(clippy::cast_possible_truncation)]
fn low_bits(x: u64) -> u8 {
    (x & 0x7F) as u8
}

pub fn write_u64(buf: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        buf.push(low_bits(x) | 0x80);
        x >>= 7;
    }

    buf.push(low_bits(x));
}

pub fn write_i64(buf: &mut Vec<u8>, x: i64) {
    write_u64(buf, zigzag(x));
}

pub fn read_u64(reader: &mut SliceRead<'_>) -> Result<u64, FormatError> {
    let mut x = 0u64;
    let mut s = 0u32;
    loop {
        let b = reader.read_byte()?;
        // ensure the shift isn't greater than the bit-count of `u64`
        if s >= u64::BITS {
            return Err(FormatError::IntegerOverflow);
        }

        // ensure that all bits fit into `u64`
        let tb = u64::from(b & 0x7F);
        let ts = tb << s;
        if ts >> s != tb {
            return Err(FormatError::IntegerOverflow);
        }

        x |= ts;
        s += 7;

        if b < 0x80 {
            // No continuation bit is set
            return Ok(x);
        }
    }
}

pub fn read_i64(reader: &mut SliceRead<'_>) -> Result<i64, FormatError> {
    read_u64(reader).map(unzigzag)
}

/// Reads a LEB128 value that is used as a length or index.
pub fn read_usize(reader: &mut SliceRead<'_>) -> Result<usize, FormatError> {
    let x = read_u64(reader)?;
    usize::try_from(x).map_err(|_| FormatError::IntegerOverflow)
}

#[allow(clippy::cast_sign_loss)]
fn zigzag(value: i64) -> u64 {
    let mut x = (value as u64) << 1;
    if value < 0 {
        x = !x;
    }
    x
}

#[allow(clippy::cast_possible_wrap)]
fn unzigzag(value: u64) -> i64 {
    let mut x = value >> 1;
    if value & 1 != 0 {
        x = !x;
    }
    x as i64
}
