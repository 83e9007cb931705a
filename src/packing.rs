//! Fixed-width bit-packing for numeric matrices (§6).
//!
//! Wire layout: `u32 rows || u32 cols || u8 bit_width || u8 reserved || bits`,
//! bit width one of 16/20/32/64, values packed row-major, least-significant
//! bit first. [`BitWriter`]/[`BitReader`] are explicit bit-cursor types per
//! the Design Notes' guidance to reject truncation up front rather than
//! reading past the end of a buffer.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors from packing/unpacking bit-packed matrices.
#[derive(Debug, Error)]
pub enum PackingError {
    #[error("bit width must be one of 16, 20, 32, 64 (got {0})")]
    InvalidBitWidth(u8),
    #[error("value {value} does not fit in {bits} bits")]
    ValueOverflow { value: u64, bits: u8 },
    #[error("packed bitstream is truncated: needed {needed} bits, had {have}")]
    Truncated { needed: usize, have: usize },
}

fn valid_bit_width(w: u8) -> bool {
    matches!(w, 16 | 20 | 32 | 64)
}

/// An append-only little-endian bit cursor.
pub struct BitWriter {
    buf: Vec<u8>,
    bitpos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            bitpos: 0,
        }
    }

    pub fn write_bits(&mut self, value: u64, width: u8) {
        for i in 0..width {
            let bit = (value >> i) & 1;
            let byte_idx = self.bitpos / 8;
            if byte_idx >= self.buf.len() {
                self.buf.push(0);
            }
            if bit == 1 {
                self.buf[byte_idx] |= 1 << (self.bitpos % 8);
            }
            self.bitpos += 1;
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only little-endian bit cursor that rejects reads past `bit_len`.
pub struct BitReader<'a> {
    buf: &'a [u8],
    bitpos: usize,
    bit_len: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8], bit_len: usize) -> Self {
        Self {
            buf,
            bitpos: 0,
            bit_len,
        }
    }

    pub fn read_bits(&mut self, width: u8) -> Result<u64, PackingError> {
        if self.bitpos + width as usize > self.bit_len {
            return Err(PackingError::Truncated {
                needed: self.bitpos + width as usize,
                have: self.bit_len,
            });
        }
        let mut value = 0u64;
        for i in 0..width {
            let byte_idx = self.bitpos / 8;
            let bit = (self.buf.get(byte_idx).copied().unwrap_or(0) >> (self.bitpos % 8)) & 1;
            value |= (bit as u64) << i;
            self.bitpos += 1;
        }
        Ok(value)
    }
}

/// A self-describing bit-packed row-major matrix of fixed-width integers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PackedMatrix {
    pub rows: u32,
    pub cols: u32,
    pub bit_width: u8,
    pub bits: Vec<u8>,
}

impl PackedMatrix {
    /// Pack a row-major matrix of `u64` values at a fixed bit width.
    pub fn pack(values: &[Vec<u64>], bit_width: u8) -> Result<Self, PackingError> {
        if !valid_bit_width(bit_width) {
            return Err(PackingError::InvalidBitWidth(bit_width));
        }
        let rows = values.len() as u32;
        let cols = values.first().map(|r| r.len()).unwrap_or(0) as u32;
        let max = if bit_width == 64 {
            u64::MAX
        } else {
            (1u64 << bit_width) - 1
        };
        let mut w = BitWriter::new();
        for row in values {
            assert_eq!(row.len() as u32, cols, "ragged matrix rows must share a width");
            for &v in row {
                if v > max {
                    return Err(PackingError::ValueOverflow { value: v, bits: bit_width });
                }
                w.write_bits(v, bit_width);
            }
        }
        Ok(PackedMatrix {
            rows,
            cols,
            bit_width,
            bits: w.into_bytes(),
        })
    }

    /// Unpack into a row-major `u64` matrix, rejecting a truncated payload.
    pub fn unpack(&self) -> Result<Vec<Vec<u64>>, PackingError> {
        if !valid_bit_width(self.bit_width) {
            return Err(PackingError::InvalidBitWidth(self.bit_width));
        }
        let total_bits = self.rows as usize * self.cols as usize * self.bit_width as usize;
        let have_bits = self.bits.len() * 8;
        if total_bits > have_bits {
            return Err(PackingError::Truncated {
                needed: total_bits,
                have: have_bits,
            });
        }
        let mut r = BitReader::new(&self.bits, have_bits);
        let mut out = Vec::with_capacity(self.rows as usize);
        for _ in 0..self.rows {
            let mut row = Vec::with_capacity(self.cols as usize);
            for _ in 0..self.cols {
                row.push(r.read_bits(self.bit_width)?);
            }
            out.push(row);
        }
        Ok(out)
    }

    /// `u32 rows || u32 cols || u8 bit_width || u8 reserved || bits`.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.bits.len());
        out.extend_from_slice(&self.rows.to_le_bytes());
        out.extend_from_slice(&self.cols.to_le_bytes());
        out.push(self.bit_width);
        out.push(0);
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn from_wire(buf: &[u8]) -> Result<Self, PackingError> {
        if buf.len() < 10 {
            return Err(PackingError::Truncated {
                needed: 10 * 8,
                have: buf.len() * 8,
            });
        }
        let rows = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let cols = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let bit_width = buf[8];
        let bits = buf[10..].to_vec();
        Ok(PackedMatrix {
            rows,
            cols,
            bit_width,
            bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip_all_widths() {
        for &width in &[16u8, 20, 32, 64] {
            let max = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
            let values = vec![vec![0, max, max / 2], vec![1, 2, 3]];
            let packed = PackedMatrix::pack(&values, width).unwrap();
            let unpacked = packed.unpack().unwrap();
            assert_eq!(unpacked, values);
        }
    }

    #[test]
    fn wire_roundtrip_preserves_header_and_bits() {
        let values = vec![vec![5u64, 9, 1000]];
        let packed = PackedMatrix::pack(&values, 20).unwrap();
        let wire = packed.to_wire();
        let back = PackedMatrix::from_wire(&wire).unwrap();
        assert_eq!(back, packed);
        assert_eq!(back.unpack().unwrap(), values);
    }

    #[test]
    fn overflowing_value_is_rejected() {
        let values = vec![vec![1u64 << 16]];
        assert!(matches!(
            PackedMatrix::pack(&values, 16),
            Err(PackingError::ValueOverflow { .. })
        ));
    }

    #[test]
    fn truncated_bitstream_is_rejected() {
        let mut packed = PackedMatrix::pack(&[vec![1u64, 2, 3]], 32).unwrap();
        packed.bits.truncate(2);
        assert!(matches!(packed.unpack(), Err(PackingError::Truncated { .. })));
    }

    #[test]
    fn invalid_bit_width_is_rejected() {
        assert!(matches!(
            PackedMatrix::pack(&[vec![1u64]], 24),
            Err(PackingError::InvalidBitWidth(24))
        ));
    }
}
