//! Compact encoding for monotonic integer sequences.
//!
//! Restart-offset arrays are non-decreasing, so they are stored as a
//! minimum plus bit-packed deltas: `varint len`, then for two or more
//! values `varint min`, `varint width`, and a packed array holding
//! `first - min` followed by each `(delta - min)`. A single value is stored
//! as a plain varint; an empty sequence stores nothing beyond the length.

use crate::encoding::bitpack::{packed_len, BitReader, BitWriter};
use crate::encoding::varint::write_varint;
use crate::encoding::ByteReader;
use crate::error::{Error, Result};

fn bit_width(value: u32) -> u32 {
    32 - value.leading_zeros()
}

/// Appends a non-decreasing sequence to `out`.
pub fn encode_sequence(out: &mut Vec<u8>, values: &[u32]) {
    match values.len() {
        0 => {
            write_varint(out, 0);
        }
        1 => {
            write_varint(out, 1);
            write_varint(out, u64::from(values[0]));
        }
        len => {
            let mut min = values[0];
            let mut max = values[0];
            for pair in values.windows(2) {
                let delta = pair[1] - pair[0];
                min = min.min(delta);
                max = max.max(delta);
            }
            let width = bit_width(max - min);

            write_varint(out, len as u64);
            write_varint(out, u64::from(min));
            write_varint(out, u64::from(width));

            let mut packer = BitWriter::new(out, width);
            packer.add(u64::from(values[0] - min));
            for pair in values.windows(2) {
                packer.add(u64::from((pair[1] - pair[0]) - min));
            }
            packer.finish();
        }
    }
}

/// Decodes a sequence written by [`encode_sequence`], prefixed by
/// `leading_zeros` implicit zero values that were omitted from the wire
/// form.
pub fn decode_sequence(reader: &mut ByteReader<'_>, leading_zeros: usize) -> Result<Vec<u32>> {
    let len = reader.read_varint()? as usize;
    let mut values = vec![0u32; leading_zeros];
    values.reserve(len);

    match len {
        0 => {}
        1 => {
            values.push(read_u32(reader)?);
        }
        _ => {
            let min = read_u32(reader)?;
            let width = read_u32(reader)?;
            if width > 32 {
                return Err(Error::corruption(format!("sequence bit width {}", width)));
            }
            let packed = reader.read_slice(packed_len(len, width))?;
            let mut unpacker = BitReader::new(packed, width);

            let mut current = u64::from(min) + unpacker.read()?;
            values.push(u32::try_from(current)
                .map_err(|_| Error::corruption("sequence value overflows u32"))?);
            for _ in 1..len {
                current += u64::from(min) + unpacker.read()?;
                values.push(u32::try_from(current)
                    .map_err(|_| Error::corruption("sequence value overflows u32"))?);
            }
        }
    }
    Ok(values)
}

fn read_u32(reader: &mut ByteReader<'_>) -> Result<u32> {
    let v = reader.read_varint()?;
    u32::try_from(v).map_err(|_| Error::corruption(format!("sequence value {} overflows u32", v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(values: &[u32], leading_zeros: usize) {
        let mut buf = Vec::new();
        encode_sequence(&mut buf, values);

        let mut reader = ByteReader::new(&buf);
        let decoded = decode_sequence(&mut reader, leading_zeros).unwrap();

        let mut expected = vec![0u32; leading_zeros];
        expected.extend_from_slice(values);
        assert_eq!(decoded, expected);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_empty_and_single() {
        roundtrip(&[], 0);
        roundtrip(&[], 1);
        roundtrip(&[42], 0);
        roundtrip(&[42], 1);
    }

    #[test]
    fn test_regular_sequences() {
        roundtrip(&[0, 10, 20, 30], 0);
        roundtrip(&[4096, 8192, 12288, 16384], 1);
        roundtrip(&[5, 5, 5, 5], 0); // zero deltas, width collapses
        roundtrip(&[1, 100, 101, 5000, 5001], 1);
    }

    #[test]
    fn test_restart_offsets_shape() {
        // the writer omits restart[0] = 0 and the reader reinserts it
        let offsets = [4113u32, 8226, 12339];
        let mut buf = Vec::new();
        encode_sequence(&mut buf, &offsets);

        let mut reader = ByteReader::new(&buf);
        let decoded = decode_sequence(&mut reader, 1).unwrap();
        assert_eq!(decoded, [0, 4113, 8226, 12339]);
    }

    #[test]
    fn test_large_values() {
        roundtrip(&[0, u32::MAX / 2, u32::MAX], 0);
    }
}
