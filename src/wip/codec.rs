use byteorder::{ByteOrder, LittleEndian};
use ordered_float::OrderedFloat;

use crate::errors::TreeError;
use crate::value::Val;

// One tag byte, then a fixed-width little-endian payload. Strings carry a
// u16 length prefix.
const TAG_INT: u8 = 1;
const TAG_UINT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_NULL: u8 = 5;

/// Appends the encoding of `val` to `buf`.
pub fn encode_val(buf: &mut Vec<u8>, val: &Val) {
    match *val {
        Val::Int(i) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&i.to_le_bytes());
        }
        Val::Uint(u) => {
            buf.push(TAG_UINT);
            buf.extend_from_slice(&u.to_le_bytes());
        }
        Val::Float(f) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&f.into_inner().to_le_bytes());
        }
        Val::Str(ref s) => {
            debug_assert!(s.len() <= u16::MAX as usize);
            buf.push(TAG_STR);
            buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Val::Null => buf.push(TAG_NULL),
    }
}

/// Decodes one value starting at `offset`. Returns the value and the offset
/// of the next one.
pub fn decode_val(buf: &[u8], offset: usize) -> Result<(Val, usize), TreeError> {
    let tag = *buf
        .get(offset)
        .ok_or_else(|| TreeError::Decode(format!("offset {} past end of buffer", offset)))?;
    let payload = &buf[offset + 1..];
    match tag {
        TAG_INT => {
            let bytes = fixed_payload(payload, 8, offset)?;
            Ok((Val::Int(LittleEndian::read_i64(bytes)), offset + 9))
        }
        TAG_UINT => {
            let bytes = fixed_payload(payload, 8, offset)?;
            Ok((Val::Uint(LittleEndian::read_u64(bytes)), offset + 9))
        }
        TAG_FLOAT => {
            let bytes = fixed_payload(payload, 8, offset)?;
            Ok((
                Val::Float(OrderedFloat(LittleEndian::read_f64(bytes))),
                offset + 9,
            ))
        }
        TAG_STR => {
            let len_bytes = fixed_payload(payload, 2, offset)?;
            let len = LittleEndian::read_u16(len_bytes) as usize;
            let start = offset + 3;
            if buf.len() < start + len {
                return Err(TreeError::Decode(format!(
                    "string of length {} at offset {} past end of buffer",
                    len, offset
                )));
            }
            let s = std::str::from_utf8(&buf[start..start + len])
                .map_err(|e| TreeError::Decode(format!("invalid utf-8 at offset {}: {}", offset, e)))?;
            Ok((Val::Str(s.to_string()), start + len))
        }
        TAG_NULL => Ok((Val::Null, offset + 1)),
        _ => Err(TreeError::Decode(format!(
            "unknown value tag {} at offset {}",
            tag, offset
        ))),
    }
}

fn fixed_payload(payload: &[u8], len: usize, offset: usize) -> Result<&[u8], TreeError> {
    if payload.len() < len {
        return Err(TreeError::Decode(format!(
            "truncated value at offset {}",
            offset
        )));
    }
    Ok(&payload[..len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let vals = vec![
            Val::Int(-42),
            Val::Uint(42),
            Val::from(2.75),
            Val::from("mac"),
            Val::from(""),
            Val::Null,
        ];
        let mut buf = Vec::new();
        for v in &vals {
            encode_val(&mut buf, v);
        }
        let mut offset = 0;
        for v in &vals {
            let (decoded, next) = decode_val(&buf, offset).unwrap();
            assert_eq!(&decoded, v);
            offset = next;
        }
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_truncated_buffer() {
        let mut buf = Vec::new();
        encode_val(&mut buf, &Val::Int(1234567));
        assert!(matches!(
            decode_val(&buf[..5], 0),
            Err(TreeError::Decode(_))
        ));
        assert!(matches!(decode_val(&buf, 9), Err(TreeError::Decode(_))));
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(decode_val(&[99], 0), Err(TreeError::Decode(_))));
    }
}
