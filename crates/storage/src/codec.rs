//! Row codec: length-prefixed typed value tuples.
//!
//! A row serializes as a `u16` column count followed by one tagged value per
//! column: `u8` type tag, then an `i32` for integers, a `u32` length plus
//! bytes for text and blob, and nothing for null. All integers are
//! little-endian. One row occupies one page, starting after the reserved
//! 12-byte page header, so the serialized form is bounded by 4084 bytes.

use crate::{PAGE_SIZE, ROW_HEADER_BYTES};
use common::{DbError, DbResult};
use types::Value;

pub const MAX_COLUMNS: usize = 32;
pub const MAX_ROW_BYTES: usize = PAGE_SIZE - ROW_HEADER_BYTES;

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_BLOB: u8 = 3;

/// Serialize a row. Fails if the row has more than 32 columns or does not
/// fit in a page.
pub fn encode_row(values: &[Value]) -> DbResult<Vec<u8>> {
    if values.len() > MAX_COLUMNS {
        return Err(DbError::Schema(format!(
            "row has {} columns, maximum is {MAX_COLUMNS}",
            values.len()
        )));
    }

    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(&(values.len() as u16).to_le_bytes());

    for value in values {
        match value {
            Value::Null => out.push(TAG_NULL),
            Value::Int(v) => {
                out.push(TAG_INT);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Value::Text(text) => {
                out.push(TAG_TEXT);
                out.extend_from_slice(&(text.len() as u32).to_le_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            Value::Blob(bytes) => {
                out.push(TAG_BLOB);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }

    if out.len() > MAX_ROW_BYTES {
        return Err(DbError::Resource(format!(
            "row of {} bytes exceeds the {MAX_ROW_BYTES}-byte page payload",
            out.len()
        )));
    }

    Ok(out)
}

/// Deserialize a row from a page payload. Trailing bytes beyond the encoded
/// row are ignored (row pages are zero-padded).
pub fn decode_row(buf: &[u8]) -> DbResult<Vec<Value>> {
    let mut reader = Reader { buf, pos: 0 };

    let count = reader.u16()? as usize;
    if count > MAX_COLUMNS {
        return Err(DbError::Corruption(format!(
            "row column count {count} exceeds maximum {MAX_COLUMNS}"
        )));
    }

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = reader.u8()?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_INT => Value::Int(i32::from_le_bytes(reader.take(4)?.try_into().unwrap())),
            TAG_TEXT => {
                let len = reader.u32()? as usize;
                let bytes = reader.take(len)?;
                let text = String::from_utf8(bytes.to_vec())
                    .map_err(|_| DbError::Corruption("row text is not valid utf-8".into()))?;
                Value::Text(text)
            }
            TAG_BLOB => {
                let len = reader.u32()? as usize;
                Value::Blob(reader.take(len)?.to_vec())
            }
            other => {
                return Err(DbError::Corruption(format!(
                    "unrecognized value type tag {other}"
                )));
            }
        };
        values.push(value);
    }

    Ok(values)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> DbResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                DbError::Corruption("row payload overruns the page boundary".into())
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> DbResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> DbResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> DbResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trip_all_variants() {
        let row = vec![
            Value::Int(-7),
            Value::Null,
            Value::Text("hello".into()),
            Value::Blob(vec![0, 255, 128]),
        ];
        let bytes = encode_row(&row).unwrap();
        assert_eq!(decode_row(&bytes).unwrap(), row);
    }

    #[test]
    fn trailing_zero_padding_is_ignored() {
        let row = vec![Value::Int(42)];
        let mut bytes = encode_row(&row).unwrap();
        bytes.resize(MAX_ROW_BYTES, 0);
        assert_eq!(decode_row(&bytes).unwrap(), row);
    }

    #[test]
    fn empty_text_and_blob_round_trip() {
        let row = vec![Value::Text(String::new()), Value::Blob(Vec::new())];
        let bytes = encode_row(&row).unwrap();
        assert_eq!(decode_row(&bytes).unwrap(), row);
    }

    #[test]
    fn too_many_columns_is_rejected() {
        let row = vec![Value::Null; MAX_COLUMNS + 1];
        assert!(matches!(
            encode_row(&row),
            Err(common::DbError::Schema(_))
        ));
    }

    #[test]
    fn oversized_row_is_rejected() {
        let row = vec![Value::Blob(vec![1u8; MAX_ROW_BYTES])];
        assert!(matches!(
            encode_row(&row),
            Err(common::DbError::Resource(_))
        ));
    }

    #[test]
    fn unrecognized_tag_is_corruption() {
        let mut bytes = encode_row(&[Value::Int(1)]).unwrap();
        bytes[2] = 9;
        assert!(matches!(
            decode_row(&bytes),
            Err(common::DbError::Corruption(_))
        ));
    }

    #[test]
    fn truncated_blob_length_is_corruption() {
        let mut bytes = encode_row(&[Value::Blob(vec![1, 2, 3, 4])]).unwrap();
        // Claim more bytes than the buffer holds.
        bytes[3..7].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decode_row(&bytes),
            Err(common::DbError::Corruption(_))
        ));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i32>().prop_map(Value::Int),
            "[a-zA-Z0-9 ]{0,40}".prop_map(Value::Text),
            proptest::collection::vec(any::<u8>(), 0..40).prop_map(Value::Blob),
        ]
    }

    proptest! {
        // deserialize(serialize(r)) == r for any row that fits a page
        #[test]
        fn round_trip_law(row in proptest::collection::vec(arb_value(), 0..=MAX_COLUMNS)) {
            let bytes = encode_row(&row).unwrap();
            prop_assert!(bytes.len() <= MAX_ROW_BYTES);
            prop_assert_eq!(decode_row(&bytes).unwrap(), row);
        }
    }
}
