use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor};

use crate::descriptor::{FieldKind, RecordDescriptorRef};
use crate::error::{Error, Result};
use crate::instance::RecordInstance;
use crate::value::{FieldValue, Scalar};

/// Reads the 8-byte native-endian type uid prefixing a serialized record,
/// without decoding the rest of the buffer. Used by the placement driver
/// (`gti-place`) to dispatch to the right descriptor before a full decode.
pub fn extract_uid(buf: &[u8]) -> Result<u64> {
    let mut cursor = Cursor::new(buf);
    cursor.read_u64::<NativeEndian>().map_err(|_| Error::MalformedRecord)
}

/// Serializes a record as: 8-byte uid, then each field's fixed-width
/// native-endian bytes in descriptor order (scalars as a single value,
/// arrays as their current length's worth of elements back-to-back, with
/// no embedded per-array length — that is recovered from the sibling
/// length field on deserialize).
pub fn serialize(record: &RecordInstance) -> Result<Vec<u8>> {
    let descriptor = record.descriptor();
    let mut out = Vec::new();
    out.write_u64::<NativeEndian>(descriptor.uid)
        .map_err(io_to_malformed)?;

    for (index, field) in descriptor.fields().iter().enumerate() {
        match record.value(index) {
            Some(FieldValue::Scalar(s)) => {
                s.write_native(&mut out).map_err(io_to_malformed)?;
            }
            Some(FieldValue::Array(arr)) => {
                for element in arr {
                    element.write_native(&mut out).map_err(io_to_malformed)?;
                }
            }
            None => return Err(Error::FieldNotSet(field.name.clone())),
        }
    }
    Ok(out)
}

/// Deserializes a record, validating the leading uid against `descriptor`.
/// Array fields are sized from their already-decoded length field, which
/// must precede the array in field order — the same invariant
/// [`RecordInstance::write_array_by_copy`] enforces on the write side.
pub fn deserialize(descriptor: RecordDescriptorRef, buf: &[u8]) -> Result<RecordInstance> {
    let mut cursor = Cursor::new(buf);
    let found = cursor.read_u64::<NativeEndian>().map_err(|_| Error::MalformedRecord)?;
    if found != descriptor.uid {
        return Err(Error::UidMismatch {
            expected: descriptor.uid,
            found,
        });
    }

    let mut record = RecordInstance::new(descriptor.clone());
    for index in 0..descriptor.fields().len() {
        let field = descriptor.field(index).expect("index within bounds");
        match &field.kind {
            FieldKind::Scalar(ty) => {
                let scalar = Scalar::read_native(*ty, &mut cursor).map_err(|_| Error::MalformedRecord)?;
                record.set_value(index, Some(FieldValue::Scalar(scalar)));
            }
            FieldKind::Array { element, length_field } => {
                let len = match record.value(*length_field) {
                    Some(FieldValue::Scalar(s)) => {
                        s.as_length().ok_or(Error::MalformedRecord)?
                    }
                    _ => return Err(Error::MalformedRecord),
                };
                let mut elements = Vec::with_capacity(len);
                for _ in 0..len {
                    elements.push(Scalar::read_native(*element, &mut cursor).map_err(|_| Error::MalformedRecord)?);
                }
                record.set_value(index, Some(FieldValue::Array(elements)));
            }
        }
    }
    Ok(record)
}

fn io_to_malformed(_: io::Error) -> Error {
    Error::MalformedRecord
}
