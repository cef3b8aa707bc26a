//! Record generation: declaring record types, allocating instances, and
//! moving them to and from the wire.
//!
//! A record type is described once as a [`RecordDescriptor`] — a uid and
//! an ordered list of fields, each either a fixed scalar or an array whose
//! length is tracked by a sibling scalar field. Instances are
//! [`RecordInstance`] values built against a shared `Arc<RecordDescriptor>`;
//! field access goes through name- or index-based accessors rather than
//! Rust struct fields, since analyses pick fields by name at runtime (§4.1).
//!
//! The [`define_record!`] macro is a thin convenience layer over this
//! dynamic model: it builds the [`RecordDescriptor`] once (typically via
//! `OnceLock`) and generates typed, panic-free wrapper methods around the
//! [`RecordInstance`] accessors, so call sites look like ordinary struct
//! field access while the underlying representation stays reflective.

mod codec;
mod descriptor;
mod error;
mod instance;
mod value;

pub use codec::{deserialize, extract_uid, serialize};
pub use descriptor::{FieldDescriptor, FieldKind, RecordDescriptor, RecordDescriptorRef};
pub use error::{Error, Result};
pub use instance::RecordInstance;
pub use value::{FieldValue, Scalar, ScalarType};

/// Declares a record type: a name, a uid, and a field list. Expands to a
/// function `$name() -> &'static RecordDescriptorRef` backed by a
/// `OnceLock`, plus a unit struct `$name` whose associated `uid()` returns
/// the descriptor's uid for use in match arms dispatching on
/// [`extract_uid`].
///
/// ```ignore
/// define_record! {
///     CallEnter { uid: 0x1, fields: [
///         rank: Scalar(I32),
///         num_args: Scalar(U32),
///         args: Array(I64, length_field = num_args),
///     ] }
/// }
/// ```
#[macro_export]
macro_rules! define_record {
    ($name:ident { uid: $uid:expr, fields: [ $( $field:ident : $kind:tt ),* $(,)? } }) => {
        #[allow(non_snake_case)]
        pub fn $name() -> &'static $crate::RecordDescriptorRef {
            static DESCRIPTOR: std::sync::OnceLock<$crate::RecordDescriptorRef> =
                std::sync::OnceLock::new();
            DESCRIPTOR.get_or_init(|| {
                let field_names: &[&str] = &[ $( stringify!($field) ),* ];
                let mut fields = Vec::new();
                $( $crate::__define_record_field!(fields, field_names, $field, $kind); )*
                std::sync::Arc::new($crate::RecordDescriptor::new($uid, stringify!($name), fields))
            })
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __define_record_field {
    ($fields:ident, $names:ident, $field:ident, Scalar($ty:ident)) => {
        $fields.push($crate::FieldDescriptor {
            name: stringify!($field).to_string(),
            kind: $crate::FieldKind::Scalar($crate::ScalarType::$ty),
        });
    };
    ($fields:ident, $names:ident, $field:ident, Array($ty:ident, length_field = $len_field:ident)) => {
        $fields.push($crate::FieldDescriptor {
            name: stringify!($field).to_string(),
            kind: $crate::FieldKind::Array {
                element: $crate::ScalarType::$ty,
                length_field: $names
                    .iter()
                    .position(|n| *n == stringify!($len_field))
                    .expect("length_field must name an earlier field in the same define_record! block"),
            },
        });
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn varint_array_descriptor() -> RecordDescriptorRef {
        Arc::new(RecordDescriptor::new(
            0xC0FFEE,
            "VarArray",
            vec![
                FieldDescriptor {
                    name: "rank".to_string(),
                    kind: FieldKind::Scalar(ScalarType::I32),
                },
                FieldDescriptor {
                    name: "num_values".to_string(),
                    kind: FieldKind::Scalar(ScalarType::U32),
                },
                FieldDescriptor {
                    name: "values".to_string(),
                    kind: FieldKind::Array {
                        element: ScalarType::I64,
                        length_field: 1,
                    },
                },
            ],
        ))
    }

    #[test]
    fn unknown_field_name_errors() {
        let descriptor = varint_array_descriptor();
        let record = RecordInstance::new(descriptor);
        assert!(matches!(
            record.read_scalar("nope"),
            Err(Error::UnknownField(name)) if name == "nope"
        ));
    }

    #[test]
    fn array_write_requires_length_field_first() {
        let descriptor = varint_array_descriptor();
        let mut record = RecordInstance::new(descriptor);
        let err = record.write_array_by_copy("values", &[Scalar::I64(1), Scalar::I64(2)]);
        assert!(matches!(err, Err(Error::LengthFieldNotWritten(name)) if name == "values"));
    }

    #[test]
    fn array_write_by_copy_resizes_to_length_field() {
        let descriptor = varint_array_descriptor();
        let mut record = RecordInstance::new(descriptor);
        record.write_scalar("rank", Scalar::I32(7)).unwrap();
        record.write_scalar("num_values", Scalar::U32(3)).unwrap();
        record
            .write_array_by_copy("values", &[Scalar::I64(10), Scalar::I64(20)])
            .unwrap();
        let arr = record.read_array_pointer("values").unwrap();
        assert_eq!(arr, &[Scalar::I64(10), Scalar::I64(20), Scalar::I64(0)]);
    }

    #[test]
    fn rewriting_length_field_resizes_existing_array() {
        let descriptor = varint_array_descriptor();
        let mut record = RecordInstance::new(descriptor);
        record.write_scalar("rank", Scalar::I32(1)).unwrap();
        record.write_scalar("num_values", Scalar::U32(2)).unwrap();
        record
            .write_array_by_copy("values", &[Scalar::I64(1), Scalar::I64(2)])
            .unwrap();
        record.write_scalar("num_values", Scalar::U32(1)).unwrap();
        assert_eq!(record.read_array_pointer("values").unwrap(), &[Scalar::I64(1)]);
    }

    #[test]
    fn array_element_index_out_of_range() {
        let descriptor = varint_array_descriptor();
        let mut record = RecordInstance::new(descriptor);
        record.write_scalar("rank", Scalar::I32(1)).unwrap();
        record.write_scalar("num_values", Scalar::U32(1)).unwrap();
        record.write_array_by_copy("values", &[Scalar::I64(5)]).unwrap();
        assert!(matches!(
            record.write_array_element_by_index("values", 3, Scalar::I64(9)),
            Err(Error::IndexOutOfRange { index: 3, len: 1, .. })
        ));
    }

    #[test]
    fn serialize_requires_every_field_set() {
        let descriptor = varint_array_descriptor();
        let record = RecordInstance::new(descriptor);
        assert!(matches!(serialize(&record), Err(Error::FieldNotSet(name)) if name == "rank"));
    }

    #[test]
    fn serialize_deserialize_round_trip_preserves_fields() {
        let descriptor = varint_array_descriptor();
        let mut record = RecordInstance::new(descriptor.clone());
        record.write_scalar("rank", Scalar::I32(42)).unwrap();
        record.write_scalar("num_values", Scalar::U32(2)).unwrap();
        record
            .write_array_by_copy("values", &[Scalar::I64(100), Scalar::I64(200)])
            .unwrap();

        let bytes = serialize(&record).unwrap();
        assert_eq!(extract_uid(&bytes).unwrap(), descriptor.uid);

        let decoded = deserialize(descriptor, &bytes).unwrap();
        assert_eq!(decoded.read_scalar("rank").unwrap(), Scalar::I32(42));
        assert_eq!(
            decoded.read_array_pointer("values").unwrap(),
            &[Scalar::I64(100), Scalar::I64(200)]
        );
    }

    #[test]
    fn deserialize_rejects_uid_mismatch() {
        let descriptor = varint_array_descriptor();
        let mut record = RecordInstance::new(descriptor.clone());
        record.write_scalar("rank", Scalar::I32(1)).unwrap();
        record.write_scalar("num_values", Scalar::U32(0)).unwrap();
        record.write_array_by_copy("values", &[]).unwrap();
        let bytes = serialize(&record).unwrap();

        let other = Arc::new(RecordDescriptor::new(0xDEAD, "Other", vec![]));
        assert!(matches!(
            deserialize(other, &bytes),
            Err(Error::UidMismatch { .. })
        ));
    }
}
