use crate::descriptor::{FieldKind, RecordDescriptorRef};
use crate::error::{Error, Result};
use crate::value::{FieldValue, Scalar};

/// A live record: a descriptor plus the current value of each field.
/// Fields start unset; reading an unset field is an error rather than a
/// silent default, matching the source's "must be initialized before
/// read" convention.
#[derive(Clone, Debug)]
pub struct RecordInstance {
    descriptor: RecordDescriptorRef,
    values: Vec<Option<FieldValue>>,
}

impl RecordInstance {
    pub fn new(descriptor: RecordDescriptorRef) -> Self {
        let values = vec![None; descriptor.fields().len()];
        Self { descriptor, values }
    }

    pub fn descriptor(&self) -> &RecordDescriptorRef {
        &self.descriptor
    }

    fn field_kind(&self, index: usize) -> FieldKind {
        self.descriptor.field(index).expect("index validated by index_of").kind.clone()
    }

    /// Writes a scalar field. If this field is the length field of an
    /// already-populated array field, the array is resized in place
    /// (truncated, or zero-extended) to match the new length — mirroring
    /// the source's "array must resize to the current length field"
    /// behavior for late length updates.
    pub fn write_scalar(&mut self, name: &str, value: Scalar) -> Result<()> {
        let index = self.descriptor.index_of(name)?;
        match self.field_kind(index) {
            FieldKind::Scalar(ty) if ty == value.scalar_type() => {
                self.values[index] = Some(FieldValue::Scalar(value));
            }
            FieldKind::Scalar(_) => {
                return Err(Error::FieldKindMismatch {
                    field: name.to_string(),
                    expected: "scalar",
                })
            }
            FieldKind::Array { .. } => {
                return Err(Error::FieldKindMismatch {
                    field: name.to_string(),
                    expected: "scalar",
                })
            }
        }
        self.resync_dependent_arrays(index, value);
        Ok(())
    }

    fn resync_dependent_arrays(&mut self, length_field_index: usize, new_length: Scalar) {
        let Some(new_len) = new_length.as_length() else {
            return;
        };
        for i in 0..self.values.len() {
            let FieldKind::Array { element, length_field } = self.field_kind(i) else {
                continue;
            };
            if length_field != length_field_index {
                continue;
            }
            if let Some(FieldValue::Array(arr)) = &mut self.values[i] {
                arr.resize(new_len, element.zero());
            }
        }
    }

    /// Writes an entire array field by copying `data` in. The field's
    /// length field must already hold a value; `data` is truncated or
    /// zero-padded to that length.
    pub fn write_array_by_copy(&mut self, name: &str, data: &[Scalar]) -> Result<()> {
        let index = self.descriptor.index_of(name)?;
        let FieldKind::Array { element, length_field } = self.field_kind(index) else {
            return Err(Error::FieldKindMismatch {
                field: name.to_string(),
                expected: "array",
            });
        };
        let len = match &self.values[length_field] {
            Some(FieldValue::Scalar(s)) => s
                .as_length()
                .expect("length field scalar type guarantees non-negative length"),
            _ => return Err(Error::LengthFieldNotWritten(name.to_string())),
        };
        let mut owned = data.to_vec();
        owned.resize(len, element.zero());
        self.values[index] = Some(FieldValue::Array(owned));
        Ok(())
    }

    /// Overwrites a single element of an already-allocated array field.
    pub fn write_array_element_by_index(&mut self, name: &str, index: usize, value: Scalar) -> Result<()> {
        let field_index = self.descriptor.index_of(name)?;
        match &mut self.values[field_index] {
            Some(FieldValue::Array(arr)) => {
                let len = arr.len();
                let slot = arr
                    .get_mut(index)
                    .ok_or(Error::IndexOutOfRange {
                        field: name.to_string(),
                        index,
                        len,
                    })?;
                *slot = value;
                Ok(())
            }
            Some(FieldValue::Scalar(_)) => Err(Error::FieldKindMismatch {
                field: name.to_string(),
                expected: "array",
            }),
            None => Err(Error::LengthFieldNotWritten(name.to_string())),
        }
    }

    pub fn read_scalar(&self, name: &str) -> Result<Scalar> {
        let index = self.descriptor.index_of(name)?;
        match &self.values[index] {
            Some(FieldValue::Scalar(s)) => Ok(*s),
            Some(FieldValue::Array(_)) => Err(Error::FieldKindMismatch {
                field: name.to_string(),
                expected: "scalar",
            }),
            None => Err(Error::LengthFieldNotWritten(name.to_string())),
        }
    }

    /// Returns the current contents of an array field, analogous to the
    /// source's "get array pointer" accessor.
    pub fn read_array_pointer(&self, name: &str) -> Result<&[Scalar]> {
        let index = self.descriptor.index_of(name)?;
        match &self.values[index] {
            Some(FieldValue::Array(arr)) => Ok(arr),
            Some(FieldValue::Scalar(_)) => Err(Error::FieldKindMismatch {
                field: name.to_string(),
                expected: "array",
            }),
            None => Err(Error::LengthFieldNotWritten(name.to_string())),
        }
    }

    pub fn read_array_element(&self, name: &str, index: usize) -> Result<Scalar> {
        let arr = self.read_array_pointer(name)?;
        arr.get(index).copied().ok_or_else(|| Error::IndexOutOfRange {
            field: name.to_string(),
            index,
            len: arr.len(),
        })
    }

    pub fn value(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    pub fn set_value(&mut self, index: usize, value: Option<FieldValue>) {
        self.values[index] = value;
    }
}
