use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::ScalarType;

/// Whether a field is a bare scalar or an array whose length is tracked by
/// another scalar field in the same record.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarType),
    Array {
        element: ScalarType,
        /// Index, within the owning [`RecordDescriptor`], of the scalar
        /// field that holds this array's current length.
        length_field: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
}

/// The declared shape of a record type: a stable `uid` identifying the
/// type on the wire (§4.1, §6), and an ordered list of fields. Field
/// order is significant — it is both the serialization order and the
/// order `define_record!` assigns positional indices.
#[derive(Debug, PartialEq)]
pub struct RecordDescriptor {
    pub uid: u64,
    pub name: String,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
}

impl RecordDescriptor {
    pub fn new(uid: u64, name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            uid,
            name: name.into(),
            fields,
            by_name,
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// For an array field, the index of the scalar field that tracks its
    /// length. Returns [`Error::FieldKindMismatch`] for a scalar field.
    pub fn length_field_of(&self, index: usize) -> Result<usize> {
        match self.fields.get(index).map(|f| &f.kind) {
            Some(FieldKind::Array { length_field, .. }) => Ok(*length_field),
            Some(FieldKind::Scalar(_)) => Err(Error::FieldKindMismatch {
                field: self.fields[index].name.clone(),
                expected: "array",
            }),
            None => Err(Error::UnknownField(index.to_string())),
        }
    }
}

pub type RecordDescriptorRef = Arc<RecordDescriptor>;
