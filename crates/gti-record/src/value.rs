use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// The primitive types a record field may hold. Byte widths are fixed and
/// drive both the generated accessors and the wire codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    Bool,
}

impl ScalarType {
    pub fn byte_width(&self) -> usize {
        match self {
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
            ScalarType::Bool => 1,
        }
    }

    pub fn zero(&self) -> Scalar {
        match self {
            ScalarType::I32 => Scalar::I32(0),
            ScalarType::I64 => Scalar::I64(0),
            ScalarType::U32 => Scalar::U32(0),
            ScalarType::U64 => Scalar::U64(0),
            ScalarType::F32 => Scalar::F32(0.0),
            ScalarType::F64 => Scalar::F64(0.0),
            ScalarType::Bool => Scalar::Bool(false),
        }
    }
}

/// A value of one of the primitive [`ScalarType`]s.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl Scalar {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalar::I32(_) => ScalarType::I32,
            Scalar::I64(_) => ScalarType::I64,
            Scalar::U32(_) => ScalarType::U32,
            Scalar::U64(_) => ScalarType::U64,
            Scalar::F32(_) => ScalarType::F32,
            Scalar::F64(_) => ScalarType::F64,
            Scalar::Bool(_) => ScalarType::Bool,
        }
    }

    /// Interprets this scalar as a non-negative length, used when a
    /// scalar field doubles as an array's length field.
    pub fn as_length(&self) -> Option<usize> {
        match self {
            Scalar::I32(v) if *v >= 0 => Some(*v as usize),
            Scalar::I64(v) if *v >= 0 => Some(*v as usize),
            Scalar::U32(v) => Some(*v as usize),
            Scalar::U64(v) => Some(*v as usize),
            _ => None,
        }
    }

    pub fn write_native(&self, w: &mut impl io::Write) -> io::Result<()> {
        match *self {
            Scalar::I32(v) => w.write_i32::<NativeEndian>(v),
            Scalar::I64(v) => w.write_i64::<NativeEndian>(v),
            Scalar::U32(v) => w.write_u32::<NativeEndian>(v),
            Scalar::U64(v) => w.write_u64::<NativeEndian>(v),
            Scalar::F32(v) => w.write_f32::<NativeEndian>(v),
            Scalar::F64(v) => w.write_f64::<NativeEndian>(v),
            Scalar::Bool(v) => w.write_u8(v as u8),
        }
    }

    pub fn read_native(ty: ScalarType, r: &mut impl io::Read) -> io::Result<Scalar> {
        Ok(match ty {
            ScalarType::I32 => Scalar::I32(r.read_i32::<NativeEndian>()?),
            ScalarType::I64 => Scalar::I64(r.read_i64::<NativeEndian>()?),
            ScalarType::U32 => Scalar::U32(r.read_u32::<NativeEndian>()?),
            ScalarType::U64 => Scalar::U64(r.read_u64::<NativeEndian>()?),
            ScalarType::F32 => Scalar::F32(r.read_f32::<NativeEndian>()?),
            ScalarType::F64 => Scalar::F64(r.read_f64::<NativeEndian>()?),
            ScalarType::Bool => Scalar::Bool(r.read_u8()? != 0),
        })
    }
}

/// The value currently held by a field: a scalar, or (for array fields)
/// a homogeneous vector of scalars sized by the field's length field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            FieldValue::Scalar(s) => Some(*s),
            FieldValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Scalar]> {
        match self {
            FieldValue::Array(a) => Some(a),
            FieldValue::Scalar(_) => None,
        }
    }
}
