/// Record-layer errors (§4.1, §7). These are fatal to the faulting
/// analysis but recoverable at the placement driver: the record is
/// logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("record has no field named '{0}'")]
    UnknownField(String),

    #[error("index {index} out of range for field '{field}' of length {len}")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    #[error("serialized record uid {found:#x} does not match expected uid {expected:#x}")]
    UidMismatch { expected: u64, found: u64 },

    #[error("serialized record buffer is truncated or otherwise malformed")]
    MalformedRecord,

    #[error("array field '{0}' was written before its length field")]
    LengthFieldNotWritten(String),

    #[error("field '{field}' is not a {expected} field")]
    FieldKindMismatch {
        field: String,
        expected: &'static str,
    },

    #[error("field '{0}' must be written before the record can be serialized")]
    FieldNotSet(String),
}

pub type Result<T> = std::result::Result<T, Error>;
