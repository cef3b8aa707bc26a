#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing required configuration key '{0}'")]
    MissingKey(String),

    #[error("configuration key '{key}' value '{value}' is not a valid integer")]
    NotAnInteger { key: String, value: String },

    #[error("configuration key '{key}' has unrecognized value '{value}'")]
    UnknownValue { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;
