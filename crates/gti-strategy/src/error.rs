/// Strategy-layer errors (§4.3, §7).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("strategy has already shut down")]
    AlreadyShutdown,

    #[error(transparent)]
    Protocol(#[from] gti_protocol::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
