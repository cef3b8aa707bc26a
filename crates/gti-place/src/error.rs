#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] gti_protocol::Error),

    #[error(transparent)]
    Strategy(#[from] gti_strategy::Error),

    #[error(transparent)]
    Record(#[from] gti_record::Error),

    #[error(transparent)]
    ChannelCodec(#[from] gti_channel::DecodeError),

    #[error("analysis uid {uid:#x} reported a fatal failure: {reason}")]
    AnalysisFailure { uid: u64, reason: String },

    #[error("peer lost after startup on place {place_id}")]
    PeerLost { place_id: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
