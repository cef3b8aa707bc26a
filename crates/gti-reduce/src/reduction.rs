//! The [`Reduction`] interface (C7): an analysis that coalesces multiple
//! contributing records into one aggregated record. See §4.5.

use gti_channel::ChannelId;
use gti_record::RecordInstance;

/// Outcome of one contribution to a reduction. Folds the source's
/// SUCCESS/WAITING/IRREDUCIBLE/FAILURE return values together with the
/// `outFinishedChannels` out-parameter into a single sum type so the
/// ownership contract of the channel id is explicit at the type level:
/// on `Waiting` the reduction retains `channel`; on every other outcome
/// the driver owns it (and, for `Success`, everything in `released` too).
#[derive(Debug, Clone, PartialEq)]
pub enum ReductionOutcome {
    /// One aggregate is ready; `released` lists every channel id (other
    /// than the one passed to `contribute`) this wave held that the
    /// driver should now unsuspend.
    Success { released: Vec<ChannelId> },
    /// The wave is still collecting contributions; the reduction keeps
    /// `channel` suspended.
    Waiting,
    /// This record cannot be reduced; the driver should forward it
    /// unchanged.
    Irreducible,
    /// Fatal: the reduction cannot continue. Carried as a plain message
    /// rather than an `Error` type, since it is an analysis outcome, not
    /// a transport or protocol failure.
    Failure(String),
}

/// An analysis that aggregates per-source contributions into one event.
///
/// `timeout` additionally returns the channel ids the reduction was
/// holding for its aborted wave (the source's `I_Reduction::timeout`
/// returns `void` and relies on the caller already owning those ids via
/// the out-parameter list from a prior call; since `timeout` here is the
/// only notification the driver gets of the abort, it must report the
/// freed ids directly).
pub trait Reduction: Send {
    fn contribute(&mut self, channel: &ChannelId, record: &RecordInstance) -> ReductionOutcome;

    fn timeout(&mut self) -> Vec<ChannelId>;
}
