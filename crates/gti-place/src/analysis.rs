//! The [`Analysis`] interface: the unit of work a placement driver
//! dispatches a record to, identified by declared record uid. A
//! [`gti_reduce::Reduction`] is an analysis that coalesces contributions
//! (glossary: "Reduction — an analysis that coalesces multiple
//! contributing records into one aggregated record"); [`ReductionAnalysis`]
//! adapts one into this trait so the driver can treat every registered
//! handler uniformly.

use gti_channel::ChannelId;
use gti_record::RecordInstance;
use gti_reduce::{Reduction, ReductionOutcome};

/// Outcome of dispatching one record to an [`Analysis`]. Superset of
/// [`ReductionOutcome`]: plain (non-reducing) analyses only ever return
/// `Done`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Fully handled; nothing further to do with this record.
    Done,
    /// Not handled by this analysis; the driver should forward the
    /// record onward unchanged (reduction IRREDUCIBLE).
    Forward,
    /// Keep `channel` suspended; this analysis is still collecting.
    Waiting,
    /// A wave completed; `released` names every other channel id this
    /// analysis was holding that the driver should now unsuspend.
    Success { released: Vec<ChannelId> },
    /// Fatal: the driver finalizes and exits (§7 "Analysis FAILURE is
    /// fatal").
    Failure(String),
}

pub trait Analysis: Send {
    /// The record uid this analysis owns.
    fn uid(&self) -> u64;

    /// Additional record uids this analysis owns besides `uid()`, for
    /// analyses that react to more than one record kind (e.g. a break
    /// manager's request/remove pair). Default: none.
    fn secondary_uids(&self) -> Vec<u64> {
        Vec::new()
    }

    fn handle(&mut self, channel: &ChannelId, record: &RecordInstance) -> AnalysisOutcome;

    /// Called once per channel id on shutdown propagation (§4.8); the
    /// default is a no-op for analyses with no per-channel state to
    /// release.
    fn notify_finalize(&mut self, _channel: &ChannelId) {}

    /// Called on every driver timeout tick; the default is a no-op.
    /// Reductions override this to abort a WAITING wave (§4.5).
    fn timeout(&mut self) -> Vec<ChannelId> {
        Vec::new()
    }
}

pub struct ReductionAnalysis<R> {
    uid: u64,
    reduction: R,
}

impl<R: Reduction> ReductionAnalysis<R> {
    pub fn new(uid: u64, reduction: R) -> Self {
        ReductionAnalysis { uid, reduction }
    }
}

impl<R: Reduction> Analysis for ReductionAnalysis<R> {
    fn uid(&self) -> u64 {
        self.uid
    }

    fn handle(&mut self, channel: &ChannelId, record: &RecordInstance) -> AnalysisOutcome {
        match self.reduction.contribute(channel, record) {
            ReductionOutcome::Success { released } => AnalysisOutcome::Success { released },
            ReductionOutcome::Waiting => AnalysisOutcome::Waiting,
            ReductionOutcome::Irreducible => AnalysisOutcome::Forward,
            ReductionOutcome::Failure(reason) => AnalysisOutcome::Failure(reason),
        }
    }

    fn timeout(&mut self) -> Vec<ChannelId> {
        self.reduction.timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gti_channel::SubId;
    use gti_reduce::CountingReduction;
    use gti_record::{define_record, RecordInstance, Scalar};

    define_record! {
        Counted { uid: 7, fields: [ n: Scalar(I64) ] }
    }

    #[test]
    fn reduction_analysis_forwards_waiting_then_success() {
        let mut analysis = ReductionAnalysis::new(7, CountingReduction::new("n", 2));
        let mut record = RecordInstance::new(Counted().clone());
        record.write_scalar("n", Scalar::I64(1)).unwrap();

        let c0 = ChannelId::with_levels(vec![SubId::rank(0, 2)]);
        let c1 = ChannelId::with_levels(vec![SubId::rank(1, 2)]);

        assert_eq!(analysis.handle(&c0, &record), AnalysisOutcome::Waiting);
        assert_eq!(
            analysis.handle(&c1, &record),
            AnalysisOutcome::Success { released: vec![c0] }
        );
        assert_eq!(analysis.uid(), 7);
    }
}
