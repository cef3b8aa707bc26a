//! `CountingReduction`: sums one numeric field across a wave of
//! contributions, grounded on the source's `SumFloatReduction` test
//! module. Used directly by the break manager (§4.9, one pair of
//! aggregated request/remove counts) and by the S4/S5 scenario tests.

use std::collections::VecDeque;

use gti_channel::ChannelId;
use gti_record::{RecordInstance, Scalar};

use crate::completion::CompletionTree;
use crate::reduction::{Reduction, ReductionOutcome};

fn scalar_as_i64(value: Scalar) -> Option<i64> {
    match value {
        Scalar::I32(v) => Some(v as i64),
        Scalar::I64(v) => Some(v),
        Scalar::U32(v) => Some(v as i64),
        Scalar::U64(v) => Some(v as i64),
        Scalar::F32(_) | Scalar::F64(_) | Scalar::Bool(_) => None,
    }
}

pub struct CountingReduction {
    field_name: String,
    root_fan_in: u32,
    completion: CompletionTree,
    channels: Vec<ChannelId>,
    sum: i64,
    /// Completion trees for waves a timeout already aborted, still
    /// draining their straggling arrivals (§4.5 "Timeout").
    aborted: VecDeque<CompletionTree>,
}

impl CountingReduction {
    pub fn new(field_name: impl Into<String>, root_fan_in: u32) -> Self {
        CountingReduction {
            field_name: field_name.into(),
            root_fan_in,
            completion: CompletionTree::new(root_fan_in),
            channels: Vec::new(),
            sum: 0,
            aborted: VecDeque::new(),
        }
    }

    /// Running sum for the current (not yet complete) wave.
    pub fn current_sum(&self) -> i64 {
        self.sum
    }
}

impl Reduction for CountingReduction {
    fn contribute(&mut self, channel: &ChannelId, record: &RecordInstance) -> ReductionOutcome {
        let value = match record
            .read_scalar(&self.field_name)
            .ok()
            .and_then(scalar_as_i64)
        {
            Some(v) => v,
            None => {
                return ReductionOutcome::Failure(format!(
                    "field `{}` missing or non-numeric",
                    self.field_name
                ))
            }
        };

        if let Some(front) = self.aborted.front_mut() {
            if !front.has_arrived(channel) {
                front.record_arrival(channel);
                if front.is_complete() {
                    self.aborted.pop_front();
                }
                return ReductionOutcome::Irreducible;
            }
        }

        self.completion.record_arrival(channel);
        self.channels.push(channel.clone());
        self.sum += value;

        if self.completion.is_complete() {
            let released = std::mem::take(&mut self.channels);
            self.sum = 0;
            self.completion = CompletionTree::new(self.root_fan_in);
            tracing::debug!(count = released.len(), "reduction wave complete");
            ReductionOutcome::Success { released }
        } else {
            ReductionOutcome::Waiting
        }
    }

    fn timeout(&mut self) -> Vec<ChannelId> {
        if self.channels.is_empty() {
            return Vec::new();
        }
        let released = std::mem::take(&mut self.channels);
        let stale = std::mem::replace(&mut self.completion, CompletionTree::new(self.root_fan_in));
        self.sum = 0;
        tracing::debug!(released = released.len(), "reduction wave aborted by timeout");
        self.aborted.push_back(stale);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gti_channel::SubId;
    use gti_record::{define_record, RecordInstance};

    define_record! {
        CountEvent { uid: 1, fields: [
            count: Scalar(I64),
        ] }
    }

    fn event(count: i64) -> RecordInstance {
        let mut record = RecordInstance::new(CountEvent().clone());
        record.write_scalar("count", Scalar::I64(count)).unwrap();
        record
    }

    fn channel(from: u32) -> ChannelId {
        ChannelId::with_levels(vec![SubId::rank(from, 2)])
    }

    #[test]
    fn waits_then_succeeds_once_every_source_contributed() {
        let mut reduction = CountingReduction::new("count", 2);
        let first = reduction.contribute(&channel(0), &event(3));
        assert_eq!(first, ReductionOutcome::Waiting);

        let second = reduction.contribute(&channel(1), &event(4));
        match second {
            ReductionOutcome::Success { released } => {
                assert_eq!(released, vec![channel(0)]);
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[test]
    fn timeout_aborts_wave_and_late_arrival_is_irreducible() {
        let mut reduction = CountingReduction::new("count", 2);
        assert_eq!(
            reduction.contribute(&channel(0), &event(3)),
            ReductionOutcome::Waiting
        );

        let released = reduction.timeout();
        assert_eq!(released, vec![channel(0)]);

        let straggler = reduction.contribute(&channel(1), &event(4));
        assert_eq!(straggler, ReductionOutcome::Irreducible);

        let fresh = reduction.contribute(&channel(0), &event(5));
        assert_eq!(fresh, ReductionOutcome::Waiting);
    }
}
