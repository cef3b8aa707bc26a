//! Break reduction: discards duplicate `request_break`/`remove_break`
//! arrivals from different children so only one of each propagates, then
//! drives the pure-count [`BreakCounter`] and broadcasts the resulting
//! pause/resume token down to application places.

use std::sync::Arc;

use bytes::Bytes;
use gti_channel::ChannelId;
use gti_place::{Analysis, AnalysisOutcome};
use gti_record::RecordInstance;
use gti_reduce::CompletionTree;
use gti_strategy::DownStrategy;

use crate::manager::{BreakCounter, Transition};

pub struct BreakAnalysis {
    request_uid: u64,
    remove_uid: u64,
    fan_in: u32,
    request_wave: CompletionTree,
    remove_wave: CompletionTree,
    counter: BreakCounter,
    down: Arc<dyn DownStrategy>,
    pause_token: Bytes,
    resume_token: Bytes,
}

impl BreakAnalysis {
    pub fn new(
        request_uid: u64,
        remove_uid: u64,
        fan_in: u32,
        down: Arc<dyn DownStrategy>,
        pause_token: Bytes,
        resume_token: Bytes,
    ) -> Self {
        BreakAnalysis {
            request_uid,
            remove_uid,
            fan_in,
            request_wave: CompletionTree::new(fan_in),
            remove_wave: CompletionTree::new(fan_in),
            counter: BreakCounter::new(),
            down,
            pause_token,
            resume_token,
        }
    }

    pub fn count(&self) -> i64 {
        self.counter.count()
    }

    fn contribute_request(&mut self, channel: &ChannelId) -> AnalysisOutcome {
        if self.request_wave.has_arrived(channel) {
            return AnalysisOutcome::Done;
        }
        self.request_wave.record_arrival(channel);
        if !self.request_wave.is_complete() {
            return AnalysisOutcome::Waiting;
        }
        self.request_wave = CompletionTree::new(self.fan_in);
        match self.counter.request() {
            Transition::Paused => match self.down.broadcast(self.pause_token.clone()) {
                Ok(()) => AnalysisOutcome::Done,
                Err(e) => AnalysisOutcome::Failure(e.to_string()),
            },
            Transition::None | Transition::Resumed => AnalysisOutcome::Done,
        }
    }

    fn contribute_remove(&mut self, channel: &ChannelId) -> AnalysisOutcome {
        if self.remove_wave.has_arrived(channel) {
            return AnalysisOutcome::Done;
        }
        self.remove_wave.record_arrival(channel);
        if !self.remove_wave.is_complete() {
            return AnalysisOutcome::Waiting;
        }
        self.remove_wave = CompletionTree::new(self.fan_in);
        match self.counter.remove() {
            Transition::Resumed => match self.down.broadcast(self.resume_token.clone()) {
                Ok(()) => AnalysisOutcome::Done,
                Err(e) => AnalysisOutcome::Failure(e.to_string()),
            },
            Transition::None | Transition::Paused => AnalysisOutcome::Done,
        }
    }
}

impl Analysis for BreakAnalysis {
    fn uid(&self) -> u64 {
        self.request_uid
    }

    fn secondary_uids(&self) -> Vec<u64> {
        vec![self.remove_uid]
    }

    fn handle(&mut self, channel: &ChannelId, record: &RecordInstance) -> AnalysisOutcome {
        let uid = record.descriptor().uid;
        if uid == self.request_uid {
            self.contribute_request(channel)
        } else if uid == self.remove_uid {
            self.contribute_remove(channel)
        } else {
            tracing::warn!(uid, "break analysis received a record it does not own");
            AnalysisOutcome::Done
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gti_channel::SubId;
    use gti_record::define_record;
    use gti_strategy::panic::PanicListener;
    use std::sync::Mutex;

    define_record! {
        RequestBreak { uid: 100, fields: [] }
    }
    define_record! {
        RemoveBreak { uid: 101, fields: [] }
    }

    #[derive(Default)]
    struct RecordingDown {
        broadcasts: Mutex<Vec<Bytes>>,
    }

    impl PanicListener for RecordingDown {
        fn on_panic(&self) {}
    }

    impl DownStrategy for RecordingDown {
        fn broadcast(&self, data: Bytes) -> gti_strategy::Result<()> {
            self.broadcasts.lock().unwrap().push(data);
            Ok(())
        }
        fn test(&self) -> gti_strategy::Result<()> {
            Ok(())
        }
        fn wait(&self) -> gti_strategy::Result<()> {
            Ok(())
        }
        fn acknowledge(&self, _channel: gti_protocol::ChannelIndex) -> gti_strategy::Result<()> {
            Ok(())
        }
        fn shutdown(&self, _flush: bool, _sync: bool) -> gti_strategy::Result<()> {
            Ok(())
        }
        fn flush(&self) -> gti_strategy::Result<()> {
            Ok(())
        }
        fn register_new_client_callback(&self, _callback: gti_protocol::NewClientCallback) {}
    }

    fn channel(rank: u32) -> ChannelId {
        ChannelId::with_levels(vec![SubId::rank(rank, 2)])
    }

    #[test]
    fn duplicate_requests_from_two_children_pause_exactly_once() {
        let down = Arc::new(RecordingDown::default());
        let mut analysis = BreakAnalysis::new(
            100,
            101,
            2,
            down.clone(),
            Bytes::from_static(b"PAUSE"),
            Bytes::from_static(b"RESUME"),
        );
        let record = RecordInstance::new(RequestBreak().clone());

        assert_eq!(analysis.handle(&channel(0), &record), AnalysisOutcome::Waiting);
        assert_eq!(analysis.handle(&channel(1), &record), AnalysisOutcome::Done);
        assert_eq!(analysis.count(), 1);
        assert_eq!(down.broadcasts.lock().unwrap().as_slice(), &[Bytes::from_static(b"PAUSE")]);
    }

    #[test]
    fn request_then_remove_round_trips_through_pause_and_resume() {
        let down = Arc::new(RecordingDown::default());
        let mut analysis = BreakAnalysis::new(
            100,
            101,
            1,
            down.clone(),
            Bytes::from_static(b"PAUSE"),
            Bytes::from_static(b"RESUME"),
        );
        let request = RecordInstance::new(RequestBreak().clone());
        let remove = RecordInstance::new(RemoveBreak().clone());

        assert_eq!(analysis.handle(&channel(0), &request), AnalysisOutcome::Done);
        assert_eq!(analysis.count(), 1);
        assert_eq!(analysis.handle(&channel(0), &remove), AnalysisOutcome::Done);
        assert_eq!(analysis.count(), 0);
        assert_eq!(
            down.broadcasts.lock().unwrap().as_slice(),
            &[Bytes::from_static(b"PAUSE"), Bytes::from_static(b"RESUME")]
        );
    }
}
