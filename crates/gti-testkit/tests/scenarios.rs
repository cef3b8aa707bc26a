//! End-to-end scenarios S1-S6 (§8), driven entirely through `Topology`
//! against a real `gti_place::Place`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gti_channel::ChannelId;
use gti_place::{Analysis, AnalysisOutcome, ReductionAnalysis};
use gti_record::{define_record, RecordInstance, Scalar};
use gti_reduce::CountingReduction;
use gti_testkit::Topology;

define_record! {
    Wrap { uid: 1234, fields: [ arg1: Scalar(I64), num_arg2: Scalar(U32), arg2: Array(F64, length_field = num_arg2) ] }
}

define_record! {
    Counted { uid: 10, fields: [ n: Scalar(I64) ] }
}

define_record! {
    Marker { uid: 11, fields: [ tag: Scalar(I32) ] }
}

fn wrap_record(arg1: i64, arg2: &[f64]) -> RecordInstance {
    let mut record = RecordInstance::new(Wrap().clone());
    record.write_scalar("arg1", Scalar::I64(arg1)).unwrap();
    record.write_scalar("num_arg2", Scalar::U32(arg2.len() as u32)).unwrap();
    record
        .write_array_by_copy("arg2", &arg2.iter().copied().map(Scalar::F64).collect::<Vec<_>>())
        .unwrap();
    record
}

fn counted_record(n: i64) -> RecordInstance {
    let mut record = RecordInstance::new(Counted().clone());
    record.write_scalar("n", Scalar::I64(n)).unwrap();
    record
}

fn marker_record(tag: i32) -> RecordInstance {
    let mut record = RecordInstance::new(Marker().clone());
    record.write_scalar("tag", Scalar::I32(tag)).unwrap();
    record
}

/// Logs "Wrapped (arg1, arg2)" and counts its own invocations, standing
/// in for the source's free-function callback an analysis ultimately
/// invokes.
struct WrapAnalysis {
    calls: Arc<AtomicU32>,
}

impl Analysis for WrapAnalysis {
    fn uid(&self) -> u64 {
        Wrap().uid
    }

    fn handle(&mut self, _channel: &ChannelId, record: &RecordInstance) -> AnalysisOutcome {
        let arg1 = record.read_scalar("arg1").unwrap();
        let arg2 = record.read_array_pointer("arg2").unwrap().to_vec();
        tracing::info!(?arg1, ?arg2, "Wrapped");
        self.calls.fetch_add(1, Ordering::SeqCst);
        AnalysisOutcome::Done
    }
}

/// A non-reducing analysis that always forwards, used to observe what
/// the suspension tree releases once a reduction completes.
struct ForwardAnalysis;

impl Analysis for ForwardAnalysis {
    fn uid(&self) -> u64 {
        Marker().uid
    }

    fn handle(&mut self, _channel: &ChannelId, _record: &gti_record::RecordInstance) -> AnalysisOutcome {
        AnalysisOutcome::Forward
    }
}

#[test]
fn s1_point_to_point_send_passthrough() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut topology = Topology::builder(1)
        .with_analysis(Wrap().clone(), Box::new(WrapAnalysis { calls: calls.clone() }))
        .build();

    topology.leaf(0).send_record(&wrap_record(1, &[3.0]));
    topology.step_n(1).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn s2_two_records_in_rapid_succession_both_dispatched_in_order() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut topology = Topology::builder(1)
        .with_analysis(Counted().clone(), Box::new(CountAnalysis { calls: calls.clone(), uid: Counted().uid }))
        .build();

    topology.leaf(0).send_record(&counted_record(1));
    topology.leaf(0).send_record(&counted_record(2));
    topology.step_n(2).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

struct CountAnalysis {
    calls: Arc<AtomicU32>,
    uid: u64,
}

impl Analysis for CountAnalysis {
    fn uid(&self) -> u64 {
        self.uid
    }

    fn handle(&mut self, _channel: &ChannelId, _record: &RecordInstance) -> AnalysisOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        AnalysisOutcome::Done
    }
}

#[test]
fn s4_suspension_releases_the_queued_record_once_the_wave_completes() {
    let mut topology = Topology::builder(2)
        .with_analysis(
            Counted().clone(),
            Box::new(ReductionAnalysis::new(Counted().uid, CountingReduction::new("n", 2))),
        )
        .with_analysis(Marker().clone(), Box::new(ForwardAnalysis))
        .build();

    topology.leaf(0).send_record(&counted_record(1));
    topology.step_n(1).unwrap();

    topology.leaf(0).send_record(&marker_record(42));
    topology.step_n(1).unwrap();
    assert!(topology.try_forwarded().is_none(), "marker must stay queued until the wave completes");

    topology.leaf(1).send_record(&counted_record(2));
    topology.step_n(1).unwrap();

    let (_channel, payload) = topology.try_forwarded().expect("marker should be released and forwarded");
    let record = gti_record::deserialize(Marker().clone(), &payload).unwrap();
    assert_eq!(record.read_scalar("tag").unwrap(), Scalar::I32(42));
}

#[test]
fn s5_timeout_abort_delivers_the_stragglers_record() {
    let mut topology = Topology::builder(2)
        .with_analysis(
            Counted().clone(),
            Box::new(ReductionAnalysis::new(Counted().uid, CountingReduction::new("n", 2))),
        )
        .with_analysis(Marker().clone(), Box::new(ForwardAnalysis))
        .with_timeout(Duration::from_millis(1))
        .build();

    topology.leaf(0).send_record(&counted_record(1));
    topology.step_n(1).unwrap();

    topology.leaf(0).send_record(&marker_record(7));
    topology.step_n(1).unwrap();
    assert!(topology.try_forwarded().is_none());

    // L1 never sends; force the timeout sweep the way `run()` would
    // after its configured interval elapses.
    topology.force_timeout().unwrap();

    let (_channel, payload) = topology.try_forwarded().expect("marker should be released once the wave times out");
    let record = gti_record::deserialize(Marker().clone(), &payload).unwrap();
    assert_eq!(record.read_scalar("tag").unwrap(), Scalar::I32(7));
}

#[test]
fn s6_shutdown_handshake_exits_once_every_leaf_finalizes() {
    let mut topology = Topology::builder(2).build();

    topology.leaf(0).send_finalize();
    topology.leaf(1).send_finalize();

    topology.run_to_shutdown().expect("both leaves finalizing must drive the place to a clean exit");
}
