//! In-process test topology (§8): a root place fed by simulated leaf
//! sends over `gti_protocol::shmem`, with its own would-be parent
//! observed through a second hub so scenario tests can assert on what
//! the root forwards upward. Built for the S1-S6 scenarios; not a
//! general-purpose multi-place simulator (no place here runs its own
//! `Place::run`, only the one under test does).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use gti_channel::ChannelId;
use gti_place::{Analysis, PanicReceiver, Place};
use gti_protocol::shmem::{Hub, ShmemClient};
use gti_protocol::{ChannelIndex, Completion, Protocol, WILDCARD};
use gti_record::{serialize, RecordDescriptorRef, RecordInstance};
use gti_runtime::{build_place, PlaceSetup, ProtocolHandles, StrategyKind, StrategyKinds};

/// Record uid reserved for the finalize broadcast in these scenarios.
/// Picked out of the range real record uids in the tests use.
pub const FINALIZE_UID: u64 = u64::MAX - 1;
/// Record uid reserved for the panic broadcast.
pub const PANIC_UID: u64 = u64::MAX - 2;

/// A simulated leaf: owns one channel on the shared down hub and sends
/// directly into the root's mailbox, bypassing a full `Place` of its
/// own — the scenarios in §8 only assert on the root's behavior. Sends
/// an empty `ChannelId` prefix; `Place::handle_down_message` appends the
/// per-child level itself from the raw protocol channel index a frame
/// arrived on (`SubId::rank(from, channel_fan_in)`), which is already
/// distinct per leaf here since each one gets its own shmem mailbox.
pub struct Leaf {
    client: ShmemClient,
}

impl Leaf {
    pub fn send_record(&self, record: &RecordInstance) {
        let payload = serialize(record).expect("test records always serialize");
        self.send_raw(&payload);
    }

    pub fn send_finalize(&self) {
        self.send_raw(&FINALIZE_UID.to_ne_bytes());
    }

    fn send_raw(&self, payload: &[u8]) {
        let mut framed = ChannelId::new().encode();
        framed.extend_from_slice(payload);
        self.client.ssend(&framed, 0).expect("topology's down hub is never finalized mid-test");
    }
}

/// One root place wired entirely over in-process `shmem` hubs: a down
/// hub its leaves are connected to, and an up hub whose second client
/// plays the role of the root's own parent so tests can observe what
/// gets forwarded.
pub struct Topology {
    place: Place,
    panic_receiver: Arc<PanicReceiver>,
    leaves: Vec<Leaf>,
    up_observer: ShmemClient,
}

impl Topology {
    pub fn builder(num_leaves: u32) -> TopologyBuilder {
        TopologyBuilder {
            num_leaves,
            analyses: Vec::new(),
            descriptors: HashMap::new(),
            strategy: StrategyKind::Simple,
            timeout_interval: Duration::from_millis(20),
        }
    }

    pub fn leaf(&self, index: usize) -> &Leaf {
        &self.leaves[index]
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Steps the root's driver `n` times. Flood control rotates across
    /// four directions, so a handful of steps is enough to guarantee a
    /// message already sitting in a mailbox gets dispatched.
    pub fn step_n(&mut self, n: usize) -> gti_place::Result<()> {
        for _ in 0..n {
            self.place.step()?;
        }
        Ok(())
    }

    /// Runs the root to completion (exits once every leaf has
    /// finalized), per §4.8's shutdown handshake.
    pub fn run_to_shutdown(&mut self) -> gti_place::Result<()> {
        self.place.run()
    }

    /// Forces a timeout sweep without waiting for the configured
    /// interval to elapse, for exercising §4.5's timeout-abort path.
    pub fn force_timeout(&mut self) -> gti_place::Result<()> {
        self.place.force_timeout()
    }

    pub fn panic_receiver(&self) -> &Arc<PanicReceiver> {
        &self.panic_receiver
    }

    /// Non-blocking check for one record the root forwarded upward.
    /// Returns `None` immediately if nothing has arrived yet.
    pub fn try_forwarded(&self) -> Option<(ChannelId, Vec<u8>)> {
        let req = self.up_observer.irecv(vec![0u8; 1 << 16], WILDCARD).ok()?;
        match self.up_observer.test(req).ok()?? {
            Completion::Received { buf, len, .. } => {
                let (channel_id, consumed) = ChannelId::decode(&buf[..len]).ok()?;
                Some((channel_id, buf[consumed..len].to_vec()))
            }
            Completion::Sent => None,
        }
    }
}

pub struct TopologyBuilder {
    num_leaves: u32,
    analyses: Vec<Box<dyn Analysis>>,
    descriptors: HashMap<u64, RecordDescriptorRef>,
    strategy: StrategyKind,
    timeout_interval: Duration,
}

impl TopologyBuilder {
    pub fn with_analysis(mut self, descriptor: RecordDescriptorRef, analysis: Box<dyn Analysis>) -> Self {
        self.descriptors.insert(descriptor.uid, descriptor);
        self.analyses.push(analysis);
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout_interval: Duration) -> Self {
        self.timeout_interval = timeout_interval;
        self
    }

    pub fn build(self) -> Topology {
        let down_hub = Hub::new(0);
        // The root connects first and takes mailbox 0 for itself, so
        // leaves end up at raw channel indices 1..=num_leaves rather
        // than the 0-based rank a real deployment's `SocketProtocol`
        // would assign (there, the root isn't one of its own channels).
        // `SubId::rank` stores whatever it's given with no bound check,
        // and these scenarios only need each leaf to carry a distinct
        // identity, so the offset is cosmetic here.
        let root_down: ShmemClient = down_hub.connect();
        let leaves: Vec<Leaf> = (0..self.num_leaves).map(|_| Leaf { client: down_hub.connect() }).collect();

        let up_hub = Hub::new(1);
        let root_up: ShmemClient = up_hub.connect();
        let up_observer: ShmemClient = up_hub.connect();
        let up_channel: ChannelIndex = 1;

        let broadcast_loop = Hub::new(2).connect();
        let intra_loop = Hub::new(3).connect();

        let setup = PlaceSetup {
            place_id: 0,
            layer: 0,
            up_channel,
            channel_fan_in: self.num_leaves,
            finalize_uid: FINALIZE_UID,
            panic_uid: PANIC_UID,
            out_of_order_uids: HashSet::new(),
            recv_buf_capacity: 1 << 16,
            timeout_interval: self.timeout_interval,
            descriptors: self.descriptors,
            analyses: self.analyses,
        };
        let protocols = ProtocolHandles {
            down: Arc::new(root_down),
            broadcast: Arc::new(broadcast_loop),
            intra: Arc::new(intra_loop),
            up: Arc::new(root_up),
        };
        let kinds = StrategyKinds {
            down: self.strategy,
            up: self.strategy,
            intra: self.strategy,
        };

        let (place, panic_receiver) = build_place(setup, protocols, kinds);
        Topology { place, panic_receiver, leaves, up_observer }
    }
}
