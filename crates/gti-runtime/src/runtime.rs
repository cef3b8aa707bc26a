//! Assembles protocol handles, strategies, and analyses into a running
//! `gti_place::Place`, the "module factory becomes a typed builder"
//! shape described in §9.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gti_place::{Analysis, PanicReceiver, Place, PlaceIo};
use gti_protocol::{ChannelIndex, Protocol};
use gti_record::RecordDescriptorRef;

use crate::strategy::{build_down, build_intra, build_up, StrategyKind};

/// The three protocol handles a place receives on. Separate from
/// `PlaceIo` because a single protocol implementation (e.g. `Hub`) is
/// typically reused across all three directions, while `PlaceIo` wants
/// each strategy's own erased handle.
pub struct ProtocolHandles {
    pub down: Arc<dyn Protocol>,
    pub broadcast: Arc<dyn Protocol>,
    pub intra: Arc<dyn Protocol>,
    /// The protocol `UpStrategy` sends through, toward this place's
    /// parent. Kept distinct from `down`/`broadcast` since a place
    /// typically reaches its parent over a different `Protocol`
    /// instance (or at least a different channel namespace) than the
    /// one it receives its own children's traffic on.
    pub up: Arc<dyn Protocol>,
}

/// Which concrete aggregation tier to build for each of the three send
/// directions.
pub struct StrategyKinds {
    pub down: StrategyKind,
    pub up: StrategyKind,
    pub intra: StrategyKind,
}

/// Everything `build_place` needs besides the protocol handles and
/// strategy tiers: static identity, control-record wiring, and the
/// place's registered descriptors/analyses. Mirrors
/// `gti_place::PlaceConfig` field-for-field plus the two parameters
/// (`up_channel`, `channel_fan_in`) that crate has no natural source
/// for on its own.
pub struct PlaceSetup {
    pub place_id: u32,
    pub layer: u32,
    /// The channel index this place's `UpStrategy` sends on, i.e. this
    /// place's own rank as seen by its parent.
    pub up_channel: ChannelIndex,
    /// Number of children feeding this place from the layer below.
    /// `gti_config::PlaceConfig` describes the tree's overall fan-out
    /// per level, not "how many of my own children", so the caller
    /// supplies it directly rather than having the builder derive it.
    pub channel_fan_in: u32,
    pub finalize_uid: u64,
    pub panic_uid: u64,
    pub out_of_order_uids: HashSet<u64>,
    pub recv_buf_capacity: usize,
    pub timeout_interval: Duration,
    pub descriptors: HashMap<u64, RecordDescriptorRef>,
    pub analyses: Vec<Box<dyn Analysis>>,
}

/// Builds the strategies for all three directions, registers each with
/// a fresh `PanicReceiver`, and assembles a ready-to-run `Place`.
pub fn build_place(setup: PlaceSetup, protocols: ProtocolHandles, kinds: StrategyKinds) -> (Place, Arc<PanicReceiver>) {
    let panic_receiver = Arc::new(PanicReceiver::new());

    let (down, down_listener) = build_down(kinds.down, protocols.down.clone());
    let (up, up_listener) = build_up(kinds.up, protocols.up, setup.up_channel);
    let (intra, intra_listener) = build_intra(kinds.intra, protocols.intra.clone(), setup.up_channel);

    panic_receiver.register(down_listener);
    panic_receiver.register(up_listener);
    panic_receiver.register(intra_listener);

    let io = PlaceIo {
        down_protocol: protocols.down,
        broadcast_protocol: protocols.broadcast,
        intra_protocol: protocols.intra,
        up,
        down,
        intra,
    };

    let config = gti_place::PlaceConfig {
        place_id: setup.place_id,
        layer: setup.layer,
        channel_fan_in: setup.channel_fan_in,
        finalize_uid: setup.finalize_uid,
        panic_uid: setup.panic_uid,
        out_of_order_uids: setup.out_of_order_uids,
        recv_buf_capacity: setup.recv_buf_capacity,
        timeout_interval: setup.timeout_interval,
    };

    let place = Place::new(config, io, panic_receiver.clone(), setup.descriptors, setup.analyses);
    (place, panic_receiver)
}
