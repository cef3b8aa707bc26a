//! The placement driver (C8): the event loop that polls down, intra,
//! and broadcast traffic, maintains each record's channel id, consults
//! the suspension tree, dispatches to analyses, and forwards records
//! upward. See §4.6.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes};
use gti_channel::{ChannelId, SubId};
use gti_protocol::{ChannelIndex, Completion, Protocol, WILDCARD};
use gti_record::RecordDescriptorRef;
use gti_strategy::buffer::{is_aggregate, AggregateBuffer, BufferPool};
use gti_strategy::{DownStrategy, IntraStrategy, UpStrategy};
use gti_suspend::SuspensionTree;

use crate::analysis::{Analysis, AnalysisOutcome};
use crate::error::{Error, Result};
use crate::flood::{Direction, FloodControl};
use crate::panic::PanicReceiver;

/// Static identity and control-record wiring for one place. Grouped
/// apart from the protocol/strategy handles since it is plain data
/// rather than something with its own lifecycle.
pub struct PlaceConfig {
    pub place_id: u32,
    pub layer: u32,
    /// Number of children feeding this place from the layer below —
    /// the fan-in `get_updated_channel_id` stamps onto each arriving
    /// record's new channel-id level.
    pub channel_fan_in: u32,
    pub finalize_uid: u64,
    pub panic_uid: u64,
    /// Record uids declared out-of-order: they bypass the suspension
    /// tree and are delivered immediately (§5 "Ordering guarantees").
    pub out_of_order_uids: HashSet<u64>,
    pub recv_buf_capacity: usize,
    pub timeout_interval: Duration,
}

/// The three protocol handles a place receives on, and the three
/// strategies it sends through. Bundled together since `Place::new`
/// would otherwise take ten-odd positional arguments.
pub struct PlaceIo {
    pub down_protocol: Arc<dyn Protocol>,
    pub broadcast_protocol: Arc<dyn Protocol>,
    pub intra_protocol: Arc<dyn Protocol>,
    pub up: Arc<dyn UpStrategy>,
    pub down: Arc<dyn DownStrategy>,
    pub intra: Arc<dyn IntraStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Idle,
    Dispatched,
}

pub struct Place {
    config: PlaceConfig,
    io: PlaceIo,
    suspension: SuspensionTree,
    flood: FloodControl,
    /// Backs the `Bytes` an incoming aggregate frame is copied into so
    /// `AggregateBuffer::pooled` has somewhere real to recycle its
    /// storage to once every record inside has been dispatched.
    agg_pool: Arc<BufferPool>,
    panic_receiver: Arc<PanicReceiver>,
    descriptors: HashMap<u64, RecordDescriptorRef>,
    analyses: Vec<Box<dyn Analysis>>,
    uid_index: HashMap<u64, usize>,

    down_recv: Option<gti_protocol::RequestId>,
    broadcast_recv: Option<gti_protocol::RequestId>,
    intra_recv: Option<gti_protocol::RequestId>,

    remaining_children: u32,
    shutdown_ready: bool,
    started: bool,
    last_timeout: Instant,
}

impl Place {
    pub fn new(
        config: PlaceConfig,
        io: PlaceIo,
        panic_receiver: Arc<PanicReceiver>,
        descriptors: HashMap<u64, RecordDescriptorRef>,
        analyses: Vec<Box<dyn Analysis>>,
    ) -> Self {
        let mut uid_index = HashMap::new();
        for (index, analysis) in analyses.iter().enumerate() {
            uid_index.insert(analysis.uid(), index);
            for secondary in analysis.secondary_uids() {
                uid_index.insert(secondary, index);
            }
        }

        let mut flood = FloodControl::new();
        flood.register(Direction::Down, WILDCARD);
        flood.register(Direction::Intra, WILDCARD);
        flood.register(Direction::Broadcast, WILDCARD);
        flood.register(Direction::Up, WILDCARD);

        let remaining_children = config.channel_fan_in;
        let agg_pool = BufferPool::new(config.recv_buf_capacity);
        Place {
            config,
            io,
            suspension: SuspensionTree::new(),
            flood,
            agg_pool,
            panic_receiver,
            descriptors,
            analyses,
            uid_index,
            down_recv: None,
            broadcast_recv: None,
            intra_recv: None,
            remaining_children,
            shutdown_ready: false,
            started: false,
            last_timeout: Instant::now(),
        }
    }

    /// Runs the driver to completion: one dedicated-thread `loop` per
    /// §4.6's "one logical worker" model, exiting once a finalize
    /// broadcast has been observed and propagated, or on a fatal error.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.shutdown_ready {
                return self.shutdown();
            }
            let span = tracing::info_span!("place_step", place_id = self.config.place_id, layer = self.config.layer);
            let _enter = span.enter();
            match self.step() {
                Ok(_) => self.started = true,
                Err(Error::Protocol(gti_protocol::Error::NotInitialized)) if self.started => {
                    tracing::warn!("peer lost after startup; propagating panic");
                    self.panic_receiver.broadcast_panic();
                    let _ = self.shutdown();
                    return Err(Error::PeerLost {
                        place_id: self.config.place_id,
                    });
                }
                Err(e) => return Err(e),
            }
            self.maybe_timeout()?;
        }
    }

    /// One iteration of the driver: select a direction via flood
    /// control, poll it, and dispatch on arrival.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let Some((direction, channel)) = self.flood.select() else {
            return Ok(StepOutcome::Idle);
        };
        let outcome = match direction {
            Direction::Down => self.poll_down()?,
            Direction::Intra => self.poll_intra()?,
            Direction::Broadcast => self.poll_broadcast()?,
            Direction::Up => {
                self.io.up.test()?;
                StepOutcome::Idle
            }
        };
        match outcome {
            StepOutcome::Dispatched => self.flood.mark_good(direction, channel),
            StepOutcome::Idle => self.flood.mark_bad(direction, channel),
        }
        Ok(outcome)
    }

    fn poll_down(&mut self) -> Result<StepOutcome> {
        let req = match self.down_recv {
            Some(req) => req,
            None => {
                let buf = vec![0u8; self.config.recv_buf_capacity];
                let req = self.io.down_protocol.irecv(buf, WILDCARD)?;
                self.down_recv = Some(req);
                req
            }
        };
        match self.io.down_protocol.test(req)? {
            Some(Completion::Received { buf, len, from }) => {
                self.down_recv = None;
                self.handle_down_message(&buf[..len], from)?;
                Ok(StepOutcome::Dispatched)
            }
            _ => Ok(StepOutcome::Idle),
        }
    }

    fn poll_broadcast(&mut self) -> Result<StepOutcome> {
        let req = match self.broadcast_recv {
            Some(req) => req,
            None => {
                let buf = vec![0u8; self.config.recv_buf_capacity];
                let req = self.io.broadcast_protocol.irecv(buf, WILDCARD)?;
                self.broadcast_recv = Some(req);
                req
            }
        };
        match self.io.broadcast_protocol.test(req)? {
            Some(Completion::Received { buf, len, .. }) => {
                self.broadcast_recv = None;
                self.handle_broadcast(&buf[..len])?;
                Ok(StepOutcome::Dispatched)
            }
            _ => Ok(StepOutcome::Idle),
        }
    }

    fn poll_intra(&mut self) -> Result<StepOutcome> {
        let req = match self.intra_recv {
            Some(req) => req,
            None => {
                let buf = vec![0u8; self.config.recv_buf_capacity];
                let req = self.io.intra_protocol.irecv(buf, WILDCARD)?;
                self.intra_recv = Some(req);
                req
            }
        };
        match self.io.intra_protocol.test(req)? {
            Some(Completion::Received { buf, len, .. }) => {
                self.intra_recv = None;
                self.handle_intra(&buf[..len])?;
                Ok(StepOutcome::Dispatched)
            }
            _ => Ok(StepOutcome::Idle),
        }
    }

    /// Entry point for a message arriving from a child: either a single
    /// record (the common case) or an aggregate a `Threaded{Up,Down}`
    /// peer batched several records into (§4.3), each of which is itself
    /// a whole record as the driver would have received it standalone.
    fn handle_down_message(&mut self, buf: &[u8], from: ChannelIndex) -> Result<()> {
        if !is_aggregate(buf) {
            return self.dispatch_down_record(buf, from);
        }
        let mut pooled = self.agg_pool.acquire();
        pooled.put_slice(buf);
        let aggregate = AggregateBuffer::pooled(pooled.freeze(), self.agg_pool.clone());
        for record in aggregate.records() {
            self.dispatch_down_record(record, from)?;
        }
        Ok(())
    }

    /// Steps 5-9 of §4.6's pseudo-contract for one record arriving from
    /// a child.
    fn dispatch_down_record(&mut self, buf: &[u8], from: ChannelIndex) -> Result<()> {
        let (mut channel_id, consumed) = ChannelId::decode(buf)?;
        channel_id.push(SubId::rank(from, self.config.channel_fan_in));
        let payload = &buf[consumed..];
        let uid = gti_record::extract_uid(payload)?;
        let is_finalizer = uid == self.config.finalize_uid;
        let is_out_of_order = self.config.out_of_order_uids.contains(&uid);

        if is_finalizer {
            self.remaining_children = self.remaining_children.saturating_sub(1);
            if self.remaining_children > 0 {
                return Ok(());
            }
            while !self.io.intra.communication_finished() {
                self.io.intra.test()?;
            }
        }

        let (node, any_suspended, any_nonempty) = self.suspension.get_node(&channel_id);
        if (any_suspended || any_nonempty) && !is_out_of_order {
            self.suspension.enqueue(channel_id, payload.to_vec());
            self.flood.note_buffered(Direction::Down, WILDCARD);
            return Ok(());
        }

        self.dispatch(node, &channel_id, payload, uid)?;
        if is_finalizer {
            self.shutdown_ready = true;
        }
        Ok(())
    }

    fn handle_broadcast(&mut self, buf: &[u8]) -> Result<()> {
        let uid = gti_record::extract_uid(buf)?;
        if uid == self.config.panic_uid {
            self.panic_receiver.broadcast_panic();
            return Ok(());
        }
        if uid == self.config.finalize_uid {
            self.shutdown_ready = true;
            return Ok(());
        }
        let channel_id = ChannelId::new();
        let (node, _, _) = self.suspension.get_node(&channel_id);
        self.dispatch(node, &channel_id, buf, uid)
    }

    fn handle_intra(&mut self, buf: &[u8]) -> Result<()> {
        let uid = gti_record::extract_uid(buf)?;
        let channel_id = ChannelId::new();
        let (node, _, _) = self.suspension.get_node(&channel_id);
        self.dispatch(node, &channel_id, buf, uid)
    }

    /// Dispatches one already-admitted record to its owning analysis and
    /// reacts to the outcome: forward, suspend, or unsuspend-and-drain.
    fn dispatch(&mut self, node: gti_suspend::NodeId, channel_id: &ChannelId, payload: &[u8], uid: u64) -> Result<()> {
        let Some(&index) = self.uid_index.get(&uid) else {
            tracing::warn!(uid, "no analysis registered for this record uid; dropping");
            return Ok(());
        };
        let Some(descriptor) = self.descriptors.get(&uid).cloned() else {
            tracing::warn!(uid, "no record descriptor registered; dropping");
            return Ok(());
        };
        let record = gti_record::deserialize(descriptor, payload)?;
        let outcome = self.analyses[index].handle(channel_id, &record);
        tracing::debug!(uid, %channel_id, ?outcome, "dispatched record");

        match outcome {
            AnalysisOutcome::Done => {}
            AnalysisOutcome::Forward => {
                self.forward_upward(channel_id, payload)?;
            }
            AnalysisOutcome::Waiting => {
                self.suspension.set_suspension(node, true, channel_id);
            }
            AnalysisOutcome::Success { released } => {
                self.suspension.set_suspension(node, false, channel_id);
                for channel in &released {
                    let (released_node, _, _) = self.suspension.get_node(channel);
                    self.suspension.set_suspension(released_node, false, channel);
                }
                self.drain_queue()?;
            }
            AnalysisOutcome::Failure(reason) => {
                return Err(Error::AnalysisFailure { uid, reason });
            }
        }
        Ok(())
    }

    fn forward_upward(&self, channel_id: &ChannelId, payload: &[u8]) -> Result<()> {
        let mut framed = channel_id.encode();
        framed.extend_from_slice(payload);
        self.io.up.send(Bytes::from(framed))?;
        Ok(())
    }

    /// Redelivers every record the suspension tree will now release,
    /// following the same dispatch path as a fresh arrival.
    fn drain_queue(&mut self) -> Result<()> {
        while let Some((data, channel_id)) = self.suspension.get_queued_record() {
            self.flood.note_drained(Direction::Down, WILDCARD);
            let uid = gti_record::extract_uid(&data)?;
            let (node, _, _) = self.suspension.get_node(&channel_id);
            self.dispatch(node, &channel_id, &data, uid)?;
        }
        Ok(())
    }

    /// Forces the timeout sweep `run()` otherwise performs once per loop
    /// iteration, regardless of how much time has actually elapsed.
    /// Exposed so embedders driving `step()` directly (tests, a custom
    /// scheduler) can exercise §4.5's timeout-abort path without
    /// entering the blocking `run()` loop.
    pub fn force_timeout(&mut self) -> Result<()> {
        self.last_timeout = Instant::now() - self.config.timeout_interval;
        self.maybe_timeout()
    }

    fn maybe_timeout(&mut self) -> Result<()> {
        if self.last_timeout.elapsed() < self.config.timeout_interval {
            return Ok(());
        }
        self.last_timeout = Instant::now();
        let mut released = Vec::new();
        for analysis in &mut self.analyses {
            released.extend(analysis.timeout());
        }
        for channel in &released {
            let (node, _, _) = self.suspension.get_node(channel);
            self.suspension.set_suspension(node, false, channel);
        }
        if !released.is_empty() {
            self.drain_queue()?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        tracing::info!(place_id = self.config.place_id, "shutting down");
        self.io.down.shutdown(true, true)?;
        while !self.io.intra.communication_finished() {
            self.io.intra.test()?;
        }
        self.io.up.shutdown(true, true)?;
        let root = ChannelId::new();
        for analysis in &mut self.analyses {
            analysis.notify_finalize(&root);
        }
        Ok(())
    }
}
