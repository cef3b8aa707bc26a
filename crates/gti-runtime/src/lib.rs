//! Wires the generic `gti-place` driver to concrete protocol and
//! strategy implementations: the "typed builder" replacing a
//! hypothetical dynamic module factory (§9).

mod runtime;
mod strategy;

pub use runtime::{build_place, PlaceSetup, ProtocolHandles, StrategyKinds};
pub use strategy::{build_down, build_intra, build_up, StrategyKind};

#[cfg(test)]
mod tests {
    use super::*;
    use gti_protocol::shmem::Hub;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn build_place_wires_every_strategy_and_steps_idle() {
        let down = Arc::new(Hub::new(0).connect()) as Arc<dyn gti_protocol::Protocol>;
        let broadcast = Arc::new(Hub::new(1).connect()) as Arc<dyn gti_protocol::Protocol>;
        let intra = Arc::new(Hub::new(2).connect()) as Arc<dyn gti_protocol::Protocol>;
        let up = Arc::new(Hub::new(3).connect()) as Arc<dyn gti_protocol::Protocol>;

        let setup = PlaceSetup {
            place_id: 0,
            layer: 0,
            up_channel: 0,
            channel_fan_in: 0,
            finalize_uid: 1,
            panic_uid: 2,
            out_of_order_uids: HashSet::new(),
            recv_buf_capacity: 4096,
            timeout_interval: Duration::from_secs(60),
            descriptors: HashMap::new(),
            analyses: Vec::new(),
        };
        let protocols = ProtocolHandles { down, broadcast, intra, up };
        let kinds = StrategyKinds {
            down: StrategyKind::Simple,
            up: StrategyKind::Simple,
            intra: StrategyKind::Simple,
        };

        let (mut place, panic_receiver) = build_place(setup, protocols, kinds);
        let outcome = place.step().unwrap();
        assert_eq!(outcome, gti_place::StepOutcome::Idle);

        // every strategy registered itself with the receiver; broadcasting
        // must not panic even though nothing is listening for the effect.
        panic_receiver.broadcast_panic();
    }

    #[test]
    fn threaded_intra_request_falls_back_to_isend() {
        let protocol = Arc::new(Hub::new(4).connect()) as Arc<dyn gti_protocol::Protocol>;
        let (_intra, listener) = build_intra(StrategyKind::Threaded, protocol, 0);
        assert!(listener.upgrade().is_some());
    }
}
