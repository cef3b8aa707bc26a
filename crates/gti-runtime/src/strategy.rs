//! Concrete strategy construction. Each builder returns both the
//! erased `Arc<dyn ...Strategy>` `Place` drives and a `Weak<dyn
//! PanicListener>` derived from the *same* concrete `Arc` for
//! `PanicReceiver` registration.
//!
//! The two views must come from one concrete `Arc`: an already-erased
//! `Arc<dyn DownStrategy>` cannot itself be downgraded to `Weak<dyn
//! PanicListener>` without unrelated-trait-object-to-trait-object
//! upcasting, which is unstable below Rust 1.86 (this workspace targets
//! 1.70) — so every match arm here builds the concrete type once and
//! derives both handles from it before erasing.

use std::sync::{Arc, Weak};

use gti_protocol::{ChannelIndex, Protocol};
use gti_strategy::down::{IsendDown, SimpleDown, ThreadedDown};
use gti_strategy::intra::{IsendIntra, SimpleIntra};
use gti_strategy::up::{IsendUp, SimpleUp, ThreadedUp};
use gti_strategy::{DownStrategy, IntraStrategy, PanicListener, UpStrategy};

/// Which concrete aggregation strategy to instantiate for a direction.
/// `Threaded` has no intra counterpart in `gti-strategy`; requesting it
/// for intra falls back to `Isend` with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Simple,
    Isend,
    Threaded,
}

pub fn build_down(
    kind: StrategyKind,
    protocol: Arc<dyn Protocol>,
) -> (Arc<dyn DownStrategy>, Weak<dyn PanicListener>) {
    match kind {
        StrategyKind::Simple => {
            let concrete = Arc::new(SimpleDown::new(protocol));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
        StrategyKind::Isend => {
            let concrete = Arc::new(IsendDown::new(protocol));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
        StrategyKind::Threaded => {
            let concrete = Arc::new(ThreadedDown::new(protocol));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
    }
}

pub fn build_up(
    kind: StrategyKind,
    protocol: Arc<dyn Protocol>,
    channel: ChannelIndex,
) -> (Arc<dyn UpStrategy>, Weak<dyn PanicListener>) {
    match kind {
        StrategyKind::Simple => {
            let concrete = Arc::new(SimpleUp::new(protocol, channel));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
        StrategyKind::Isend => {
            let concrete = Arc::new(IsendUp::new(protocol, channel));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
        StrategyKind::Threaded => {
            let concrete = Arc::new(ThreadedUp::new(protocol, channel));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
    }
}

pub fn build_intra(
    kind: StrategyKind,
    protocol: Arc<dyn Protocol>,
    own_place: ChannelIndex,
) -> (Arc<dyn IntraStrategy>, Weak<dyn PanicListener>) {
    let kind = match kind {
        StrategyKind::Threaded => {
            tracing::warn!("no threaded intra strategy exists; falling back to isend");
            StrategyKind::Isend
        }
        other => other,
    };
    match kind {
        StrategyKind::Simple => {
            let concrete = Arc::new(SimpleIntra::new(protocol, own_place));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
        StrategyKind::Isend => {
            let concrete = Arc::new(IsendIntra::new(protocol, own_place));
            (concrete.clone(), Arc::downgrade(&concrete) as Weak<dyn PanicListener>)
        }
        StrategyKind::Threaded => unreachable!("mapped to isend above"),
    }
}
