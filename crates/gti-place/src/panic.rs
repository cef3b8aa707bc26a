//! Central panic dispatcher (C10). Strategies register as
//! [`gti_strategy::PanicListener`]s at construction time, as `Weak`
//! references so the receiver never keeps a strategy alive past the
//! `Place` that owns it — mirroring the source's central dispatcher
//! while avoiding the reference cycle a strong reference back to the
//! owning place would create.

use std::sync::{Mutex, Weak};

use gti_strategy::PanicListener;

#[derive(Default)]
pub struct PanicReceiver {
    listeners: Mutex<Vec<Weak<dyn PanicListener>>>,
}

impl PanicReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Weak<dyn PanicListener>) {
        self.listeners.lock().expect("panic listener list poisoned").push(listener);
    }

    /// Invokes `on_panic` on every still-live registered listener,
    /// pruning ones whose owning strategy has already been dropped.
    pub fn broadcast_panic(&self) {
        let mut listeners = self.listeners.lock().expect("panic listener list poisoned");
        listeners.retain(|weak| {
            if let Some(listener) = weak.upgrade() {
                listener.on_panic();
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Flag(AtomicBool);

    impl PanicListener for Flag {
        fn on_panic(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn broadcasts_to_every_live_listener() {
        let receiver = PanicReceiver::new();
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        receiver.register(Arc::downgrade(&flag) as Weak<dyn PanicListener>);

        receiver.broadcast_panic();
        assert!(flag.0.load(Ordering::SeqCst));
    }

    #[test]
    fn dropped_listener_is_pruned_without_panicking() {
        let receiver = PanicReceiver::new();
        let flag = Arc::new(Flag(AtomicBool::new(false)));
        receiver.register(Arc::downgrade(&flag) as Weak<dyn PanicListener>);
        drop(flag);

        receiver.broadcast_panic();
    }
}
