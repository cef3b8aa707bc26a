//! Every strategy implements [`PanicListener`] so a central `PanicReceiver`
//! (`gti-place`, C10) can notify all of them when a panic condition is
//! raised anywhere in the place, without each strategy polling for it.

/// Receives the notification that the place is entering panic mode.
/// Implementations flush outstanding state and switch to immediate
/// (non-aggregating) sends; see `raise_panic` on `UpStrategy`.
pub trait PanicListener: Send + Sync {
    fn on_panic(&self);
}
