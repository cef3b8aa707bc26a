//! The placement driver: one per-place event loop that polls down,
//! intra, and broadcast traffic via flood control (C9), maintains
//! channel ids and the suspension tree, dispatches arriving records to
//! registered analyses (which may be plain handlers or reductions),
//! and reacts to panics (C10). See §4.6-§4.8.

mod analysis;
mod error;
mod flood;
mod panic;
mod place;

pub use analysis::{Analysis, AnalysisOutcome, ReductionAnalysis};
pub use error::{Error, Result};
pub use flood::{Direction, FloodControl};
pub use panic::PanicReceiver;
pub use place::{Place, PlaceConfig, PlaceIo, StepOutcome};
