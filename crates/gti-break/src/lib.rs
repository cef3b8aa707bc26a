//! Break manager (C11): notifies application processes of a requested
//! pause and manages resumption. A [`BreakAnalysis`] discards duplicate
//! request/remove arrivals converging from multiple children (only one
//! pair of each should ever propagate) and drives the pure-count
//! [`BreakCounter`], which decides the 0-to-1 (pause) and 1-to-0
//! (resume) edges the rest of the tool reacts to.

mod analysis;
mod manager;

pub use analysis::BreakAnalysis;
pub use manager::{BreakCounter, Transition};
