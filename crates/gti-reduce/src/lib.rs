//! Reduction framework (C7): aggregates per-source contributions into a
//! single event, tracking arrival completeness with a [`completion::CompletionTree`]
//! and reporting its outcome through [`ReductionOutcome`]. See §4.5.

mod completion;
mod counting;
mod reduction;

pub use completion::CompletionTree;
pub use counting::CountingReduction;
pub use reduction::{Reduction, ReductionOutcome};
