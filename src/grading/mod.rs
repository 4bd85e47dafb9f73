pub mod decider;
pub mod evidence;
mod prompts;

pub use decider::{DecisionPolicy, OutcomeDecider};
pub use evidence::EvidenceGatherer;
