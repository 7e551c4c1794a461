pub mod algorithm;
pub mod nearest;
pub mod priority;
pub mod types;

pub use algorithm::MatchingAlgorithm;
pub use nearest::NearestUnitMatching;
pub use priority::{by_priority, sort_by_priority};
pub use types::{Candidate, MatchResult};
