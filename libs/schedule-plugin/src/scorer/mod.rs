//! Score plugins.

mod label_affinity;

pub use label_affinity::LabelAffinityScorer;
