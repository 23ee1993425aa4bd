//! Filter plugins.

mod label_affinity;
mod resource_fit;

pub use label_affinity::LabelAffinityFilter;
pub use resource_fit::ResourceFitFilter;
