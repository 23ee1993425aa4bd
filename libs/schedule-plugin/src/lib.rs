//! # fnsched-schedule-plugin
//!
//! Feasibility selection for scheduling decisions.
//!
//! A [`SchedulerFramework`] runs every registered [`FilterPlugin`] against
//! the fragments of a resource unit, scores the survivors with every
//! [`ScorePlugin`], and returns them ordered best first. The plugins share a
//! [`PreAllocatedContext`] that accumulates provisional placements made
//! during one scheduling round.
//!
//! ## Plugins
//!
//! - [`ResourceFitFilter`]: scalar resource fit against allocatable minus
//!   provisionally allocated resources
//! - [`LabelAffinityFilter`]: required affinities and the optimal-score check
//! - [`LabelAffinityScorer`]: preferred and priority-ordered affinity scores

pub mod affinity;
mod context;
mod error;
mod filter;
mod framework;
mod scorer;

pub use context::{LabelView, PreAllocatedContext};
pub use error::PluginError;
pub use filter::{LabelAffinityFilter, ResourceFitFilter};
pub use framework::{
    create_plugin, FilterPlugin, Filtered, NodeScore, Plugin, PluginFramework, ScheduleResults,
    SchedulerFramework, ScorePlugin, UNLIMITED,
};
pub use scorer::LabelAffinityScorer;

/// Key of the label-affinity entry in a request's plugin contexts.
pub const LABEL_AFFINITY_PLUGIN: &str = "LabelAffinityPlugin";

pub const RESOURCE_FIT_FILTER_NAME: &str = "ResourceFitFilter";
pub const RELAXED_ROOT_LABEL_AFFINITY_FILTER_NAME: &str = "RelaxedRootLabelAffinityFilter";
pub const RELAXED_NON_ROOT_LABEL_AFFINITY_FILTER_NAME: &str = "RelaxedNonRootLabelAffinityFilter";
pub const STRICT_ROOT_LABEL_AFFINITY_FILTER_NAME: &str = "StrictRootLabelAffinityFilter";
pub const STRICT_NON_ROOT_LABEL_AFFINITY_FILTER_NAME: &str = "StrictNonRootLabelAffinityFilter";
pub const RELAXED_LABEL_AFFINITY_SCORER_NAME: &str = "RelaxedLabelAffinityScorer";
pub const STRICT_LABEL_AFFINITY_SCORER_NAME: &str = "StrictLabelAffinityScorer";
