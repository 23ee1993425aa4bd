//! Plugin traits and the feasibility-selection framework.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use fnsched_model::{InstanceInfo, ResourceUnit, Status, StatusCode};
use tracing::{debug, warn};

use crate::context::PreAllocatedContext;
use crate::error::PluginError;
use crate::filter::{LabelAffinityFilter, ResourceFitFilter};
use crate::scorer::LabelAffinityScorer;
use crate::{
    LABEL_AFFINITY_PLUGIN, RELAXED_LABEL_AFFINITY_SCORER_NAME,
    RELAXED_NON_ROOT_LABEL_AFFINITY_FILTER_NAME, RELAXED_ROOT_LABEL_AFFINITY_FILTER_NAME,
    RESOURCE_FIT_FILTER_NAME, STRICT_LABEL_AFFINITY_SCORER_NAME,
    STRICT_NON_ROOT_LABEL_AFFINITY_FILTER_NAME, STRICT_ROOT_LABEL_AFFINITY_FILTER_NAME,
};

/// `available_for_request` value meaning "no limit".
pub const UNLIMITED: i32 = -1;

// =============================================================================
// Plugin results
// =============================================================================

/// A feasible unit and how many more requests of the current shape it can
/// take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    pub name: String,
    pub score: i64,
    pub available_for_request: i32,
}

impl NodeScore {
    pub fn new(name: impl Into<String>, score: i64, available_for_request: i32) -> Self {
        Self {
            name: name.into(),
            score,
            available_for_request,
        }
    }
}

/// Higher score first; equal scores fall back to the lexicographically
/// smaller unit name so that selection is deterministic.
impl Ord for NodeScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.name.cmp(&self.name))
    }
}

impl PartialOrd for NodeScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Verdict of one filter on one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    pub status: Status,
    pub available_for_request: i32,
    /// Human-readable requirement that was tested, for failure reports.
    pub required: String,
}

impl Filtered {
    pub fn pass(available_for_request: i32) -> Self {
        Self {
            status: Status::ok(),
            available_for_request,
            required: String::new(),
        }
    }

    pub fn fail(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Status::new(code, message),
            available_for_request: UNLIMITED,
            required: String::new(),
        }
    }

    pub fn with_required(mut self, required: impl Into<String>) -> Self {
        self.required = required.into();
        self
    }
}

/// Output of [`SchedulerFramework::select_feasible`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleResults {
    pub code: StatusCode,
    pub reason: String,
    /// Feasible units, best first when popped.
    pub sorted_feasible_nodes: BinaryHeap<NodeScore>,
}

// =============================================================================
// Plugin traits
// =============================================================================

pub trait FilterPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, ctx: &mut PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> Filtered;
}

pub trait ScorePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score a unit that passed every filter. Never fails: problems are
    /// logged and scored as zero.
    fn score(&self, ctx: &mut PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> i64;
}

/// Feasibility selection over the fragments of a resource unit.
pub trait SchedulerFramework: Send + Sync {
    /// Filter and score every fragment of `unit` for `instance`. `expected`
    /// is the number of requests of this shape about to be placed.
    fn select_feasible(
        &self,
        ctx: &mut PreAllocatedContext,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
        expected: u32,
    ) -> ScheduleResults;
}

pub enum Plugin {
    Filter(Box<dyn FilterPlugin>),
    Score(Box<dyn ScorePlugin>),
}

/// Build a plugin from its registered name.
pub fn create_plugin(name: &str) -> Option<Plugin> {
    let plugin = match name {
        RESOURCE_FIT_FILTER_NAME => Plugin::Filter(Box::new(ResourceFitFilter)),
        RELAXED_ROOT_LABEL_AFFINITY_FILTER_NAME => Plugin::Filter(Box::new(LabelAffinityFilter::new(true, true))),
        RELAXED_NON_ROOT_LABEL_AFFINITY_FILTER_NAME => {
            Plugin::Filter(Box::new(LabelAffinityFilter::new(true, false)))
        }
        STRICT_ROOT_LABEL_AFFINITY_FILTER_NAME => Plugin::Filter(Box::new(LabelAffinityFilter::new(false, true))),
        STRICT_NON_ROOT_LABEL_AFFINITY_FILTER_NAME => {
            Plugin::Filter(Box::new(LabelAffinityFilter::new(false, false)))
        }
        RELAXED_LABEL_AFFINITY_SCORER_NAME => Plugin::Score(Box::new(LabelAffinityScorer::new(true))),
        STRICT_LABEL_AFFINITY_SCORER_NAME => Plugin::Score(Box::new(LabelAffinityScorer::new(false))),
        _ => return None,
    };
    Some(plugin)
}

// =============================================================================
// Plugin framework
// =============================================================================

/// Runs registered filters then scorers over every fragment of a unit.
#[derive(Default)]
pub struct PluginFramework {
    filters: Vec<Box<dyn FilterPlugin>>,
    scorers: Vec<Box<dyn ScorePlugin>>,
}

impl PluginFramework {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource fit, label-affinity filter and label-affinity scorer.
    pub fn with_defaults(relaxed: bool) -> Self {
        let mut framework = Self::new();
        framework.register_filter(Box::new(ResourceFitFilter));
        framework.register_filter(Box::new(LabelAffinityFilter::new(relaxed, false)));
        framework.register_scorer(Box::new(LabelAffinityScorer::new(relaxed)));
        framework
    }

    /// Assemble a framework from registered plugin names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, PluginError> {
        let mut framework = Self::new();
        for name in names {
            framework.register_by_name(name.as_ref())?;
        }
        if framework.filters.is_empty() {
            return Err(PluginError::NoFilter);
        }
        Ok(framework)
    }

    pub fn register_by_name(&mut self, name: &str) -> Result<(), PluginError> {
        match create_plugin(name) {
            Some(Plugin::Filter(filter)) => self.register_filter(filter),
            Some(Plugin::Score(scorer)) => self.register_scorer(scorer),
            None => return Err(PluginError::UnknownPlugin(name.to_string())),
        }
        Ok(())
    }

    pub fn register_filter(&mut self, filter: Box<dyn FilterPlugin>) {
        debug!(plugin = filter.name(), "Registered filter plugin");
        self.filters.push(filter);
    }

    pub fn register_scorer(&mut self, scorer: Box<dyn ScorePlugin>) {
        debug!(plugin = scorer.name(), "Registered score plugin");
        self.scorers.push(scorer);
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.filters
            .iter()
            .map(|f| f.name())
            .chain(self.scorers.iter().map(|s| s.name()))
            .collect()
    }

    /// Run the filters on one fragment. Returns the combined availability,
    /// or the first failing verdict.
    fn run_filters(
        &self,
        ctx: &mut PreAllocatedContext,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
    ) -> Result<i32, Filtered> {
        let mut available = UNLIMITED;
        for filter in &self.filters {
            let verdict = filter.filter(ctx, instance, unit);
            if verdict.status.is_err() {
                debug!(
                    request_id = %instance.request_id,
                    unit_id = %unit.id,
                    plugin = filter.name(),
                    reason = %verdict.status,
                    "Unit filtered out"
                );
                return Err(verdict);
            }
            if verdict.available_for_request != UNLIMITED {
                available = if available == UNLIMITED {
                    verdict.available_for_request
                } else {
                    available.min(verdict.available_for_request)
                };
            }
        }
        Ok(available)
    }
}

impl SchedulerFramework for PluginFramework {
    fn select_feasible(
        &self,
        ctx: &mut PreAllocatedContext,
        instance: &InstanceInfo,
        unit: &ResourceUnit,
        expected: u32,
    ) -> ScheduleResults {
        let mut results = ScheduleResults::default();
        let candidates: Vec<&ResourceUnit> = if unit.fragments.is_empty() {
            vec![unit]
        } else {
            unit.fragments.values().collect()
        };

        // failure message -> (code, count), for the summary reason
        let mut failures: BTreeMap<String, (StatusCode, usize)> = BTreeMap::new();
        let mut capacity: i64 = 0;
        ctx.clear_unfeasible_nodes();

        for candidate in candidates {
            let available = match self.run_filters(ctx, instance, candidate) {
                Ok(available) => available,
                Err(verdict) => {
                    let entry = failures
                        .entry(verdict.status.message.clone())
                        .or_insert((verdict.status.code, 0));
                    entry.1 += 1;
                    continue;
                }
            };
            let score: i64 = self
                .scorers
                .iter()
                .map(|scorer| scorer.score(ctx, instance, candidate))
                .sum();
            capacity = if available == UNLIMITED || capacity < 0 {
                -1
            } else {
                capacity + i64::from(available)
            };
            results
                .sorted_feasible_nodes
                .push(NodeScore::new(candidate.id.clone(), score, available));
        }

        if results.sorted_feasible_nodes.is_empty() {
            // the most frequent failure decides the code
            let code = failures
                .values()
                .max_by_key(|(_, count)| *count)
                .map(|(code, _)| *code)
                .unwrap_or(StatusCode::ResourceNotEnough);
            results.code = code;
            results.reason = if failures.is_empty() {
                "no resource unit available".to_string()
            } else {
                failures
                    .iter()
                    .map(|(message, (_, count))| format!("{message} x{count}"))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            warn!(
                request_id = %instance.request_id,
                code = %results.code,
                reason = %results.reason,
                "No feasible resource unit"
            );
            return results;
        }

        if capacity >= 0 && capacity < i64::from(expected) {
            debug!(
                request_id = %instance.request_id,
                capacity,
                expected,
                "Feasible capacity below batch size"
            );
        }
        results
    }
}
