use fnsched_model::{InstanceInfo, LabelMap, ResourceUnit, Selector};
use tracing::{debug, warn};

use crate::affinity::{
    affinity_scorer, anti_affinity_scorer, is_affinity_priority, need_affinity_scorer, need_optimal_affinity_check,
    ZERO_SCORE,
};
use crate::context::{LabelView, PreAllocatedContext};
use crate::framework::ScorePlugin;
use crate::{RELAXED_LABEL_AFFINITY_SCORER_NAME, STRICT_LABEL_AFFINITY_SCORER_NAME};

/// Score returned when the instance has nothing for this scorer to rank.
const NEUTRAL_SCORE: i64 = 1;

/// Sums preferred (and priority-ordered required) affinity scores across the
/// instance, resource and inner scopes.
///
/// Scores are cached per unit in the request's affinity context. A strict
/// scorer outside top-down scheduling trusts the filter's optimality check
/// and returns the known maximum without recomputing.
#[derive(Debug, Clone, Copy)]
pub struct LabelAffinityScorer {
    is_relaxed: bool,
}

impl LabelAffinityScorer {
    pub fn new(is_relaxed: bool) -> Self {
        Self { is_relaxed }
    }
}

impl ScorePlugin for LabelAffinityScorer {
    fn name(&self) -> &'static str {
        if self.is_relaxed {
            RELAXED_LABEL_AFFINITY_SCORER_NAME
        } else {
            STRICT_LABEL_AFFINITY_SCORER_NAME
        }
    }

    fn score(&self, ctx: &mut PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> i64 {
        if !need_affinity_scorer(instance) {
            return NEUTRAL_SCORE;
        }
        let (affinity_ctx, view) = ctx.affinity_parts();
        let Some(affinity_ctx) = affinity_ctx else {
            warn!(request_id = %instance.request_id, "Invalid context for label affinity scorer");
            return ZERO_SCORE;
        };

        if let Some(score) = affinity_ctx.scheduled_score.get(&unit.id) {
            debug!(request_id = %instance.request_id, unit_id = %unit.id, score, "Cached affinity score");
            return *score;
        }

        let score = match affinity_ctx.max_score {
            Some(max_score) if need_optimal_affinity_check(self.is_relaxed, affinity_ctx.is_top_down_scheduling) => {
                debug!(
                    request_id = %instance.request_id,
                    unit_id = %unit.id,
                    score = max_score,
                    "Unit already met the optimal preferred score"
                );
                max_score
            }
            _ => preferred_score(instance, unit, &view),
        };
        affinity_ctx.scheduled_score.insert(unit.id.clone(), score);
        score
    }
}

fn scored(unit_id: &str, scope: &str, selector: &Selector, labels: &LabelMap, anti: bool) -> i64 {
    let score = if anti {
        anti_affinity_scorer(unit_id, selector, labels)
    } else {
        affinity_scorer(unit_id, selector, labels)
    };
    if score == ZERO_SCORE {
        debug!(unit_id, scope, anti, "Affinity score is 0");
    }
    score
}

/// Preferred and preferred-anti selectors always count; required ones only
/// when they are priority-ordered.
fn four_way_score(
    unit_id: &str,
    scope: &str,
    selectors: [&Option<Selector>; 4],
    labels: &LabelMap,
) -> i64 {
    let [preferred, preferred_anti, required, required_anti] = selectors;
    let priority = |selector: &&Selector| is_affinity_priority(selector);
    preferred
        .as_ref()
        .map_or(0, |s| scored(unit_id, scope, s, labels, false))
        + preferred_anti
            .as_ref()
            .map_or(0, |s| scored(unit_id, scope, s, labels, true))
        + required
            .as_ref()
            .filter(priority)
            .map_or(0, |s| scored(unit_id, scope, s, labels, false))
        + required_anti
            .as_ref()
            .filter(priority)
            .map_or(0, |s| scored(unit_id, scope, s, labels, true))
}

fn preferred_score(instance: &InstanceInfo, unit: &ResourceUnit, view: &LabelView<'_>) -> i64 {
    let unit_id = unit.id.as_str();
    let owner_id = unit.owner_id.as_str();
    let unit_labels = view.unit(unit);
    let affinity = instance.affinity();
    let mut total = 0;

    if let Some(inst) = &affinity.instance {
        let labels = if instance.is_node_affinity_scope() {
            view.local(owner_id)
        } else {
            &unit_labels
        };
        total += four_way_score(
            unit_id,
            "instance",
            [
                &inst.preferred_affinity,
                &inst.preferred_anti_affinity,
                &inst.required_affinity,
                &inst.required_anti_affinity,
            ],
            labels,
        );
    }

    if let Some(resource) = &affinity.resource {
        total += four_way_score(
            unit_id,
            "resource",
            [
                &resource.preferred_affinity,
                &resource.preferred_anti_affinity,
                &resource.required_affinity,
                &resource.required_anti_affinity,
            ],
            &unit.node_labels,
        );
    }

    if let Some(inner) = &affinity.inner {
        if let Some(preempt) = &inner.preempt {
            let local = view.local(owner_id);
            total += four_way_score(
                owner_id,
                "preempt",
                [&preempt.preferred_affinity, &preempt.preferred_anti_affinity, &None, &None],
                local,
            );
        }
        if let Some(selector) = inner.data.as_ref().and_then(|data| data.preferred_affinity.as_ref()) {
            total += scored(unit_id, "data", selector, &unit.node_labels, false);
        }
        if let Some(group_lb) = &inner.group_lb {
            // preferred wins over preferred-anti; they are never summed
            if let Some(selector) = &group_lb.preferred_affinity {
                total += scored(unit_id, "group_lb", selector, &unit_labels, false);
            } else if let Some(selector) = &group_lb.preferred_anti_affinity {
                total += scored(unit_id, "group_lb", selector, &unit_labels, true);
            }
        }
    }

    debug!(request_id = %instance.request_id, unit_id, score = total, "Preferred affinity score");
    total
}
