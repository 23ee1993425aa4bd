use fnsched_model::{InstanceInfo, LabelMap, ResourceUnit, Selector, StatusCode};
use tracing::{debug, warn};

use crate::affinity::{
    affinity_scorer, anti_affinity_scorer, is_affinity_priority, need_affinity_scorer, need_label_filter,
    need_optimal_affinity_check, required_affinity_filter, required_anti_affinity_filter,
};
use crate::context::{LabelView, PreAllocatedContext};
use crate::framework::{FilterPlugin, Filtered};
use crate::{
    RELAXED_NON_ROOT_LABEL_AFFINITY_FILTER_NAME, RELAXED_ROOT_LABEL_AFFINITY_FILTER_NAME,
    STRICT_NON_ROOT_LABEL_AFFINITY_FILTER_NAME, STRICT_ROOT_LABEL_AFFINITY_FILTER_NAME,
};

const AFFINITY_UNSATISFIED: &str = "Affinity can't be Satisfied";

/// Enforces required affinities and, in strict bottom-up scheduling, rejects
/// units that cannot reach the best achievable preferred score.
#[derive(Debug, Clone, Copy)]
pub struct LabelAffinityFilter {
    is_relaxed: bool,
    is_root_domain_level: bool,
}

enum Verdict {
    Pass,
    Reject { node_unfeasible: bool },
}

impl LabelAffinityFilter {
    pub fn new(is_relaxed: bool, is_root_domain_level: bool) -> Self {
        Self {
            is_relaxed,
            is_root_domain_level,
        }
    }
}

impl FilterPlugin for LabelAffinityFilter {
    fn name(&self) -> &'static str {
        match (self.is_relaxed, self.is_root_domain_level) {
            (true, true) => RELAXED_ROOT_LABEL_AFFINITY_FILTER_NAME,
            (true, false) => RELAXED_NON_ROOT_LABEL_AFFINITY_FILTER_NAME,
            (false, true) => STRICT_ROOT_LABEL_AFFINITY_FILTER_NAME,
            (false, false) => STRICT_NON_ROOT_LABEL_AFFINITY_FILTER_NAME,
        }
    }

    fn filter(&self, ctx: &mut PreAllocatedContext, instance: &InstanceInfo, unit: &ResourceUnit) -> Filtered {
        let node_feasible = ctx.is_node_feasible(&unit.owner_id);
        let verdict = {
            let (affinity_ctx, view) = ctx.affinity_parts();
            let Some(affinity_ctx) = affinity_ctx else {
                warn!(request_id = %instance.request_id, "Invalid context for label affinity filter");
                return Filtered::fail(StatusCode::ParameterError, "Invalid context");
            };
            if self.is_root_domain_level {
                affinity_ctx.is_top_down_scheduling = true;
            }

            let rejected_below = affinity_ctx.scheduled_result.get(&unit.id) == Some(&StatusCode::AffinityScheduleFailed);
            let required = if need_label_filter(instance) {
                let verdict = if !node_feasible || rejected_below {
                    debug!(request_id = %instance.request_id, unit_id = %unit.id, "Unit already unfeasible");
                    Verdict::Reject { node_unfeasible: false }
                } else {
                    label_filter(instance, unit, &view)
                };
                if matches!(verdict, Verdict::Reject { .. }) {
                    affinity_ctx
                        .scheduled_result
                        .insert(unit.id.clone(), StatusCode::AffinityScheduleFailed);
                }
                verdict
            } else {
                Verdict::Pass
            };
            required.and_then(|| {
                let check = need_optimal_affinity_check(self.is_relaxed, affinity_ctx.is_top_down_scheduling)
                    && need_affinity_scorer(instance);
                if check && !is_score_optimal(instance, unit, &view) {
                    debug!(request_id = %instance.request_id, unit_id = %unit.id, "Unit misses the optimal affinity score");
                    Verdict::Reject { node_unfeasible: false }
                } else {
                    Verdict::Pass
                }
            })
        };

        match verdict {
            Verdict::Pass => Filtered::pass(crate::UNLIMITED),
            Verdict::Reject { node_unfeasible } => {
                if node_unfeasible {
                    ctx.tag_node_unfeasible(&unit.owner_id);
                }
                warn!(request_id = %instance.request_id, unit_id = %unit.id, "Unit failed label affinity filter");
                Filtered::fail(StatusCode::AffinityScheduleFailed, AFFINITY_UNSATISFIED)
                    .with_required(required_affinity_string(instance))
            }
        }
    }
}

impl Verdict {
    fn and_then(self, next: impl FnOnce() -> Verdict) -> Verdict {
        match self {
            Verdict::Pass => next(),
            reject => reject,
        }
    }
}

// =============================================================================
// Required affinity
// =============================================================================

fn required_passed(unit_id: &str, required: &Option<Selector>, anti: &Option<Selector>, labels: &LabelMap) -> bool {
    required
        .as_ref()
        .is_none_or(|selector| required_affinity_filter(unit_id, selector, labels))
        && anti
            .as_ref()
            .is_none_or(|selector| required_anti_affinity_filter(unit_id, selector, labels))
}

fn instance_required_passed(unit_id: &str, instance: &InstanceInfo, labels: &LabelMap) -> bool {
    instance.affinity().instance.as_ref().is_none_or(|affinity| {
        required_passed(unit_id, &affinity.required_affinity, &affinity.required_anti_affinity, labels)
    })
}

fn resource_required_passed(unit_id: &str, instance: &InstanceInfo, labels: &LabelMap) -> bool {
    instance.affinity().resource.as_ref().is_none_or(|affinity| {
        required_passed(unit_id, &affinity.required_affinity, &affinity.required_anti_affinity, labels)
    })
}

/// A unit that would satisfy a pending request is kept free for it.
fn pending_passed(unit_id: &str, instance: &InstanceInfo, labels: &LabelMap) -> bool {
    let Some(pending) = instance.affinity().inner.as_ref().and_then(|inner| inner.pending.as_ref()) else {
        return true;
    };
    !pending.resources.iter().any(|resource| {
        required_passed(unit_id, &resource.required_affinity, &resource.required_anti_affinity, labels)
    })
}

fn rgroup_passed(unit_id: &str, instance: &InstanceInfo, labels: &LabelMap) -> bool {
    instance
        .affinity()
        .inner
        .as_ref()
        .and_then(|inner| inner.rgroup.as_ref())
        .and_then(|rgroup| rgroup.required_affinity.as_ref())
        .is_none_or(|selector| required_affinity_filter(unit_id, selector, labels))
}

fn group_lb_passed(unit_id: &str, instance: &InstanceInfo, labels: &LabelMap) -> bool {
    instance
        .affinity()
        .inner
        .as_ref()
        .and_then(|inner| inner.group_lb.as_ref())
        .and_then(|group_lb| group_lb.required_anti_affinity.as_ref())
        .is_none_or(|selector| required_anti_affinity_filter(unit_id, selector, labels))
}

fn label_filter(instance: &InstanceInfo, unit: &ResourceUnit, view: &LabelView<'_>) -> Verdict {
    let unit_id = unit.id.as_str();
    let unit_labels = view.unit(unit);

    if instance.is_node_affinity_scope() {
        if !instance_required_passed(&unit.owner_id, instance, view.local(&unit.owner_id)) {
            debug!(request_id = %instance.request_id, unit_id, "Instance node affinity not satisfied");
            return Verdict::Reject { node_unfeasible: true };
        }
    } else if !instance_required_passed(unit_id, instance, &unit_labels) {
        debug!(request_id = %instance.request_id, unit_id, "Instance affinity not satisfied");
        return Verdict::Reject { node_unfeasible: false };
    }

    let checks: [(&str, bool); 4] = [
        ("resource", resource_required_passed(unit_id, instance, &unit.node_labels)),
        ("pending", pending_passed(unit_id, instance, &unit.node_labels)),
        ("rgroup", rgroup_passed(unit_id, instance, &unit.node_labels)),
        ("group_lb", group_lb_passed(unit_id, instance, &unit_labels)),
    ];
    match checks.iter().find(|(_, passed)| !passed) {
        Some((scope, _)) => {
            debug!(request_id = %instance.request_id, unit_id, scope, "Required affinity not satisfied");
            Verdict::Reject { node_unfeasible: false }
        }
        None => Verdict::Pass,
    }
}

// =============================================================================
// Optimal score
// =============================================================================

/// An empty selector is always optimal. Otherwise the unit must earn the
/// weight of the first sub-condition.
fn meets_optimal(unit_id: &str, selector: &Selector, labels: &LabelMap, anti: bool) -> bool {
    let Some(first) = selector.condition.sub_conditions.first() else {
        return true;
    };
    let score = if anti {
        anti_affinity_scorer(unit_id, selector, labels)
    } else {
        affinity_scorer(unit_id, selector, labels)
    };
    score == first.weight
}

fn preferred_optimal(unit_id: &str, selector: &Option<Selector>, labels: &LabelMap, anti: bool) -> bool {
    selector
        .as_ref()
        .is_none_or(|selector| meets_optimal(unit_id, selector, labels, anti))
}

fn priority_optimal(unit_id: &str, selector: &Option<Selector>, labels: &LabelMap, anti: bool) -> bool {
    selector
        .as_ref()
        .filter(|selector| is_affinity_priority(selector))
        .is_none_or(|selector| meets_optimal(unit_id, selector, labels, anti))
}

fn is_score_optimal(instance: &InstanceInfo, unit: &ResourceUnit, view: &LabelView<'_>) -> bool {
    let unit_id = unit.id.as_str();
    let owner_id = unit.owner_id.as_str();
    let unit_labels = view.unit(unit);
    let affinity = instance.affinity();

    if let Some(inst) = &affinity.instance {
        let labels = if instance.is_node_affinity_scope() {
            view.local(owner_id)
        } else {
            &unit_labels
        };
        if !(preferred_optimal(unit_id, &inst.preferred_affinity, labels, false)
            && preferred_optimal(unit_id, &inst.preferred_anti_affinity, labels, true)
            && priority_optimal(unit_id, &inst.required_affinity, labels, false)
            && priority_optimal(unit_id, &inst.required_anti_affinity, labels, true))
        {
            return false;
        }
    }

    if let Some(inner) = &affinity.inner {
        if let Some(preempt) = &inner.preempt {
            let local = view.local(owner_id);
            if !(preferred_optimal(owner_id, &preempt.preferred_affinity, local, false)
                && preferred_optimal(owner_id, &preempt.preferred_anti_affinity, local, true))
            {
                return false;
            }
        }
        if let Some(data) = &inner.data {
            if !preferred_optimal(unit_id, &data.preferred_affinity, &unit.node_labels, false) {
                return false;
            }
        }
        if let Some(group_lb) = &inner.group_lb {
            if !(preferred_optimal(unit_id, &group_lb.preferred_affinity, &unit_labels, false)
                && preferred_optimal(unit_id, &group_lb.preferred_anti_affinity, &unit_labels, true))
            {
                return false;
            }
        }
    }

    affinity.resource.as_ref().is_none_or(|resource| {
        let labels = &unit.node_labels;
        preferred_optimal(unit_id, &resource.preferred_affinity, labels, false)
            && preferred_optimal(unit_id, &resource.preferred_anti_affinity, labels, true)
            && priority_optimal(unit_id, &resource.required_affinity, labels, false)
            && priority_optimal(unit_id, &resource.required_anti_affinity, labels, true)
    })
}

fn required_affinity_string(instance: &InstanceInfo) -> String {
    let affinity = instance.affinity();
    let mut parts = Vec::new();
    if let Some(resource) = &affinity.resource {
        if resource.required_affinity.is_some() || resource.required_anti_affinity.is_some() {
            parts.push(format!(
                "resource {{ aff {:?} antiAff {:?} }}",
                resource.required_affinity, resource.required_anti_affinity
            ));
        }
    }
    if let Some(inst) = &affinity.instance {
        if inst.required_affinity.is_some() || inst.required_anti_affinity.is_some() {
            parts.push(format!(
                "instance {{ aff {:?} antiAff {:?} }}",
                inst.required_affinity, inst.required_anti_affinity
            ));
        }
    }
    parts.join(" ")
}
