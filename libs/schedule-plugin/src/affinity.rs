//! Label affinity evaluation.
//!
//! Pure functions over a [`LabelMap`] and a [`Selector`]. Scores come from
//! sub-condition weights: the first satisfied sub-condition wins, so earlier
//! sub-conditions outrank later ones regardless of weight magnitude.

use fnsched_model::{InstanceInfo, LabelExpression, LabelMap, LabelOperator, Selector};
use tracing::trace;

/// Score of a selector nobody satisfied.
pub const ZERO_SCORE: i64 = 0;

fn is_label_in_values(labels: &LabelMap, key: &str, values: &[String]) -> bool {
    labels
        .values(key)
        .is_some_and(|recorded| values.iter().any(|value| recorded.contains_key(value)))
}

/// Evaluate one expression. An expression without an operator matches.
pub fn is_match_label_expression(labels: &LabelMap, expression: &LabelExpression) -> bool {
    match &expression.op {
        Some(LabelOperator::In(values)) => is_label_in_values(labels, &expression.key, values),
        Some(LabelOperator::NotIn(values)) => !is_label_in_values(labels, &expression.key, values),
        Some(LabelOperator::Exists) => labels.contains_key(&expression.key),
        Some(LabelOperator::NotExist) => !labels.contains_key(&expression.key),
        None => true,
    }
}

pub fn is_affinity_priority(selector: &Selector) -> bool {
    selector.condition.order_priority
}

/// Weight of the first sub-condition whose expressions all match (or, with
/// `anti`, whose conjunction fails). Zero when none qualifies.
pub fn get_affinity_score(unit_id: &str, selector: &Selector, labels: &LabelMap, anti: bool) -> i64 {
    for sub_condition in &selector.condition.sub_conditions {
        let matched = sub_condition
            .expressions
            .iter()
            .all(|expression| is_match_label_expression(labels, expression));
        if matched != anti {
            trace!(unit_id, weight = sub_condition.weight, anti, "Affinity sub-condition satisfied");
            return sub_condition.weight;
        }
    }
    ZERO_SCORE
}

pub fn affinity_scorer(unit_id: &str, selector: &Selector, labels: &LabelMap) -> i64 {
    get_affinity_score(unit_id, selector, labels, false)
}

pub fn anti_affinity_scorer(unit_id: &str, selector: &Selector, labels: &LabelMap) -> i64 {
    get_affinity_score(unit_id, selector, labels, true)
}

/// Conjunction of every expression of every sub-condition, inverted for
/// anti-affinity.
fn filter_required(selector: &Selector, labels: &LabelMap, anti: bool) -> bool {
    let matched = selector
        .condition
        .sub_conditions
        .iter()
        .flat_map(|sub_condition| sub_condition.expressions.iter())
        .all(|expression| is_match_label_expression(labels, expression));
    matched != anti
}

/// Priority selectors pass when any sub-condition scores; the others need
/// every expression to match.
pub fn required_affinity_filter(unit_id: &str, selector: &Selector, labels: &LabelMap) -> bool {
    if is_affinity_priority(selector) {
        return affinity_scorer(unit_id, selector, labels) != ZERO_SCORE;
    }
    filter_required(selector, labels, false)
}

pub fn required_anti_affinity_filter(unit_id: &str, selector: &Selector, labels: &LabelMap) -> bool {
    if is_affinity_priority(selector) {
        return anti_affinity_scorer(unit_id, selector, labels) != ZERO_SCORE;
    }
    filter_required(selector, labels, true)
}

fn is_priority(selector: &Option<Selector>) -> bool {
    selector.as_ref().is_some_and(is_affinity_priority)
}

/// Whether scoring can change the outcome for this instance at all.
pub fn need_affinity_scorer(instance: &InstanceInfo) -> bool {
    let affinity = instance.affinity();
    if let Some(instance_affinity) = &affinity.instance {
        if instance_affinity.preferred_affinity.is_some()
            || instance_affinity.preferred_anti_affinity.is_some()
            || is_priority(&instance_affinity.required_affinity)
            || is_priority(&instance_affinity.required_anti_affinity)
        {
            return true;
        }
    }
    if let Some(resource) = &affinity.resource {
        if resource.preferred_affinity.is_some()
            || resource.preferred_anti_affinity.is_some()
            || is_priority(&resource.required_affinity)
            || is_priority(&resource.required_anti_affinity)
        {
            return true;
        }
    }
    if let Some(inner) = &affinity.inner {
        let data = inner
            .data
            .as_ref()
            .is_some_and(|data| data.preferred_affinity.is_some());
        let preempt = inner.preempt.as_ref().is_some_and(|preempt| {
            preempt.preferred_affinity.is_some() || preempt.preferred_anti_affinity.is_some()
        });
        let group_lb = inner.group_lb.as_ref().is_some_and(|group_lb| {
            group_lb.preferred_affinity.is_some() || group_lb.preferred_anti_affinity.is_some()
        });
        if data || preempt || group_lb {
            return true;
        }
    }
    false
}

/// Whether the known-optimum shortcut applies: neither relaxed mode nor
/// top-down scheduling is active.
pub fn need_optimal_affinity_check(is_relaxed: bool, is_top_down_scheduling: bool) -> bool {
    !is_relaxed && !is_top_down_scheduling
}

/// Whether the instance carries any hard label constraint.
pub fn need_label_filter(instance: &InstanceInfo) -> bool {
    let affinity = instance.affinity();
    if affinity.instance.as_ref().is_some_and(|instance_affinity| {
        instance_affinity.required_affinity.is_some() || instance_affinity.required_anti_affinity.is_some()
    }) {
        return true;
    }
    if affinity.resource.as_ref().is_some_and(|resource| {
        resource.required_affinity.is_some() || resource.required_anti_affinity.is_some()
    }) {
        return true;
    }
    let Some(inner) = &affinity.inner else {
        return false;
    };
    inner
        .pending
        .as_ref()
        .is_some_and(|pending| !pending.resources.is_empty())
        || inner
            .rgroup
            .as_ref()
            .is_some_and(|rgroup| rgroup.required_affinity.is_some())
        || inner
            .group_lb
            .as_ref()
            .is_some_and(|group_lb| group_lb.required_anti_affinity.is_some())
}
