//! Test fixtures for the scheduling crates.
//!
//! Builders for selectors, instances, requests and resource views so that
//! tests read as a description of the scenario rather than of the structs.

use fnsched_model::{
    Affinity, InstanceInfo, LabelExpression, LabelMap, ResourceUnit, ResourceViewInfo, Resources,
    ScheduleOption, ScheduleRequest, Selector, SubCondition, CREATE_TIMESTAMP_KEY,
    GROUP_SCHEDULE_CONTEXT,
};

/// Weight of the first sub-condition built by [`selector`].
pub const TOP_WEIGHT: i64 = 100;

/// Weight step between consecutive sub-conditions of a priority selector.
pub const WEIGHT_STEP: i64 = 10;

/// Build a selector from groups of expressions.
///
/// Priority selectors weight their sub-conditions 100, 90, 80, ... in
/// declaration order. Non-priority selectors weight every sub-condition 100.
pub fn selector(order_priority: bool, groups: Vec<Vec<LabelExpression>>) -> Selector {
    let sub_conditions = groups
        .into_iter()
        .enumerate()
        .map(|(index, expressions)| SubCondition {
            expressions,
            weight: if order_priority {
                TOP_WEIGHT - WEIGHT_STEP * index as i64
            } else {
                TOP_WEIGHT
            },
        })
        .collect();
    Selector::new(order_priority, sub_conditions)
}

/// Selector with explicit weights, one sub-condition per entry.
pub fn weighted_selector(order_priority: bool, groups: Vec<(i64, Vec<LabelExpression>)>) -> Selector {
    let sub_conditions = groups
        .into_iter()
        .map(|(weight, expressions)| SubCondition { expressions, weight })
        .collect();
    Selector::new(order_priority, sub_conditions)
}

pub fn exists(key: &str) -> LabelExpression {
    LabelExpression::exists(key)
}

pub fn labels(pairs: &[(&str, &str)]) -> LabelMap {
    pairs.iter().map(|(k, v)| (*k, *v)).collect()
}

/// Instance with CPU/Memory requirements and a priority.
pub fn instance(request_id: &str, priority: u16, cpu: f64, memory: f64) -> InstanceInfo {
    InstanceInfo {
        instance_id: format!("{request_id}-instance"),
        request_id: request_id.to_string(),
        resources: Resources::cpu_memory(cpu, memory),
        schedule_option: ScheduleOption {
            priority,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Instance without any resource requirement.
pub fn bare_instance(request_id: &str, priority: u16) -> InstanceInfo {
    InstanceInfo {
        resources: Resources::new(),
        ..instance(request_id, priority, 0.0, 0.0)
    }
}

pub fn with_affinity(mut instance: InstanceInfo, affinity: Affinity) -> InstanceInfo {
    instance.schedule_option.affinity = affinity;
    instance
}

pub fn with_timestamp(mut instance: InstanceInfo, timestamp: i64) -> InstanceInfo {
    instance
        .extensions
        .insert(CREATE_TIMESTAMP_KEY.to_string(), timestamp.to_string());
    instance
}

pub fn request(instance: InstanceInfo) -> ScheduleRequest {
    ScheduleRequest {
        request_id: instance.request_id.clone(),
        trace_id: format!("trace-{}", instance.request_id),
        instance,
        ..Default::default()
    }
}

/// Request for an instance of the given shape.
pub fn shaped_request(request_id: &str, priority: u16, cpu: f64, memory: f64) -> ScheduleRequest {
    request(instance(request_id, priority, cpu, memory))
}

/// `request` with `unit_id` set aside for it by a group decision.
pub fn reserved_on(mut request: ScheduleRequest, unit_id: &str) -> ScheduleRequest {
    request
        .contexts
        .entry(GROUP_SCHEDULE_CONTEXT.to_string())
        .or_default()
        .group_schedule
        .reserved = unit_id.to_string();
    request
}

/// A pod with equal capacity and allocatable resources.
pub fn pod(id: &str, owner_id: &str, cpu: f64, memory: f64) -> ResourceUnit {
    ResourceUnit {
        id: id.to_string(),
        owner_id: owner_id.to_string(),
        capacity: Resources::cpu_memory(cpu, memory),
        allocatable: Resources::cpu_memory(cpu, memory),
        ..Default::default()
    }
}

pub fn labelled_pod(id: &str, owner_id: &str, pairs: &[(&str, &str)]) -> ResourceUnit {
    ResourceUnit {
        node_labels: labels(pairs),
        ..pod(id, owner_id, 1000.0, 1000.0)
    }
}

/// A domain unit holding `pods` as fragments. Node labels of the domain
/// are the merge of its fragments' labels.
pub fn domain(id: &str, pods: Vec<ResourceUnit>) -> ResourceUnit {
    let mut unit = ResourceUnit {
        id: id.to_string(),
        owner_id: id.to_string(),
        ..Default::default()
    };
    for pod in pods {
        unit.capacity += &pod.capacity;
        unit.allocatable += &pod.allocatable;
        unit.node_labels += &pod.node_labels;
        unit.fragments.insert(pod.id.clone(), pod);
    }
    unit
}

/// Resource view over `pods`, with owner-level labels merged per owner.
pub fn resource_view(pods: Vec<ResourceUnit>) -> ResourceViewInfo {
    let mut view = ResourceViewInfo::default();
    for pod in &pods {
        *view.all_local_labels.entry(pod.owner_id.clone()).or_default() += &pod.node_labels;
    }
    view.resource_unit = domain("domain", pods);
    view
}
