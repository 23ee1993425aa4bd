//! Integration tests for feasibility selection across filters and scorers.

use fnsched_model::{
    Affinity, InstanceAffinity, PluginContexts, ResourceAffinity, StatusCode,
};
use fnsched_schedule_plugin::{
    PluginFramework, PreAllocatedContext, SchedulerFramework, RELAXED_LABEL_AFFINITY_SCORER_NAME,
    RELAXED_NON_ROOT_LABEL_AFFINITY_FILTER_NAME, RESOURCE_FIT_FILTER_NAME, STRICT_LABEL_AFFINITY_SCORER_NAME,
    STRICT_NON_ROOT_LABEL_AFFINITY_FILTER_NAME,
};
use fnsched_testing::{domain, exists, instance, labelled_pod, selector, with_affinity};

fn request_ctx() -> PreAllocatedContext {
    PreAllocatedContext {
        plugin_ctx: Some(PluginContexts::new()),
        ..Default::default()
    }
}

fn zone_domain() -> fnsched_model::ResourceUnit {
    domain(
        "domain",
        vec![
            labelled_pod("pod-a", "node-1", &[("zone", "az1"), ("gpu", "a100")]),
            labelled_pod("pod-b", "node-1", &[("zone", "az2")]),
            labelled_pod("pod-c", "node-2", &[("zone", "az3")]),
        ],
    )
}

#[test]
fn test_best_scored_unit_pops_first() {
    let framework = PluginFramework::from_names(&[
        RESOURCE_FIT_FILTER_NAME,
        RELAXED_NON_ROOT_LABEL_AFFINITY_FILTER_NAME,
        RELAXED_LABEL_AFFINITY_SCORER_NAME,
    ])
    .unwrap();
    let inst = with_affinity(
        instance("req", 0, 100.0, 100.0),
        Affinity {
            resource: Some(ResourceAffinity {
                preferred_affinity: Some(selector(true, vec![vec![exists("gpu")], vec![exists("zone")]])),
                ..Default::default()
            }),
            ..Default::default()
        },
    );

    let mut ctx = request_ctx();
    let mut results = framework.select_feasible(&mut ctx, &inst, &zone_domain(), 1);
    assert_eq!(results.code, StatusCode::Success);
    let first = results.sorted_feasible_nodes.pop().unwrap();
    assert_eq!(first.name, "pod-a");
    assert_eq!(first.score, 100);
    assert_eq!(first.available_for_request, 10);
    // equal scores resolve by unit name
    assert_eq!(results.sorted_feasible_nodes.pop().unwrap().name, "pod-b");
    assert_eq!(results.sorted_feasible_nodes.pop().unwrap().name, "pod-c");
}

#[test]
fn test_required_anti_affinity_excludes_units() {
    let framework = PluginFramework::with_defaults(true);
    let inst = with_affinity(
        instance("req", 0, 100.0, 100.0),
        Affinity {
            resource: Some(ResourceAffinity {
                required_anti_affinity: Some(selector(false, vec![vec![exists("gpu")]])),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let mut ctx = request_ctx();
    let results = framework.select_feasible(&mut ctx, &inst, &zone_domain(), 1);
    let mut names: Vec<String> = results
        .sorted_feasible_nodes
        .into_iter()
        .map(|node| node.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["pod-b", "pod-c"]);
}

#[test]
fn test_unsatisfiable_affinity_reports_affinity_failure() {
    let framework = PluginFramework::with_defaults(true);
    let inst = with_affinity(
        instance("req", 0, 100.0, 100.0),
        Affinity {
            instance: Some(InstanceAffinity {
                required_affinity: Some(selector(false, vec![vec![exists("tpu")]])),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let mut ctx = request_ctx();
    let results = framework.select_feasible(&mut ctx, &inst, &zone_domain(), 1);
    assert_eq!(results.code, StatusCode::AffinityScheduleFailed);
    assert!(results.reason.contains("Affinity can't be Satisfied"));
    assert!(results.sorted_feasible_nodes.is_empty());
}

#[test]
fn test_strict_framework_keeps_only_optimal_units() {
    let framework = PluginFramework::from_names(&[
        RESOURCE_FIT_FILTER_NAME,
        STRICT_NON_ROOT_LABEL_AFFINITY_FILTER_NAME,
        STRICT_LABEL_AFFINITY_SCORER_NAME,
    ])
    .unwrap();
    let inst = with_affinity(
        instance("req", 0, 100.0, 100.0),
        Affinity {
            resource: Some(ResourceAffinity {
                preferred_affinity: Some(selector(true, vec![vec![exists("gpu")], vec![exists("zone")]])),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    let mut ctx = request_ctx();
    let results = framework.select_feasible(&mut ctx, &inst, &zone_domain(), 1);
    let nodes = results.sorted_feasible_nodes.into_sorted_vec();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].name, "pod-a");
}

#[test]
fn test_provisional_allocations_shrink_capacity() {
    let framework = PluginFramework::with_defaults(true);
    let inst = instance("req", 0, 400.0, 400.0);
    let unit = domain("domain", vec![labelled_pod("pod-a", "node-1", &[])]);
    let mut ctx = request_ctx();

    ctx.pre_allocate(&instance("earlier", 0, 400.0, 400.0), "pod-a");
    let results = framework.select_feasible(&mut ctx, &inst, &unit, 1);
    assert_eq!(results.sorted_feasible_nodes.peek().unwrap().available_for_request, 1);

    ctx.pre_allocate(&instance("later", 0, 400.0, 400.0), "pod-a");
    let results = framework.select_feasible(&mut ctx, &inst, &unit, 1);
    assert_eq!(results.code, StatusCode::ResourceNotEnough);
    assert!(results.reason.contains("CPU: Not Enough"));
}
