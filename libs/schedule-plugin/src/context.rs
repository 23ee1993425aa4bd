//! Scheduling context shared by plugins during one scheduling round.

use std::collections::{HashMap, HashSet};

use fnsched_model::{
    AffinityContext, InstanceInfo, LabelMap, PluginContexts, ResourceUnit, Resources,
};

use crate::LABEL_AFFINITY_PLUGIN;

static EMPTY_LABELS: LabelMap = LabelMap::new();

/// Provisional placements made so far in the current round.
///
/// Filters read `allocated` so that capacity consumed by earlier decisions
/// in the same round is not handed out twice. Scorers read the label maps
/// so that affinity between requests of one batch is honoured.
#[derive(Debug, Clone, Default)]
pub struct PreAllocatedContext {
    /// Plugin contexts of the request (or batch) being scheduled.
    pub plugin_ctx: Option<PluginContexts>,
    /// Resources provisionally placed on each unit.
    pub allocated: HashMap<String, Resources>,
    /// Labels of the instances provisionally placed on each unit.
    pub allocated_labels: HashMap<String, LabelMap>,
    /// Labels of every instance on each node, by owner ID.
    pub all_local_labels: HashMap<String, LabelMap>,
    /// Instance ID to the unit selected for it.
    pub selected_units: HashMap<String, String>,
    pub selected_unit_set: HashSet<String>,
    pub unfeasible_nodes: HashSet<String>,
}

impl PreAllocatedContext {
    pub fn new(all_local_labels: HashMap<String, LabelMap>) -> Self {
        Self {
            all_local_labels,
            ..Default::default()
        }
    }

    /// Mark a node as unable to host the current request.
    pub fn tag_node_unfeasible(&mut self, owner_id: &str) {
        self.unfeasible_nodes.insert(owner_id.to_string());
    }

    pub fn is_node_feasible(&self, owner_id: &str) -> bool {
        !self.unfeasible_nodes.contains(owner_id)
    }

    /// Forget per-request node verdicts before the next request.
    pub fn clear_unfeasible_nodes(&mut self) {
        self.unfeasible_nodes.clear();
    }

    /// The label-affinity context (created on first access) together with a
    /// read-only view of the label maps.
    ///
    /// `None` in the first position means the request carried no plugin
    /// contexts at all.
    pub fn affinity_parts(&mut self) -> (Option<&mut AffinityContext>, LabelView<'_>) {
        let affinity = self.plugin_ctx.as_mut().map(|contexts| {
            &mut contexts
                .entry(LABEL_AFFINITY_PLUGIN.to_string())
                .or_default()
                .affinity
        });
        let view = LabelView {
            allocated_labels: &self.allocated_labels,
            all_local_labels: &self.all_local_labels,
        };
        (affinity, view)
    }

    /// Record `instance` on `unit_id`.
    pub fn pre_allocate(&mut self, instance: &InstanceInfo, unit_id: &str) {
        *self.allocated.entry(unit_id.to_string()).or_default() += &instance.resources;
        *self.allocated_labels.entry(unit_id.to_string()).or_default() +=
            &LabelMap::from_labels(instance.labels.as_slice());
        self.selected_units
            .insert(instance.instance_id.clone(), unit_id.to_string());
        self.selected_unit_set.insert(unit_id.to_string());
    }

    /// Undo [`pre_allocate`](Self::pre_allocate).
    pub fn roll_back(&mut self, instance: &InstanceInfo, unit_id: &str) {
        if let Some(allocated) = self.allocated.get_mut(unit_id) {
            *allocated -= &instance.resources;
        }
        if let Some(labels) = self.allocated_labels.get_mut(unit_id) {
            labels.subtract(&LabelMap::from_labels(instance.labels.as_slice()));
        }
        if self.selected_units.get(&instance.instance_id).map(String::as_str) == Some(unit_id) {
            self.selected_units.remove(&instance.instance_id);
        }
        if !self.selected_units.values().any(|unit| unit == unit_id) {
            self.selected_unit_set.remove(unit_id);
        }
    }
}

/// Read-only access to the label maps of a [`PreAllocatedContext`].
#[derive(Debug, Clone, Copy)]
pub struct LabelView<'a> {
    allocated_labels: &'a HashMap<String, LabelMap>,
    all_local_labels: &'a HashMap<String, LabelMap>,
}

impl<'a> LabelView<'a> {
    /// Labels of every instance on the owning node.
    pub fn local(&self, owner_id: &str) -> &'a LabelMap {
        self.all_local_labels.get(owner_id).unwrap_or(&EMPTY_LABELS)
    }

    pub fn allocated(&self, unit_id: &str) -> &'a LabelMap {
        self.allocated_labels.get(unit_id).unwrap_or(&EMPTY_LABELS)
    }

    /// Unit labels merged with the labels provisionally placed on it.
    pub fn unit(&self, unit: &ResourceUnit) -> LabelMap {
        &unit.node_labels + self.allocated(&unit.id)
    }
}
