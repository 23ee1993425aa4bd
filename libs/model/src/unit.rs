//! Resource units and resource-view snapshots.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::labels::LabelMap;
use crate::resources::Resources;

/// A schedulable unit. The top-level unit of a snapshot describes a domain
/// or node; its `fragments` are the pods that can actually host instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUnit {
    pub id: String,
    /// Node that owns this unit.
    pub owner_id: String,
    pub node_labels: LabelMap,
    pub capacity: Resources,
    pub allocatable: Resources,
    pub fragments: BTreeMap<String, ResourceUnit>,
}

/// Read-only view handed to the scheduler for one scheduling round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceViewInfo {
    pub resource_unit: ResourceUnit,
    /// Request ID to the unit it was already placed on.
    pub already_scheduled: HashMap<String, String>,
    /// Labels of every instance on each node, by owner ID.
    pub all_local_labels: HashMap<String, LabelMap>,
}
