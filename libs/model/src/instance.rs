//! Instance and schedule-request payloads.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::affinity::{Affinity, AffinityScope};
use crate::resources::Resources;
use crate::status::StatusCode;

/// Extension key holding the request creation time in milliseconds.
pub const CREATE_TIMESTAMP_KEY: &str = "createTimestamp";

/// Plugin context key carrying group scheduling hints.
pub const GROUP_SCHEDULE_CONTEXT: &str = "GroupScheduleContext";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOption {
    pub priority: u16,
    pub affinity: Affinity,
    /// How long the request may wait for resources. Zero fails fast.
    pub schedule_timeout_ms: i64,
}

/// The instance a schedule request asks to place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub request_id: String,
    pub group_id: String,
    pub function: String,
    pub resources: Resources,
    /// Labels contributed to the unit once placed, as `key:value` strings.
    pub labels: Vec<String>,
    pub schedule_option: ScheduleOption,
    pub extensions: BTreeMap<String, String>,
}

impl InstanceInfo {
    pub fn priority(&self) -> u16 {
        self.schedule_option.priority
    }

    pub fn affinity(&self) -> &Affinity {
        &self.schedule_option.affinity
    }

    /// Creation time from the extensions, or 0 when absent or unparsable.
    pub fn create_timestamp(&self) -> i64 {
        self.extensions
            .get(CREATE_TIMESTAMP_KEY)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0)
    }

    /// Instance affinity is evaluated against node-level labels.
    pub fn is_node_affinity_scope(&self) -> bool {
        self.affinity()
            .instance
            .as_ref()
            .is_some_and(|instance| instance.scope == AffinityScope::Node)
    }
}

/// Scratch state of the label-affinity plugins for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityContext {
    /// Scores already computed, by resource unit ID.
    pub scheduled_score: HashMap<String, i64>,
    /// Best achievable score, once known.
    pub max_score: Option<i64>,
    /// Root-to-domain-to-local scheduling is in progress.
    pub is_top_down_scheduling: bool,
    /// Units rejected by a lower scheduling layer.
    pub scheduled_result: HashMap<String, StatusCode>,
}

/// Hints left on a member request by an earlier group decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupScheduleContext {
    /// Unit already set aside for this member. Empty when none.
    pub reserved: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginContext {
    pub affinity: AffinityContext,
    pub group_schedule: GroupScheduleContext,
}

/// Plugin contexts keyed by plugin name.
pub type PluginContexts = BTreeMap<String, PluginContext>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleRequest {
    pub request_id: String,
    pub trace_id: String,
    pub instance: InstanceInfo,
    pub contexts: PluginContexts,
}

impl ScheduleRequest {
    /// The unit a group decision already set aside for this request.
    pub fn reserved_unit(&self) -> Option<&str> {
        self.contexts
            .get(GROUP_SCHEDULE_CONTEXT)
            .map(|context| context.group_schedule.reserved.as_str())
            .filter(|unit| !unit.is_empty())
    }
}
