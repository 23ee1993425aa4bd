//! Affinity selectors.
//!
//! A [`Selector`] holds an ordered list of [`SubCondition`]s. Each
//! sub-condition is a conjunction of [`LabelExpression`]s and carries a
//! weight. Selectors appear at three scopes:
//!
//! - instance scope: labels of instances already placed on the pod or node
//! - resource scope: labels of the resource unit itself
//! - inner scope: constraints generated by the platform (preemption, data
//!   locality, group load balancing, resource groups, pending requests)

use serde::{Deserialize, Serialize};

/// Operator applied to one label key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operator", content = "values", rename_all = "snake_case")]
pub enum LabelOperator {
    /// Key present with at least one of the listed values.
    In(Vec<String>),
    /// Negation of `In`.
    NotIn(Vec<String>),
    Exists,
    NotExist,
}

/// One label test. An expression without an operator always matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelExpression {
    pub key: String,
    #[serde(default)]
    pub op: Option<LabelOperator>,
}

impl LabelExpression {
    pub fn in_values<S: Into<String>>(key: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            key: key.into(),
            op: Some(LabelOperator::In(values.into_iter().map(Into::into).collect())),
        }
    }

    pub fn not_in<S: Into<String>>(key: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            key: key.into(),
            op: Some(LabelOperator::NotIn(values.into_iter().map(Into::into).collect())),
        }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: Some(LabelOperator::Exists),
        }
    }

    pub fn not_exist(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: Some(LabelOperator::NotExist),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCondition {
    #[serde(default)]
    pub expressions: Vec<LabelExpression>,
    #[serde(default)]
    pub weight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub sub_conditions: Vec<SubCondition>,
    /// Sub-conditions are ranked in declaration order (first match wins)
    /// instead of all being required together.
    #[serde(default)]
    pub order_priority: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default)]
    pub condition: Condition,
}

impl Selector {
    pub fn new(order_priority: bool, sub_conditions: Vec<SubCondition>) -> Self {
        Self {
            condition: Condition {
                sub_conditions,
                order_priority,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityScope {
    #[default]
    Pod,
    Node,
}

/// Affinity towards other instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceAffinity {
    pub scope: AffinityScope,
    pub preferred_affinity: Option<Selector>,
    pub preferred_anti_affinity: Option<Selector>,
    pub required_affinity: Option<Selector>,
    pub required_anti_affinity: Option<Selector>,
}

/// Affinity towards resource-unit labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceAffinity {
    pub preferred_affinity: Option<Selector>,
    pub preferred_anti_affinity: Option<Selector>,
    pub required_affinity: Option<Selector>,
    pub required_anti_affinity: Option<Selector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreemptAffinity {
    pub preferred_affinity: Option<Selector>,
    pub preferred_anti_affinity: Option<Selector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataAffinity {
    pub preferred_affinity: Option<Selector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupLbAffinity {
    pub preferred_affinity: Option<Selector>,
    pub preferred_anti_affinity: Option<Selector>,
    pub required_anti_affinity: Option<Selector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceGroupAffinity {
    pub required_affinity: Option<Selector>,
}

/// Required constraints of a request still waiting for resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingResource {
    pub required_affinity: Option<Selector>,
    pub required_anti_affinity: Option<Selector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingAffinity {
    pub resources: Vec<PendingResource>,
}

/// Platform-generated affinities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InnerAffinity {
    pub preempt: Option<PreemptAffinity>,
    pub data: Option<DataAffinity>,
    pub group_lb: Option<GroupLbAffinity>,
    pub rgroup: Option<ResourceGroupAffinity>,
    pub pending: Option<PendingAffinity>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Affinity {
    pub instance: Option<InstanceAffinity>,
    pub resource: Option<ResourceAffinity>,
    pub inner: Option<InnerAffinity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_from_json() {
        let json = r#"{
            "condition": {
                "order_priority": true,
                "sub_conditions": [
                    {"weight": 100, "expressions": [{"key": "zone", "op": {"operator": "in", "values": ["az1"]}}]},
                    {"weight": 90, "expressions": [{"key": "gpu", "op": {"operator": "exists"}}]}
                ]
            }
        }"#;
        let selector: Selector = serde_json::from_str(json).unwrap();
        assert!(selector.condition.order_priority);
        assert_eq!(selector.condition.sub_conditions.len(), 2);
        assert_eq!(
            selector.condition.sub_conditions[0].expressions[0],
            LabelExpression::in_values("zone", ["az1"])
        );
        assert_eq!(
            selector.condition.sub_conditions[1].expressions[0],
            LabelExpression::exists("gpu")
        );
    }

    #[test]
    fn test_missing_operator_deserializes_to_none() {
        let expr: LabelExpression = serde_json::from_str(r#"{"key": "zone"}"#).unwrap();
        assert!(expr.op.is_none());
    }
}
