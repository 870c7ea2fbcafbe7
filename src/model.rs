//! The plan envelope and the open, mostly-`Option`, node/worker/trigger
//! mappings that the parsers build and the analyzer annotates in place.
//!
//! Every well-known property from the source gets a typed field; anything
//! else PostgreSQL emits falls through into `extra`, a plain JSON object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Why `Parent Relationship` was set on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRelationship {
    InitPlan,
    SubPlan,
    /// Anything else PostgreSQL may emit here (`Outer`, `Inner`, `Member`, ...).
    Other(String),
}

impl ParentRelationship {
    pub fn parse(s: &str) -> Self {
        match s {
            "InitPlan" => ParentRelationship::InitPlan,
            "SubPlan" => ParentRelationship::SubPlan,
            other => ParentRelationship::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ParentRelationship::InitPlan => "InitPlan",
            ParentRelationship::SubPlan => "SubPlan",
            ParentRelationship::Other(s) => s,
        }
    }
}

impl Serialize for ParentRelationship {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParentRelationship {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ParentRelationship::parse(&s))
    }
}

/// Direction of the planner's row-count mis-estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateDirection {
    Under,
    Over,
    None,
}

/// A single parallel worker's contribution to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    #[serde(rename = "Worker Number", skip_serializing_if = "Option::is_none")]
    pub worker_number: Option<u64>,
    #[serde(rename = "Actual Startup Time", skip_serializing_if = "Option::is_none")]
    pub actual_startup_time: Option<f64>,
    #[serde(rename = "Actual Total Time", skip_serializing_if = "Option::is_none")]
    pub actual_total_time: Option<f64>,
    #[serde(rename = "Actual Rows", skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<f64>,
    #[serde(rename = "Actual Loops", skip_serializing_if = "Option::is_none")]
    pub actual_loops: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A row of `Trigger ...: time=... calls=...` accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "Trigger Name", skip_serializing_if = "Option::is_none")]
    pub trigger_name: Option<String>,
    #[serde(rename = "Time", skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    /// Kept as a string so arbitrarily large call counts round-trip losslessly.
    #[serde(rename = "Calls", skip_serializing_if = "Option::is_none")]
    pub calls: Option<String>,
}

impl Trigger {
    /// Convenience accessor for callers that want the parsed integer.
    pub fn calls_as_u64(&self) -> Option<u64> {
        self.calls.as_deref()?.parse().ok()
    }
}

/// A single plan node, open-ended via `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "Node Type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(rename = "Parent Relationship", skip_serializing_if = "Option::is_none")]
    pub parent_relationship: Option<ParentRelationship>,
    #[serde(rename = "Subplan Name", skip_serializing_if = "Option::is_none")]
    pub subplan_name: Option<String>,

    #[serde(rename = "Startup Cost", skip_serializing_if = "Option::is_none")]
    pub startup_cost: Option<f64>,
    #[serde(rename = "Total Cost", skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(rename = "Plan Rows", skip_serializing_if = "Option::is_none")]
    pub plan_rows: Option<f64>,
    #[serde(rename = "Plan Width", skip_serializing_if = "Option::is_none")]
    pub plan_width: Option<u64>,

    #[serde(rename = "Actual Startup Time", skip_serializing_if = "Option::is_none")]
    pub actual_startup_time: Option<f64>,
    #[serde(rename = "Actual Total Time", skip_serializing_if = "Option::is_none")]
    pub actual_total_time: Option<f64>,
    #[serde(rename = "Actual Rows", skip_serializing_if = "Option::is_none")]
    pub actual_rows: Option<f64>,
    #[serde(rename = "Actual Loops", skip_serializing_if = "Option::is_none")]
    pub actual_loops: Option<f64>,

    #[serde(rename = "Actual Cost", skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
    #[serde(rename = "Actual Duration", skip_serializing_if = "Option::is_none")]
    pub actual_duration: Option<f64>,
    #[serde(rename = "Planner Estimate Factor", skip_serializing_if = "Option::is_none")]
    pub planner_estimate_factor: Option<f64>,
    #[serde(rename = "Planner Estimate Direction", skip_serializing_if = "Option::is_none")]
    pub planner_estimate_direction: Option<EstimateDirection>,
    #[serde(rename = "Parallel", skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    #[serde(rename = "Costliest Node", skip_serializing_if = "Option::is_none")]
    pub costliest_node: Option<bool>,
    #[serde(rename = "Largest Node", skip_serializing_if = "Option::is_none")]
    pub largest_node: Option<bool>,
    #[serde(rename = "Slowest Node", skip_serializing_if = "Option::is_none")]
    pub slowest_node: Option<bool>,

    #[serde(rename = "Sort Method", skip_serializing_if = "Option::is_none")]
    pub sort_method: Option<String>,
    #[serde(rename = "Sort Space Type", skip_serializing_if = "Option::is_none")]
    pub sort_space_type: Option<String>,
    #[serde(rename = "Sort Space Used", skip_serializing_if = "Option::is_none")]
    pub sort_space_used: Option<i64>,

    #[serde(rename = "Plans", default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<Node>,
    #[serde(rename = "Workers", default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<Worker>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn new(node_type: impl Into<String>) -> Self {
        Node {
            node_type: Some(node_type.into()),
            ..Default::default()
        }
    }

    pub fn is_init_plan(&self) -> bool {
        matches!(self.parent_relationship, Some(ParentRelationship::InitPlan))
    }
}

/// The plan-tree root: the `Plan` node plus optional triggers and the
/// analyzer-injected maxima.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanTree {
    #[serde(rename = "Plan")]
    pub plan: Node,
    #[serde(rename = "Triggers", skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<Trigger>>,
    #[serde(rename = "maximum_rows", skip_serializing_if = "Option::is_none")]
    pub maximum_rows: Option<f64>,
    #[serde(rename = "maximum_costs", skip_serializing_if = "Option::is_none")]
    pub maximum_costs: Option<f64>,
    #[serde(rename = "maximum_duration", skip_serializing_if = "Option::is_none")]
    pub maximum_duration: Option<f64>,
}

/// The envelope returned by `create_plan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(rename = "createdOn")]
    pub created_on: DateTime<Utc>,
    pub content: PlanTree,
    pub query: String,
    #[serde(rename = "planStats")]
    pub plan_stats: Map<String, Value>,
}
