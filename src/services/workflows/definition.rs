//! Workflow definition value objects
//!
//! The definition is a DAG of typed nodes joined by edges, a trigger
//! configuration and per-workflow settings. It is stored as JSON, snapshot
//! per version and per execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Action,
    Condition,
    Delay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub source: String,
    pub target: String,
    /// Branch label taken out of a condition node: "true" or "false"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(rename = "type", default)]
    pub kind: TriggerKind,
    /// Equality conditions over the template context, ANDed
    #[serde(default)]
    pub conditions: HashMap<String, Value>,
    /// For state_changed triggers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<String>,
    /// For age triggers, minimum incident age
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age_minutes: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    IncidentCreated,
    StateChanged,
    Escalation,
    Manual,
    Age,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub timeout: WorkflowTimeout,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            timeout: WorkflowTimeout::default(),
            enabled: true,
        }
    }
}

/// Workflow timeout tiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowTimeout {
    #[serde(rename = "1min")]
    OneMinute,
    #[default]
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
}

impl WorkflowTimeout {
    pub fn as_secs(&self) -> u64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
        }
    }
}

/// Known action node kinds
pub const ACTION_KINDS: &[&str] = &["webhook", "jira", "linear", "runbook"];

impl WorkflowDefinition {
    pub fn from_json(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("invalid workflow definition: {e}"))
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a EdgeDef> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Structural validation: unique ids, edges over known nodes, exactly
    /// one trigger, condition branches labelled, acyclic graph, known
    /// action kinds, sane delay durations.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                errors.push(format!("duplicate node id: {}", node.id));
            }
        }

        let trigger_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Trigger)
            .count();
        if trigger_count != 1 {
            errors.push(format!("expected exactly one trigger node, found {trigger_count}"));
        }

        for edge in &self.edges {
            if !seen.contains(edge.source.as_str()) {
                errors.push(format!("edge references unknown source: {}", edge.source));
            }
            if !seen.contains(edge.target.as_str()) {
                errors.push(format!("edge references unknown target: {}", edge.target));
            }
        }

        for node in &self.nodes {
            match node.kind {
                NodeKind::Action => {
                    let kind = node.config.get("kind").and_then(|v| v.as_str());
                    match kind {
                        Some(kind) if ACTION_KINDS.contains(&kind) => {}
                        Some(kind) => errors.push(format!(
                            "node {} has unknown action kind: {kind}",
                            node.id
                        )),
                        None => errors.push(format!("node {} is missing action kind", node.id)),
                    }
                }
                NodeKind::Condition => {
                    let mut labels: Vec<&str> = self
                        .outgoing(&node.id)
                        .filter_map(|e| e.branch.as_deref())
                        .collect();
                    labels.sort_unstable();
                    if labels != ["false", "true"] {
                        errors.push(format!(
                            "condition node {} needs exactly one 'true' and one 'false' branch",
                            node.id
                        ));
                    }
                    if node.config.get("field").and_then(|v| v.as_str()).is_none() {
                        errors.push(format!("condition node {} is missing field", node.id));
                    }
                }
                NodeKind::Delay => {
                    let minutes = node
                        .config
                        .get("duration_minutes")
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                    if minutes <= 0 {
                        errors.push(format!(
                            "delay node {} needs a positive duration_minutes",
                            node.id
                        ));
                    }
                }
                NodeKind::Trigger => {}
            }
        }

        if errors.is_empty() && self.topological_order().is_none() {
            errors.push("workflow graph contains a cycle".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Kahn's algorithm. None when the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<&NodeDef>> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(edge.target.as_str()) {
                *degree += 1;
            }
        }

        let mut ready: VecDeque<&str> = self
            .nodes
            .iter()
            .filter(|n| in_degree.get(n.id.as_str()) == Some(&0))
            .map(|n| n.id.as_str())
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_front() {
            let node = self.node(id)?;
            order.push(node);
            for edge in self.outgoing(id) {
                if let Some(degree) = in_degree.get_mut(edge.target.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(edge.target.as_str());
                    }
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear_definition() -> WorkflowDefinition {
        serde_json::from_value(json!({
            "nodes": [
                {"id": "t", "type": "trigger"},
                {"id": "a", "type": "action", "config": {"kind": "webhook", "url": "http://x"}},
                {"id": "b", "type": "action", "config": {"kind": "webhook", "url": "http://y"}}
            ],
            "edges": [
                {"source": "t", "target": "a"},
                {"source": "a", "target": "b"}
            ],
            "trigger": {"type": "incident_created"},
            "settings": {"timeout": "1min", "enabled": true}
        }))
        .unwrap()
    }

    #[test]
    fn valid_definition_passes() {
        assert!(linear_definition().validate().is_ok());
    }

    #[test]
    fn topological_order_respects_edges() {
        let def = linear_definition();
        let order: Vec<&str> = def
            .topological_order()
            .unwrap()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(order, ["t", "a", "b"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut def = linear_definition();
        def.edges.push(EdgeDef {
            source: "b".into(),
            target: "a".into(),
            branch: None,
        });
        let errors = def.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn condition_needs_both_branches() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "t", "type": "trigger"},
                {"id": "c", "type": "condition", "config": {"field": "incident.severity", "value": "CRITICAL"}},
                {"id": "a", "type": "action", "config": {"kind": "webhook"}}
            ],
            "edges": [
                {"source": "t", "target": "c"},
                {"source": "c", "target": "a", "branch": "true"}
            ]
        }))
        .unwrap();
        let errors = def.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("'true' and one 'false'")));
    }

    #[test]
    fn timeout_tiers_map_to_seconds() {
        assert_eq!(WorkflowTimeout::OneMinute.as_secs(), 60);
        assert_eq!(WorkflowTimeout::FiveMinutes.as_secs(), 300);
        assert_eq!(WorkflowTimeout::FifteenMinutes.as_secs(), 900);
    }

    #[test]
    fn definition_round_trips_through_json() {
        let def = linear_definition();
        let raw = serde_json::to_string(&def).unwrap();
        let back = WorkflowDefinition::from_json(&raw).unwrap();
        assert_eq!(def, back);
    }

    #[test]
    fn unknown_action_kind_is_rejected() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "nodes": [
                {"id": "t", "type": "trigger"},
                {"id": "a", "type": "action", "config": {"kind": "carrier-pigeon"}}
            ],
            "edges": [{"source": "t", "target": "a"}]
        }))
        .unwrap();
        let errors = def.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown action kind")));
    }
}
