use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flow as listed by the service. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub definition: FlowGraph,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The state machine of a flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(rename = "StartAt", default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,
    #[serde(rename = "States", default)]
    pub states: BTreeMap<String, FlowState>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One state of a flow. Only `Action` states are executed by an action
/// provider and carry an `ActionUrl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    #[serde(rename = "Type")]
    pub state_type: String,
    #[serde(rename = "ActionUrl", default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlowState {
    pub fn is_action(&self) -> bool {
        self.state_type == "Action"
    }
}

impl FlowDefinition {
    pub fn new(id: impl Into<String>, definition: FlowGraph) -> Self {
        Self {
            id: id.into(),
            title: None,
            definition,
            extra: Map::new(),
        }
    }

    /// Step name to action URL, for every action state of the flow.
    pub fn step_types(&self) -> BTreeMap<&str, &str> {
        self.definition
            .states
            .iter()
            .filter(|(_, state)| state.is_action())
            .filter_map(|(name, state)| Some((name.as_str(), state.action_url.as_deref()?)))
            .collect()
    }
}

impl FlowGraph {
    /// Build a graph of action states from `(step name, action url)` pairs.
    pub fn from_actions<'a>(actions: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let states = actions
            .into_iter()
            .map(|(name, url)| {
                (
                    name.to_string(),
                    FlowState {
                        state_type: "Action".into(),
                        action_url: Some(url.to_string()),
                        extra: Map::new(),
                    },
                )
            })
            .collect();
        Self {
            start_at: None,
            states,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_types_only_lists_actions() {
        let flow: FlowDefinition = serde_json::from_value(json!({
            "id": "flow-1",
            "title": "XPCS reprocessing",
            "definition": {
                "StartAt": "Transfer",
                "States": {
                    "Transfer": {
                        "Type": "Action",
                        "ActionUrl": "https://transfer.actions.globus.org/transfer/",
                        "Next": "Decide"
                    },
                    "Decide": {"Type": "Choice", "Choices": []},
                    "Analyze": {
                        "Type": "Action",
                        "ActionUrl": "https://compute.actions.globus.org",
                        "End": true
                    }
                }
            }
        }))
        .unwrap();

        let steps = flow.step_types();
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps.get("Transfer"),
            Some(&"https://transfer.actions.globus.org/transfer/")
        );
        assert!(!steps.contains_key("Decide"));
        assert_eq!(flow.definition.states["Transfer"].extra["Next"], json!("Decide"));
    }

    #[test]
    fn test_missing_definition_defaults_to_empty() {
        let flow: FlowDefinition = serde_json::from_value(json!({"id": "flow-2"})).unwrap();
        assert!(flow.step_types().is_empty());
    }
}
