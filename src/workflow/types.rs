/// Workflow definition types
///
/// A definition is a short list of nodes ordered by `sequence`. Nodes sharing a sequence
/// are parallel siblings; [`WorkflowDefinition::folded`] merges them so each sequence
/// becomes one cohort of approval tasks at runtime. Definitions are stored as JSON in the
/// `workflow_definitions` table and validated before they enter the registry.

use crate::condition::Condition;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{hash_map::Entry, BTreeSet, HashMap};

pub type UserId = String;

/// A complete approval flow for one business type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique key (e.g. "po-standard")
    pub flow_code: String,
    /// Business type this flow serves (e.g. "purchase_order")
    pub business_type: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Selects this flow among several for the same business type; `None` always applies
    #[serde(default)]
    pub applies_when: Option<Condition>,
    pub nodes: Vec<Node>,
}

/// One level of the flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Rank within the flow; equal ranks run as one cohort
    pub sequence: i64,
    #[serde(default)]
    pub name: String,
    pub kind: NodeKind,
    pub approvers: ApproverResolver,
    /// APPROVED decisions needed to settle positively; `None` means everyone must approve
    #[serde(default)]
    pub minimum_approval_count: Option<u32>,
    /// Approvers whose rejection terminates the whole instance
    #[serde(default)]
    pub veto_approver_ids: BTreeSet<UserId>,
    /// Node only runs when this holds
    #[serde(default)]
    pub skip_unless: Option<Condition>,
    /// Forward jumps evaluated after this node settles positively; first match wins
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub escalation: Option<EscalationPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Single step; every resolved approver must approve
    Sequential,
    /// Parallel cohort; may settle early on `minimum_approval_count`
    Parallel,
}

/// How a node's approver set is determined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApproverResolver {
    Static { user_ids: Vec<UserId> },
    Role { role: String },
    Department { department: String },
    /// Direct manager of the initiator
    InitiatorManager,
    /// First matching rule wins, otherwise the fallback (or nobody)
    Conditional {
        rules: Vec<ApproverRule>,
        #[serde(default)]
        fallback: Option<Box<ApproverResolver>>,
    },
    /// Union of several resolvers
    AnyOf { resolvers: Vec<ApproverResolver> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproverRule {
    pub when: Condition,
    pub approvers: ApproverResolver,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub when: Condition,
    pub goto_sequence: i64,
}

/// Timeout handling for a node's tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Hours after task creation before the task is overdue
    pub timeout_hours: u32,
    pub on_timeout: TimeoutAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Hand the task to the escalation target; falls back to `AutoSatisfy` without one
    Reassign,
    /// Count the overdue task as satisfied for settlement
    AutoSatisfy,
}

impl Node {
    /// Approver resolver that yields nobody when `skip_unless` fails
    fn gated_approvers(&self) -> ApproverResolver {
        match &self.skip_unless {
            None => self.approvers.clone(),
            Some(when) => ApproverResolver::Conditional {
                rules: vec![ApproverRule {
                    when: when.clone(),
                    approvers: self.approvers.clone(),
                }],
                fallback: None,
            },
        }
    }

    /// Threshold used for cohort settlement; sequential nodes always need everyone
    pub fn settlement_threshold(&self) -> Option<u32> {
        match self.kind {
            NodeKind::Sequential => None,
            NodeKind::Parallel => self.minimum_approval_count,
        }
    }

    pub fn has_veto(&self, user: &str) -> bool {
        self.veto_approver_ids.contains(user)
    }
}

impl WorkflowDefinition {
    /// Nodes in ascending sequence order
    pub fn ordered_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by_key(|node| node.sequence);
        nodes
    }

    pub fn node(&self, sequence: i64) -> Option<&Node> {
        self.nodes.iter().find(|node| node.sequence == sequence)
    }

    /// Copy with every group of same-sequence siblings merged into one node
    ///
    /// The merged node assigns the union of the siblings' approvers (each gated on its own
    /// `skip_unless`), keeps every sibling's veto holders and routes in authoring order, and
    /// runs unless all siblings are skipped. `validate` guarantees siblings share their
    /// threshold and escalation policy.
    pub fn folded(&self) -> WorkflowDefinition {
        let nodes = self
            .ordered_nodes()
            .chunk_by(|a, b| a.sequence == b.sequence)
            .map(|group| match group {
                [single] => (*single).clone(),
                siblings => merge_siblings(siblings),
            })
            .collect();

        WorkflowDefinition {
            nodes,
            ..self.clone()
        }
    }

    /// Structural checks run before a definition is stored or loaded
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidDefinition(format!("{}: {}", self.flow_code, msg)));

        if self.flow_code.trim().is_empty() {
            return Err(EngineError::InvalidDefinition("flow_code must not be empty".into()));
        }
        if self.business_type.trim().is_empty() {
            return invalid("business_type must not be empty".into());
        }
        if self.nodes.is_empty() {
            return invalid("definition has no nodes".into());
        }

        let mut first_at: HashMap<i64, &Node> = HashMap::new();
        for node in &self.nodes {
            let first = match first_at.entry(node.sequence) {
                Entry::Vacant(slot) => {
                    slot.insert(node);
                    continue;
                }
                Entry::Occupied(slot) => *slot.get(),
            };
            if first.settlement_threshold() != node.settlement_threshold() {
                return invalid(format!(
                    "nodes at sequence {} disagree on minimum_approval_count",
                    node.sequence
                ));
            }
            if first.escalation != node.escalation {
                return invalid(format!("nodes at sequence {} disagree on escalation", node.sequence));
            }
        }

        for node in &self.nodes {
            match (node.kind, node.minimum_approval_count) {
                (_, Some(0)) => {
                    return invalid(format!("node {} has minimum_approval_count 0", node.sequence))
                }
                (NodeKind::Sequential, Some(_)) => {
                    return invalid(format!(
                        "sequential node {} cannot carry minimum_approval_count",
                        node.sequence
                    ))
                }
                _ => {}
            }

            match &node.approvers {
                ApproverResolver::Static { user_ids } if user_ids.is_empty() => {
                    return invalid(format!("node {} has an empty static approver list", node.sequence))
                }
                ApproverResolver::AnyOf { resolvers } if resolvers.is_empty() => {
                    return invalid(format!("node {} has an empty any_of resolver", node.sequence))
                }
                _ => {}
            }

            for route in &node.routes {
                if route.goto_sequence <= node.sequence {
                    return invalid(format!(
                        "node {} routes backwards to {}",
                        node.sequence, route.goto_sequence
                    ));
                }
                if !first_at.contains_key(&route.goto_sequence) {
                    return invalid(format!(
                        "node {} routes to unknown sequence {}",
                        node.sequence, route.goto_sequence
                    ));
                }
            }

            if let Some(policy) = &node.escalation {
                if policy.timeout_hours == 0 {
                    return invalid(format!("node {} has a zero escalation timeout", node.sequence));
                }
            }
        }

        Ok(())
    }
}

fn merge_siblings(siblings: &[&Node]) -> Node {
    let first = siblings[0];

    let skip_unless = if siblings.iter().all(|node| node.skip_unless.is_some()) {
        Some(Condition::Any {
            conditions: siblings.iter().filter_map(|node| node.skip_unless.clone()).collect(),
        })
    } else {
        None
    };

    let kind = if siblings.iter().all(|node| node.kind == NodeKind::Sequential) {
        NodeKind::Sequential
    } else {
        NodeKind::Parallel
    };

    Node {
        sequence: first.sequence,
        name: siblings
            .iter()
            .map(|node| node.name.as_str())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(" + "),
        kind,
        approvers: ApproverResolver::AnyOf {
            resolvers: siblings.iter().map(|node| node.gated_approvers()).collect(),
        },
        minimum_approval_count: first.settlement_threshold(),
        veto_approver_ids: siblings
            .iter()
            .flat_map(|node| node.veto_approver_ids.iter().cloned())
            .collect(),
        skip_unless,
        routes: siblings.iter().flat_map(|node| node.routes.iter().cloned()).collect(),
        escalation: first.escalation.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(sequence: i64, kind: NodeKind, min: Option<u32>) -> Node {
        Node {
            sequence,
            name: format!("level {}", sequence),
            kind,
            approvers: ApproverResolver::Static {
                user_ids: vec!["a".into(), "b".into()],
            },
            minimum_approval_count: min,
            veto_approver_ids: BTreeSet::new(),
            skip_unless: None,
            routes: vec![],
            escalation: None,
        }
    }

    fn definition(nodes: Vec<Node>) -> WorkflowDefinition {
        WorkflowDefinition {
            flow_code: "po-standard".into(),
            business_type: "purchase_order".into(),
            name: "Purchase order".into(),
            applies_when: None,
            nodes,
        }
    }

    #[test]
    fn accepts_well_formed_definition() {
        let def = definition(vec![
            node(2, NodeKind::Parallel, Some(1)),
            node(1, NodeKind::Sequential, None),
        ]);
        def.validate().unwrap();
        let order: Vec<i64> = def.ordered_nodes().iter().map(|n| n.sequence).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn rejects_disagreeing_siblings_and_zero_thresholds() {
        let thresholds = definition(vec![
            node(1, NodeKind::Sequential, None),
            node(1, NodeKind::Parallel, Some(1)),
        ]);
        assert!(matches!(thresholds.validate(), Err(EngineError::InvalidDefinition(_))));

        let mut timed = node(1, NodeKind::Sequential, None);
        timed.escalation = Some(EscalationPolicy {
            timeout_hours: 24,
            on_timeout: TimeoutAction::AutoSatisfy,
        });
        let escalation = definition(vec![node(1, NodeKind::Sequential, None), timed]);
        assert!(escalation.validate().is_err());

        let zero = definition(vec![node(1, NodeKind::Parallel, Some(0))]);
        assert!(zero.validate().is_err());

        let seq_threshold = definition(vec![node(1, NodeKind::Sequential, Some(1))]);
        assert!(seq_threshold.validate().is_err());
    }

    #[test]
    fn rejects_backward_or_dangling_routes() {
        let mut first = node(1, NodeKind::Sequential, None);
        first.routes.push(Route {
            when: Condition::Always,
            goto_sequence: 5,
        });
        assert!(definition(vec![first.clone(), node(2, NodeKind::Sequential, None)])
            .validate()
            .is_err());

        let mut second = node(2, NodeKind::Sequential, None);
        second.routes.push(Route {
            when: Condition::Always,
            goto_sequence: 1,
        });
        assert!(definition(vec![node(1, NodeKind::Sequential, None), second])
            .validate()
            .is_err());
    }

    #[test]
    fn folds_same_sequence_siblings_into_one_node() {
        let mut finance = node(1, NodeKind::Sequential, None);
        finance.name = "finance".into();
        finance.approvers = ApproverResolver::Static { user_ids: vec!["a".into()] };
        finance.veto_approver_ids = BTreeSet::from(["a".to_string()]);
        let mut quality = node(1, NodeKind::Sequential, None);
        quality.name = "quality".into();
        quality.approvers = ApproverResolver::Static { user_ids: vec!["b".into()] };
        quality.routes.push(Route {
            when: Condition::Always,
            goto_sequence: 3,
        });
        let def = definition(vec![
            node(3, NodeKind::Sequential, None),
            quality,
            node(2, NodeKind::Parallel, Some(1)),
            finance,
        ]);
        def.validate().unwrap();

        let folded = def.folded();
        let order: Vec<i64> = folded.nodes.iter().map(|n| n.sequence).collect();
        assert_eq!(order, vec![1, 2, 3]);

        let merged = folded.node(1).unwrap();
        assert_eq!(merged.name, "quality + finance");
        assert_eq!(merged.kind, NodeKind::Sequential);
        assert_eq!(merged.settlement_threshold(), None);
        assert!(merged.has_veto("a"));
        assert!(!merged.has_veto("b"));
        assert_eq!(merged.routes.len(), 1);
        assert!(matches!(&merged.approvers, ApproverResolver::AnyOf { resolvers } if resolvers.len() == 2));
        assert_eq!(folded.node(2).unwrap(), def.node(2).unwrap());
        folded.validate().unwrap();
    }

    #[test]
    fn parses_json_definition() {
        let json = r#"{
            "flow_code": "acc-standard",
            "business_type": "acceptance_order",
            "nodes": [
                {"sequence": 1, "kind": "sequential", "approvers": {"type": "initiator_manager"}},
                {"sequence": 2, "kind": "parallel", "minimum_approval_count": 2,
                 "veto_approver_ids": ["qa-head"],
                 "approvers": {"type": "role", "role": "qa"},
                 "escalation": {"timeout_hours": 48, "on_timeout": "reassign"}}
            ]
        }"#;
        let def: WorkflowDefinition = serde_json::from_str(json).unwrap();
        def.validate().unwrap();
        assert_eq!(def.node(2).unwrap().settlement_threshold(), Some(2));
        assert!(def.node(2).unwrap().has_veto("qa-head"));
    }
}
