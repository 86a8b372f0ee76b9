/// Pure routing over definitions and entity data
///
/// The evaluator picks a flow for an entity, decides which node runs next and which
/// users are assigned to it. It only reads its inputs and an immutable
/// [`OrgDirectory`] snapshot, so routing is deterministic and testable without storage.

use crate::condition::{data::EntityData, directory::OrgDirectory};
use crate::workflow::types::{ApproverResolver, Node, UserId, WorkflowDefinition};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Key the engine injects into entity data so resolvers can see the initiator
pub const INITIATOR_KEY: &str = "initiator_id";

#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator {
    directory: Arc<OrgDirectory>,
}

impl ConditionEvaluator {
    pub fn new(directory: Arc<OrgDirectory>) -> Self {
        Self { directory }
    }

    /// First definition (by flow_code) whose `applies_when` holds for the entity
    pub fn select_definition<'a>(
        &self,
        candidates: &'a [WorkflowDefinition],
        entity_data: &EntityData,
    ) -> Option<&'a WorkflowDefinition> {
        let mut ordered: Vec<&WorkflowDefinition> = candidates.iter().collect();
        ordered.sort_by(|a, b| a.flow_code.cmp(&b.flow_code));
        ordered.into_iter().find(|def| {
            def.applies_when
                .as_ref()
                .map(|cond| cond.evaluate(entity_data))
                .unwrap_or(true)
        })
    }

    /// Users assigned to `node` for this entity
    ///
    /// The initiator is dropped from the set unless they are the only candidate.
    pub fn resolve_approvers(&self, node: &Node, entity_data: &EntityData) -> BTreeSet<UserId> {
        let mut approvers = self.resolve(&node.approvers, entity_data);

        if let Some(initiator) = entity_data.text(INITIATOR_KEY) {
            if approvers.len() > 1 {
                approvers.remove(initiator);
            }
        }

        approvers
    }

    /// Next node to run after `current` (or the first node when `current` is `None`)
    ///
    /// A matching route on the current node jumps forward to its target; nodes whose
    /// `skip_unless` fails are passed over.
    pub fn resolve_next_node<'a>(
        &self,
        definition: &'a WorkflowDefinition,
        current: Option<&Node>,
        entity_data: &EntityData,
    ) -> Option<&'a Node> {
        let start_after = match current {
            None => i64::MIN,
            Some(node) => {
                let jump = node
                    .routes
                    .iter()
                    .find(|route| route.when.evaluate(entity_data))
                    .map(|route| route.goto_sequence);

                match jump {
                    // Route target is inclusive, so start scanning just before it
                    Some(target) => target - 1,
                    None => node.sequence,
                }
            }
        };

        definition
            .ordered_nodes()
            .into_iter()
            .filter(|node| node.sequence > start_after)
            .find(|node| {
                node.skip_unless
                    .as_ref()
                    .map(|cond| cond.evaluate(entity_data))
                    .unwrap_or(true)
            })
    }

    fn resolve(&self, resolver: &ApproverResolver, entity_data: &EntityData) -> BTreeSet<UserId> {
        match resolver {
            ApproverResolver::Static { user_ids } => user_ids.iter().cloned().collect(),
            ApproverResolver::Role { role } => self.directory.users_in_role(role),
            ApproverResolver::Department { department } => {
                self.directory.users_in_department(department)
            }
            ApproverResolver::InitiatorManager => entity_data
                .text(INITIATOR_KEY)
                .and_then(|initiator| self.directory.manager_of(initiator))
                .into_iter()
                .cloned()
                .collect(),
            ApproverResolver::Conditional { rules, fallback } => {
                match rules.iter().find(|rule| rule.when.evaluate(entity_data)) {
                    Some(rule) => self.resolve(&rule.approvers, entity_data),
                    None => fallback
                        .as_deref()
                        .map(|fallback| self.resolve(fallback, entity_data))
                        .unwrap_or_default(),
                }
            }
            ApproverResolver::AnyOf { resolvers } => resolvers
                .iter()
                .flat_map(|resolver| self.resolve(resolver, entity_data))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Comparison, Condition};
    use crate::workflow::types::{ApproverRule, NodeKind, Route};

    fn directory() -> Arc<OrgDirectory> {
        Arc::new(
            OrgDirectory::new()
                .with_role("finance", ["fin-1", "fin-2"])
                .with_role("cfo", ["cfo"])
                .with_department("qa", ["qa-1", "qa-2", "qa-3"])
                .with_manager("alice", "mgr-alice"),
        )
    }

    fn node(sequence: i64, approvers: ApproverResolver) -> Node {
        Node {
            sequence,
            name: String::new(),
            kind: NodeKind::Sequential,
            approvers,
            minimum_approval_count: None,
            veto_approver_ids: Default::default(),
            skip_unless: None,
            routes: vec![],
            escalation: None,
        }
    }

    fn flow(nodes: Vec<Node>) -> WorkflowDefinition {
        WorkflowDefinition {
            flow_code: "po".into(),
            business_type: "purchase_order".into(),
            name: String::new(),
            applies_when: None,
            nodes,
        }
    }

    #[test]
    fn conditional_approvers_by_amount() {
        let evaluator = ConditionEvaluator::new(directory());
        let n = node(
            1,
            ApproverResolver::Conditional {
                rules: vec![ApproverRule {
                    when: Condition::field("amount", Comparison::Ge, 100_000.0),
                    approvers: ApproverResolver::Role { role: "cfo".into() },
                }],
                fallback: Some(Box::new(ApproverResolver::Role { role: "finance".into() })),
            },
        );

        let big = EntityData::new().with("amount", 250_000.0);
        let small = EntityData::new().with("amount", 5_000.0);
        assert_eq!(evaluator.resolve_approvers(&n, &big), BTreeSet::from(["cfo".to_string()]));
        assert_eq!(evaluator.resolve_approvers(&n, &small).len(), 2);
    }

    #[test]
    fn any_of_unions_resolvers() {
        let evaluator = ConditionEvaluator::new(directory());
        let n = node(
            1,
            ApproverResolver::AnyOf {
                resolvers: vec![
                    ApproverResolver::Role { role: "finance".into() },
                    ApproverResolver::Static { user_ids: vec!["fin-1".into(), "ops".into()] },
                    ApproverResolver::Conditional {
                        rules: vec![ApproverRule {
                            when: Condition::Flag { field: "urgent".into() },
                            approvers: ApproverResolver::Role { role: "cfo".into() },
                        }],
                        fallback: None,
                    },
                ],
            },
        );

        let routine = EntityData::new().with("urgent", false);
        assert_eq!(
            evaluator.resolve_approvers(&n, &routine),
            BTreeSet::from(["fin-1".to_string(), "fin-2".to_string(), "ops".to_string()])
        );
        let urgent = EntityData::new().with("urgent", true);
        assert!(evaluator.resolve_approvers(&n, &urgent).contains("cfo"));
    }

    #[test]
    fn initiator_manager_and_self_exclusion() {
        let evaluator = ConditionEvaluator::new(directory());
        let data = EntityData::new().with(INITIATOR_KEY, "alice");

        let manager = evaluator.resolve_approvers(&node(1, ApproverResolver::InitiatorManager), &data);
        assert_eq!(manager, BTreeSet::from(["mgr-alice".to_string()]));

        let mixed = node(
            1,
            ApproverResolver::Static {
                user_ids: vec!["alice".into(), "bob".into()],
            },
        );
        assert_eq!(evaluator.resolve_approvers(&mixed, &data), BTreeSet::from(["bob".to_string()]));

        let only_self = node(1, ApproverResolver::Static { user_ids: vec!["alice".into()] });
        assert_eq!(evaluator.resolve_approvers(&only_self, &data).len(), 1);
    }

    #[test]
    fn next_node_skips_and_routes() {
        let evaluator = ConditionEvaluator::new(directory());
        let mut first = node(1, ApproverResolver::Role { role: "finance".into() });
        first.routes.push(Route {
            when: Condition::Flag { field: "has_critical_failure".into() },
            goto_sequence: 3,
        });
        let mut second = node(2, ApproverResolver::Role { role: "cfo".into() });
        second.skip_unless = Some(Condition::field("amount", Comparison::Ge, 100_000.0));
        let third = node(3, ApproverResolver::Department { department: "qa".into() });
        let def = flow(vec![third, second, first]);

        let small = EntityData::new().with("amount", 10.0);
        let start = evaluator.resolve_next_node(&def, None, &small).unwrap();
        assert_eq!(start.sequence, 1);
        assert_eq!(evaluator.resolve_next_node(&def, Some(start), &small).unwrap().sequence, 3);

        let big = EntityData::new().with("amount", 500_000.0);
        assert_eq!(evaluator.resolve_next_node(&def, Some(start), &big).unwrap().sequence, 2);

        let critical = big.clone().with("has_critical_failure", true);
        assert_eq!(evaluator.resolve_next_node(&def, Some(start), &critical).unwrap().sequence, 3);

        let last = def.node(3).unwrap();
        assert!(evaluator.resolve_next_node(&def, Some(last), &big).is_none());
    }

    #[test]
    fn selects_first_applicable_definition() {
        let evaluator = ConditionEvaluator::default();
        let mut large = flow(vec![node(1, ApproverResolver::Static { user_ids: vec!["x".into()] })]);
        large.flow_code = "a-large".into();
        large.applies_when = Some(Condition::field("amount", Comparison::Gt, 1000.0));
        let mut standard = large.clone();
        standard.flow_code = "b-standard".into();
        standard.applies_when = None;
        let defs = vec![standard, large];

        let picked = evaluator.select_definition(&defs, &EntityData::new().with("amount", 5000.0));
        assert_eq!(picked.unwrap().flow_code, "a-large");
        let picked = evaluator.select_definition(&defs, &EntityData::new().with("amount", 10.0));
        assert_eq!(picked.unwrap().flow_code, "b-standard");
    }
}
