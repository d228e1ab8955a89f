//! Attack-graph templates: directed forward graphs of technique-tagged,
//! condition-gated nodes describing multi-step attack patterns.

pub mod engine;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alert::MitreId;
use crate::catalog::Snapshot;
use crate::condition::Condition;
use crate::error::CatalogError;

pub use engine::{AttackEngine, AttackInstance, TriggerEvent};

/// Identifier of a node within the graph store.
pub type NodeId = u32;
/// Identifier of an attack-graph template.
pub type GraphId = u32;

/// A single step of an attack pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackNode {
    /// Stable identifier, unique across all templates.
    pub id: NodeId,
    /// Technique an alert must carry to trigger this node.
    pub technique: MitreId,
    /// Forward edges. Predecessors are derivable and not authoritative.
    #[serde(default)]
    pub next: Vec<NodeId>,
    /// Conditions that must all be met for the node to fire.
    #[serde(default)]
    pub conditions: Vec<u32>,
    /// Operator-facing description.
    #[serde(default)]
    pub description: String,
}

/// An attack-graph template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackGraph {
    /// Stable identifier.
    pub id: GraphId,
    /// Operator-facing description.
    #[serde(default)]
    pub description: String,
    /// All nodes of the template, keyed by node id.
    pub nodes: BTreeMap<NodeId, AttackNode>,
    /// Entry node new attack instances spawn from.
    pub initial: NodeId,
}

impl AttackGraph {
    /// Checks the structural invariants of the template.
    ///
    /// Every node id referenced by `initial` or any `next` edge must exist,
    /// node map keys must match node ids, referenced conditions must be
    /// loaded, and the subgraph reachable from `initial` must be acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Invariant`] naming the first violation.
    pub fn validate(&self, conditions: &Snapshot<Condition>) -> Result<(), CatalogError> {
        let fail = |reason: String| CatalogError::Invariant {
            kind: "graph",
            id: self.id,
            reason,
        };

        if !self.nodes.contains_key(&self.initial) {
            return Err(fail(format!("initial node {} does not exist", self.initial)));
        }
        for (key, node) in &self.nodes {
            if *key != node.id {
                return Err(fail(format!("node map key {key} does not match node id {}", node.id)));
            }
            for next in &node.next {
                if !self.nodes.contains_key(next) {
                    return Err(fail(format!("node {} links to missing node {next}", node.id)));
                }
            }
            for condition in &node.conditions {
                if !conditions.contains_key(condition) {
                    return Err(fail(format!(
                        "node {} references unknown condition {condition}",
                        node.id
                    )));
                }
            }
        }
        self.check_acyclic()?;
        Ok(())
    }

    /// Rejects cycles reachable from the initial node.
    ///
    /// A single instance never revisits a node, so a cycle would pin a
    /// front in place forever instead of terminating.
    fn check_acyclic(&self) -> Result<(), CatalogError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();
        let mut stack = vec![(self.initial, 0usize)];

        while let Some(&mut (id, ref mut edge)) = stack.last_mut() {
            if *edge == 0 {
                marks.insert(id, Mark::Visiting);
            }
            let next = self.nodes.get(&id).map(|n| n.next.get(*edge));
            match next {
                Some(Some(&succ)) => {
                    *edge += 1;
                    match marks.get(&succ) {
                        Some(Mark::Visiting) => {
                            return Err(CatalogError::Invariant {
                                kind: "graph",
                                id: self.id,
                                reason: format!("cycle through node {succ}"),
                            });
                        }
                        Some(Mark::Done) => {}
                        None => stack.push((succ, 0)),
                    }
                }
                _ => {
                    marks.insert(id, Mark::Done);
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// The node the given id maps to, if present.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&AttackNode> {
        self.nodes.get(&id)
    }
}
