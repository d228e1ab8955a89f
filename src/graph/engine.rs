//! The attack-instance engine.
//!
//! For every template the engine keeps the set of live attack instances —
//! traversal states with a *front* of nodes the next alert may trigger —
//! and performs one step against all of them per incoming alert.
//! Advancement returns an explicit, ordered list of trigger events rather
//! than calling back into the engine's caller, which keeps the step
//! re-entrancy-free and directly assertable in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::{AttackGraph, AttackNode, GraphId, NodeId};
use crate::alert::Alert;
use crate::catalog::Snapshot;
use crate::condition::{Condition, Evaluator};

/// A live traversal state of one attack-graph template.
#[derive(Debug, Clone)]
pub struct AttackInstance {
    /// Engine-generated identifier.
    pub id: Uuid,
    /// Owning template.
    pub graph: GraphId,
    /// Alerts that advanced this instance, newest first.
    pub ctx: Vec<Arc<Alert>>,
    /// Nodes currently eligible to fire, in enumeration order from the
    /// previous step.
    pub front: Vec<NodeId>,
}

/// A node fired by an alert during one engine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Template the node belongs to.
    pub graph: GraphId,
    /// The node that fired.
    pub node: NodeId,
}

/// Live attack-instance state for all templates.
///
/// Owned exclusively by the alert worker; one `step` runs at a time and
/// commits before the next alert is handled.
#[derive(Debug, Default)]
pub struct AttackEngine {
    /// Live instances per template, in creation order.
    instances: BTreeMap<GraphId, Vec<AttackInstance>>,
}

impl AttackEngine {
    /// Creates an engine with no live instances.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Performs one step against every template for one alert.
    ///
    /// Templates are visited in id order, live instances per template in
    /// creation order, front nodes in stored order; trigger events are
    /// returned in exactly that order. Existing instances advance before a
    /// template may spawn a new one.
    pub async fn step(
        &mut self,
        alert: &Arc<Alert>,
        graphs: &Snapshot<AttackGraph>,
        conditions: &Snapshot<Condition>,
        evaluator: &Evaluator,
    ) -> Vec<TriggerEvent> {
        // Instances of templates dropped from the catalog die with them.
        self.instances.retain(|graph_id, _| graphs.contains_key(graph_id));

        let mut events = Vec::new();

        for (graph_id, graph) in graphs.iter() {
            let live = self.instances.entry(*graph_id).or_default();

            let mut surviving = Vec::with_capacity(live.len());
            for mut instance in live.drain(..) {
                let outcome =
                    advance_front(&instance.front, graph, alert, conditions, evaluator).await;
                events.extend(outcome.fired.iter().map(|&node| TriggerEvent {
                    graph: *graph_id,
                    node,
                }));
                if outcome.front != instance.front {
                    instance.ctx.insert(0, Arc::clone(alert));
                    instance.front = outcome.front;
                    if instance.front.is_empty() {
                        info!(instance = %instance.id, graph = graph_id, "attack instance terminal");
                        continue;
                    }
                    debug!(
                        instance = %instance.id,
                        graph = graph_id,
                        front = ?instance.front,
                        "attack instance advanced"
                    );
                }
                surviving.push(instance);
            }
            *live = surviving;

            // A matching alert may also start a fresh traversal from the
            // template's initial node.
            if let Some(initial) = graph.node(graph.initial) {
                if node_fires(initial, alert, conditions, evaluator).await {
                    events.push(TriggerEvent {
                        graph: *graph_id,
                        node: initial.id,
                    });
                    if initial.next.is_empty() {
                        // Terminal on first hit: the event is emitted but no
                        // live instance is retained.
                        info!(graph = graph_id, node = initial.id, "single-node pattern hit");
                    } else {
                        let instance = AttackInstance {
                            id: Uuid::new_v4(),
                            graph: *graph_id,
                            ctx: vec![Arc::clone(alert)],
                            front: dedup(initial.next.clone()),
                        };
                        info!(
                            instance = %instance.id,
                            graph = graph_id,
                            front = ?instance.front,
                            "attack instance spawned"
                        );
                        live.push(instance);
                    }
                }
            }
        }

        events
    }

    /// Live instances of one template, in creation order.
    #[must_use]
    pub fn instances_of(&self, graph: GraphId) -> &[AttackInstance] {
        self.instances.get(&graph).map_or(&[], Vec::as_slice)
    }

    /// All live instances, in template-id then creation order.
    pub fn instances(&self) -> impl Iterator<Item = &AttackInstance> {
        self.instances.values().flatten()
    }

    /// Total number of live instances.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }
}

/// Result of advancing one front against one alert.
struct FrontOutcome {
    /// Replacement front (deduplicated, enumeration order preserved).
    front: Vec<NodeId>,
    /// Nodes that fired, in front order.
    fired: Vec<NodeId>,
}

/// Advances each front node: a node whose technique the alert carries and
/// whose conditions are all met is replaced by its successors; any other
/// node holds its place.
async fn advance_front(
    front: &[NodeId],
    graph: &AttackGraph,
    alert: &Arc<Alert>,
    conditions: &Snapshot<Condition>,
    evaluator: &Evaluator,
) -> FrontOutcome {
    let mut next_front = Vec::new();
    let mut fired = Vec::new();

    for &node_id in front {
        let Some(node) = graph.node(node_id) else {
            // Nodes removed by a catalog swap fall out of the front.
            debug!(graph = graph.id, node = node_id, "front node no longer in template");
            continue;
        };
        if node_fires(node, alert, conditions, evaluator).await {
            fired.push(node_id);
            next_front.extend_from_slice(&node.next);
        } else {
            next_front.push(node_id);
        }
    }

    FrontOutcome {
        front: dedup(next_front),
        fired,
    }
}

/// Whether an alert triggers a node: technique match plus every gating
/// condition met. A condition id missing from the catalog counts as unmet.
async fn node_fires(
    node: &AttackNode,
    alert: &Arc<Alert>,
    conditions: &Snapshot<Condition>,
    evaluator: &Evaluator,
) -> bool {
    if !alert.has_technique(&node.technique) {
        return false;
    }
    for condition_id in &node.conditions {
        let Some(condition) = conditions.get(condition_id) else {
            debug!(node = node.id, condition = condition_id, "condition not loaded; node held");
            return false;
        };
        if !evaluator.is_met(condition, alert).await {
            return false;
        }
    }
    true
}

/// Removes duplicate node ids, keeping first occurrences.
fn dedup(mut nodes: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = std::collections::BTreeSet::new();
    nodes.retain(|id| seen.insert(*id));
    nodes
}
