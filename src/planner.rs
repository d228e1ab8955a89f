//! The mitigation planner.
//!
//! Given the alert(s) under consideration and the workflow catalog, the
//! planner produces an assignment of workflow instances to alerts:
//!
//! - every assigned workflow must be applicable (target technique carried
//!   by the alert, signature conditions met, arguments resolvable);
//! - every alert must receive at least one workflow, or be reported
//!   unmitigated;
//! - the summed effective cost of the chosen instances is minimized.
//!
//! Candidates are screened up front (condition evaluation may suspend on
//! the graph database); the search itself is a synchronous
//! branch-and-bound over per-alert candidate lists with a hard wall-clock
//! deadline, returning the best feasible assignment found so far when the
//! deadline expires. Each alert owns a fixed number of assignment slots;
//! with non-negative costs a cost-minimal assignment occupies a single
//! slot per alert, so the search branches over which candidate fills it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::alert::Alert;
use crate::catalog::CatalogView;
use crate::condition::Evaluator;
use crate::workflow::WorkflowInstance;

/// Default number of assignment slots per alert.
pub const DEFAULT_SLOTS: usize = 10;
/// Default search deadline.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(1);

/// One alert's share of a mitigation plan.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// The alert being mitigated.
    pub alert: Arc<Alert>,
    /// Chosen workflow instances, at most one per slot.
    pub workflows: Vec<WorkflowInstance>,
}

/// The planner's output for one batch of alerts.
#[derive(Debug, Clone, Default)]
pub struct MitigationPlan {
    /// Alerts with at least one assigned workflow.
    pub assignments: Vec<Assignment>,
    /// Alerts no applicable workflow could cover.
    pub unmitigated: Vec<Arc<Alert>>,
    /// Whether the search stopped on its deadline rather than exhausting
    /// the space.
    pub deadline_hit: bool,
}

impl MitigationPlan {
    /// Total effective cost of all chosen workflow instances.
    #[must_use]
    pub fn total_cost(&self) -> i64 {
        self.assignments
            .iter()
            .flat_map(|a| &a.workflows)
            .map(WorkflowInstance::effective_cost)
            .sum()
    }
}

/// A screened workflow candidate for one alert.
struct Candidate {
    instance: WorkflowInstance,
    cost: i64,
}

/// Constraint-based workflow-to-alert assignment.
#[derive(Debug, Clone, Copy)]
pub struct Planner {
    slots: usize,
    time_limit: Duration,
}

impl Default for Planner {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }
}

impl Planner {
    /// Creates a planner with the given slot count and search deadline.
    #[must_use]
    pub const fn new(slots: usize, time_limit: Duration) -> Self {
        Self { slots, time_limit }
    }

    /// Plans mitigations for a batch of alerts.
    ///
    /// The typical flow passes a single alert per step; batches share one
    /// deadline.
    pub async fn plan(
        &self,
        alerts: &[Arc<Alert>],
        view: &CatalogView,
        evaluator: &Evaluator,
    ) -> MitigationPlan {
        let mut plan = MitigationPlan::default();
        let mut problem: Vec<(Arc<Alert>, Vec<Candidate>)> = Vec::new();

        for alert in alerts {
            let candidates = self.screen_candidates(alert, view, evaluator).await;
            if candidates.is_empty() {
                warn!(alert = %alert.description, "no applicable workflow; alert unmitigated");
                plan.unmitigated.push(Arc::clone(alert));
            } else {
                problem.push((Arc::clone(alert), candidates));
            }
        }

        if problem.is_empty() {
            return plan;
        }

        let candidate_lists: Vec<&[Candidate]> =
            problem.iter().map(|(_, c)| c.as_slice()).collect();
        let (choice, deadline_hit) = search(&candidate_lists, self.time_limit);
        plan.deadline_hit = deadline_hit;

        match choice {
            Some(indices) => {
                for ((alert, candidates), index) in problem.into_iter().zip(indices) {
                    let chosen = &candidates[index];
                    debug!(
                        alert = %alert.description,
                        workflow = chosen.instance.signature.id,
                        cost = chosen.cost,
                        "workflow assigned"
                    );
                    plan.assignments.push(Assignment {
                        alert,
                        workflows: vec![candidates[index].instance.clone()],
                    });
                }
            }
            None => {
                // Deadline expired before the first complete assignment.
                for (alert, _) in problem {
                    warn!(alert = %alert.description, "planner deadline expired; alert unmitigated");
                    plan.unmitigated.push(alert);
                }
            }
        }

        plan
    }

    /// Generates the candidate list for one alert: applicable signatures
    /// whose conditions are met and whose arguments resolve, ordered by
    /// (effective cost, workflow id, parameter rendering).
    async fn screen_candidates(
        &self,
        alert: &Arc<Alert>,
        view: &CatalogView,
        evaluator: &Evaluator,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        'signatures: for signature in view.workflows.values() {
            if !signature.applicable_to(alert) {
                continue;
            }
            for condition_id in &signature.conditions {
                let Some(condition) = view.conditions.get(condition_id) else {
                    debug!(
                        workflow = signature.id,
                        condition = condition_id,
                        "condition not loaded; workflow skipped"
                    );
                    continue 'signatures;
                };
                if !evaluator.is_met(condition, alert).await {
                    continue 'signatures;
                }
            }
            let Some(instance) = WorkflowInstance::materialize(Arc::clone(signature), alert)
            else {
                debug!(workflow = signature.id, "arguments unresolved; workflow skipped");
                continue;
            };
            let cost = instance.effective_cost();
            candidates.push(Candidate { instance, cost });
        }

        candidates.sort_by(|a, b| {
            a.cost
                .cmp(&b.cost)
                .then_with(|| a.instance.signature.id.cmp(&b.instance.signature.id))
                .then_with(|| a.instance.params_key().cmp(&b.instance.params_key()))
        });

        // A plan holds at most `slots` instances per alert. Candidates are
        // cost-ascending, so keeping only the first `slots` never discards
        // an optimal fill.
        candidates.truncate(self.slots.max(1));
        candidates
    }
}

/// Branch-and-bound over per-alert candidate lists.
///
/// Candidate lists are cost-ascending, so the first full descent is the
/// greedy assignment and each level can stop exploring as soon as its
/// lower bound reaches the incumbent. Ties keep the earliest candidate,
/// which sorting has already put in workflow-id order.
fn search(candidates: &[&[Candidate]], time_limit: Duration) -> (Option<Vec<usize>>, bool) {
    let deadline = Instant::now() + time_limit;

    // min_rest[i] = cheapest possible completion of alerts i..
    let mut min_rest = vec![0_i64; candidates.len() + 1];
    for (i, list) in candidates.iter().enumerate().rev() {
        let cheapest = list.first().map_or(0, |c| c.cost);
        min_rest[i] = min_rest[i + 1].saturating_add(cheapest);
    }

    let mut best: Option<(i64, Vec<usize>)> = None;
    let mut chosen = Vec::with_capacity(candidates.len());
    let mut deadline_hit = false;

    descend(
        candidates,
        &min_rest,
        0,
        0,
        &mut chosen,
        &mut best,
        deadline,
        &mut deadline_hit,
    );

    (best.map(|(_, indices)| indices), deadline_hit)
}

#[allow(clippy::too_many_arguments)]
fn descend(
    candidates: &[&[Candidate]],
    min_rest: &[i64],
    level: usize,
    cost_so_far: i64,
    chosen: &mut Vec<usize>,
    best: &mut Option<(i64, Vec<usize>)>,
    deadline: Instant,
    deadline_hit: &mut bool,
) {
    if *deadline_hit {
        return;
    }
    if Instant::now() >= deadline {
        *deadline_hit = true;
        return;
    }
    if level == candidates.len() {
        if best.as_ref().is_none_or(|(cost, _)| cost_so_far < *cost) {
            *best = Some((cost_so_far, chosen.clone()));
        }
        return;
    }

    for (index, candidate) in candidates[level].iter().enumerate() {
        let bound = cost_so_far
            .saturating_add(candidate.cost)
            .saturating_add(min_rest[level + 1]);
        if best.as_ref().is_some_and(|(cost, _)| bound >= *cost) {
            // Cost-ascending order: every later candidate bounds at least
            // as high.
            break;
        }
        chosen.push(index);
        descend(
            candidates,
            min_rest,
            level + 1,
            cost_so_far.saturating_add(candidate.cost),
            chosen,
            best,
            deadline,
            deadline_hit,
        );
        chosen.pop();
        if *deadline_hit {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MitreId;
    use crate::catalog::Catalogs;
    use crate::condition::{ArgSpec, Condition, ConditionSpec};
    use crate::graphdb::Unavailable;
    use crate::value::Value;
    use crate::workflow::WorkflowSignature;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(Unavailable))
    }

    fn alert(techniques: &[&str], data: &[(&str, Value)]) -> Arc<Alert> {
        Arc::new(Alert {
            description: "test alert".to_string(),
            timestamp: Utc::now(),
            techniques: techniques
                .iter()
                .map(|t| MitreId::parse(t).unwrap())
                .collect::<BTreeSet<_>>(),
            data: data
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        })
    }

    fn signature(id: u32, target: &str, cost: f64) -> WorkflowSignature {
        WorkflowSignature {
            id,
            description: String::new(),
            url: format!("http://hooks.internal/wf{id}"),
            target: MitreId::parse(target).unwrap(),
            cost,
            params: BTreeMap::new(),
            args: BTreeMap::new(),
            conditions: vec![],
        }
    }

    #[tokio::test]
    async fn picks_cheapest_applicable_workflow() {
        let catalogs = Catalogs::default();
        catalogs.workflows.insert(1, signature(1, "T1041", 5.0));
        catalogs.workflows.insert(2, signature(2, "T1041", 2.0));
        catalogs.workflows.insert(3, signature(3, "T1486", 0.5));

        let plan = Planner::default()
            .plan(&[alert(&["T1041"], &[])], &catalogs.snapshot(), &evaluator())
            .await;

        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].workflows[0].signature.id, 2);
        assert_eq!(plan.total_cost(), 2000);
        assert!(plan.unmitigated.is_empty());
    }

    #[tokio::test]
    async fn equal_cost_tie_breaks_by_workflow_id() {
        let catalogs = Catalogs::default();
        catalogs.workflows.insert(7, signature(7, "T1041", 1.0));
        catalogs.workflows.insert(3, signature(3, "T1041", 1.0));

        let plan = Planner::default()
            .plan(&[alert(&["T1041"], &[])], &catalogs.snapshot(), &evaluator())
            .await;

        assert_eq!(plan.assignments[0].workflows[0].signature.id, 3);
    }

    #[tokio::test]
    async fn inapplicable_target_leaves_alert_unmitigated() {
        let catalogs = Catalogs::default();
        catalogs.workflows.insert(1, signature(1, "T1486", 1.0));

        let plan = Planner::default()
            .plan(&[alert(&["T1041"], &[])], &catalogs.snapshot(), &evaluator())
            .await;

        assert!(plan.assignments.is_empty());
        assert_eq!(plan.unmitigated.len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_args_disqualify_candidate() {
        let mut sig = signature(1, "T1041", 1.0);
        sig.args = [(
            "path".to_string(),
            ArgSpec::Field("file_path".to_string()),
        )]
        .into_iter()
        .collect();
        let catalogs = Catalogs::default();
        catalogs.workflows.insert(1, sig);

        let plan = Planner::default()
            .plan(&[alert(&["T1041"], &[])], &catalogs.snapshot(), &evaluator())
            .await;

        assert_eq!(plan.unmitigated.len(), 1);
    }

    #[tokio::test]
    async fn failing_condition_disqualifies_candidate() {
        let cond = Condition::try_from(ConditionSpec {
            id: 10,
            description: String::new(),
            params: BTreeMap::new(),
            args: [("path".to_string(), ArgSpec::Field("file_path".to_string()))]
                .into_iter()
                .collect(),
            check: r#"(ends-with (param "path") ".py")"#.to_string(),
        })
        .unwrap();

        let mut gated = signature(1, "T1041", 1.0);
        gated.conditions = vec![10];
        let catalogs = Catalogs::default();
        catalogs.conditions.insert(10, cond);
        catalogs.workflows.insert(1, gated);
        catalogs.workflows.insert(2, signature(2, "T1041", 9.0));

        let plan = Planner::default()
            .plan(
                &[alert(&["T1041"], &[("file_path", Value::Str("/tmp/note.txt".into()))])],
                &catalogs.snapshot(),
                &evaluator(),
            )
            .await;

        // The cheap workflow is gated out; the expensive one is chosen.
        assert_eq!(plan.assignments[0].workflows[0].signature.id, 2);
    }

    #[tokio::test]
    async fn batch_assignment_covers_every_alert() {
        let catalogs = Catalogs::default();
        catalogs.workflows.insert(1, signature(1, "T1041", 1.0));
        catalogs.workflows.insert(2, signature(2, "T1486", 3.0));

        let alerts = [alert(&["T1041"], &[]), alert(&["T1486"], &[])];
        let plan = Planner::default()
            .plan(&alerts, &catalogs.snapshot(), &evaluator())
            .await;

        assert_eq!(plan.assignments.len(), 2);
        assert_eq!(plan.total_cost(), 4000);
    }

    #[tokio::test]
    async fn infeasible_alert_does_not_block_feasible_one() {
        let catalogs = Catalogs::default();
        catalogs.workflows.insert(1, signature(1, "T1041", 1.0));

        let alerts = [alert(&["T1041"], &[]), alert(&["T9999"], &[])];
        let plan = Planner::default()
            .plan(&alerts, &catalogs.snapshot(), &evaluator())
            .await;

        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.unmitigated.len(), 1);
    }

    #[tokio::test]
    async fn plans_are_deterministic() {
        let catalogs = Catalogs::default();
        for id in 1..=20 {
            catalogs
                .workflows
                .insert(id, signature(id, "T1041", f64::from(id % 5)));
        }
        let alerts = [alert(&["T1041"], &[])];
        let view = catalogs.snapshot();
        let eval = evaluator();

        let first = Planner::default().plan(&alerts, &view, &eval).await;
        let second = Planner::default().plan(&alerts, &view, &eval).await;

        let ids = |plan: &MitigationPlan| {
            plan.assignments
                .iter()
                .flat_map(|a| a.workflows.iter().map(|w| w.signature.id))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.total_cost(), second.total_cost());
    }
}
