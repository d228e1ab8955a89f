//! The alert worker.
//!
//! One worker task drains the inbound queue strictly in arrival order and
//! owns the attack-instance engine exclusively, so attack-graph
//! transitions are linearizable and follow alert order. Once the engine
//! step for an alert has committed, planning and dispatch for that alert
//! run in a spawned task and may overlap the worker's next iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::alert::Alert;
use crate::catalog::{CatalogView, Catalogs};
use crate::condition::Evaluator;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::graph::{AttackEngine, TriggerEvent};
use crate::observability::metrics;
use crate::planner::{MitigationPlan, Planner};

/// Everything that happened while handling one alert.
#[derive(Debug)]
pub struct AlertOutcome {
    /// Attack-graph nodes the alert triggered, in emission order.
    pub events: Vec<TriggerEvent>,
    /// The mitigation plan for the alert.
    pub plan: MitigationPlan,
    /// Dispatch reports for every planned workflow instance.
    pub reports: Vec<DispatchReport>,
}

/// The alert processing pipeline: engine step, then plan, then dispatch.
pub struct Pipeline {
    engine: AttackEngine,
    catalogs: Arc<Catalogs>,
    evaluator: Evaluator,
    planner: Planner,
    dispatcher: Arc<Dispatcher>,
    grace: Duration,
}

impl Pipeline {
    /// Assembles a pipeline over shared catalogs and collaborators.
    #[must_use]
    pub fn new(
        catalogs: Arc<Catalogs>,
        evaluator: Evaluator,
        planner: Planner,
        dispatcher: Arc<Dispatcher>,
        grace: Duration,
    ) -> Self {
        Self {
            engine: AttackEngine::new(),
            catalogs,
            evaluator,
            planner,
            dispatcher,
            grace,
        }
    }

    /// The live attack-instance engine.
    #[must_use]
    pub const fn engine(&self) -> &AttackEngine {
        &self.engine
    }

    /// Handles one alert end to end, awaiting dispatch completion.
    ///
    /// The serving loop overlaps dispatch with the next alert instead;
    /// this entry point exists for synchronous callers and tests.
    pub async fn process(&mut self, alert: Arc<Alert>) -> AlertOutcome {
        let view = self.catalogs.snapshot();
        let events = self.step_engine(&alert, &view).await;
        let (plan, reports) = mitigate(
            alert,
            &view,
            self.planner,
            &self.evaluator,
            &self.dispatcher,
        )
        .await;
        AlertOutcome {
            events,
            plan,
            reports,
        }
    }

    /// Drains the queue until every sender is gone, then waits out
    /// in-flight dispatches up to the shutdown grace period.
    pub async fn run(mut self, mut queue: mpsc::Receiver<Arc<Alert>>) {
        let mut inflight: JoinSet<()> = JoinSet::new();

        while let Some(alert) = queue.recv().await {
            let view = self.catalogs.snapshot();
            // The engine mutation commits here, before mitigation work for
            // this alert overlaps the next iteration.
            self.step_engine(&alert, &view).await;

            let planner = self.planner;
            let evaluator = self.evaluator.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            inflight.spawn(async move {
                let _ = mitigate(alert, &view, planner, &evaluator, &dispatcher).await;
            });

            // Reap finished mitigation tasks as we go.
            while inflight.try_join_next().is_some() {}
        }

        info!(
            inflight = inflight.len(),
            "alert queue drained; waiting for in-flight dispatches"
        );
        let drain = async {
            while inflight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.grace, drain).await.is_err() {
            warn!(grace = ?self.grace, "shutdown grace expired; aborting in-flight dispatches");
        }
    }

    /// Advances the attack-graph state for one alert.
    async fn step_engine(&mut self, alert: &Arc<Alert>, view: &CatalogView) -> Vec<TriggerEvent> {
        let events = self
            .engine
            .step(alert, &view.graphs, &view.conditions, &self.evaluator)
            .await;
        for event in &events {
            debug!(graph = event.graph, node = event.node, "node triggered");
            metrics::record_node_trigger(event.graph);
        }
        metrics::set_live_instances(self.engine.live_count());
        events
    }
}

/// Plans and dispatches mitigations for one alert.
async fn mitigate(
    alert: Arc<Alert>,
    view: &CatalogView,
    planner: Planner,
    evaluator: &Evaluator,
    dispatcher: &Dispatcher,
) -> (MitigationPlan, Vec<DispatchReport>) {
    let plan = planner.plan(&[alert], view, evaluator).await;
    for _ in &plan.unmitigated {
        metrics::record_unmitigated();
    }

    let reports = dispatcher.dispatch(&plan).await;
    for report in &reports {
        metrics::record_dispatch(report.outcome.is_ok());
    }
    (plan, reports)
}
