use super::{
    config::ControllerConfig,
    deadline::DeadlineAssigner,
    discovery,
    error::{self, Result},
    statemachine::{determine_node_action, NodeAction},
    waiter::OperationWaiter,
};
use models::compute::{
    ledger,
    locator::{parse_resource_url, ResourceKind},
    ClusterRef, ComputeClient, ComputeError, Instance, ResourceLocation,
};
use models::node::NodeClient;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::{rngs::StdRng, SeedableRng};
use snafu::ResultExt;
use std::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{event, instrument, Level};

/// The result of processing a single instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Skipped,
    Waiting(DateTime<Utc>),
    DeadlineAssigned(DateTime<Utc>),
    Deleted,
}

/// Tally of a monitoring cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub skipped: usize,
    pub waiting: usize,
    pub assigned: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl CycleSummary {
    pub fn processed(&self) -> usize {
        self.skipped + self.waiting + self.assigned + self.deleted + self.failed
    }

    fn record(&mut self, outcome: &Result<NodeOutcome>) {
        match outcome {
            Ok(NodeOutcome::Skipped) => self.skipped += 1,
            Ok(NodeOutcome::Waiting(_)) => self.waiting += 1,
            Ok(NodeOutcome::DeadlineAssigned(_)) => self.assigned += 1,
            Ok(NodeOutcome::Deleted) => self.deleted += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// The DrainController keeps a cluster's preemptible instances from being reclaimed by the platform
/// while still serving workloads: each instance gets a randomized drain deadline well ahead of its
/// forced termination, and is cordoned, drained and deleted once that deadline comes due. The managed
/// instance group then replaces it with a fresh instance.
///
/// All per-instance state lives in the instance's own labels, so the controller can be restarted at
/// any time.
pub struct DrainController<C: ComputeClient, N: NodeClient> {
    cluster: ClusterRef,
    compute_client: C,
    /// Absent when the controller runs without access to the cluster's API server; instances are then
    /// deleted without draining.
    node_client: Option<N>,
    config: ControllerConfig,
    assigner: DeadlineAssigner,
    waiter: OperationWaiter,
    rng: Mutex<StdRng>,
}

impl<C: ComputeClient, N: NodeClient> DrainController<C, N> {
    pub fn new(
        cluster: ClusterRef,
        compute_client: C,
        node_client: Option<N>,
        config: ControllerConfig,
    ) -> Self {
        let assigner = DeadlineAssigner::new(config.drain_mode);
        let waiter = OperationWaiter::new(config.operation_poll_interval, config.operation_timeout);
        DrainController {
            cluster,
            compute_client,
            node_client,
            config,
            assigner,
            waiter,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the source of deadline jitter.
    pub fn with_rng(self, rng: StdRng) -> Self {
        DrainController {
            rng: Mutex::new(rng),
            ..self
        }
    }

    /// Runs monitoring cycles every `poll_interval` until `shutdown` is cancelled.
    ///
    /// A failed cycle is logged and retried on the next tick.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.monitor(&shutdown).await {
                Ok(summary) => event!(
                    Level::INFO,
                    skipped = summary.skipped,
                    waiting = summary.waiting,
                    assigned = summary.assigned,
                    deleted = summary.deleted,
                    failed = summary.failed,
                    "Monitoring cycle finished."
                ),
                // Errors are logged by instrumentation in `monitor()`.
                Err(_) => continue,
            }
        }

        event!(Level::INFO, "Shutdown requested, stopping drain controller.");
        Ok(())
    }

    /// Runs a single monitoring cycle: discovers the cluster's preemptible instances and processes each
    /// of them, at most `max_concurrent_nodes` at a time.
    ///
    /// A failure on one instance never prevents the others from being processed. Only discovery errors
    /// fail the cycle.
    #[instrument(skip(self, shutdown), fields(cluster = %self.cluster), err)]
    pub async fn monitor(&self, shutdown: &CancellationToken) -> Result<CycleSummary> {
        let fleet = discovery::refresh(&self.compute_client, &self.cluster).await?;
        let instances = fleet.instances();
        event!(
            Level::INFO,
            "Processing {} preemptible instances",
            instances.len()
        );

        let outcomes: Vec<Result<NodeOutcome>> = futures::stream::iter(instances)
            .map(|instance_url| async move {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        event!(
                            Level::WARN,
                            instance = %instance_url,
                            "Shutdown requested, instance left unprocessed."
                        );
                        error::CancelledSnafu.fail()
                    }
                    outcome = self.process_node(&instance_url, shutdown) => outcome,
                }
            })
            .buffer_unordered(self.config.max_concurrent_nodes.max(1))
            .collect()
            .await;

        let mut summary = CycleSummary::default();
        outcomes.iter().for_each(|outcome| summary.record(outcome));
        Ok(summary)
    }

    /// Fetches one instance, decides what to do with it and does it.
    #[instrument(skip(self, shutdown), err)]
    pub async fn process_node(
        &self,
        instance_url: &str,
        shutdown: &CancellationToken,
    ) -> Result<NodeOutcome> {
        let location = parse_resource_url(instance_url, ResourceKind::Instances)
            .context(error::ParseInstanceUrlSnafu)?;
        let instance = self
            .compute_client
            .get_instance(&location)
            .await
            .context(error::FetchInstanceSnafu {
                instance: &location.name,
            })?;

        let now = Utc::now();
        match determine_node_action(&instance, now) {
            NodeAction::Skip { status } => {
                event!(
                    Level::INFO,
                    host = %location.name,
                    %status,
                    "Skipping node because it is not running."
                );
                Ok(NodeOutcome::Skipped)
            }
            NodeAction::Wait { deadline } => {
                event!(
                    Level::INFO,
                    host = %location.name,
                    %deadline,
                    "Node is healthy, waiting for its drain deadline."
                );
                Ok(NodeOutcome::Waiting(deadline))
            }
            NodeAction::AssignDeadline => {
                let deadline = self
                    .assign_deadline(&location, &instance, now, shutdown)
                    .await?;
                Ok(NodeOutcome::DeadlineAssigned(deadline))
            }
            NodeAction::ExpireNow { missed_deadline } => {
                event!(
                    Level::WARN,
                    host = %location.name,
                    ?missed_deadline,
                    "Node was not drained as scheduled, draining it now."
                );
                self.drain_and_delete(&location, shutdown).await?;
                Ok(NodeOutcome::Deleted)
            }
            NodeAction::DrainAndDelete { deadline } => {
                event!(
                    Level::INFO,
                    host = %location.name,
                    %deadline,
                    "Drain deadline reached."
                );
                self.drain_and_delete(&location, shutdown).await?;
                Ok(NodeOutcome::Deleted)
            }
        }
    }

    /// Records a fresh drain deadline in the instance's labels.
    async fn assign_deadline(
        &self,
        location: &ResourceLocation,
        instance: &Instance,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<DateTime<Utc>> {
        let deadline = {
            let mut rng = self
                .rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.assigner
                .assign(instance.creation_timestamp, now, &mut *rng)
        };
        let labels = ledger::write_deadline(&instance.labels, deadline);

        event!(
            Level::INFO,
            host = %location.name,
            %deadline,
            "Setting drain deadline."
        );
        let operation = self
            .compute_client
            .set_labels(location, &labels, &instance.label_fingerprint)
            .await
            .map_err(|source| match source {
                ComputeError::FingerprintConflict { .. } => {
                    error::Error::LabelFingerprintConflict {
                        instance: location.name.clone(),
                        source,
                    }
                }
                source => error::Error::SetLabels {
                    instance: location.name.clone(),
                    source,
                },
            })?;

        self.waiter
            .wait(&self.compute_client, location, operation, shutdown)
            .await?;
        Ok(deadline)
    }

    /// Cordons and drains the instance's node when possible, then deletes the instance.
    ///
    /// Cordon and drain failures are logged and do not hold back the deletion: the instance will be
    /// reclaimed by the platform regardless.
    async fn drain_and_delete(
        &self,
        location: &ResourceLocation,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        match &self.node_client {
            Some(node_client) => {
                if let Err(err) = node_client.set_unschedulable(&location.name, true).await {
                    event!(
                        Level::WARN,
                        host = %location.name,
                        error = %err,
                        "Unable to cordon node, draining anyway."
                    );
                }
                match node_client.drain_node(&location.name).await {
                    Ok(pod_count) => event!(
                        Level::INFO,
                        host = %location.name,
                        "Drained {} pods from node",
                        pod_count
                    ),
                    Err(err) => event!(
                        Level::WARN,
                        host = %location.name,
                        error = %err,
                        "Node was only partially drained, deleting it anyway."
                    ),
                }
            }
            None => event!(
                Level::WARN,
                host = %location.name,
                "No cluster access configured, deleting node without draining it."
            ),
        }

        event!(Level::INFO, host = %location.name, "Deleting node.");
        let operation = self
            .compute_client
            .delete_instance(location)
            .await
            .context(error::DeleteInstanceSnafu {
                instance: &location.name,
            })?;

        self.waiter
            .wait(&self.compute_client, location, operation, shutdown)
            .await
    }
}
