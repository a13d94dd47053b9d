use controller::{
    config::ControllerConfig, error::Error, CycleSummary, DrainController, NodeOutcome,
};
use models::compute::{
    locator::resource_url, ClusterRef, ComputeError, Instance, InstanceStatus, MockComputeClient,
    NodePool, NodePoolConfig, Operation, OperationStatus, ResourceKind,
};
use models::constants::DRAIN_AT_LABEL;
use models::node::{MockNodeClient, NodeClientError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use maplit::btreemap;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const PROJECT: &str = "my-project";
const ZONE: &str = "us-central1-a";
const FINGERPRINT: &str = "42WmSpB8rSM=";

fn cluster() -> ClusterRef {
    ClusterRef::new(PROJECT, ZONE, "my-cluster")
}

fn instance_url(name: &str) -> String {
    resource_url(PROJECT, ZONE, ResourceKind::Instances, name)
}

fn instance(
    name: &str,
    status: InstanceStatus,
    created_at: DateTime<Utc>,
    labels: BTreeMap<String, String>,
) -> Instance {
    Instance {
        name: name.to_string(),
        status,
        creation_timestamp: created_at,
        labels,
        label_fingerprint: FINGERPRINT.to_string(),
    }
}

fn drain_at(deadline: DateTime<Utc>) -> BTreeMap<String, String> {
    btreemap! { DRAIN_AT_LABEL.to_string() => deadline.timestamp().to_string() }
}

fn operation(operation_type: &str, status: OperationStatus) -> Operation {
    Operation {
        name: format!("operation-{}", operation_type),
        operation_type: operation_type.to_string(),
        status,
        zone: None,
        error: None,
    }
}

fn config() -> ControllerConfig {
    ControllerConfig {
        operation_poll_interval: tokio::time::Duration::from_millis(1),
        ..Default::default()
    }
}

fn api_error(code: u16) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "simulated".to_string(),
        reason: "InternalError".to_string(),
        code,
    })
}

/// A compute client serving a single preemptible node pool holding `instances`.
fn compute_client_with(instances: Vec<Instance>) -> MockComputeClient {
    let mut client = MockComputeClient::new();
    client.expect_list_node_pools().returning(|_| {
        Ok(vec![
            NodePool {
                name: "default-pool".to_string(),
                config: NodePoolConfig::default(),
                instance_group_urls: vec![resource_url(
                    PROJECT,
                    ZONE,
                    ResourceKind::InstanceGroupManagers,
                    "default-grp",
                )],
            },
            NodePool {
                name: "preemptible-pool".to_string(),
                config: NodePoolConfig {
                    preemptible: true,
                    spot: false,
                },
                instance_group_urls: vec![resource_url(
                    PROJECT,
                    ZONE,
                    ResourceKind::InstanceGroupManagers,
                    "preemptible-grp",
                )],
            },
        ])
    });

    let urls: Vec<String> = instances.iter().map(|i| instance_url(&i.name)).collect();
    client
        .expect_list_managed_instances()
        .withf(|group| group.name == "preemptible-grp")
        .returning(move |_| Ok(urls.clone()));

    client.expect_get_instance().returning(move |location| {
        instances
            .iter()
            .find(|i| i.name == location.name)
            .cloned()
            .ok_or_else(|| ComputeError::ErrorResponse {
                url: location.to_url(ResourceKind::Instances),
                status_code: reqwest::StatusCode::NOT_FOUND,
                response: "unknown instance".to_string(),
            })
    });
    client
}

fn expect_node_drained(node_client: &mut MockNodeClient, name: &'static str) {
    node_client
        .expect_set_unschedulable()
        .withf(move |node_name, unschedulable| node_name == name && *unschedulable)
        .times(1)
        .returning(|_, _| Ok(()));
    node_client
        .expect_drain_node()
        .withf(move |node_name| node_name == name)
        .times(1)
        .returning(|_| Ok(3));
}

#[tokio::test]
async fn fresh_instance_gets_a_deadline() {
    let before = Utc::now();
    let mut compute_client = compute_client_with(vec![instance(
        "fresh",
        InstanceStatus::Running,
        before - Duration::hours(1),
        btreemap! { "team".to_string() => "infra".to_string() },
    )]);

    let written = Arc::new(Mutex::new(None));
    let recorder = written.clone();
    compute_client
        .expect_set_labels()
        .withf(|location, _, fingerprint| location.name == "fresh" && fingerprint == FINGERPRINT)
        .times(1)
        .returning(move |_, labels, _| {
            *recorder.lock().unwrap() = Some(labels.clone());
            Ok(operation("setLabels", OperationStatus::Done))
        });
    compute_client.expect_delete_instance().never();
    compute_client.expect_get_zone_operation().never();

    let controller =
        DrainController::new(cluster(), compute_client, Some(MockNodeClient::new()), config());
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    let after = Utc::now();

    assert_eq!(
        summary,
        CycleSummary {
            assigned: 1,
            ..Default::default()
        }
    );

    let labels = written.lock().unwrap().clone().unwrap();
    assert_eq!(labels.get("team").map(String::as_str), Some("infra"));
    let deadline: i64 = labels.get(DRAIN_AT_LABEL).unwrap().parse().unwrap();
    assert!(deadline >= (before + Duration::hours(7)).timestamp());
    assert!(deadline < (after + Duration::hours(14)).timestamp() + 1);
}

#[tokio::test]
async fn overdue_instance_is_drained_immediately() {
    let now = Utc::now();
    let mut compute_client = compute_client_with(vec![instance(
        "overdue",
        InstanceStatus::Running,
        now - Duration::hours(20),
        drain_at(now - Duration::seconds(10)),
    )]);
    compute_client.expect_set_labels().never();
    compute_client
        .expect_delete_instance()
        .withf(|location| location.name == "overdue" && location.zone == ZONE)
        .times(1)
        .returning(|_| Ok(operation("delete", OperationStatus::Pending)));
    compute_client
        .expect_get_zone_operation()
        .withf(|location| location.name == "operation-delete")
        .times(1)
        .returning(|_| Ok(operation("delete", OperationStatus::Done)));

    let mut node_client = MockNodeClient::new();
    expect_node_drained(&mut node_client, "overdue");

    let controller = DrainController::new(cluster(), compute_client, Some(node_client), config());
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.processed(), 1);
}

#[tokio::test]
async fn imminent_deadline_drains_and_deletes() {
    let now = Utc::now();
    let mut compute_client = compute_client_with(vec![instance(
        "imminent",
        InstanceStatus::Running,
        now - Duration::hours(10),
        drain_at(now + Duration::seconds(30)),
    )]);
    compute_client.expect_set_labels().never();
    compute_client
        .expect_delete_instance()
        .times(1)
        .returning(|_| Ok(operation("delete", OperationStatus::Done)));

    let mut node_client = MockNodeClient::new();
    expect_node_drained(&mut node_client, "imminent");

    let controller = DrainController::new(cluster(), compute_client, Some(node_client), config());
    let outcome = controller
        .process_node(&instance_url("imminent"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, NodeOutcome::Deleted);
}

#[tokio::test]
async fn distant_deadline_is_left_alone() {
    let now = Utc::now();
    let deadline = now + Duration::hours(5);
    let mut compute_client = compute_client_with(vec![instance(
        "healthy",
        InstanceStatus::Running,
        now - Duration::hours(3),
        drain_at(deadline),
    )]);
    compute_client.expect_set_labels().never();
    compute_client.expect_delete_instance().never();

    let controller =
        DrainController::new(cluster(), compute_client, Some(MockNodeClient::new()), config());
    let outcome = controller
        .process_node(&instance_url("healthy"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        NodeOutcome::Waiting(Utc.timestamp_opt(deadline.timestamp(), 0).unwrap())
    );
}

#[tokio::test]
async fn stopping_instance_is_skipped() {
    let now = Utc::now();
    let mut compute_client = compute_client_with(vec![instance(
        "stopping",
        InstanceStatus::Stopping,
        now - Duration::hours(23),
        drain_at(now - Duration::hours(1)),
    )]);
    compute_client.expect_set_labels().never();
    compute_client.expect_delete_instance().never();

    let controller =
        DrainController::new(cluster(), compute_client, Some(MockNodeClient::new()), config());
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        summary,
        CycleSummary {
            skipped: 1,
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn cluster_without_preemptible_pools_does_nothing() {
    let mut compute_client = MockComputeClient::new();
    compute_client.expect_list_node_pools().times(1).returning(|_| {
        Ok(vec![NodePool {
            name: "default-pool".to_string(),
            config: NodePoolConfig::default(),
            instance_group_urls: vec![],
        }])
    });
    compute_client.expect_list_managed_instances().never();
    compute_client.expect_get_instance().never();

    let controller =
        DrainController::new(cluster(), compute_client, Some(MockNodeClient::new()), config());
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.processed(), 0);
}

#[tokio::test]
async fn failed_cordon_and_drain_do_not_block_deletion() {
    let now = Utc::now();
    let mut compute_client = compute_client_with(vec![instance(
        "stubborn",
        InstanceStatus::Running,
        now - Duration::hours(20),
        drain_at(now - Duration::minutes(5)),
    )]);
    compute_client
        .expect_delete_instance()
        .times(1)
        .returning(|_| Ok(operation("delete", OperationStatus::Done)));

    let mut node_client = MockNodeClient::new();
    node_client
        .expect_set_unschedulable()
        .times(1)
        .returning(|node_name, _| {
            Err(NodeClientError::GetNode {
                node_name: node_name.to_string(),
                source: api_error(500),
            })
        });
    node_client.expect_drain_node().times(1).returning(|node_name| {
        Err(NodeClientError::UpdateNode {
            node_name: node_name.to_string(),
            unschedulable: true,
            source: api_error(500),
        })
    });

    let controller = DrainController::new(cluster(), compute_client, Some(node_client), config());
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.deleted, 1);
}

#[tokio::test]
async fn missing_cluster_access_still_deletes() {
    let now = Utc::now();
    let mut compute_client = compute_client_with(vec![instance(
        "orphan",
        InstanceStatus::Running,
        now - Duration::hours(20),
        btreemap! { DRAIN_AT_LABEL.to_string() => "not-a-timestamp".to_string() },
    )]);
    compute_client
        .expect_delete_instance()
        .times(1)
        .returning(|_| Ok(operation("delete", OperationStatus::Done)));

    let controller =
        DrainController::new(cluster(), compute_client, None::<MockNodeClient>, config());
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.deleted, 1);
}

#[tokio::test]
async fn one_failing_instance_does_not_stop_the_cycle() {
    let now = Utc::now();
    let mut compute_client = compute_client_with(vec![
        instance(
            "contended",
            InstanceStatus::Running,
            now - Duration::hours(1),
            BTreeMap::new(),
        ),
        instance(
            "quiet",
            InstanceStatus::Running,
            now - Duration::hours(1),
            BTreeMap::new(),
        ),
    ]);
    // Once per instance in the cycle, then once more for the direct call below.
    compute_client
        .expect_set_labels()
        .times(3)
        .returning(|location, _, _| match location.name.as_str() {
            "contended" => Err(ComputeError::FingerprintConflict {
                url: location.to_url(ResourceKind::Instances),
                response: "Labels fingerprint either invalid or resource labels have changed"
                    .to_string(),
            }),
            _ => Ok(operation("setLabels", OperationStatus::Done)),
        });

    let controller =
        DrainController::new(cluster(), compute_client, Some(MockNodeClient::new()), config())
            .with_rng(StdRng::seed_from_u64(7));
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        summary,
        CycleSummary {
            assigned: 1,
            failed: 1,
            ..Default::default()
        }
    );

    assert!(matches!(
        controller
            .process_node(&instance_url("contended"), &CancellationToken::new())
            .await,
        Err(Error::LabelFingerprintConflict { .. })
    ));
}

#[tokio::test]
async fn failed_delete_operation_is_reported() {
    let now = Utc::now();
    let mut compute_client = compute_client_with(vec![instance(
        "doomed",
        InstanceStatus::Running,
        now - Duration::hours(20),
        drain_at(now - Duration::seconds(1)),
    )]);
    compute_client.expect_delete_instance().times(1).returning(|_| {
        let mut failed = operation("delete", OperationStatus::Done);
        failed.error = Some(serde_json::json!({
            "errors": [{"code": "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE"}]
        }));
        Ok(failed)
    });

    let controller =
        DrainController::new(cluster(), compute_client, None::<MockNodeClient>, config());
    let result = controller
        .process_node(&instance_url("doomed"), &CancellationToken::new())
        .await;
    match result {
        Err(Error::OperationFailed { body, .. }) => {
            assert!(body.contains("RESOURCE_IN_USE_BY_ANOTHER_RESOURCE"))
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn malformed_instance_url_is_rejected() {
    let mut compute_client = MockComputeClient::new();
    compute_client.expect_get_instance().never();

    let controller =
        DrainController::new(cluster(), compute_client, None::<MockNodeClient>, config());
    let result = controller
        .process_node(
            "https://content.googleapis.com/compute/v1/projects/my-project/global/instances/x",
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(Error::ParseInstanceUrl { .. })));
}

#[tokio::test]
async fn cancelled_cycle_touches_no_instance() {
    let mut compute_client = MockComputeClient::new();
    compute_client.expect_list_node_pools().returning(|_| {
        Ok(vec![NodePool {
            name: "preemptible-pool".to_string(),
            config: NodePoolConfig {
                preemptible: true,
                spot: false,
            },
            instance_group_urls: vec![resource_url(
                PROJECT,
                ZONE,
                ResourceKind::InstanceGroupManagers,
                "preemptible-grp",
            )],
        }])
    });
    compute_client
        .expect_list_managed_instances()
        .returning(|_| Ok(vec![instance_url("a"), instance_url("b")]));
    compute_client.expect_get_instance().never();

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let controller =
        DrainController::new(cluster(), compute_client, None::<MockNodeClient>, config());
    let summary = controller.monitor(&shutdown).await.unwrap();
    assert_eq!(
        summary,
        CycleSummary {
            failed: 2,
            ..Default::default()
        }
    );
}

#[tokio::test]
async fn run_survives_discovery_errors_and_stops_on_shutdown() {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();

    let mut compute_client = MockComputeClient::new();
    compute_client
        .expect_list_node_pools()
        .times(1)
        .returning(move |cluster| {
            trigger.cancel();
            Err(ComputeError::ErrorResponse {
                url: cluster.to_string(),
                status_code: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                response: "unavailable".to_string(),
            })
        });

    let controller =
        DrainController::new(cluster(), compute_client, None::<MockNodeClient>, config());
    controller.run(shutdown).await.unwrap();
}

/// Runs one cycle over overdue instances whose deletions stay pending for one poll, returning the
/// highest number of deletions observed in flight at once.
async fn peak_deletions_in_flight(max_concurrent_nodes: usize) -> usize {
    let now = Utc::now();
    let instances = (0..4)
        .map(|i| {
            instance(
                &format!("overdue-{}", i),
                InstanceStatus::Running,
                now - Duration::hours(20),
                drain_at(now - Duration::minutes(1)),
            )
        })
        .collect();
    let mut compute_client = compute_client_with(instances);

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (started, highest) = (in_flight.clone(), peak.clone());
    compute_client
        .expect_delete_instance()
        .times(4)
        .returning(move |_| {
            let current = started.fetch_add(1, Ordering::SeqCst) + 1;
            highest.fetch_max(current, Ordering::SeqCst);
            Ok(operation("delete", OperationStatus::Pending))
        });
    let finished = in_flight.clone();
    compute_client
        .expect_get_zone_operation()
        .times(4)
        .returning(move |_| {
            finished.fetch_sub(1, Ordering::SeqCst);
            Ok(operation("delete", OperationStatus::Done))
        });

    let config = ControllerConfig {
        max_concurrent_nodes,
        ..config()
    };
    let controller =
        DrainController::new(cluster(), compute_client, None::<MockNodeClient>, config);
    let summary = controller.monitor(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.deleted, 4);
    assert_eq!(in_flight.load(Ordering::SeqCst), 0);

    peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn concurrency_limit_caps_instances_in_flight() {
    assert_eq!(peak_deletions_in_flight(1).await, 1);
    assert!(peak_deletions_in_flight(4).await > 1);
}
