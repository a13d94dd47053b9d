//! Provides an implementation for draining Pods from a Kubernetes Node ahead of its compute instance
//! being deleted.
//!
//! Draining is done client side: the Node is first cordoned by marking it as unschedulable, then its
//! Pods are deleted one at a time. Pods are deleted rather than evicted, since the instance is about to
//! be reclaimed by the platform whether or not PodDisruptionBudgets allow it.
//!
//! Cordoning is not handled here, see [`super::NodeClient::set_unschedulable`].
use crate::constants::{DAEMONSET_KIND, KUBE_SYSTEM_NAMESPACE};

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, ListParams},
    Api, ResourceExt,
};
use snafu::ResultExt;
use tracing::{event, instrument, Level};

/// Drains a node of all pods.
///
/// Pods in `kube-system` and Pods owned by a DaemonSet are left alone: the DaemonSet controller ignores
/// node cordons and recreates its Pods on replacement capacity by itself.
///
/// A failure deleting one Pod aborts the remaining deletions, leaving the node partially drained. The
/// error is surfaced to the caller rather than retried.
#[instrument(skip(k8s_client), err)]
pub(crate) async fn drain_node(
    k8s_client: &kube::Client,
    node_name: &str,
) -> Result<usize, error::DrainError> {
    let target_pods: Vec<Pod> = find_target_pods(k8s_client, node_name).await?.collect();
    event!(
        Level::INFO,
        node_name,
        "{} pods found to drain",
        target_pods.len()
    );

    for pod in target_pods.iter() {
        delete_pod(k8s_client, node_name, pod).await?;
    }

    Ok(target_pods.len())
}

/// Builds the field selector matching every Pod scheduled on `node_name` outside of `kube-system`.
fn target_pod_selector(node_name: &str) -> String {
    format!(
        "spec.nodeName={},metadata.namespace!={}",
        node_name, KUBE_SYSTEM_NAMESPACE
    )
}

/// Finds all pods on a given node that are targeted for deletion during a drain.
/// See documentation on [`drain_node`] for more information about which pods are selected.
#[instrument(skip(k8s_client), err)]
async fn find_target_pods(
    k8s_client: &kube::Client,
    node_name: &str,
) -> Result<impl Iterator<Item = Pod>, error::DrainError> {
    let pods: Api<Pod> = Api::all(k8s_client.clone());

    let node_pods = pods
        .list(&ListParams::default().fields(&target_pod_selector(node_name)))
        .await
        .context(error::ListPodsSnafu { node_name })?;

    Ok(filter_pods(node_pods.into_iter()))
}

/// Given a list of all pods for a given node, this filters out DaemonSet pods.
fn filter_pods<F: Iterator<Item = Pod>>(pods: F) -> impl Iterator<Item = Pod> {
    pods.filter(|pod| {
        let owned_by_daemonset = pod
            .metadata
            .owner_references
            .as_ref()
            .map_or(false, |owner_references| {
                owner_references
                    .iter()
                    .any(|reference| reference.kind == DAEMONSET_KIND)
            });

        if owned_by_daemonset {
            event!(
                Level::DEBUG,
                "Not draining Pod '{}': Pod is member of a DaemonSet",
                pod.name_any()
            );
        }
        !owned_by_daemonset
    })
}

/// Deletes a single Pod. A Pod which has already disappeared counts as deleted.
#[instrument(skip(k8s_client, pod), fields(pod = %pod.name_any()), err)]
async fn delete_pod(
    k8s_client: &kube::Client,
    node_name: &str,
    pod: &Pod,
) -> Result<(), error::DrainError> {
    let pod_name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
    let pod_api: Api<Pod> = Api::namespaced(k8s_client.clone(), &namespace);

    event!(Level::INFO, node_name, "Deleting pod {}/{}", namespace, pod_name);
    match pod_api.delete(&pod_name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            event!(Level::INFO, "Pod {}/{} already deleted.", namespace, pod_name);
            Ok(())
        }
        Err(source) => Err(source).context(error::DeletePodSnafu {
            node_name,
            pod_name,
            namespace,
        }),
    }
}

pub mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum DrainError {
        #[snafu(display("Unable to find drainable Pods for Node '{}': '{}'", node_name, source))]
        ListPods {
            source: kube::Error,
            node_name: String,
        },

        #[snafu(display(
            "Error draining pod '{}/{}' from Node '{}', remaining pods were not deleted: '{}'",
            namespace,
            pod_name,
            node_name,
            source
        ))]
        DeletePod {
            source: kube::Error,
            node_name: String,
            pod_name: String,
            namespace: String,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn fake_pod(name: &str, owner_kind: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                owner_references: owner_kind.map(|kind| {
                    vec![OwnerReference {
                        api_version: "apps/v1".to_string(),
                        kind: kind.to_string(),
                        name: format!("{}-owner", name),
                        uid: "1234".to_string(),
                        controller: Some(true),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_pods() {
        let pods = vec![
            fake_pod("web-5d9c8b7f4-abcde", Some("ReplicaSet")),
            fake_pod("fluentd-x2x7k", Some(DAEMONSET_KIND)),
            fake_pod("standalone", None),
            fake_pod("db-0", Some("StatefulSet")),
        ];

        let drained: Vec<String> = filter_pods(pods.into_iter())
            .map(|pod| pod.name_any())
            .collect();

        assert_eq!(
            drained,
            vec![
                "web-5d9c8b7f4-abcde".to_string(),
                "standalone".to_string(),
                "db-0".to_string()
            ]
        );
    }

    #[test]
    fn test_target_pod_selector() {
        assert_eq!(
            target_pod_selector("gke-spot-pool-1234"),
            "spec.nodeName=gke-spot-pool-1234,metadata.namespace!=kube-system"
        );
    }
}
