use super::{
    drain,
    error::{self, Result},
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::Api;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::{event, instrument, Level};

#[cfg(feature = "mockall")]
use mockall::{mock, predicate::*};

#[async_trait]
/// A trait providing an interface to cordon and drain cluster nodes. This is provided as a trait
/// in order to allow mocks to be used for testing purposes.
pub trait NodeClient: Send + Sync {
    /// Marks the given node as unschedulable (or schedulable again), controlling whether Pods may be
    /// deployed onto it.
    async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<()>;
    /// Deletes every Pod on the given node outside of `kube-system`, except DaemonSet Pods.
    /// Returns the number of Pods deleted.
    async fn drain_node(&self, node_name: &str) -> Result<usize>;
}

#[cfg(feature = "mockall")]
mock! {
    /// A Mock NodeClient for use in tests.
    pub NodeClient {}
    #[async_trait]
    impl NodeClient for NodeClient {
        async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<()>;
        async fn drain_node(&self, node_name: &str) -> Result<usize>;
    }
}

#[async_trait]
impl<T> NodeClient for Arc<T>
where
    T: NodeClient,
{
    async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<()> {
        (**self).set_unschedulable(node_name, unschedulable).await
    }

    async fn drain_node(&self, node_name: &str) -> Result<usize> {
        (**self).drain_node(node_name).await
    }
}

#[derive(Clone)]
/// Concrete implementation of the `NodeClient` trait. This implementation will almost
/// certainly be used in any case that isn't a unit test.
pub struct K8SNodeClient {
    k8s_client: kube::client::Client,
}

impl K8SNodeClient {
    pub fn new(k8s_client: kube::client::Client) -> Self {
        K8SNodeClient { k8s_client }
    }
}

#[async_trait]
impl NodeClient for K8SNodeClient {
    #[instrument(skip(self), err)]
    async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.k8s_client.clone());

        let node = nodes
            .get(node_name)
            .await
            .context(error::GetNodeSnafu { node_name })?;

        let currently_unschedulable = node
            .spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false);
        if currently_unschedulable == unschedulable {
            event!(
                Level::DEBUG,
                node_name,
                unschedulable,
                "Node already has the desired schedulability."
            );
            return Ok(());
        }

        let update = if unschedulable {
            nodes.cordon(node_name).await
        } else {
            nodes.uncordon(node_name).await
        };
        update.context(error::UpdateNodeSnafu {
            node_name,
            unschedulable,
        })?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn drain_node(&self, node_name: &str) -> Result<usize> {
        drain::drain_node(&self.k8s_client, node_name)
            .await
            .context(error::DrainNodeSnafu { node_name })
    }
}
