use super::{
    credentials::AccessTokenSource,
    error::{self, Result},
    locator::ResourceLocation,
    ClusterRef, Instance, NodePool, Operation,
};
use crate::constants::{COMPUTE_API_ENDPOINT, CONTAINER_API_ENDPOINT, USER_AGENT};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{event, instrument, Level};

#[cfg(feature = "mockall")]
use mockall::{mock, predicate::*};

// Read requests use exponential backoff on transport errors and server errors.
// These values configure how long to delay between tries.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
const NUM_RETRIES: usize = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
        .max_delay(RETRY_MAX_DELAY)
        .map(jitter)
        .take(NUM_RETRIES)
}

#[async_trait]
/// A trait providing an interface to the GKE and GCE APIs used by the drain controller. This is provided
/// as a trait in order to allow mocks to be used for testing purposes.
pub trait ComputeClient: Send + Sync {
    /// Lists the node pools of a cluster.
    async fn list_node_pools(&self, cluster: &ClusterRef) -> Result<Vec<NodePool>>;
    /// Lists the URLs of the instances currently managed by an instance group manager.
    async fn list_managed_instances(&self, group: &ResourceLocation) -> Result<Vec<String>>;
    /// Fetches the current state of an instance.
    async fn get_instance(&self, instance: &ResourceLocation) -> Result<Instance>;
    /// Replaces the labels of an instance. The `label_fingerprint` must match the instance's current
    /// fingerprint, otherwise the request fails with `FingerprintConflict`.
    async fn set_labels(
        &self,
        instance: &ResourceLocation,
        labels: &BTreeMap<String, String>,
        label_fingerprint: &str,
    ) -> Result<Operation>;
    /// Deletes an instance.
    async fn delete_instance(&self, instance: &ResourceLocation) -> Result<Operation>;
    /// Fetches the current state of a zonal operation. The location's `name` is the operation name.
    async fn get_zone_operation(&self, operation: &ResourceLocation) -> Result<Operation>;
}

#[cfg(feature = "mockall")]
mock! {
    /// A Mock ComputeClient for use in tests.
    pub ComputeClient {}
    #[async_trait]
    impl ComputeClient for ComputeClient {
        async fn list_node_pools(&self, cluster: &ClusterRef) -> Result<Vec<NodePool>>;
        async fn list_managed_instances(&self, group: &ResourceLocation) -> Result<Vec<String>>;
        async fn get_instance(&self, instance: &ResourceLocation) -> Result<Instance>;
        async fn set_labels(
            &self,
            instance: &ResourceLocation,
            labels: &BTreeMap<String, String>,
            label_fingerprint: &str,
        ) -> Result<Operation>;
        async fn delete_instance(&self, instance: &ResourceLocation) -> Result<Operation>;
        async fn get_zone_operation(&self, operation: &ResourceLocation) -> Result<Operation>;
    }
}

#[async_trait]
impl<T> ComputeClient for Arc<T>
where
    T: ComputeClient,
{
    async fn list_node_pools(&self, cluster: &ClusterRef) -> Result<Vec<NodePool>> {
        (**self).list_node_pools(cluster).await
    }

    async fn list_managed_instances(&self, group: &ResourceLocation) -> Result<Vec<String>> {
        (**self).list_managed_instances(group).await
    }

    async fn get_instance(&self, instance: &ResourceLocation) -> Result<Instance> {
        (**self).get_instance(instance).await
    }

    async fn set_labels(
        &self,
        instance: &ResourceLocation,
        labels: &BTreeMap<String, String>,
        label_fingerprint: &str,
    ) -> Result<Operation> {
        (**self)
            .set_labels(instance, labels, label_fingerprint)
            .await
    }

    async fn delete_instance(&self, instance: &ResourceLocation) -> Result<Operation> {
        (**self).delete_instance(instance).await
    }

    async fn get_zone_operation(&self, operation: &ResourceLocation) -> Result<Operation> {
        (**self).get_zone_operation(operation).await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListNodePoolsResponse {
    #[serde(default)]
    node_pools: Vec<NodePool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedInstance {
    instance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListManagedInstancesResponse {
    #[serde(default)]
    managed_instances: Vec<ManagedInstance>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetLabelsRequest<'a> {
    labels: &'a BTreeMap<String, String>,
    label_fingerprint: &'a str,
}

#[derive(Clone, Debug)]
/// Concrete implementation of the `ComputeClient` trait, speaking to the GKE and GCE REST APIs. This
/// implementation will almost certainly be used in any case that isn't a unit test.
pub struct GceComputeClient {
    http_client: reqwest::Client,
    token_source: Arc<AccessTokenSource>,
    container_endpoint: String,
    compute_endpoint: String,
}

impl GceComputeClient {
    pub fn new(token_source: AccessTokenSource) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context(error::HttpClientCreateSnafu)?;

        Ok(GceComputeClient {
            http_client,
            token_source: Arc::new(token_source),
            container_endpoint: CONTAINER_API_ENDPOINT.to_string(),
            compute_endpoint: COMPUTE_API_ENDPOINT.to_string(),
        })
    }

    /// Overrides the API endpoints, e.g. to point at a local test server.
    pub fn with_endpoints<S1, S2>(mut self, container_endpoint: S1, compute_endpoint: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        self.container_endpoint = container_endpoint.into();
        self.compute_endpoint = compute_endpoint.into();
        self
    }

    fn zonal_url(&self, project: &str, zone: &str, resource: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{}",
            self.compute_endpoint, project, zone, resource
        )
    }

    /// Sends a single authenticated request and decodes the JSON response.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let token = self.token_source.token(&self.http_client).await?;

        let mut request = self
            .http_client
            .request(method, url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .context(error::TransportSnafu { url })?;

        let status_code = response.status();
        if status_code == StatusCode::PRECONDITION_FAILED {
            let response = response.text().await.unwrap_or_default();
            return error::FingerprintConflictSnafu { url, response }.fail();
        }
        if !status_code.is_success() {
            let response = response.text().await.unwrap_or_default();
            return error::ErrorResponseSnafu {
                url,
                status_code,
                response,
            }
            .fail();
        }

        response
            .json::<T>()
            .await
            .context(error::DeserializeSnafu { url })
    }

    /// Sends a request which has no side effects, retrying transient failures.
    async fn read<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        RetryIf::spawn(
            retry_strategy(),
            || self.send(method.clone(), url, query, None),
            |err: &error::Error| {
                let retry = err.is_retriable();
                if retry {
                    event!(Level::WARN, %url, %err, "Retrying compute API request.");
                }
                retry
            },
        )
        .await
    }
}

#[async_trait]
impl ComputeClient for GceComputeClient {
    #[instrument(skip(self), err)]
    async fn list_node_pools(&self, cluster: &ClusterRef) -> Result<Vec<NodePool>> {
        let url = format!(
            "{}/projects/{}/zones/{}/clusters/{}/nodePools",
            self.container_endpoint, cluster.project_id, cluster.zone, cluster.cluster_name
        );
        let response: ListNodePoolsResponse = self.read(Method::GET, &url, &[]).await?;
        Ok(response.node_pools)
    }

    #[instrument(skip(self), err)]
    async fn list_managed_instances(&self, group: &ResourceLocation) -> Result<Vec<String>> {
        let url = self.zonal_url(
            &group.project,
            &group.zone,
            &format!("instanceGroupManagers/{}/listManagedInstances", group.name),
        );

        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page: ListManagedInstancesResponse = match page_token.as_deref() {
                Some(token) => self.read(Method::POST, &url, &[("pageToken", token)]).await?,
                None => self.read(Method::POST, &url, &[]).await?,
            };

            instances.extend(page.managed_instances.into_iter().map(|mi| mi.instance));

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(instances)
    }

    #[instrument(skip(self), err)]
    async fn get_instance(&self, instance: &ResourceLocation) -> Result<Instance> {
        let url = self.zonal_url(
            &instance.project,
            &instance.zone,
            &format!("instances/{}", instance.name),
        );
        self.read(Method::GET, &url, &[]).await
    }

    #[instrument(skip(self), err)]
    async fn set_labels(
        &self,
        instance: &ResourceLocation,
        labels: &BTreeMap<String, String>,
        label_fingerprint: &str,
    ) -> Result<Operation> {
        let url = self.zonal_url(
            &instance.project,
            &instance.zone,
            &format!("instances/{}/setLabels", instance.name),
        );
        let body = serde_json::to_value(SetLabelsRequest {
            labels,
            label_fingerprint,
        })
        .context(error::SerializeRequestSnafu)?;

        self.send(Method::POST, &url, &[], Some(&body)).await
    }

    #[instrument(skip(self), err)]
    async fn delete_instance(&self, instance: &ResourceLocation) -> Result<Operation> {
        let url = self.zonal_url(
            &instance.project,
            &instance.zone,
            &format!("instances/{}", instance.name),
        );
        self.send(Method::DELETE, &url, &[], None).await
    }

    #[instrument(skip(self), err)]
    async fn get_zone_operation(&self, operation: &ResourceLocation) -> Result<Operation> {
        let url = self.zonal_url(
            &operation.project,
            &operation.zone,
            &format!("operations/{}", operation.name),
        );
        self.read(Method::GET, &url, &[]).await
    }
}
