//! Enumerates the preemptible instances of a cluster.
//!
//! Discovery is stateless: every pass rebuilds the fleet from the container and compute APIs, so
//! node pools added or removed between two cycles are picked up without any bookkeeping.
use crate::error::{self, Result};
use models::compute::{
    locator::{parse_resource_url, ResourceKind},
    ClusterRef, ComputeClient, ResourceLocation,
};

use snafu::ResultExt;
use std::collections::BTreeSet;
use tracing::{event, instrument, Level};

/// The instances behind one instance group of a preemptible node pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreemptibleGroup {
    pub node_pool: String,
    pub instance_group: ResourceLocation,
    /// Fully-qualified instance URLs.
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fleet {
    pub groups: Vec<PreemptibleGroup>,
}

impl Fleet {
    /// The deduplicated URLs of every discovered instance.
    pub fn instances(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .flat_map(|group| group.instances.iter().cloned())
            .collect()
    }
}

/// Lists the cluster's node pools and resolves the instances of every preemptible (or spot) pool.
///
/// Any API or URL error aborts the pass; a partially discovered fleet is never returned.
#[instrument(skip(client), fields(cluster = %cluster), err)]
pub async fn refresh<C: ComputeClient + ?Sized>(client: &C, cluster: &ClusterRef) -> Result<Fleet> {
    let node_pools = client
        .list_node_pools(cluster)
        .await
        .context(error::ListNodePoolsSnafu {
            cluster: cluster.to_string(),
        })?;

    let mut groups = Vec::new();
    for node_pool in node_pools {
        if !node_pool.is_preemptible() {
            event!(
                Level::DEBUG,
                node_pool = %node_pool.name,
                "Ignoring node pool without preemptible instances."
            );
            continue;
        }

        for group_url in node_pool.instance_group_urls.iter() {
            let instance_group = parse_resource_url(group_url, ResourceKind::InstanceGroupManagers)
                .context(error::ParseInstanceGroupUrlSnafu {
                    node_pool: &node_pool.name,
                })?;

            let instances = client
                .list_managed_instances(&instance_group)
                .await
                .context(error::ListManagedInstancesSnafu {
                    group: instance_group.to_string(),
                })?;

            event!(
                Level::INFO,
                node_pool = %node_pool.name,
                instance_group = %instance_group.name,
                "Found {} instances in preemptible node pool",
                instances.len()
            );

            groups.push(PreemptibleGroup {
                node_pool: node_pool.name.clone(),
                instance_group,
                instances,
            });
        }
    }

    Ok(Fleet { groups })
}
