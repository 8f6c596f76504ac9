//! Full cluster snapshot for the initial page load

use crate::cluster::ClusterApi;
use crate::error::FetchError;
use crate::layout;
use crate::models::{Node, Pod};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Laid-out nodes and pods from one listing
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterSnapshot {
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
}

impl ClusterSnapshot {
    /// List nodes and pods, assign positions and link each node to its pods
    pub async fn fetch(api: &dyn ClusterApi) -> Result<Self, FetchError> {
        let (mut nodes, mut pods) = futures::try_join!(api.list_nodes(), api.list_pods())?;

        layout::layout_nodes(&mut nodes);
        layout::layout_pods(&nodes, &mut pods);

        let mut scheduled: HashMap<&str, Vec<String>> = HashMap::new();
        for pod in &pods {
            if !pod.node_name.is_empty() {
                scheduled
                    .entry(pod.node_name.as_str())
                    .or_default()
                    .push(pod.id.clone());
            }
        }
        for node in &mut nodes {
            node.pods = scheduled.remove(node.name.as_str()).unwrap_or_default();
        }

        debug!(nodes = nodes.len(), pods = pods.len(), "Fetched cluster snapshot");
        Ok(Self { nodes, pods })
    }
}
