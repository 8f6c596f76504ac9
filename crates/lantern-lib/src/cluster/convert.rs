//! Conversion from Kubernetes API objects to frontend models

use crate::models::{
    Container, ContainerStatus, Node, NodeStatus, Pod, PodPhase, Position, ResourceUsage,
};
use crate::units::{capacity_cores, capacity_gib};
use k8s_openapi::api::core::v1::{
    ContainerState, Node as KubeNode, Pod as KubePod,
};

/// Derive a container's status from its state union
pub fn container_status(state: Option<&ContainerState>) -> ContainerStatus {
    match state {
        Some(s) if s.running.is_some() => ContainerStatus::Running,
        Some(s) if s.waiting.is_some() => ContainerStatus::Waiting,
        Some(s) if s.terminated.is_some() => ContainerStatus::Terminated,
        _ => ContainerStatus::Unknown,
    }
}

pub fn pod_from_kube(pod: &KubePod) -> Pod {
    let meta = &pod.metadata;
    let status = pod.status.as_ref();

    let containers = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| Container {
                    name: cs.name.clone(),
                    status: container_status(cs.state.as_ref()),
                    restarts: cs.restart_count.max(0) as u32,
                })
                .collect()
        })
        .unwrap_or_default();

    Pod {
        id: meta.uid.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        status: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
        node_name: pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default(),
        containers,
        created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
        position: Position::ORIGIN,
    }
}

pub fn node_from_kube(node: &KubeNode) -> Node {
    let meta = &node.metadata;
    let status = node.status.as_ref();

    let conditions = status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    let readiness = NodeStatus::from_conditions(
        conditions
            .iter()
            .map(|c| (c.type_.as_str(), c.status.as_str())),
    );

    let capacity = status.and_then(|s| s.capacity.as_ref());
    let cpu_total = capacity
        .and_then(|c| c.get("cpu"))
        .map(|q| capacity_cores(&q.0))
        .unwrap_or(0.0);
    let memory_total = capacity
        .and_then(|c| c.get("memory"))
        .map(|q| capacity_gib(&q.0))
        .unwrap_or(0.0);

    Node {
        id: meta.uid.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        status: readiness,
        cpu: ResourceUsage::with_total(cpu_total),
        memory: ResourceUsage::with_total(memory_total),
        pods: Vec::new(),
        labels: meta.labels.clone().unwrap_or_default(),
        position: Position::ORIGIN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kube_pod(json: serde_json::Value) -> KubePod {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_pod_conversion() {
        let pod = kube_pod(serde_json::json!({
            "metadata": {
                "name": "web-0",
                "namespace": "shop",
                "uid": "6f1c",
                "creationTimestamp": "2024-05-01T10:00:00Z"
            },
            "spec": {"nodeName": "worker-1", "containers": []},
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {
                        "name": "app", "image": "app:1", "imageID": "", "ready": true,
                        "restartCount": 2, "state": {"running": {}}
                    },
                    {
                        "name": "init", "image": "init:1", "imageID": "", "ready": false,
                        "restartCount": 0, "state": {"waiting": {"reason": "CrashLoopBackOff"}}
                    },
                    {
                        "name": "ghost", "image": "ghost:1", "imageID": "", "ready": false,
                        "restartCount": 0
                    }
                ]
            }
        }));

        let converted = pod_from_kube(&pod);
        assert_eq!(converted.id, "6f1c");
        assert_eq!(converted.namespace, "shop");
        assert_eq!(converted.node_name, "worker-1");
        assert_eq!(converted.status, PodPhase::Running);
        assert!(converted.created_at.is_some());

        let statuses: Vec<ContainerStatus> =
            converted.containers.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                ContainerStatus::Running,
                ContainerStatus::Waiting,
                ContainerStatus::Unknown
            ]
        );
        assert_eq!(converted.containers[0].restarts, 2);
    }

    #[test]
    fn test_unscheduled_pod_has_empty_node_name() {
        let pod = kube_pod(serde_json::json!({
            "metadata": {"name": "pending", "namespace": "default", "uid": "u1"},
            "status": {"phase": "Pending"}
        }));

        let converted = pod_from_kube(&pod);
        assert_eq!(converted.node_name, "");
        assert_eq!(converted.status, PodPhase::Pending);
        assert!(converted.containers.is_empty());
    }

    #[test]
    fn test_node_conversion() {
        let node: KubeNode = serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": "worker-1",
                "uid": "n-1",
                "labels": {"kubernetes.io/role": "worker"}
            },
            "status": {
                "capacity": {"cpu": "4", "memory": "16Gi"},
                "conditions": [
                    {"type": "MemoryPressure", "status": "False"},
                    {"type": "Ready", "status": "True"}
                ]
            }
        }))
        .unwrap();

        let converted = node_from_kube(&node);
        assert_eq!(converted.status, NodeStatus::Ready);
        assert_eq!(converted.cpu, ResourceUsage { used: 0.0, total: 4.0 });
        assert!((converted.memory.total - 16.0).abs() < 1e-9);
        assert_eq!(converted.labels["kubernetes.io/role"], "worker");
    }

    #[test]
    fn test_node_without_status_is_not_ready() {
        let node: KubeNode =
            serde_json::from_value(serde_json::json!({"metadata": {"name": "bare"}})).unwrap();
        let converted = node_from_kube(&node);
        assert_eq!(converted.status, NodeStatus::NotReady);
        assert_eq!(converted.cpu.total, 0.0);
    }
}
