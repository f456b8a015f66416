//! Predicates over pods, deployments and nodes

use super::{INSTANCE_TYPE_LABEL, WORKLOAD_LABEL};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};

/// True when the pod's Ready condition is True
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// True when the pod runs the deployment's current pod template
///
/// Every template container must have a same-named pod container with the
/// same image and resource requirements.
pub fn is_pod_spec_latest(pod: &Pod, deployment: &Deployment) -> bool {
    let Some(template) = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
    else {
        return false;
    };
    let Some(pod_spec) = pod.spec.as_ref() else {
        return false;
    };

    template.containers.iter().all(|expected| {
        pod_spec.containers.iter().any(|actual| {
            actual.name == expected.name
                && actual.image == expected.image
                && actual.resources == expected.resources
        })
    })
}

pub fn is_worker_node(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(WORKLOAD_LABEL))
        .is_some_and(|v| v == "true")
}

/// Instance type label, or "unknown" when missing or empty
pub fn instance_type(node: &Node) -> String {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(INSTANCE_TYPE_LABEL))
        .filter(|t| !t.is_empty())
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{deployment, node, pod};

    #[test]
    fn test_pod_ready() {
        assert!(is_pod_ready(&pod("a-1", "a", "img:1", true)));
        assert!(!is_pod_ready(&pod("a-1", "a", "img:1", false)));
        assert!(!is_pod_ready(&Pod::default()));
    }

    #[test]
    fn test_pod_spec_latest_compares_images() {
        let d = deployment("a", 2, "img:2");
        assert!(is_pod_spec_latest(&pod("a-1", "a", "img:2", true), &d));
        assert!(!is_pod_spec_latest(&pod("a-1", "a", "img:1", true), &d));
        assert!(!is_pod_spec_latest(&Pod::default(), &d));
    }

    #[test]
    fn test_worker_node_and_instance_type() {
        let worker = node("n1", true, Some("m5.large"), "16Gi");
        let system = node("n2", false, None, "8Gi");

        assert!(is_worker_node(&worker));
        assert!(!is_worker_node(&system));
        assert_eq!(instance_type(&worker), "m5.large");
        assert_eq!(instance_type(&system), "unknown");
    }
}
