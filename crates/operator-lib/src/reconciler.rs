//! Periodic reconciliation of API deployments
//!
//! Each tick runs two independent sweeps concurrently:
//! - Evicted-pod sweep: deletes failed pods the kubelet evicted
//! - Autoscaler installation: creates the HPA for a deployment once all of
//!   its desired replicas run the latest spec and the rollout has settled
//!   for longer than the dwell time
//!
//! Ticks hold no state between runs; everything is re-read from the cluster.

use crate::cluster::{is_pod_ready, is_pod_spec_latest, ClusterClient, API_NAME_LABEL, REASON_EVICTED};
use crate::config::OperatorConfig;
use crate::error::{Error, Result};
use crate::observability::{OperatorMetrics, StructuredLogger};
use crate::parallel::run_first_err;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const MIN_REPLICAS_ANNOTATION: &str = "minReplicas";
pub const MAX_REPLICAS_ANNOTATION: &str = "maxReplicas";
pub const TARGET_CPU_ANNOTATION: &str = "targetCPUUtilization";

pub struct Reconciler {
    cluster: Arc<dyn ClusterClient>,
    dwell_time: Duration,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: &OperatorConfig) -> Self {
        Self {
            cluster,
            dwell_time: config.cron.dwell_time(),
            metrics: OperatorMetrics::new(),
            logger: StructuredLogger::new(config.namespace.clone()),
        }
    }

    pub fn with_dwell_time(mut self, dwell_time: Duration) -> Self {
        self.dwell_time = dwell_time;
        self
    }

    pub async fn tick(&self) -> Result<()> {
        self.tick_at(Utc::now()).await
    }

    /// One reconciliation tick evaluated at `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<()> {
        let sweeps: Vec<BoxFuture<'_, Result<()>>> = vec![
            self.delete_evicted_pods().boxed(),
            self.install_autoscalers(now).boxed(),
        ];
        run_first_err(sweeps).await
    }

    /// Delete every failed pod whose reason is eviction
    pub async fn delete_evicted_pods(&self) -> Result<()> {
        let pods = self
            .cluster
            .list_failed_pods()
            .await
            .map_err(|e| e.wrap("list failed pods"))?;

        let mut first_err: Option<Error> = None;
        for pod in pods.iter().filter(|p| is_evicted(p)) {
            let name = pod.name_any();
            match self.cluster.delete_pod(&name).await {
                Ok(()) => {
                    self.metrics.inc_evicted_pods_deleted();
                    self.logger.log_evicted_pod_deleted(&name);
                }
                Err(e) => {
                    warn!(pod = %name, error = %e, "Failed to delete evicted pod");
                    first_err.get_or_insert(e.wrap(format!("delete pod {}", name)));
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Create missing autoscalers for settled deployments
    ///
    /// A failure on one deployment does not stop the others; the first one
    /// is returned. A failed pod listing is retried for the next deployment.
    pub async fn install_autoscalers(&self, now: DateTime<Utc>) -> Result<()> {
        let deployments = self
            .cluster
            .list_deployments_with_label(API_NAME_LABEL)
            .await
            .map_err(|e| e.wrap("list deployments"))?;

        let mut pods: Option<Vec<Pod>> = None;
        let mut first_err: Option<Error> = None;

        for deployment in &deployments {
            let name = deployment.name_any();
            let Some(api_name) = deployment.labels().get(API_NAME_LABEL).cloned() else {
                continue;
            };

            match self.cluster.hpa_exists(&api_name).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    first_err.get_or_insert(e.wrap(format!("deployment {}", name)));
                    continue;
                }
            }

            if pods.is_none() {
                match self.cluster.list_pods_with_label(API_NAME_LABEL).await {
                    Ok(listed) => pods = Some(listed),
                    Err(e) => {
                        warn!(deployment = %name, error = %e, "Failed to list api pods");
                        first_err.get_or_insert(e.wrap("list pods"));
                        continue;
                    }
                }
            }
            let api_pods = pods.as_deref().unwrap_or_default();

            if let Err(e) = self.install_autoscaler(deployment, &api_name, api_pods, now).await {
                warn!(deployment = %name, error = %e, "Failed to install autoscaler");
                first_err.get_or_insert(e.wrap(format!("deployment {}", name)));
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    async fn install_autoscaler(
        &self,
        deployment: &Deployment,
        api_name: &str,
        pods: &[Pod],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let updated_ready = updated_ready_replicas(deployment, api_name, pods);
        if updated_ready < desired {
            debug!(api = %api_name, updated_ready, desired, "Rollout not complete");
            return Ok(());
        }

        let Some(progressed_at) = last_progress(deployment) else {
            return Ok(());
        };
        let settled = (now - progressed_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.dwell_time);
        if !settled {
            return Ok(());
        }

        let hpa = hpa_spec(deployment, api_name)?;
        let (min, max) = hpa
            .spec
            .as_ref()
            .map(|s| (s.min_replicas.unwrap_or(1), s.max_replicas))
            .unwrap_or_default();
        self.cluster.create_hpa(hpa).await?;

        self.metrics.inc_autoscalers_created();
        self.logger.log_autoscaler_created(api_name, min, max);
        Ok(())
    }
}

fn is_evicted(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.reason.as_deref())
        .is_some_and(|r| r == REASON_EVICTED)
}

/// Pods of the API that are ready and run the deployment's current template
pub fn updated_ready_replicas(deployment: &Deployment, api_name: &str, pods: &[Pod]) -> i32 {
    pods.iter()
        .filter(|p| p.labels().get(API_NAME_LABEL).is_some_and(|n| n == api_name))
        .filter(|p| is_pod_ready(p) && is_pod_spec_latest(p, deployment))
        .count() as i32
}

/// Last update time of a True Progressing condition, ignoring the zero time
pub fn last_progress(deployment: &Deployment) -> Option<DateTime<Utc>> {
    deployment
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Progressing" && c.status == "True")?
        .last_update_time
        .as_ref()
        .map(|t| t.0)
        .filter(|t| t.timestamp() != 0)
}

/// Autoscaler for an API deployment, bounded by the deployment's annotations
pub fn hpa_spec(deployment: &Deployment, api_name: &str) -> Result<HorizontalPodAutoscaler> {
    let min_replicas = annotation_i32(deployment, MIN_REPLICAS_ANNOTATION)?;
    let max_replicas = annotation_i32(deployment, MAX_REPLICAS_ANNOTATION)?;
    let target_cpu = annotation_i32(deployment, TARGET_CPU_ANNOTATION)?;

    Ok(HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(api_name.to_string()),
            labels: Some([(API_NAME_LABEL.to_string(), api_name.to_string())].into()),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            min_replicas: Some(min_replicas),
            max_replicas,
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: deployment.name_any(),
            },
            target_cpu_utilization_percentage: Some(target_cpu),
        }),
        status: None,
    })
}

fn annotation_i32(deployment: &Deployment, key: &str) -> Result<i32> {
    let name = deployment.name_any();
    let raw = deployment
        .annotations()
        .get(key)
        .ok_or_else(|| Error::invalid_deployment(format!("{}: missing annotation {}", name, key)))?;
    raw.parse().map_err(|_| {
        Error::invalid_deployment(format!(
            "{}: annotation {} must be an integer (got {})",
            name, key, raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{deployment, failed_pod, pod, with_progress, FakeCluster};
    use crate::error::ErrorKind;

    const DWELL: Duration = Duration::from_secs(35);

    fn setup() -> (Reconciler, Arc<FakeCluster>) {
        let cluster = Arc::new(FakeCluster::new());
        let reconciler =
            Reconciler::new(cluster.clone(), &OperatorConfig::default()).with_dwell_time(DWELL);
        (reconciler, cluster)
    }

    fn settled_api(cluster: &FakeCluster, api: &str, now: DateTime<Utc>) {
        let updated_at = now - chrono::Duration::seconds(40);
        cluster.add_deployment(with_progress(deployment(api, 2, "img:2"), updated_at));
        cluster.add_pod(pod(&format!("{}-1", api), api, "img:2", true));
        cluster.add_pod(pod(&format!("{}-2", api), api, "img:2", true));
    }

    #[tokio::test]
    async fn test_installs_autoscaler_once() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        settled_api(&cluster, "iris", now);

        reconciler.tick_at(now).await.unwrap();
        assert_eq!(cluster.created_hpas(), vec!["iris"]);

        reconciler.tick_at(now).await.unwrap();
        assert_eq!(cluster.created_hpas(), vec!["iris"]);
        assert!(cluster.deleted_pods().is_empty());
    }

    #[tokio::test]
    async fn test_autoscaler_spec_from_annotations() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        settled_api(&cluster, "iris", now);

        reconciler.tick_at(now).await.unwrap();

        let hpa = cluster.hpa("iris").unwrap();
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.min_replicas, Some(1));
        assert_eq!(spec.max_replicas, 5);
        assert_eq!(spec.target_cpu_utilization_percentage, Some(80));
        assert_eq!(spec.scale_target_ref.kind, "Deployment");
        assert_eq!(spec.scale_target_ref.name, "iris");
    }

    #[tokio::test]
    async fn test_waits_for_dwell_time() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        let updated_at = now - chrono::Duration::seconds(20);
        cluster.add_deployment(with_progress(deployment("iris", 1, "img:1"), updated_at));
        cluster.add_pod(pod("iris-1", "iris", "img:1", true));

        reconciler.tick_at(now).await.unwrap();
        assert!(cluster.created_hpas().is_empty());

        reconciler
            .tick_at(now + chrono::Duration::seconds(15))
            .await
            .unwrap();
        assert_eq!(cluster.created_hpas(), vec!["iris"]);
    }

    #[tokio::test]
    async fn test_waits_for_updated_ready_replicas() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        let updated_at = now - chrono::Duration::seconds(60);
        cluster.add_deployment(with_progress(deployment("iris", 3, "img:2"), updated_at));
        cluster.add_pod(pod("iris-1", "iris", "img:2", true));
        cluster.add_pod(pod("iris-2", "iris", "img:2", false));
        cluster.add_pod(pod("iris-3", "iris", "img:1", true));
        cluster.add_pod(pod("other-1", "other", "img:2", true));

        reconciler.tick_at(now).await.unwrap();
        assert!(cluster.created_hpas().is_empty());
    }

    #[tokio::test]
    async fn test_no_progress_condition_means_no_autoscaler() {
        let (reconciler, cluster) = setup();
        cluster.add_deployment(deployment("iris", 1, "img:1"));
        cluster.add_pod(pod("iris-1", "iris", "img:1", true));

        reconciler.tick_at(Utc::now()).await.unwrap();
        assert!(cluster.created_hpas().is_empty());
    }

    #[tokio::test]
    async fn test_deletes_only_evicted_pods() {
        let (reconciler, cluster) = setup();
        cluster.add_pod(failed_pod("evicted-1", "Evicted"));
        cluster.add_pod(failed_pod("oom-1", "OOMKilled"));
        cluster.add_pod(pod("iris-1", "iris", "img:1", true));

        reconciler.tick_at(Utc::now()).await.unwrap();
        assert_eq!(cluster.deleted_pods(), vec!["evicted-1"]);

        reconciler.tick_at(Utc::now()).await.unwrap();
        assert_eq!(cluster.deleted_pods(), vec!["evicted-1"]);
    }

    #[tokio::test]
    async fn test_failing_deployment_does_not_block_siblings() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();

        let mut broken = deployment("broken", 1, "img:1");
        broken
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .remove(MAX_REPLICAS_ANNOTATION);
        cluster.add_deployment(with_progress(broken, now - chrono::Duration::seconds(60)));
        cluster.add_pod(pod("broken-1", "broken", "img:1", true));
        settled_api(&cluster, "iris", now);

        let err = reconciler.tick_at(now).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidDeployment(_)));
        assert!(err.to_string().contains("missing annotation maxReplicas"));
        assert_eq!(cluster.created_hpas(), vec!["iris"]);
    }

    #[tokio::test]
    async fn test_pods_listed_once_per_tick() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        settled_api(&cluster, "a", now);
        settled_api(&cluster, "b", now);

        reconciler.tick_at(now).await.unwrap();
        assert_eq!(cluster.labeled_pod_lists(), 1);

        reconciler.tick_at(now).await.unwrap();
        assert_eq!(cluster.labeled_pod_lists(), 1);
    }

    #[tokio::test]
    async fn test_pod_list_failure_retried_for_next_deployment() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        settled_api(&cluster, "a", now);
        settled_api(&cluster, "b", now);
        cluster.fail_once("list_pods_with_label");

        let err = reconciler.install_autoscalers(now).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "list pods: cluster error: list_pods_with_label failed"
        );
        assert_eq!(cluster.created_hpas(), vec!["b"]);
        assert_eq!(cluster.labeled_pod_lists(), 1);

        reconciler.install_autoscalers(now).await.unwrap();
        assert_eq!(cluster.created_hpas(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_pod_list_failure_keeps_earlier_error() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        settled_api(&cluster, "a", now);
        settled_api(&cluster, "b", now);
        cluster.fail_once("hpa_exists");
        cluster.fail_once("list_pods_with_label");

        let err = reconciler.install_autoscalers(now).await.unwrap_err();
        assert_eq!(err.to_string(), "deployment a: cluster error: hpa_exists failed");
        assert!(cluster.created_hpas().is_empty());
        assert_eq!(cluster.labeled_pod_lists(), 0);
    }

    #[tokio::test]
    async fn test_sweep_failure_still_runs_installation() {
        let (reconciler, cluster) = setup();
        let now = Utc::now();
        settled_api(&cluster, "iris", now);
        cluster.fail("list_failed_pods");

        let err = reconciler.tick_at(now).await.unwrap_err();
        assert!(err.to_string().starts_with("list failed pods: "));
        assert_eq!(cluster.created_hpas(), vec!["iris"]);
    }

    #[test]
    fn test_zero_progress_time_is_ignored() {
        let d = with_progress(
            deployment("iris", 1, "img:1"),
            DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        );
        assert!(last_progress(&d).is_none());
    }
}
