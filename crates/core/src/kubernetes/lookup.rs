use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams};
use kube::core::Selector;
use kube::{Client, Resource};
use log::{debug, info};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Instant};

use crate::error::{Error, Result};
use crate::kubernetes::{ResolvedResource, ResourceLookup};
use crate::ports::PortSource;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Pod,
    Service,
    Deployment,
    StatefulSet,
    ReplicaSet,
}

impl ResourceType {
    fn name(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Service => "service",
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
            Self::ReplicaSet => "replicaset",
        }
    }
}

/// Splits `TYPE/NAME`; a bare name refers to a pod.
pub fn parse_resource(resource: &str) -> Result<(ResourceType, &str)> {
    let (kind, name) = match resource.split_once('/') {
        Some((kind, name)) => (kind, name),
        None => ("pod", resource),
    };

    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidResource(resource.to_string()));
    }

    let kind = match kind.to_lowercase().as_str() {
        "po" | "pod" | "pods" => ResourceType::Pod,
        "svc" | "service" | "services" => ResourceType::Service,
        "deploy" | "deployment" | "deployments" => ResourceType::Deployment,
        "sts" | "statefulset" | "statefulsets" => ResourceType::StatefulSet,
        "rs" | "replicaset" | "replicasets" => ResourceType::ReplicaSet,
        _ => return Err(Error::UnsupportedResourceType(kind.to_string())),
    };

    Ok((kind, name))
}

/// Converts a workload's label selector for pod list calls.
///
/// Operators the API does not define are rejected rather than widened.
fn workload_selector(kind: ResourceType, name: &str, selector: &LabelSelector) -> Result<Selector> {
    Selector::try_from(selector.clone()).map_err(|e| Error::InvalidSelector {
        kind: kind.name().to_string(),
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn is_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .is_some_and(|phase| phase == "Running")
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .iter()
        .flat_map(|status| status.conditions.iter().flatten())
        .any(|condition| condition.type_ == "Ready" && condition.status == "True")
}

/// Picks the pod to attach to: running pods only, ready ones first.
pub fn pick_attachable(pods: Vec<Pod>) -> Option<Pod> {
    pods.into_iter()
        .filter(is_running)
        .min_by_key(|pod| !is_ready(pod))
}

/// Resolves resources against the cluster API.
pub struct KubeLookup {
    client: Client,
}

impl KubeLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get<K>(&self, kind: ResourceType, name: &str, namespace: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);

        match api.get(name).await {
            Ok(object) => Ok(object),
            Err(kube::Error::Api(err)) if err.code == 404 => Err(Error::ResourceNotFound {
                kind: kind.name().to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_pod(
        &self,
        selector: &Selector,
        namespace: &str,
        timeout: Duration,
    ) -> Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels_from(selector);
        let deadline = Instant::now() + timeout;

        loop {
            let candidates = pods.list(&params).await?.items;
            debug!("{} pods match `{selector}`", candidates.len());

            if let Some(pod) = pick_attachable(candidates) {
                return Ok(pod);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::PodTimeout {
                    selector: selector.to_string(),
                    seconds: timeout.as_secs(),
                });
            }

            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn pod_for_selector(
        &self,
        kind: ResourceType,
        name: &str,
        selector: Selector,
        namespace: &str,
        timeout: Duration,
    ) -> Result<Pod> {
        if selector.selects_all() {
            return Err(Error::NoSelector {
                kind: kind.name().to_string(),
                name: name.to_string(),
            });
        }

        self.wait_for_pod(&selector, namespace, timeout).await
    }
}

#[async_trait]
impl ResourceLookup for KubeLookup {
    async fn resolve(
        &self,
        resource: &str,
        namespace: &str,
        timeout: Duration,
    ) -> Result<ResolvedResource> {
        let (kind, name) = parse_resource(resource)?;

        let resolved = match kind {
            ResourceType::Pod => ResolvedResource {
                ports: PortSource::Pod,
                pod: self.get::<Pod>(kind, name, namespace).await?,
            },
            ResourceType::Service => {
                let service: Service = self.get(kind, name, namespace).await?;
                let selector = service
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.selector.as_ref())
                    .map(|labels| labels.clone().into_iter().collect::<Selector>())
                    .unwrap_or_default();
                let pod = self
                    .pod_for_selector(kind, name, selector, namespace, timeout)
                    .await?;

                ResolvedResource {
                    ports: PortSource::Service(Box::new(service)),
                    pod,
                }
            }
            ResourceType::Deployment => {
                let deployment: Deployment = self.get(kind, name, namespace).await?;
                let selector = deployment
                    .spec
                    .as_ref()
                    .map(|spec| workload_selector(kind, name, &spec.selector))
                    .transpose()?
                    .unwrap_or_default();

                ResolvedResource {
                    ports: PortSource::Pod,
                    pod: self
                        .pod_for_selector(kind, name, selector, namespace, timeout)
                        .await?,
                }
            }
            ResourceType::StatefulSet => {
                let stateful_set: StatefulSet = self.get(kind, name, namespace).await?;
                let selector = stateful_set
                    .spec
                    .as_ref()
                    .map(|spec| workload_selector(kind, name, &spec.selector))
                    .transpose()?
                    .unwrap_or_default();

                ResolvedResource {
                    ports: PortSource::Pod,
                    pod: self
                        .pod_for_selector(kind, name, selector, namespace, timeout)
                        .await?,
                }
            }
            ResourceType::ReplicaSet => {
                let replica_set: ReplicaSet = self.get(kind, name, namespace).await?;
                let selector = replica_set
                    .spec
                    .as_ref()
                    .map(|spec| workload_selector(kind, name, &spec.selector))
                    .transpose()?
                    .unwrap_or_default();

                ResolvedResource {
                    ports: PortSource::Pod,
                    pod: self
                        .pod_for_selector(kind, name, selector, namespace, timeout)
                        .await?,
                }
            }
        };

        info!(
            "Resolved {resource} to pod {}",
            resolved.pod.metadata.name.as_deref().unwrap_or_default()
        );

        Ok(resolved)
    }
}
