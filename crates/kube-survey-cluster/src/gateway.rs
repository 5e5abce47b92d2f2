//! Cluster gateway.
//!
//! [`ClusterGateway`] is the only way the rest of the workspace talks to a
//! cluster. [`KubeGateway`] implements it on top of a `kube` client; the
//! in-memory `MockGateway` implements it for tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::io::AsyncBufRead;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Event, Namespace, Node, Pod, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiResource, Discovery};
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Client, Config};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use kube_survey_core::{RawObject, ResourceIdentity};

use crate::types::ClusterConfig;
use crate::{ClusterError, Result};

/// A followed log stream.
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Cluster name reported when the kubeconfig does not name one.
pub const DEFAULT_CLUSTER_NAME: &str = "k8s.io/kubernetes";

/// Read, write and watch access to a cluster.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Resolve a kind or plural name (case-insensitive) to its resource identity.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::UnknownResource` if no served resource matches.
    async fn resolve_resource(&self, name: &str) -> Result<ResourceIdentity>;

    /// List objects of a resource, in one namespace or across the cluster.
    ///
    /// Listed objects always carry `kind` and `apiVersion`.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    async fn list_objects(
        &self,
        resource: &ResourceIdentity,
        namespace: Option<&str>,
    ) -> Result<Vec<RawObject>>;

    /// Fetch a single object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be fetched.
    async fn get_object(
        &self,
        resource: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<RawObject>;

    /// Fetch a service account.
    ///
    /// # Errors
    ///
    /// Returns an error if the service account cannot be fetched.
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount>;

    /// Fetch a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret cannot be fetched.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// List pods matching a label selector.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    /// List all nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Check whether a namespace exists.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than not-found.
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    /// Create a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails, including when it already exists.
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Create a job, returning it as stored (with its uid).
    ///
    /// # Errors
    ///
    /// Returns an error if creation fails.
    async fn create_job(&self, job: &Job) -> Result<Job>;

    /// Fetch a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be fetched.
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job>;

    /// Delete a job and, in the background, its pods.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    /// Watch jobs in a namespace; yields every applied version.
    fn watch_jobs(&self, namespace: &str) -> BoxStream<'static, Result<Job>>;

    /// Watch events in a namespace; yields every applied version.
    fn watch_events(&self, namespace: &str) -> BoxStream<'static, Result<Event>>;

    /// Follow the logs of one container.
    ///
    /// # Errors
    ///
    /// Returns an error if the log request fails.
    async fn stream_pod_logs(&self, namespace: &str, pod: &str, container: &str)
        -> Result<LogStream>;

    /// The API server's git version, e.g. `v1.29.1`.
    ///
    /// # Errors
    ///
    /// Returns an error if the version endpoint fails.
    async fn server_version(&self) -> Result<String>;

    /// Name of the cluster the current context points at.
    fn cluster_name(&self) -> String;

    /// Fetch a node's kubelet `configz` document through the API server proxy.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy request fails.
    async fn node_configz(&self, node: &str) -> Result<Vec<u8>>;
}

/// Gateway backed by a live `kube` client.
pub struct KubeGateway {
    client: Client,
    cluster_name: String,
    discovery: OnceCell<Discovery>,
}

impl KubeGateway {
    /// Connect using the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable kubeconfig or in-cluster config exists.
    pub async fn new(config: &ClusterConfig) -> Result<Self> {
        let options = KubeConfigOptions {
            context: config.context.clone(),
            ..KubeConfigOptions::default()
        };

        let kubeconfig = match &config.kubeconfig {
            Some(path) => Some(
                Kubeconfig::read_from(path)
                    .map_err(|e| ClusterError::Config(format!("reading {}: {e}", path.display())))?,
            ),
            None => Kubeconfig::read().ok(),
        };

        let client_config = match (&config.kubeconfig, &kubeconfig) {
            (Some(_), Some(kubeconfig)) => {
                Config::from_custom_kubeconfig(kubeconfig.clone(), &options)
                    .await
                    .map_err(|e| ClusterError::Config(e.to_string()))?
            }
            _ if config.context.is_some() => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| ClusterError::Config(e.to_string()))?,
            _ => Config::infer()
                .await
                .map_err(|e| ClusterError::Config(e.to_string()))?,
        };

        let cluster_name = kubeconfig
            .as_ref()
            .and_then(|k| cluster_name_from(k, config.context.as_deref()))
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string());

        let client = Client::try_from(client_config)?;
        info!(cluster = %cluster_name, "Connected to cluster");

        Ok(Self::with_client(client, cluster_name))
    }

    /// Create a gateway around an existing client.
    #[must_use]
    pub fn with_client(client: Client, cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            cluster_name: cluster_name.into(),
            discovery: OnceCell::new(),
        }
    }

    /// Get a reference to the underlying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn discovery(&self) -> Result<&Discovery> {
        self.discovery
            .get_or_try_init(|| async {
                debug!("Running API discovery");
                Discovery::new(self.client.clone())
                    .run()
                    .await
                    .map_err(ClusterError::from)
            })
            .await
    }

    async fn api_resource(&self, resource: &ResourceIdentity) -> Result<ApiResource> {
        let discovery = self.discovery().await?;
        discovery
            .get(&resource.group)
            .into_iter()
            .flat_map(|group| group.versioned_resources(&resource.version))
            .map(|(ar, _caps)| ar)
            .find(|ar| ar.plural == resource.resource)
            .ok_or_else(|| ClusterError::UnknownResource(resource.to_string()))
    }

    fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

/// The cluster named by the selected (or current) kubeconfig context.
fn cluster_name_from(kubeconfig: &Kubeconfig, context: Option<&str>) -> Option<String> {
    let wanted = context.or(kubeconfig.current_context.as_deref())?;
    kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == wanted)
        .and_then(|c| c.context.as_ref())
        .map(|c| c.cluster.clone())
        .filter(|name| !name.is_empty())
}

fn to_raw(object: &DynamicObject, ar: &ApiResource) -> Result<RawObject> {
    let mut raw = RawObject::from_serializable(object)?;
    if raw.kind().is_empty() {
        raw.insert("kind", ar.kind.clone().into());
    }
    if raw.api_version().is_empty() {
        raw.insert("apiVersion", ar.api_version.clone().into());
    }
    Ok(raw)
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn resolve_resource(&self, name: &str) -> Result<ResourceIdentity> {
        let discovery = self.discovery().await?;
        discovery
            .groups()
            .flat_map(|group| {
                group
                    .recommended_resources()
                    .into_iter()
                    .map(move |res| (group, res))
            })
            .filter(|(_, (res, _))| {
                name.eq_ignore_ascii_case(&res.kind) || name.eq_ignore_ascii_case(&res.plural)
            })
            .min_by_key(|(group, _)| group.name())
            .map(|(_, (ar, _))| ResourceIdentity::new(ar.group, ar.version, ar.plural))
            .ok_or_else(|| ClusterError::UnknownResource(name.to_string()))
    }

    async fn list_objects(
        &self,
        resource: &ResourceIdentity,
        namespace: Option<&str>,
    ) -> Result<Vec<RawObject>> {
        let ar = self.api_resource(resource).await?;
        let list = self
            .dynamic_api(&ar, namespace)
            .list(&ListParams::default())
            .await?;
        list.items.iter().map(|o| to_raw(o, &ar)).collect()
    }

    async fn get_object(
        &self,
        resource: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<RawObject> {
        let ar = self.api_resource(resource).await?;
        let object = self.dynamic_api(&ar, namespace).get(name).await?;
        to_raw(&object, &ar)
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(label_selector);
        Ok(api.list(&params).await?.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        api.create(&PostParams::default(), &namespace).await?;
        info!(namespace = name, "Created namespace");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default()).await?;
        info!(namespace = name, "Deleted namespace");
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let namespace = job.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), job).await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    fn watch_jobs(&self, namespace: &str) -> BoxStream<'static, Result<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        watcher(api, watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .map_err(ClusterError::from)
            .boxed()
    }

    fn watch_events(&self, namespace: &str) -> BoxStream<'static, Result<Event>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        watcher(api, watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .map_err(ClusterError::from)
            .boxed()
    }

    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<LogStream> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            ..LogParams::default()
        };
        let stream = api.log_stream(pod, &params).await?;
        Ok(Box::pin(stream))
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    fn cluster_name(&self) -> String {
        self.cluster_name.clone()
    }

    async fn node_configz(&self, node: &str) -> Result<Vec<u8>> {
        let request = http::Request::get(format!("/api/v1/nodes/{node}/proxy/configz"))
            .body(Vec::new())?;
        let text = self.client.request_text(request).await?;
        Ok(text.into_bytes())
    }
}
