//! A mock gateway for testing without a real Kubernetes cluster.
//!
//! Objects, pods, nodes, secrets and service accounts are seeded up front.
//! Jobs created through the gateway get a uid, a controller-uid selector and
//! a backing pod; their outcome is scripted per target node with
//! [`MockJobOutcome`] and delivered through the watch streams.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Event, Node, ObjectReference, Pod,
    PodSpec, PodStatus, Secret, ServiceAccount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::core::ErrorResponse;
use parking_lot::Mutex;

use kube_survey_core::{RawObject, ResourceIdentity};

use crate::gateway::{ClusterGateway, LogStream};
use crate::{ClusterError, Result};

/// Build an API error with the given status code.
///
/// # Panics
///
/// Panics if `ErrorResponse` no longer accepts a standard status document.
#[must_use]
pub fn api_error(code: u16, reason: &str, message: &str) -> ClusterError {
    let response: ErrorResponse = serde_json::from_value(serde_json::json!({
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    }))
    .expect("static error response");
    ClusterError::KubeApi(kube::Error::Api(response))
}

fn not_found(what: &str) -> ClusterError {
    api_error(404, "NotFound", &format!("{what} not found"))
}

/// How a job submitted to the mock behaves once watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockJobOutcome {
    /// The job reports a `Complete` condition.
    Complete,
    /// The job reports a `Complete` condition after a delay.
    CompleteAfter(Duration),
    /// The job reports a `Failed` condition; its container exits non-zero.
    Fail {
        /// Condition reason.
        reason: String,
        /// Condition message.
        message: String,
    },
    /// A `Warning` event is emitted for the job.
    Warning {
        /// Event reason.
        reason: String,
        /// Event message.
        message: String,
    },
    /// The job never reaches a terminal state.
    Hang,
}

#[derive(Default)]
struct MockState {
    resources: Vec<(String, String, ResourceIdentity)>,
    objects: Vec<(ResourceIdentity, RawObject)>,
    list_errors: HashMap<String, u16>,
    service_accounts: HashMap<(String, String), ServiceAccount>,
    service_account_errors: HashMap<(String, String), u16>,
    secrets: HashMap<(String, String), Secret>,
    secret_errors: HashMap<(String, String), u16>,
    pods: Vec<Pod>,
    pod_logs: HashMap<(String, String), String>,
    nodes: Vec<Node>,
    namespaces: HashSet<String>,
    namespace_errors: HashMap<String, u16>,
    jobs: BTreeMap<(String, String), Job>,
    created_jobs: Vec<Job>,
    deleted_jobs: Vec<(String, String)>,
    deleted_namespaces: Vec<String>,
    outcomes: HashMap<String, MockJobOutcome>,
    default_outcome: Option<MockJobOutcome>,
    node_logs: HashMap<String, String>,
    configz: HashMap<String, String>,
    server_version: String,
    job_counter: u64,
}

/// A gateway that keeps everything in memory.
pub struct MockGateway {
    state: Mutex<MockState>,
    cluster_name: String,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Create an empty mock cluster at version `v1.29.1`.
    #[must_use]
    pub fn new() -> Self {
        let state = MockState {
            server_version: "v1.29.1".to_string(),
            ..MockState::default()
        };
        Self {
            state: Mutex::new(state),
            cluster_name: "mock-cluster".to_string(),
        }
    }

    /// Register a served resource under its kind and plural names.
    pub fn add_resource(&self, kind: &str, resource: ResourceIdentity) {
        self.state.lock().resources.push((
            kind.to_lowercase(),
            resource.resource.to_lowercase(),
            resource,
        ));
    }

    /// Register the common built-in resources.
    pub fn add_default_resources(&self) {
        let builtins = [
            ("Pod", "", "v1", "pods"),
            ("Service", "", "v1", "services"),
            ("ServiceAccount", "", "v1", "serviceaccounts"),
            ("ConfigMap", "", "v1", "configmaps"),
            ("ReplicationController", "", "v1", "replicationcontrollers"),
            ("ResourceQuota", "", "v1", "resourcequotas"),
            ("LimitRange", "", "v1", "limitranges"),
            ("Node", "", "v1", "nodes"),
            ("Deployment", "apps", "v1", "deployments"),
            ("ReplicaSet", "apps", "v1", "replicasets"),
            ("StatefulSet", "apps", "v1", "statefulsets"),
            ("DaemonSet", "apps", "v1", "daemonsets"),
            ("Job", "batch", "v1", "jobs"),
            ("CronJob", "batch", "v1", "cronjobs"),
            ("Role", "rbac.authorization.k8s.io", "v1", "roles"),
            ("RoleBinding", "rbac.authorization.k8s.io", "v1", "rolebindings"),
            ("ClusterRole", "rbac.authorization.k8s.io", "v1", "clusterroles"),
            (
                "ClusterRoleBinding",
                "rbac.authorization.k8s.io",
                "v1",
                "clusterrolebindings",
            ),
            ("NetworkPolicy", "networking.k8s.io", "v1", "networkpolicies"),
            ("Ingress", "networking.k8s.io", "v1", "ingresses"),
        ];
        for (kind, group, version, plural) in builtins {
            self.add_resource(kind, ResourceIdentity::new(group, version, plural));
        }
    }

    /// Seed an object under a resource.
    pub fn add_object(&self, resource: &ResourceIdentity, object: RawObject) {
        self.state.lock().objects.push((resource.clone(), object));
    }

    /// Make listing a resource fail with the given status code.
    pub fn fail_list(&self, resource: &str, code: u16) {
        self.state.lock().list_errors.insert(resource.to_string(), code);
    }

    /// Seed a service account.
    pub fn add_service_account(&self, account: ServiceAccount) {
        let key = meta_key(&account.metadata);
        self.state.lock().service_accounts.insert(key, account);
    }

    /// Make fetching a service account fail with the given status code.
    pub fn fail_service_account(&self, namespace: &str, name: &str, code: u16) {
        self.state
            .lock()
            .service_account_errors
            .insert((namespace.to_string(), name.to_string()), code);
    }

    /// Seed a secret.
    pub fn add_secret(&self, secret: Secret) {
        let key = meta_key(&secret.metadata);
        self.state.lock().secrets.insert(key, secret);
    }

    /// Make fetching a secret fail with the given status code.
    pub fn fail_secret(&self, namespace: &str, name: &str, code: u16) {
        self.state
            .lock()
            .secret_errors
            .insert((namespace.to_string(), name.to_string()), code);
    }

    /// Seed a pod.
    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().pods.push(pod);
    }

    /// Remove a pod, leaving its job in place.
    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.state.lock().pods.retain(|p| {
            p.metadata.namespace.as_deref() != Some(namespace)
                || p.metadata.name.as_deref() != Some(name)
        });
    }

    /// Set the log text of a pod's containers.
    pub fn set_pod_logs(&self, namespace: &str, pod: &str, logs: &str) {
        self.state
            .lock()
            .pod_logs
            .insert((namespace.to_string(), pod.to_string()), logs.to_string());
    }

    /// Seed a node.
    pub fn add_node(&self, node: Node) {
        self.state.lock().nodes.push(node);
    }

    /// Make reading a namespace fail with the given status code.
    pub fn fail_namespace(&self, name: &str, code: u16) {
        self.state
            .lock()
            .namespace_errors
            .insert(name.to_string(), code);
    }

    /// Seed an existing namespace.
    pub fn add_namespace(&self, name: &str) {
        self.state.lock().namespaces.insert(name.to_string());
    }

    /// Script the outcome of jobs targeting `node`.
    pub fn script_node(&self, node: &str, outcome: MockJobOutcome) {
        self.state.lock().outcomes.insert(node.to_string(), outcome);
    }

    /// Script the outcome of jobs with no per-node script. Defaults to `Complete`.
    pub fn set_default_outcome(&self, outcome: MockJobOutcome) {
        self.state.lock().default_outcome = Some(outcome);
    }

    /// Set the collector output of jobs targeting `node`.
    pub fn set_node_logs(&self, node: &str, logs: &str) {
        self.state
            .lock()
            .node_logs
            .insert(node.to_string(), logs.to_string());
    }

    /// Set the kubelet `configz` document of `node`.
    pub fn set_configz(&self, node: &str, configz: &str) {
        self.state
            .lock()
            .configz
            .insert(node.to_string(), configz.to_string());
    }

    /// Set the API server git version.
    pub fn set_server_version(&self, version: &str) {
        self.state.lock().server_version = version.to_string();
    }

    /// Jobs submitted so far, as submitted.
    #[must_use]
    pub fn created_jobs(&self) -> Vec<Job> {
        self.state.lock().created_jobs.clone()
    }

    /// Jobs deleted so far, as `(namespace, name)`.
    #[must_use]
    pub fn deleted_jobs(&self) -> Vec<(String, String)> {
        self.state.lock().deleted_jobs.clone()
    }

    /// Jobs still present.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// Whether a namespace currently exists.
    #[must_use]
    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().namespaces.contains(name)
    }

    /// Namespaces deleted so far.
    #[must_use]
    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.state.lock().deleted_namespaces.clone()
    }

    fn outcome_for(state: &MockState, job: &Job) -> MockJobOutcome {
        job_node(job)
            .and_then(|node| state.outcomes.get(&node).cloned())
            .or_else(|| state.default_outcome.clone())
            .unwrap_or(MockJobOutcome::Complete)
    }
}

fn meta_key(meta: &ObjectMeta) -> (String, String) {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

/// The node a job is pinned to, by node name or hostname selector.
fn job_node(job: &Job) -> Option<String> {
    let spec = job.spec.as_ref()?.template.spec.as_ref()?;
    spec.node_name.clone().or_else(|| {
        spec.node_selector
            .as_ref()?
            .get("kubernetes.io/hostname")
            .cloned()
    })
}

/// Match `key=value` and bare `key` terms, comma-separated.
fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels
                .and_then(|l| l.get(key.trim()))
                .is_some_and(|v| v == value.trim()),
            None => labels.is_some_and(|l| l.contains_key(term)),
        })
}

fn job_with_condition(job: &Job, condition: &str, reason: Option<&str>, message: Option<&str>) -> Job {
    let mut job = job.clone();
    job.status = Some(JobStatus {
        conditions: Some(vec![JobCondition {
            type_: condition.to_string(),
            status: "True".to_string(),
            reason: reason.map(ToString::to_string),
            message: message.map(ToString::to_string),
            ..JobCondition::default()
        }]),
        ..JobStatus::default()
    });
    job
}

fn job_pod(job: &Job, uid: &str, failed: bool) -> Pod {
    let name = job.metadata.name.clone().unwrap_or_default();
    let template = job.spec.as_ref().and_then(|s| s.template.spec.as_ref());
    let statuses = template
        .map(|spec| {
            spec.containers
                .iter()
                .map(|c| ContainerStatus {
                    name: c.name.clone(),
                    image: c.image.clone().unwrap_or_default(),
                    state: Some(ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code: i32::from(failed),
                            reason: Some(if failed { "Error" } else { "Completed" }.to_string()),
                            message: failed.then(|| "collector exited with an error".to_string()),
                            ..ContainerStateTerminated::default()
                        }),
                        ..ContainerState::default()
                    }),
                    ..ContainerStatus::default()
                })
                .collect()
        })
        .unwrap_or_default();

    Pod {
        metadata: ObjectMeta {
            name: Some(format!("{name}-pod")),
            namespace: job.metadata.namespace.clone(),
            labels: Some(BTreeMap::from([
                ("controller-uid".to_string(), uid.to_string()),
                ("job-name".to_string(), name),
            ])),
            ..ObjectMeta::default()
        },
        spec: template.cloned().or_else(|| Some(PodSpec::default())),
        status: Some(PodStatus {
            container_statuses: Some(statuses),
            ..PodStatus::default()
        }),
    }
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn resolve_resource(&self, name: &str) -> Result<ResourceIdentity> {
        let name = name.to_lowercase();
        self.state
            .lock()
            .resources
            .iter()
            .filter(|(kind, plural, _)| *kind == name || *plural == name)
            .min_by(|a, b| a.2.group.cmp(&b.2.group))
            .map(|(_, _, resource)| resource.clone())
            .ok_or(ClusterError::UnknownResource(name))
    }

    async fn list_objects(
        &self,
        resource: &ResourceIdentity,
        namespace: Option<&str>,
    ) -> Result<Vec<RawObject>> {
        let state = self.state.lock();
        if let Some(code) = state.list_errors.get(&resource.resource) {
            return Err(api_error(*code, "Scripted", &format!("listing {resource}")));
        }
        Ok(state
            .objects
            .iter()
            .filter(|(r, _)| r == resource)
            .filter(|(_, o)| namespace.is_none_or(|ns| o.namespace() == ns))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn get_object(
        &self,
        resource: &ResourceIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<RawObject> {
        self.list_objects(resource, namespace)
            .await?
            .into_iter()
            .find(|o| o.name() == name)
            .ok_or_else(|| not_found(&format!("{resource} {name}")))
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        let state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        if let Some(code) = state.service_account_errors.get(&key) {
            return Err(api_error(*code, "Scripted", "service account"));
        }
        state
            .service_accounts
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(&format!("serviceaccount {namespace}/{name}")))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        if let Some(code) = state.secret_errors.get(&key) {
            return Err(api_error(*code, "Scripted", "secret"));
        }
        state
            .secrets
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(&format!("secret {namespace}/{name}")))
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        Ok(self
            .state
            .lock()
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| selector_matches(label_selector, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state.lock().nodes.clone())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        if let Some(code) = self.state.lock().namespace_errors.get(name) {
            return Err(api_error(*code, "Scripted", "namespace"));
        }
        Ok(self.has_namespace(name))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        if self.state.lock().namespaces.insert(name.to_string()) {
            Ok(())
        } else {
            Err(api_error(409, "AlreadyExists", "namespace exists"))
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.namespaces.remove(name) {
            return Err(not_found(&format!("namespace {name}")));
        }
        state.deleted_namespaces.push(name.to_string());
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        let mut state = self.state.lock();
        let key = meta_key(&job.metadata);
        if key.1.is_empty() {
            return Err(api_error(422, "Invalid", "job name is required"));
        }
        let has_containers = job
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .is_some_and(|p| !p.containers.is_empty());
        if !has_containers {
            return Err(api_error(422, "Invalid", "spec.template.spec.containers: Required value"));
        }
        if state.jobs.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", "job exists"));
        }

        state.job_counter += 1;
        let uid = format!("mock-uid-{}", state.job_counter);
        let mut stored = job.clone();
        stored.metadata.uid = Some(uid.clone());
        if let Some(spec) = stored.spec.as_mut() {
            spec.selector = Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "controller-uid".to_string(),
                    uid.clone(),
                )])),
                ..LabelSelector::default()
            });
        }

        let failed = matches!(Self::outcome_for(&state, &stored), MockJobOutcome::Fail { .. });
        let pod = job_pod(&stored, &uid, failed);
        if let Some(node) = job_node(&stored) {
            if let Some(logs) = state.node_logs.get(&node).cloned() {
                state.pod_logs.insert(meta_key(&pod.metadata), logs);
            }
        }
        state.pods.push(pod);
        state.created_jobs.push(job.clone());
        state.jobs.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        self.state
            .lock()
            .jobs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(&format!("job {namespace}/{name}")))
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        state.deleted_jobs.push(key.clone());
        if state.jobs.remove(&key).is_none() {
            return Err(not_found(&format!("job {namespace}/{name}")));
        }
        let pod_prefix = format!("{name}-pod");
        state.pods.retain(|p| {
            p.metadata.namespace.as_deref() != Some(namespace)
                || p.metadata.name.as_deref() != Some(pod_prefix.as_str())
        });
        Ok(())
    }

    fn watch_jobs(&self, namespace: &str) -> BoxStream<'static, Result<Job>> {
        let state = self.state.lock();
        let mut immediate = Vec::new();
        let mut delayed = Vec::new();
        for ((ns, _), job) in &state.jobs {
            if ns != namespace {
                continue;
            }
            match Self::outcome_for(&state, job) {
                MockJobOutcome::Complete => {
                    immediate.push(Ok(job_with_condition(job, "Complete", None, None)));
                }
                MockJobOutcome::CompleteAfter(delay) => {
                    delayed.push((delay, job_with_condition(job, "Complete", None, None)));
                }
                MockJobOutcome::Fail { reason, message } => immediate.push(Ok(
                    job_with_condition(job, "Failed", Some(&reason), Some(&message)),
                )),
                MockJobOutcome::Warning { .. } | MockJobOutcome::Hang => {
                    immediate.push(Ok(job.clone()));
                }
            }
        }
        let delayed = stream::iter(delayed).then(|(delay, job)| async move {
            tokio::time::sleep(delay).await;
            Ok(job)
        });
        stream::iter(immediate)
            .chain(delayed)
            .chain(stream::pending())
            .boxed()
    }

    fn watch_events(&self, namespace: &str) -> BoxStream<'static, Result<Event>> {
        let state = self.state.lock();
        let mut events = Vec::new();
        for ((ns, name), job) in &state.jobs {
            if ns != namespace {
                continue;
            }
            // every job gets a harmless Normal event first
            events.push(Ok(Event {
                type_: Some("Normal".to_string()),
                reason: Some("SuccessfulCreate".to_string()),
                involved_object: ObjectReference {
                    kind: Some("Job".to_string()),
                    name: Some(name.clone()),
                    uid: job.metadata.uid.clone(),
                    ..ObjectReference::default()
                },
                ..Event::default()
            }));
            if let MockJobOutcome::Warning { reason, message } = Self::outcome_for(&state, job) {
                events.push(Ok(Event {
                    type_: Some("Warning".to_string()),
                    reason: Some(reason),
                    message: Some(message),
                    involved_object: ObjectReference {
                        kind: Some("Job".to_string()),
                        name: Some(name.clone()),
                        uid: job.metadata.uid.clone(),
                        ..ObjectReference::default()
                    },
                    ..Event::default()
                }));
            }
        }
        stream::iter(events).chain(stream::pending()).boxed()
    }

    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        _container: &str,
    ) -> Result<LogStream> {
        let state = self.state.lock();
        let key = (namespace.to_string(), pod.to_string());
        let exists = state
            .pods
            .iter()
            .any(|p| meta_key(&p.metadata) == key);
        if !exists {
            return Err(not_found(&format!("pod {namespace}/{pod}")));
        }
        let logs = state.pod_logs.get(&key).cloned().unwrap_or_default();
        Ok(Box::pin(futures::io::Cursor::new(logs.into_bytes())))
    }

    async fn server_version(&self) -> Result<String> {
        Ok(self.state.lock().server_version.clone())
    }

    fn cluster_name(&self) -> String {
        self.cluster_name.clone()
    }

    async fn node_configz(&self, node: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .configz
            .get(node)
            .map(|c| c.clone().into_bytes())
            .ok_or_else(|| not_found(&format!("node {node}")))
    }
}
