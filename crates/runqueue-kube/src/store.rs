//! Kubernetes resource store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Client;
use kube::api::{
    Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
};
use runqueue_config::{ControllerConfig, ResourceCoordinates};
use runqueue_core::{Error, PipelineRun, QueueKey, RepoKey, Repository, ResourceStore, Result, RunState};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Resource store over the cluster's Repository and PipelineRun resources.
pub struct KubeStore {
    client: Client,
    config: Arc<ControllerConfig>,
    /// Restrict every call to one namespace.
    namespace: Option<String>,
    repositories: ApiResource,
    pipeline_runs: ApiResource,
}

impl KubeStore {
    pub async fn new(config: Arc<ControllerConfig>, namespace: Option<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self::with_client(client, config, namespace))
    }

    pub fn with_client(
        client: Client,
        config: Arc<ControllerConfig>,
        namespace: Option<String>,
    ) -> Self {
        let repositories = api_resource(&config.repositories);
        let pipeline_runs = api_resource(&config.pipeline_runs);
        Self {
            client,
            config,
            namespace,
            repositories,
            pipeline_runs,
        }
    }

    pub fn config(&self) -> &Arc<ControllerConfig> {
        &self.config
    }

    /// Api over repositories, cluster-wide unless the store is namespaced.
    pub fn repositories_api(&self) -> Api<DynamicObject> {
        match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.repositories),
            None => Api::all_with(self.client.clone(), &self.repositories),
        }
    }

    /// Api over pipeline runs, cluster-wide unless the store is namespaced.
    pub fn pipeline_runs_api(&self) -> Api<DynamicObject> {
        match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.pipeline_runs),
            None => Api::all_with(self.client.clone(), &self.pipeline_runs),
        }
    }

    fn namespaced_runs(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.pipeline_runs)
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let list = self
            .repositories_api()
            .list(&ListParams::default())
            .await
            .map_err(store_error)?;
        list.items.iter().map(repository_from_object).collect()
    }

    async fn list_runs(&self, repo: &RepoKey, state: RunState) -> Result<Vec<PipelineRun>> {
        let selector = self.config.run_selector(repo.name(), state);
        debug!(repository = %repo, %selector, "Listing pipeline runs");
        let list = self
            .namespaced_runs(repo.namespace())
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(store_error)?;
        list.items
            .iter()
            .map(|obj| run_from_object(obj, &self.config))
            .collect()
    }

    async fn get_repository(&self, key: &RepoKey) -> Result<Option<Repository>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), key.namespace(), &self.repositories);
        let obj = api.get_opt(key.name()).await.map_err(store_error)?;
        obj.as_ref().map(repository_from_object).transpose()
    }

    async fn set_run_state(&self, run: &QueueKey, state: RunState) -> Result<()> {
        let mut labels = BTreeMap::new();
        labels.insert(
            self.config.state_label.clone(),
            self.config.states.value(state).to_string(),
        );
        let patch = json!({ "metadata": { "labels": labels } });

        self.namespaced_runs(run.namespace())
            .patch(run.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(store_error)?;
        debug!(queue_key = %run, %state, "Updated pipeline run state label");
        Ok(())
    }
}

fn api_resource(coords: &ResourceCoordinates) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        &coords.group,
        &coords.version,
        &coords.kind,
    ))
}

fn store_error(err: kube::Error) -> Error {
    Error::Store(err.to_string())
}

fn object_names(obj: &DynamicObject) -> Result<(&str, &str)> {
    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::InvalidKey("object has no name".to_string()))?;
    let namespace = obj
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::InvalidKey(format!("object {} has no namespace", name)))?;
    Ok((namespace, name))
}

/// Build a [`Repository`] from a Repository custom resource.
pub fn repository_from_object(obj: &DynamicObject) -> Result<Repository> {
    let (namespace, name) = object_names(obj)?;
    let key = RepoKey::new(namespace, name);
    let concurrency_limit = match obj.data.pointer("/spec/concurrency_limit") {
        None | Some(serde_json::Value::Null) => None,
        Some(value) => {
            let limit = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    Error::Store(format!("repository {} has invalid concurrency_limit {}", key, value))
                })?;
            Some(limit)
        }
    };
    Ok(Repository::new(key, concurrency_limit))
}

/// Build a [`PipelineRun`] from a PipelineRun resource.
pub fn run_from_object(obj: &DynamicObject, config: &ControllerConfig) -> Result<PipelineRun> {
    let (namespace, name) = object_names(obj)?;
    let key = QueueKey::new(namespace, name);
    let created_at: DateTime<Utc> = obj
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .ok_or_else(|| Error::Store(format!("pipeline run {} has no creation timestamp", key)))?;

    let labels = obj.metadata.labels.as_ref();
    let label = |name: &str| labels.and_then(|l| l.get(name)).map(String::as_str);

    Ok(PipelineRun {
        repository: label(&config.repository_label).map(str::to_string),
        state: label(&config.state_label).and_then(|v| config.states.state(v)),
        finished: is_finished(&obj.data),
        created_at,
        key,
    })
}

/// A run is finished once its `Succeeded` condition is no longer `Unknown`.
fn is_finished(data: &serde_json::Value) -> bool {
    data.pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .into_iter()
        .flatten()
        .filter(|c| c.get("type").and_then(|t| t.as_str()) == Some("Succeeded"))
        .any(|c| matches!(c.get("status").and_then(|s| s.as_str()), Some("True" | "False")))
}
