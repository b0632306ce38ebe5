//! Controller configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use regex::Regex;
use runqueue_core::RunState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

/// Kubernetes qualified label key: optional DNS-subdomain prefix plus a name.
static LABEL_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?$",
    )
    .expect("label key pattern is valid")
});

/// Group, version and kind of a custom resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCoordinates {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceCoordinates {
    fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// Label values written for each admission state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValues {
    pub queued: String,
    pub started: String,
    pub completed: String,
}

impl StateValues {
    pub fn value(&self, state: RunState) -> &str {
        match state {
            RunState::Queued => &self.queued,
            RunState::Started => &self.started,
            RunState::Completed => &self.completed,
        }
    }

    pub fn state(&self, value: &str) -> Option<RunState> {
        [RunState::Queued, RunState::Started, RunState::Completed]
            .into_iter()
            .find(|state| self.value(*state) == value)
    }
}

impl Default for StateValues {
    fn default() -> Self {
        Self {
            queued: RunState::Queued.to_string(),
            started: RunState::Started.to_string(),
            completed: RunState::Completed.to_string(),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Label holding a run's admission state.
    pub state_label: String,
    /// Label naming the repository a run belongs to.
    pub repository_label: String,
    pub repositories: ResourceCoordinates,
    pub pipeline_runs: ResourceCoordinates,
    pub states: StateValues,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            state_label: "pipelinesascode.tekton.dev/state".to_string(),
            repository_label: "pipelinesascode.tekton.dev/repository".to_string(),
            repositories: ResourceCoordinates::new(
                "pipelinesascode.tekton.dev",
                "v1alpha1",
                "Repository",
            ),
            pipeline_runs: ResourceCoordinates::new("tekton.dev", "v1beta1", "PipelineRun"),
            states: StateValues::default(),
        }
    }
}

impl ControllerConfig {
    /// Label selector matching runs in `state`.
    pub fn state_selector(&self, state: RunState) -> String {
        format!("{}={}", self.state_label, self.states.value(state))
    }

    /// Label selector matching the runs of repository `name` in `state`.
    pub fn run_selector(&self, name: &str, state: RunState) -> String {
        format!(
            "{},{}={}",
            self.state_selector(state),
            self.repository_label,
            name
        )
    }
}

/// Load configuration from `path`.
///
/// When `required` is false a missing file yields the defaults.
pub fn load(path: &Path, required: bool) -> ConfigResult<ControllerConfig> {
    if !required && !path.exists() {
        return Ok(ControllerConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_controller_config(&content)
}

/// Parse controller configuration from KDL text.
pub fn parse_controller_config(kdl: &str) -> ConfigResult<ControllerConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = ControllerConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
        match name {
            "state-label" => {
                config.state_label = parse_label_key(node)?;
            }
            "repository-label" => {
                config.repository_label = parse_label_key(node)?;
            }
            "repositories" => {
                apply_coordinates(node, &mut config.repositories)?;
            }
            "pipeline-runs" => {
                apply_coordinates(node, &mut config.pipeline_runs)?;
            }
            "states" => {
                apply_states(node, &mut config.states)?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_label_key(node: &KdlNode) -> ConfigResult<String> {
    let field = node.name().value();
    let key = get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    if !LABEL_KEY.is_match(&key) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("'{}' is not a valid label key", key),
        });
    }
    Ok(key)
}

fn apply_coordinates(node: &KdlNode, coords: &mut ResourceCoordinates) -> ConfigResult<()> {
    let field = node.name().value();
    if let Some(group) = get_string_prop(node, "group") {
        coords.group = group;
    }
    if let Some(version) = get_string_prop(node, "version") {
        coords.version = non_empty(field, "version", version)?;
    }
    if let Some(kind) = get_string_prop(node, "kind") {
        coords.kind = non_empty(field, "kind", kind)?;
    }
    Ok(())
}

fn apply_states(node: &KdlNode, states: &mut StateValues) -> ConfigResult<()> {
    if let Some(queued) = get_string_prop(node, "queued") {
        states.queued = non_empty("states", "queued", queued)?;
    }
    if let Some(started) = get_string_prop(node, "started") {
        states.started = non_empty("states", "started", started)?;
    }
    if let Some(completed) = get_string_prop(node, "completed") {
        states.completed = non_empty("states", "completed", completed)?;
    }

    let distinct: HashSet<&str> = [&states.queued, &states.started, &states.completed]
        .into_iter()
        .map(String::as_str)
        .collect();
    if distinct.len() != 3 {
        return Err(ConfigError::InvalidValue {
            field: "states".to_string(),
            message: "queued, started and completed values must differ".to_string(),
        });
    }
    Ok(())
}

fn non_empty(node: &str, prop: &str, value: String) -> ConfigResult<String> {
    if value.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: format!("{}.{}", node, prop),
            message: "must not be empty".to_string(),
        });
    }
    Ok(value)
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}
