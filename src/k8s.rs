use anyhow::{Context, Result, bail};
use crossterm::event::KeyCode;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DeleteParams, ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, ResourceExt};
use serde::Serialize;
use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::model::{
    ChildSelector, ColumnAlign, ColumnSpec, KeyBinding, ResourceDataset, ResourceKind,
    ResourceRow, RowStyle, TableAction, ViewTarget,
};

const LOG_TAIL_LINES: i64 = 500;

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
}

impl KubeGateway {
    /// Connects through the local kubeconfig using `context`.
    pub async fn new(context: &str) -> Result<Self> {
        let kubeconfig = Kubeconfig::read().context("failed to read kubeconfig")?;
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            cluster: None,
            user: None,
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .with_context(|| format!("failed to load Kubernetes context '{context}'"))?;
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        info!("connected to Kubernetes context {context}");

        Ok(Self {
            client,
            context: context.to_string(),
        })
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub async fn describe(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<String> {
        match kind {
            ResourceKind::Deployments => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployment = api
                    .get(name)
                    .await
                    .with_context(|| format!("failed to get deployment {namespace}/{name}"))?;
                Ok(yaml_detail(&deployment))
            }
            ResourceKind::Pods => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                let pod = api
                    .get(name)
                    .await
                    .with_context(|| format!("failed to get pod {namespace}/{name}"))?;
                Ok(yaml_detail(&pod))
            }
            ResourceKind::Containers => bail!("containers cannot be described on their own"),
        }
    }

    pub async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let params = DeleteParams::default();
        match kind {
            ResourceKind::Deployments => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let _ = api
                    .delete(name, &params)
                    .await
                    .with_context(|| format!("failed to delete deployment {namespace}/{name}"))?;
            }
            ResourceKind::Pods => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                let _ = api
                    .delete(name, &params)
                    .await
                    .with_context(|| format!("failed to delete pod {namespace}/{name}"))?;
            }
            ResourceKind::Containers => bail!("containers cannot be deleted on their own"),
        }
        info!("deleted {kind} {namespace}/{name}");
        Ok(())
    }

    pub async fn fetch_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(LOG_TAIL_LINES),
            ..LogParams::default()
        };
        pods.logs(pod, &params)
            .await
            .with_context(|| format!("failed to load logs for {namespace}/{pod}/{container}"))
    }

    async fn fetch_deployments(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<ResourceDataset> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&list_params(label_selector)).await?;
        let rows = list.into_iter().map(|deployment| deployment_row(&deployment)).collect();
        Ok(deployments_dataset(namespace, rows))
    }

    async fn fetch_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<ResourceDataset> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&list_params(label_selector)).await?;
        let rows = list.into_iter().map(|pod| pod_row(&pod)).collect();
        Ok(pods_dataset(namespace, rows))
    }

    /// The containers of the pod named by a `pod=<name>` selector.
    async fn fetch_containers(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<ResourceDataset> {
        let Some(pod_name) = label_selector
            .and_then(|selector| selector.split_once('='))
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
        else {
            debug!("no pod selected, containers stay empty");
            return Ok(containers_dataset(namespace, Vec::new()));
        };

        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api
            .get(pod_name)
            .await
            .with_context(|| format!("failed to get pod {namespace}/{pod_name}"))?;
        Ok(containers_dataset(namespace, container_rows(&pod)))
    }
}

impl ClusterApi for KubeGateway {
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<ResourceDataset> {
        match kind {
            ResourceKind::Deployments => self.fetch_deployments(namespace, label_selector).await,
            ResourceKind::Pods => self.fetch_pods(namespace, label_selector).await,
            ResourceKind::Containers => self.fetch_containers(namespace, label_selector).await,
        }
    }
}

fn deployments_dataset(namespace: &str, rows: Vec<ResourceRow>) -> ResourceDataset {
    ResourceDataset::new(
        ResourceKind::Deployments,
        namespace,
        vec![
            ColumnSpec::dynamic("NAME"),
            ColumnSpec::fixed("READY", 10).align(ColumnAlign::Center),
            ColumnSpec::fixed("CURRENT", 10).align(ColumnAlign::Center),
            ColumnSpec::fixed("AVAILABLE", 10).align(ColumnAlign::Center),
            ColumnSpec::dynamic("NAMESPACE"),
            ColumnSpec::fixed("AGE", 15),
        ],
        rows,
    )
    .with_child_selector(ChildSelector::new("app=", 0))
    .with_actions(vec![
        KeyBinding::new(
            KeyCode::Enter,
            TableAction::SelectRow(ViewTarget::Kind(ResourceKind::Pods)),
            "Pods",
        ),
        KeyBinding::new(KeyCode::Char('d'), TableAction::Describe, "Describe"),
        KeyBinding::new(KeyCode::Char('x'), TableAction::Delete, "Delete"),
    ])
}

fn pods_dataset(namespace: &str, rows: Vec<ResourceRow>) -> ResourceDataset {
    ResourceDataset::new(
        ResourceKind::Pods,
        namespace,
        vec![
            ColumnSpec::dynamic("NAME"),
            ColumnSpec::fixed("STATUS", 10),
            ColumnSpec::fixed("IP", 15),
            ColumnSpec::fixed("NAMESPACE", 15),
            ColumnSpec::fixed("AGE", 10),
        ],
        rows,
    )
    .with_child_selector(ChildSelector::new("pod=", 0))
    .with_actions(vec![
        KeyBinding::new(
            KeyCode::Enter,
            TableAction::SelectRow(ViewTarget::Kind(ResourceKind::Containers)),
            "Containers",
        ),
        KeyBinding::new(KeyCode::Char('d'), TableAction::Describe, "Describe"),
        KeyBinding::new(KeyCode::Char('x'), TableAction::Delete, "Delete"),
        KeyBinding::new(KeyCode::Char('s'), TableAction::Shell, "Shell"),
    ])
}

fn containers_dataset(namespace: &str, rows: Vec<ResourceRow>) -> ResourceDataset {
    ResourceDataset::new(
        ResourceKind::Containers,
        namespace,
        vec![
            ColumnSpec::dynamic("NAME"),
            ColumnSpec::dynamic("IMAGE"),
            ColumnSpec::fixed("READY", 5),
            ColumnSpec::fixed("STATE", 15),
            ColumnSpec::fixed("TYPE", 10),
            ColumnSpec::fixed("RESTARTS", 8).align(ColumnAlign::Right),
            ColumnSpec::fixed("AGE", 10),
        ],
        rows,
    )
    .with_actions(vec![
        KeyBinding::new(KeyCode::Enter, TableAction::SelectRow(ViewTarget::Logs), "Logs"),
        KeyBinding::new(KeyCode::Char('s'), TableAction::Shell, "Shell"),
    ])
}

fn deployment_row(deployment: &Deployment) -> ResourceRow {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let status = deployment.status.as_ref();
    let ready = status.and_then(|status| status.ready_replicas).unwrap_or(0);
    let current = status.and_then(|status| status.replicas).unwrap_or(0);
    let available = status
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);

    ResourceRow::new(
        vec![
            deployment.name_any(),
            format!("{ready}/{desired}"),
            current.to_string(),
            available.to_string(),
            deployment.namespace().unwrap_or_else(|| "-".to_string()),
            human_age(deployment.metadata.creation_timestamp.as_ref()),
        ],
        deployment_style(ready, desired),
    )
}

fn pod_row(pod: &Pod) -> ResourceRow {
    let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());
    let ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.clone())
        .unwrap_or_else(|| "-".to_string());

    ResourceRow::new(
        vec![
            pod.name_any(),
            phase.unwrap_or("Unknown").to_string(),
            ip,
            pod.namespace().unwrap_or_else(|| "-".to_string()),
            human_age(pod.metadata.creation_timestamp.as_ref()),
        ],
        pod_style(phase, pod.metadata.deletion_timestamp.is_some()),
    )
}

fn container_rows(pod: &Pod) -> Vec<ResourceRow> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let groups = [
        ("standard", status.container_statuses.as_deref()),
        ("init", status.init_container_statuses.as_deref()),
        ("ephemeral", status.ephemeral_container_statuses.as_deref()),
    ];

    groups
        .into_iter()
        .flat_map(|(kind, statuses)| {
            statuses
                .unwrap_or_default()
                .iter()
                .map(move |container| container_row(container, kind))
        })
        .collect()
}

fn container_row(container: &ContainerStatus, container_type: &str) -> ResourceRow {
    let started = container
        .state
        .as_ref()
        .and_then(|state| state.running.as_ref())
        .and_then(|running| running.started_at.as_ref());

    ResourceRow::new(
        vec![
            container.name.clone(),
            container.image.clone(),
            if container.ready { "TRUE" } else { "FALSE" }.to_string(),
            container_state(container),
            container_type.to_string(),
            container.restart_count.to_string(),
            human_age(started),
        ],
        container_style(container),
    )
}

fn container_state(container: &ContainerStatus) -> String {
    let Some(state) = container.state.as_ref() else {
        return "Unknown".to_string();
    };
    if let Some(waiting) = state.waiting.as_ref() {
        return waiting
            .reason
            .clone()
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| "Waiting".to_string());
    }
    if let Some(terminated) = state.terminated.as_ref() {
        return terminated
            .reason
            .clone()
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| "Terminating".to_string());
    }
    if state.running.is_some() {
        return "Running".to_string();
    }
    "Unknown".to_string()
}

pub fn pod_style(phase: Option<&str>, deleting: bool) -> RowStyle {
    if deleting {
        return RowStyle::Terminating;
    }
    match phase {
        Some("Pending") => RowStyle::Loading,
        Some("Failed") => RowStyle::Error,
        Some("Unknown") | None => RowStyle::Warning,
        _ => RowStyle::Info,
    }
}

pub fn deployment_style(ready: i32, desired: i32) -> RowStyle {
    if ready < desired {
        RowStyle::Warning
    } else {
        RowStyle::Info
    }
}

pub fn container_style(container: &ContainerStatus) -> RowStyle {
    let Some(state) = container.state.as_ref() else {
        return RowStyle::Warning;
    };
    if let Some(waiting) = state.waiting.as_ref() {
        let reason = waiting.reason.as_deref().unwrap_or_default();
        if reason.contains("BackOff") || reason.contains("Err") || reason.contains("Error") {
            return RowStyle::Error;
        }
        return RowStyle::Loading;
    }
    if state.terminated.is_some() {
        return RowStyle::Terminating;
    }
    RowStyle::Info
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    let params = ListParams::default().limit(500);
    match label_selector {
        Some(selector) => params.labels(selector),
        None => params,
    }
}

fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };
    let elapsed =
        (k8s_openapi::jiff::Timestamp::now().as_second() - timestamp.0.as_second()).max(0);
    format_age(elapsed)
}

/// Largest non-zero unit plus the next one down: `1d:02h`, `2h:30m`,
/// `5m:10s`, `30s`.
pub fn format_age(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let seconds = seconds % 60;

    if days > 0 {
        format!("{days}d:{hours:02}h")
    } else if hours > 0 {
        format!("{hours}h:{minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m:{seconds:02}s")
    } else {
        format!("{seconds:02}s")
    }
}

fn yaml_detail<T>(value: &T) -> String
where
    T: Serialize,
{
    serde_yaml::to_string(value).unwrap_or_else(|error| format!("failed to format detail: {error}"))
}
