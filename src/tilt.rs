use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::engine::PolledCache;
use crate::model::{ServiceStatusEntry, SubResource, UpdateStatus};

pub const BASE_PORT: u16 = 10350;
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

/// Body of Tilt's `/api/view` endpoint, reduced to what the tree shows.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiltView {
    #[serde(default)]
    pub ui_resources: Vec<UiResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UiResource {
    #[serde(default)]
    pub metadata: UiResourceMetadata,
    #[serde(default)]
    pub status: UiResourceStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UiResourceMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiResourceStatus {
    #[serde(default)]
    pub update_status: Option<String>,
}

impl TiltView {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).context("failed to parse Tilt view")
    }

    pub fn sub_resources(&self) -> Vec<SubResource> {
        self.ui_resources
            .iter()
            .map(|resource| SubResource {
                name: resource.metadata.name.clone(),
                update_status: UpdateStatus::parse(resource.status.update_status.as_deref()),
            })
            .collect()
    }
}

pub trait StatusClient {
    /// `None` covers every flavour of "not reachable right now".
    fn fetch_status(&self, port: u16) -> impl Future<Output = Option<TiltView>>;
}

pub trait ProcessControl {
    fn port_available(&self, port: u16) -> bool;
    fn spawn(&mut self, entry: &ServiceStatusEntry) -> Option<u32>;
    fn is_alive(&mut self, pid: u32) -> bool;
    fn kill(&mut self, pid: u32);
    fn tear_down(&mut self, entry: &ServiceStatusEntry) -> impl Future<Output = ()>;
    fn kill_all(&mut self);
}

#[derive(Clone)]
pub struct TiltHttpClient {
    client: reqwest::Client,
}

impl TiltHttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(STATUS_TIMEOUT)
            .build()
            .context("failed to build Tilt status HTTP client")?;
        Ok(Self { client })
    }
}

impl StatusClient for TiltHttpClient {
    async fn fetch_status(&self, port: u16) -> Option<TiltView> {
        let url = format!("http://localhost:{port}/api/view");
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!("tilt status unavailable on {port}: {error}");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("tilt status on {port} returned {}", response.status());
            return None;
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                debug!("tilt status body unreadable on {port}: {error}");
                return None;
            }
        };
        view_from_body(port, &body)
    }
}

/// A body that does not parse counts as an unreachable service.
pub fn view_from_body(port: u16, body: &str) -> Option<TiltView> {
    match TiltView::parse(body) {
        Ok(view) => Some(view),
        Err(error) => {
            warn!("malformed tilt status on {port}: {error:#}");
            None
        }
    }
}

// The child runs in the Tiltfile's directory, so relative keys would no
// longer resolve.
fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Spawns and tracks `tilt up` processes.
#[derive(Default)]
pub struct TiltProcesses {
    children: HashMap<u32, Child>,
}

impl ProcessControl for TiltProcesses {
    fn port_available(&self, port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }

    fn spawn(&mut self, entry: &ServiceStatusEntry) -> Option<u32> {
        let tiltfile = Path::new(&entry.key);
        if !tiltfile.exists() {
            warn!("not starting {}: {} does not exist", entry.display_name, entry.key);
            return None;
        }

        let mut cmd = TokioCommand::new("tilt");
        cmd.arg("up")
            .arg(format!("--port={}", entry.port))
            .arg(format!("--file={}", absolute(tiltfile).display()))
            .envs(&entry.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = tiltfile.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id()?;
                info!("started tilt for {} on port {} (pid {pid})", entry.key, entry.port);
                self.children.insert(pid, child);
                Some(pid)
            }
            Err(error) => {
                warn!("failed to spawn tilt for {}: {error}", entry.key);
                None
            }
        }
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        match self.children.get_mut(&pid) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn kill(&mut self, pid: u32) {
        if let Some(mut child) = self.children.remove(&pid)
            && let Err(error) = child.start_kill()
        {
            warn!("failed to kill tilt process {pid}: {error}");
        }
    }

    async fn tear_down(&mut self, entry: &ServiceStatusEntry) {
        let tiltfile = Path::new(&entry.key);
        let mut cmd = TokioCommand::new("tilt");
        cmd.arg("down")
            .arg(format!("--file={}", absolute(tiltfile).display()))
            .envs(&entry.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = tiltfile.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        match cmd.status().await {
            Ok(status) if status.success() => info!("tilt down finished for {}", entry.key),
            Ok(status) => warn!("tilt down for {} exited with {status}", entry.key),
            Err(error) => warn!("failed to run tilt down for {}: {error}", entry.key),
        }
    }

    fn kill_all(&mut self) {
        for (pid, mut child) in self.children.drain() {
            if let Err(error) = child.start_kill() {
                warn!("failed to kill tilt process {pid}: {error}");
            }
        }
    }
}

/// Status of every configured Tilt project, keyed by Tiltfile path.
pub struct ServiceStatusCache<C, P> {
    client: C,
    processes: P,
    entries: Vec<ServiceStatusEntry>,
}

impl<C: StatusClient, P: ProcessControl> ServiceStatusCache<C, P> {
    pub fn new(entries: Vec<ServiceStatusEntry>, client: C, processes: P) -> Self {
        Self {
            client,
            processes,
            entries,
        }
    }

    pub fn from_projects(projects: &[ProjectConfig], client: C, processes: P) -> Self {
        let entries = projects
            .iter()
            .map(|project| {
                ServiceStatusEntry::new(
                    project.tilt_file_path.clone(),
                    project.name.clone(),
                    project.environment_map(),
                )
            })
            .collect();
        Self::new(entries, client, processes)
    }

    pub fn entries(&self) -> &[ServiceStatusEntry] {
        &self.entries
    }

    pub fn entry(&self, key: &str) -> Option<&ServiceStatusEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut ServiceStatusEntry> {
        self.entries.iter_mut().find(|entry| entry.key == key)
    }

    /// Returns the entry's port, choosing the lowest free one from
    /// [`BASE_PORT`] upwards when none is assigned yet.
    pub fn assign_port(&mut self, key: &str) -> Option<u16> {
        let current = self.entry(key)?.port;
        if current != 0 {
            return Some(current);
        }

        let taken = self
            .entries
            .iter()
            .filter(|entry| entry.key != key && entry.port != 0)
            .map(|entry| entry.port)
            .collect::<Vec<_>>();
        let port = (BASE_PORT..=u16::MAX)
            .find(|port| !taken.contains(port) && self.processes.port_available(*port))?;

        if let Some(entry) = self.entry_mut(key) {
            entry.port = port;
        }
        Some(port)
    }

    pub fn start(&mut self, key: &str) {
        let Some(entry) = self.entry(key) else {
            return;
        };
        if entry.online {
            debug!("{key} already online");
            return;
        }
        let pid = entry.pid;
        if pid != 0 && self.processes.is_alive(pid) {
            debug!("{key} already starting (pid {pid})");
            return;
        }

        if self.assign_port(key).is_none() {
            warn!("no free port available for {key}");
            return;
        }

        let Some(entry) = self.entry(key).cloned() else {
            return;
        };
        let pid = self.processes.spawn(&entry).unwrap_or(0);
        if let Some(entry) = self.entry_mut(key) {
            entry.pid = pid;
        }
    }

    pub fn start_all(&mut self) {
        let keys = self
            .entries
            .iter()
            .map(|entry| entry.key.clone())
            .collect::<Vec<_>>();
        for key in keys {
            self.start(&key);
        }
    }

    pub fn stop(&mut self, key: &str) {
        let Some(entry) = self.entry_mut(key) else {
            return;
        };
        if entry.pid == 0 {
            return;
        }
        let pid = entry.pid;
        entry.pid = 0;
        entry.online = false;
        self.processes.kill(pid);
    }

    pub async fn tear_down(&mut self, key: &str) {
        self.stop(key);
        let Some(entry) = self.entry(key).cloned() else {
            return;
        };
        self.processes.tear_down(&entry).await;
    }

    /// Kills every spawned process; used on exit.
    pub fn shutdown(&mut self) {
        for entry in &mut self.entries {
            entry.pid = 0;
            entry.online = false;
        }
        self.processes.kill_all();
    }
}

impl<C: StatusClient, P: ProcessControl> PolledCache for ServiceStatusCache<C, P> {
    type Snapshot = Vec<ServiceStatusEntry>;

    fn snapshot(&self) -> Self::Snapshot {
        self.entries.clone()
    }

    async fn refresh(&mut self) {
        let mut next = self.entries.clone();
        for entry in next.iter_mut().filter(|entry| entry.port > 0) {
            match self.client.fetch_status(entry.port).await {
                Some(view) => {
                    entry.sub_resources = view.sub_resources();
                    entry.online = true;
                }
                None => {
                    entry.sub_resources.clear();
                    entry.online = false;
                }
            }
        }
        self.entries = next;
    }
}
