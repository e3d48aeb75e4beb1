//! In-memory collaborators for unit tests.

use anyhow::{Result, bail};
use crossterm::event::KeyCode;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use crate::cluster::ClusterApi;
use crate::model::{
    ChildSelector, ColumnSpec, KeyBinding, ResourceDataset, ResourceKind, ResourceRow, RowStyle,
    ServiceStatusEntry, TableAction, ViewTarget,
};
use crate::tilt::{ProcessControl, StatusClient, TiltView, UiResource, view_from_body};

pub type FetchCall = (ResourceKind, String, Option<String>);

#[derive(Default)]
struct ClusterState {
    datasets: HashMap<ResourceKind, ResourceDataset>,
    failing: HashSet<ResourceKind>,
    calls: Vec<FetchCall>,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Rc<RefCell<ClusterState>>,
}

impl FakeCluster {
    pub fn set_dataset(&self, dataset: ResourceDataset) {
        let mut state = self.state.borrow_mut();
        state.failing.remove(&dataset.kind());
        state.datasets.insert(dataset.kind(), dataset);
    }

    pub fn fail(&self, kind: ResourceKind) {
        self.state.borrow_mut().failing.insert(kind);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.state.borrow().calls.clone()
    }
}

impl ClusterApi for FakeCluster {
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<ResourceDataset> {
        let mut state = self.state.borrow_mut();
        state.calls.push((
            kind,
            namespace.to_string(),
            label_selector.map(str::to_string),
        ));
        if state.failing.contains(&kind) {
            bail!("{kind} unavailable");
        }
        Ok(state
            .datasets
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| sample_dataset(kind, &[])))
    }
}

/// A dataset shaped like the real one for `kind`, with one row per
/// `(name, style)` pair.
pub fn dataset_with_rows(kind: ResourceKind, rows: &[(&str, RowStyle)]) -> ResourceDataset {
    sample_dataset(kind, rows)
}

fn sample_dataset(kind: ResourceKind, rows: &[(&str, RowStyle)]) -> ResourceDataset {
    let rows = rows
        .iter()
        .map(|(name, style)| ResourceRow::new(vec![name.to_string(), "x".to_string()], *style))
        .collect();
    let columns = vec![ColumnSpec::dynamic("NAME"), ColumnSpec::fixed("STATUS", 10)];
    let dataset = ResourceDataset::new(kind, "dev", columns, rows);
    match kind {
        ResourceKind::Deployments => dataset
            .with_child_selector(ChildSelector::new("app=", 0))
            .with_actions(vec![
                KeyBinding::new(
                    KeyCode::Enter,
                    TableAction::SelectRow(ViewTarget::Kind(ResourceKind::Pods)),
                    "Pods",
                ),
                KeyBinding::new(KeyCode::Char('x'), TableAction::Delete, "Delete"),
            ]),
        ResourceKind::Pods => dataset
            .with_child_selector(ChildSelector::new("pod=", 0))
            .with_actions(vec![
                KeyBinding::new(
                    KeyCode::Enter,
                    TableAction::SelectRow(ViewTarget::Kind(ResourceKind::Containers)),
                    "Containers",
                ),
                KeyBinding::new(KeyCode::Char('d'), TableAction::Describe, "Describe"),
                KeyBinding::new(KeyCode::Char('s'), TableAction::Shell, "Shell"),
            ]),
        ResourceKind::Containers => dataset.with_actions(vec![
            KeyBinding::new(KeyCode::Enter, TableAction::SelectRow(ViewTarget::Logs), "Logs"),
            KeyBinding::new(KeyCode::Char('s'), TableAction::Shell, "Shell"),
        ]),
    }
}

#[derive(Default)]
struct StatusState {
    views: HashMap<u16, TiltView>,
    bodies: HashMap<u16, String>,
    polled: Vec<u16>,
}

#[derive(Clone, Default)]
pub struct FakeStatus {
    state: Rc<RefCell<StatusState>>,
}

impl FakeStatus {
    pub fn set(&self, port: u16, view: TiltView) {
        let mut state = self.state.borrow_mut();
        state.bodies.remove(&port);
        state.views.insert(port, view);
    }

    /// Serve a raw `/api/view` body, parsed the way the HTTP client does.
    pub fn set_body(&self, port: u16, body: &str) {
        let mut state = self.state.borrow_mut();
        state.views.remove(&port);
        state.bodies.insert(port, body.to_string());
    }

    pub fn clear(&self, port: u16) {
        let mut state = self.state.borrow_mut();
        state.views.remove(&port);
        state.bodies.remove(&port);
    }

    pub fn polled_ports(&self) -> Vec<u16> {
        self.state.borrow().polled.clone()
    }
}

impl StatusClient for FakeStatus {
    async fn fetch_status(&self, port: u16) -> Option<TiltView> {
        let mut state = self.state.borrow_mut();
        state.polled.push(port);
        if let Some(body) = state.bodies.get(&port) {
            return view_from_body(port, body);
        }
        state.views.get(&port).cloned()
    }
}

pub fn tilt_view(resources: &[(&str, &str)]) -> TiltView {
    let ui_resources = resources
        .iter()
        .map(|(name, status)| {
            let mut resource = UiResource::default();
            resource.metadata.name = name.to_string();
            resource.status.update_status = Some(status.to_string());
            resource
        })
        .collect();
    TiltView { ui_resources }
}

#[derive(Default)]
struct ProcessState {
    next_pid: u32,
    bound: BTreeSet<u16>,
    bind_everything: bool,
    running: BTreeSet<u32>,
    spawned: Vec<(String, u16)>,
    killed: Vec<u32>,
    torn_down: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeProcesses {
    state: Rc<RefCell<ProcessState>>,
}

impl FakeProcesses {
    pub fn bind(&self, port: u16) {
        self.state.borrow_mut().bound.insert(port);
    }

    pub fn bind_everything(&self) {
        self.state.borrow_mut().bind_everything = true;
    }

    pub fn exit_all(&self) {
        self.state.borrow_mut().running.clear();
    }

    pub fn spawned(&self) -> Vec<(String, u16)> {
        self.state.borrow().spawned.clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.state.borrow().killed.clone()
    }

    pub fn torn_down(&self) -> Vec<String> {
        self.state.borrow().torn_down.clone()
    }

    pub fn running(&self) -> Vec<u32> {
        self.state.borrow().running.iter().copied().collect()
    }
}

impl ProcessControl for FakeProcesses {
    fn port_available(&self, port: u16) -> bool {
        let state = self.state.borrow();
        !state.bind_everything && !state.bound.contains(&port)
    }

    fn spawn(&mut self, entry: &ServiceStatusEntry) -> Option<u32> {
        let mut state = self.state.borrow_mut();
        state.next_pid += 1;
        let pid = 4000 + state.next_pid;
        state.running.insert(pid);
        state.spawned.push((entry.key.clone(), entry.port));
        Some(pid)
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        self.state.borrow().running.contains(&pid)
    }

    fn kill(&mut self, pid: u32) {
        let mut state = self.state.borrow_mut();
        state.running.remove(&pid);
        state.killed.push(pid);
    }

    async fn tear_down(&mut self, entry: &ServiceStatusEntry) {
        self.state.borrow_mut().torn_down.push(entry.key.clone());
    }

    fn kill_all(&mut self) {
        let mut state = self.state.borrow_mut();
        let running = std::mem::take(&mut state.running);
        state.killed.extend(running);
    }
}
