use tokio::time::Duration;

use crate::engine::{PollingDiffEngine, TickOutcome};
use crate::model::{ServiceStatusEntry, UpdateStatus};
use crate::tilt::{ProcessControl, ServiceStatusCache, StatusClient};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusIcon {
    Ok,
    Pending,
    InProgress,
    Error,
    Offline,
    None,
    Other,
}

impl StatusIcon {
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Ok => "●",
            Self::Pending => "◌",
            Self::InProgress => "◐",
            Self::Error => "✖",
            Self::Offline => "○",
            Self::None => "·",
            Self::Other => "?",
        }
    }
}

impl From<&UpdateStatus> for StatusIcon {
    fn from(status: &UpdateStatus) -> Self {
        match status {
            UpdateStatus::Ok => Self::Ok,
            UpdateStatus::Pending => Self::Pending,
            UpdateStatus::InProgress => Self::InProgress,
            UpdateStatus::Error => Self::Error,
            UpdateStatus::Offline => Self::Offline,
            UpdateStatus::None => Self::None,
            UpdateStatus::Other(_) => Self::Other,
        }
    }
}

/// Rollup for a service node: offline beats error beats pending beats ok.
pub fn aggregate_status(entry: &ServiceStatusEntry) -> StatusIcon {
    if !entry.online {
        return StatusIcon::Offline;
    }
    let statuses = entry
        .sub_resources
        .iter()
        .map(|resource| &resource.update_status);
    let mut pending = false;
    for status in statuses {
        match status {
            UpdateStatus::Error => return StatusIcon::Error,
            UpdateStatus::Pending | UpdateStatus::InProgress => pending = true,
            _ => {}
        }
    }
    if pending {
        StatusIcon::Pending
    } else {
        StatusIcon::Ok
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LeafNode {
    pub name: String,
    pub icon: StatusIcon,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceNode {
    pub key: String,
    pub label: String,
    pub icon: StatusIcon,
    pub port: u16,
    pub online: bool,
    pub children: Vec<LeafNode>,
}

impl ServiceNode {
    fn from_entry(entry: &ServiceStatusEntry) -> Self {
        Self {
            key: entry.key.clone(),
            label: entry.display_name.clone(),
            icon: aggregate_status(entry),
            port: entry.port,
            online: entry.online,
            children: entry
                .sub_resources
                .iter()
                .map(|resource| LeafNode {
                    name: resource.name.clone(),
                    icon: StatusIcon::from(&resource.update_status),
                })
                .collect(),
        }
    }

    /// The live view is only reachable while Tilt answers on the port.
    pub fn can_open_browser(&self) -> bool {
        self.online && self.port != 0
    }
}

/// Flattened line of the rendered tree.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TreeLine<'a> {
    Service(&'a ServiceNode),
    Leaf(&'a LeafNode),
}

/// Two-level service tree over the Tilt status cache. The cursor only lands
/// on service nodes.
pub struct StatusTreeView<C, P> {
    cache: ServiceStatusCache<C, P>,
    engine: PollingDiffEngine,
    nodes: Vec<ServiceNode>,
    cursor: usize,
}

impl<C: StatusClient, P: ProcessControl> StatusTreeView<C, P> {
    pub fn new(cache: ServiceStatusCache<C, P>, period: Duration) -> Self {
        let nodes = cache.entries().iter().map(ServiceNode::from_entry).collect();
        Self {
            cache,
            engine: PollingDiffEngine::new("tree", period),
            nodes,
            cursor: 0,
        }
    }

    pub fn engine(&self) -> &PollingDiffEngine {
        &self.engine
    }

    pub fn nodes(&self) -> &[ServiceNode] {
        &self.nodes
    }

    pub fn lines(&self) -> Vec<TreeLine<'_>> {
        self.nodes
            .iter()
            .flat_map(|node| {
                std::iter::once(TreeLine::Service(node))
                    .chain(node.children.iter().map(TreeLine::Leaf))
            })
            .collect()
    }

    /// Index into [`Self::lines`] of the selected service.
    pub fn selected_line(&self) -> usize {
        self.nodes
            .iter()
            .take(self.cursor)
            .map(|node| 1 + node.children.len())
            .sum()
    }

    pub fn selected(&self) -> Option<&ServiceNode> {
        self.nodes.get(self.cursor)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        self.cursor = self
            .cursor
            .saturating_add_signed(delta)
            .min(self.nodes.len().saturating_sub(1));
    }

    pub fn select_first(&mut self) {
        self.cursor = 0;
    }

    pub fn select_last(&mut self) {
        self.cursor = self.nodes.len().saturating_sub(1);
    }

    pub fn request_rebuild(&mut self) {
        self.engine.request_rebuild();
    }

    pub async fn poll(&mut self) -> TickOutcome {
        let nodes = &mut self.nodes;
        let cursor = &mut self.cursor;
        self.engine
            .tick(&mut self.cache, |cache| {
                *nodes = cache.entries().iter().map(ServiceNode::from_entry).collect();
                *cursor = (*cursor).min(nodes.len().saturating_sub(1));
            })
            .await
    }

    pub fn start(&mut self, key: &str) {
        self.cache.start(key);
        self.engine.request_rebuild();
    }

    pub fn stop(&mut self, key: &str) {
        self.cache.stop(key);
        self.engine.request_rebuild();
    }

    pub async fn tear_down(&mut self, key: &str) {
        self.cache.tear_down(key).await;
        self.engine.request_rebuild();
    }

    pub fn start_all(&mut self) {
        self.cache.start_all();
        self.engine.request_rebuild();
    }

    pub fn shutdown(&mut self) {
        self.cache.shutdown();
    }
}
