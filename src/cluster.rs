use anyhow::Result;
use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::engine::PolledCache;
use crate::model::{ResourceDataset, ResourceKind};

const LIST_TIMEOUT: Duration = Duration::from_secs(4);

/// Listing side of the cluster API, the only part the cache depends on.
pub trait ClusterApi {
    fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> impl Future<Output = Result<ResourceDataset>>;
}

pub type ClusterSnapshot = BTreeMap<ResourceKind, ResourceDataset>;

/// Latest dataset per resource kind plus the label selectors that scope each
/// kind's fetch.
pub struct ClusterStatusCache<A> {
    api: A,
    namespace: String,
    kinds: Vec<ResourceKind>,
    datasets: ClusterSnapshot,
    selectors: HashMap<ResourceKind, String>,
    last_refreshed: Option<DateTime<Local>>,
}

impl<A: ClusterApi> ClusterStatusCache<A> {
    pub fn new(api: A, namespace: impl Into<String>, kinds: &[ResourceKind]) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            kinds: kinds.to_vec(),
            datasets: BTreeMap::new(),
            selectors: HashMap::new(),
            last_refreshed: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_registered(&self, kind: ResourceKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn dataset(&self, kind: ResourceKind) -> Option<&ResourceDataset> {
        self.datasets.get(&kind)
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Local>> {
        self.last_refreshed
    }

    pub fn set_label_selector(&mut self, kind: ResourceKind, selector: impl Into<String>) {
        self.selectors.insert(kind, selector.into());
    }

    pub fn clear_label_selector(&mut self, kind: ResourceKind) {
        self.selectors.remove(&kind);
    }

    pub fn label_selector(&self, kind: ResourceKind) -> Option<&str> {
        self.selectors.get(&kind).map(String::as_str)
    }

    async fn fetch(&self, kind: ResourceKind) -> Option<ResourceDataset> {
        let selector = self.label_selector(kind);
        match timeout(
            LIST_TIMEOUT,
            self.api.list_resources(kind, &self.namespace, selector),
        )
        .await
        {
            Ok(Ok(dataset)) => Some(dataset),
            Ok(Err(error)) => {
                warn!("{kind} refresh failed, keeping previous data: {error:#}");
                None
            }
            Err(_) => {
                warn!("{kind} refresh timed out, keeping previous data");
                None
            }
        }
    }
}

impl<A: ClusterApi> PolledCache for ClusterStatusCache<A> {
    type Snapshot = ClusterSnapshot;

    fn snapshot(&self) -> Self::Snapshot {
        self.datasets.clone()
    }

    async fn refresh(&mut self) {
        let mut next = self.datasets.clone();
        for kind in self.kinds.clone() {
            if let Some(dataset) = self.fetch(kind).await {
                debug!("{}: {} rows", dataset.kind(), dataset.rows().len());
                next.insert(kind, dataset);
            }
        }
        debug!("cluster cache refreshed ({} kinds)", next.len());
        self.datasets = next;
        self.last_refreshed = Some(Local::now());
    }
}
