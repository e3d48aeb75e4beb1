use chrono::{DateTime, Local};
use crossterm::event::KeyCode;
use tokio::time::Duration;
use tracing::debug;

use crate::cluster::{ClusterApi, ClusterStatusCache};
use crate::engine::{PollingDiffEngine, TickOutcome};
use crate::model::{
    ColumnAlign, KeyBinding, ResourceDataset, ResourceKind, ResourceRow, TableAction, ViewTarget,
};

/// Blank cells the table widget puts between adjacent columns.
pub const COLUMN_SPACING: u16 = 1;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RenderedColumn {
    pub name: String,
    pub width: u16,
    pub align: ColumnAlign,
}

/// Everything the table widget draws, re-derived from the cache on rebuild.
#[derive(Debug, Clone, Default)]
pub struct TableFrame {
    pub kind: Option<ResourceKind>,
    pub namespace: String,
    pub columns: Vec<RenderedColumn>,
    pub rows: Vec<ResourceRow>,
    pub bindings: Vec<KeyBinding>,
}

impl TableFrame {
    fn build(kind: ResourceKind, dataset: Option<&ResourceDataset>, available_width: usize) -> Self {
        let Some(dataset) = dataset else {
            return Self {
                kind: Some(kind),
                bindings: base_bindings(),
                ..Self::default()
            };
        };

        let gaps = dataset.columns().len().saturating_sub(1) * usize::from(COLUMN_SPACING);
        let columns = dataset
            .columns()
            .iter()
            .zip(column_widths(dataset, available_width.saturating_sub(gaps)))
            .map(|(column, width)| RenderedColumn {
                name: column.name.clone(),
                width: u16::try_from(width).unwrap_or(u16::MAX),
                align: column.align,
            })
            .collect();

        Self {
            kind: Some(kind),
            namespace: dataset.namespace().to_string(),
            columns,
            rows: dataset.rows().to_vec(),
            bindings: merge_bindings(base_bindings(), dataset.actions()),
        }
    }
}

/// Bindings available on every resource table.
pub fn base_bindings() -> Vec<KeyBinding> {
    vec![KeyBinding::new(KeyCode::Esc, TableAction::Back, "Previous")]
}

fn merge_bindings(base: Vec<KeyBinding>, overlay: &[KeyBinding]) -> Vec<KeyBinding> {
    let mut merged = base;
    for binding in overlay {
        if let Some(existing) = merged.iter_mut().find(|entry| entry.key == binding.key) {
            *existing = binding.clone();
        } else {
            merged.push(binding.clone());
        }
    }
    merged
}

/// Rendered width of each column. Dynamic columns share whatever the minimum
/// layout leaves over, less one cell of margin; nothing renders narrower than
/// its minimum.
pub fn column_widths(dataset: &ResourceDataset, available_width: usize) -> Vec<usize> {
    let min_total = dataset.min_widths().iter().sum::<usize>();
    let dynamic = dataset.dynamic_columns();
    let padding = if available_width > min_total && !dynamic.is_empty() {
        (available_width - min_total).saturating_sub(1) / dynamic.len()
    } else {
        0
    };

    dataset
        .min_widths()
        .iter()
        .enumerate()
        .map(|(index, width)| {
            if dynamic.contains(&index) {
                width + padding
            } else {
                *width
            }
        })
        .collect()
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DrillOutcome {
    Ignored,
    Pushed(ResourceKind),
    ShowLogs { pod: String, container: String },
}

/// Breadcrumb-driven table over the cluster cache.
pub struct NavigableTableView<A> {
    cache: ClusterStatusCache<A>,
    engine: PollingDiffEngine,
    breadcrumbs: Vec<ResourceKind>,
    cursor: usize,
    available_width: usize,
    frame: TableFrame,
}

impl<A: ClusterApi> NavigableTableView<A> {
    pub fn new(cache: ClusterStatusCache<A>, root: ResourceKind, period: Duration) -> Self {
        Self {
            cache,
            engine: PollingDiffEngine::new("table", period),
            breadcrumbs: vec![root],
            cursor: 0,
            available_width: 0,
            frame: TableFrame {
                kind: Some(root),
                bindings: base_bindings(),
                ..TableFrame::default()
            },
        }
    }

    pub fn engine(&self) -> &PollingDiffEngine {
        &self.engine
    }

    pub fn cache(&self) -> &ClusterStatusCache<A> {
        &self.cache
    }

    pub fn frame(&self) -> &TableFrame {
        &self.frame
    }

    pub fn breadcrumbs(&self) -> &[ResourceKind] {
        &self.breadcrumbs
    }

    pub fn active_kind(&self) -> ResourceKind {
        self.breadcrumbs[self.breadcrumbs.len() - 1]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Local>> {
        self.cache.last_refreshed()
    }

    pub fn selected_row(&self) -> Option<&ResourceRow> {
        self.frame.rows.get(self.cursor)
    }

    pub fn bindings(&self) -> &[KeyBinding] {
        &self.frame.bindings
    }

    pub fn binding_for(&self, key: KeyCode) -> Option<TableAction> {
        self.frame
            .bindings
            .iter()
            .find(|binding| binding.key == key)
            .map(|binding| binding.action)
    }

    pub fn request_rebuild(&mut self) {
        self.engine.request_rebuild();
    }

    pub async fn poll(&mut self) -> TickOutcome {
        let kind = self.active_kind();
        let width = self.available_width;
        let frame = &mut self.frame;
        let cursor = &mut self.cursor;
        self.engine
            .tick(&mut self.cache, |cache| {
                *frame = TableFrame::build(kind, cache.dataset(kind), width);
                *cursor = (*cursor).min(frame.rows.len().saturating_sub(1));
            })
            .await
    }

    /// Re-lays out the columns for a new width without fetching.
    pub fn on_resize(&mut self, width: usize) {
        if width == self.available_width {
            return;
        }
        self.available_width = width;
        let kind = self.active_kind();
        self.frame = TableFrame::build(kind, self.cache.dataset(kind), width);
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let len = self.frame.rows.len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        self.cursor = self
            .cursor
            .saturating_add_signed(delta)
            .min(len.saturating_sub(1));
    }

    pub fn select_first(&mut self) {
        self.cursor = 0;
    }

    pub fn select_last(&mut self) {
        self.cursor = self.frame.rows.len().saturating_sub(1);
    }

    pub fn drill_into(&mut self, target: ViewTarget) -> DrillOutcome {
        let Some(row) = self.selected_row().cloned() else {
            return DrillOutcome::Ignored;
        };

        let kind = match target {
            ViewTarget::Logs => {
                return match self.log_target(&row) {
                    Some((pod, container)) => DrillOutcome::ShowLogs { pod, container },
                    None => DrillOutcome::Ignored,
                };
            }
            ViewTarget::Kind(kind) if self.cache.is_registered(kind) => kind,
            ViewTarget::Kind(kind) => {
                debug!("{kind} is not a fetchable kind");
                return DrillOutcome::Ignored;
            }
        };

        let current = self.active_kind();
        let selector = self
            .cache
            .dataset(current)
            .and_then(|dataset| dataset.child_selector())
            .and_then(|selector| selector.selector_for(&row));

        self.breadcrumbs.push(kind);
        if let Some(selector) = selector {
            debug!("drill {current} -> {kind} with selector {selector}");
            self.cache.set_label_selector(kind, selector);
        }
        self.enter_active_kind(false);
        DrillOutcome::Pushed(kind)
    }

    pub fn go_back(&mut self) -> bool {
        if self.breadcrumbs.len() <= 1 {
            return false;
        }
        if let Some(kind) = self.breadcrumbs.pop() {
            self.cache.clear_label_selector(kind);
        }
        self.enter_active_kind(true);
        true
    }

    /// A kind we drilled into was last fetched under another selector, so it
    /// starts empty; a kind we returned to still has a valid dataset.
    fn enter_active_kind(&mut self, reuse_cached: bool) {
        self.cursor = 0;
        let kind = self.active_kind();
        let dataset = if reuse_cached {
            self.cache.dataset(kind)
        } else {
            None
        };
        self.frame = TableFrame::build(kind, dataset, self.available_width);
        self.engine.request_rebuild();
    }

    /// Pod is the value the active view was scoped by (`pod=<name>`), the
    /// container is the selected row.
    fn log_target(&self, row: &ResourceRow) -> Option<(String, String)> {
        let pod = self.scoped_parent(self.active_kind())?;
        let container = row.name()?.to_string();
        Some((pod, container))
    }

    /// Value of the label selector that scopes `kind`, without its key.
    pub fn scoped_parent(&self, kind: ResourceKind) -> Option<String> {
        self.cache
            .label_selector(kind)
            .and_then(|selector| selector.split_once('='))
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{COLUMN_SPACING, DrillOutcome, NavigableTableView, column_widths};
    use crate::cluster::ClusterStatusCache;
    use crate::engine::TickOutcome;
    use crate::model::{
        ColumnSpec, ResourceDataset, ResourceKind, RowStyle, TableAction, ViewTarget,
    };
    use crate::testing::{FakeCluster, dataset_with_rows};
    use crossterm::event::KeyCode;
    use tokio::time::Duration;

    fn view(api: &FakeCluster) -> NavigableTableView<FakeCluster> {
        let cache = ClusterStatusCache::new(api.clone(), "dev", &ResourceKind::ALL);
        NavigableTableView::new(cache, ResourceKind::Deployments, Duration::from_secs(2))
    }

    #[test]
    fn dynamic_column_takes_surplus_minus_margin() {
        let dataset = ResourceDataset::new(
            ResourceKind::Pods,
            "dev",
            vec![ColumnSpec::dynamic("NAME"), ColumnSpec::fixed("IP", 10)],
            Vec::new(),
        );

        assert_eq!(column_widths(&dataset, 20), vec![9, 10]);
        assert_eq!(column_widths(&dataset, 14), vec![4, 10]);
        assert_eq!(column_widths(&dataset, 5), vec![4, 10]);
    }

    #[test]
    fn surplus_is_split_evenly_between_dynamic_columns() {
        let dataset = ResourceDataset::new(
            ResourceKind::Containers,
            "dev",
            vec![
                ColumnSpec::dynamic("NAME"),
                ColumnSpec::dynamic("IMAGE"),
                ColumnSpec::fixed("AGE", 10),
            ],
            Vec::new(),
        );

        assert_eq!(column_widths(&dataset, 30), vec![9, 10, 10]);
        assert_eq!(column_widths(&dataset, 20), vec![4, 5, 10]);
    }

    #[tokio::test]
    async fn drilling_from_deployment_scopes_pods_by_app_label() {
        let api = FakeCluster::default();
        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("my-app", RowStyle::Info)],
        ));
        let mut table = view(&api);
        table.poll().await;

        let outcome = table.drill_into(ViewTarget::Kind(ResourceKind::Pods));

        assert_eq!(outcome, DrillOutcome::Pushed(ResourceKind::Pods));
        assert_eq!(
            table.cache().label_selector(ResourceKind::Pods),
            Some("app=my-app")
        );
        assert_eq!(
            table.breadcrumbs(),
            &[ResourceKind::Deployments, ResourceKind::Pods]
        );
        assert_eq!(table.poll().await, TickOutcome::Rebuilt);
        assert_eq!(table.frame().kind, Some(ResourceKind::Pods));
    }

    #[tokio::test]
    async fn drilling_without_selection_is_ignored() {
        let api = FakeCluster::default();
        let mut table = view(&api);
        table.poll().await;

        let outcome = table.drill_into(ViewTarget::Kind(ResourceKind::Pods));

        assert_eq!(outcome, DrillOutcome::Ignored);
        assert_eq!(table.breadcrumbs(), &[ResourceKind::Deployments]);
    }

    #[tokio::test]
    async fn go_back_on_root_changes_nothing() {
        let api = FakeCluster::default();
        let mut table = view(&api);
        table
            .cache
            .set_label_selector(ResourceKind::Deployments, "team=core");
        table.poll().await;

        assert!(!table.go_back());
        assert_eq!(table.breadcrumbs(), &[ResourceKind::Deployments]);
        assert_eq!(
            table.cache().label_selector(ResourceKind::Deployments),
            Some("team=core")
        );
        assert_eq!(table.poll().await, TickOutcome::Unchanged);
    }

    #[tokio::test]
    async fn go_back_shows_the_cached_parent_at_once() {
        let api = FakeCluster::default();
        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("my-app", RowStyle::Info)],
        ));
        let mut table = view(&api);
        table.poll().await;
        table.drill_into(ViewTarget::Kind(ResourceKind::Pods));
        assert!(table.frame().rows.is_empty());
        assert!(table.engine().rebuild_pending());
        table.poll().await;
        let fetches = api.calls().len();

        table.go_back();

        assert_eq!(api.calls().len(), fetches);
        assert_eq!(table.frame().kind, Some(ResourceKind::Deployments));
        assert_eq!(table.selected_row().and_then(|row| row.name()), Some("my-app"));
        assert!(table.engine().rebuild_pending());
    }

    #[tokio::test]
    async fn frame_leaves_room_for_column_spacing() {
        let api = FakeCluster::default();
        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("my-app", RowStyle::Info)],
        ));
        let mut table = view(&api);
        table.on_resize(40);
        table.poll().await;

        let widths = table
            .frame()
            .columns
            .iter()
            .map(|column| usize::from(column.width))
            .collect::<Vec<_>>();
        let gaps = (widths.len() - 1) * usize::from(COLUMN_SPACING);

        assert_eq!(table.frame().namespace, "dev");
        assert_eq!(widths, vec![28, 10]);
        assert!(widths.iter().sum::<usize>() + gaps <= 40);
    }

    #[tokio::test]
    async fn go_back_clears_the_popped_kind_selector() {
        let api = FakeCluster::default();
        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("my-app", RowStyle::Info)],
        ));
        let mut table = view(&api);
        table.poll().await;
        table.drill_into(ViewTarget::Kind(ResourceKind::Pods));
        table.poll().await;

        assert!(table.go_back());

        assert_eq!(table.cache().label_selector(ResourceKind::Pods), None);
        assert_eq!(table.breadcrumbs(), &[ResourceKind::Deployments]);
        assert_eq!(table.cursor(), 0);
        assert_eq!(table.poll().await, TickOutcome::Rebuilt);
    }

    #[tokio::test]
    async fn bindings_follow_the_active_kind_only() {
        let api = FakeCluster::default();
        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("my-app", RowStyle::Info)],
        ));
        api.set_dataset(dataset_with_rows(ResourceKind::Pods, &[("my-app-1", RowStyle::Info)]));
        let mut table = view(&api);
        table.poll().await;
        assert_eq!(table.binding_for(KeyCode::Char('x')), Some(TableAction::Delete));

        table.drill_into(ViewTarget::Kind(ResourceKind::Pods));
        table.poll().await;

        assert_eq!(table.binding_for(KeyCode::Char('x')), None);
        assert_eq!(table.binding_for(KeyCode::Esc), Some(TableAction::Back));
        assert_eq!(
            table.binding_for(KeyCode::Enter),
            Some(TableAction::SelectRow(ViewTarget::Kind(
                ResourceKind::Containers
            )))
        );
    }

    #[tokio::test]
    async fn logs_target_is_a_side_effect_not_a_push() {
        let api = FakeCluster::default();
        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("my-app", RowStyle::Info)],
        ));
        api.set_dataset(dataset_with_rows(ResourceKind::Pods, &[("my-app-1", RowStyle::Info)]));
        api.set_dataset(dataset_with_rows(ResourceKind::Containers, &[("web", RowStyle::Info)]));
        let mut table = view(&api);
        table.poll().await;
        table.drill_into(ViewTarget::Kind(ResourceKind::Pods));
        table.poll().await;
        table.drill_into(ViewTarget::Kind(ResourceKind::Containers));
        table.poll().await;

        let outcome = table.drill_into(ViewTarget::Logs);

        assert_eq!(
            outcome,
            DrillOutcome::ShowLogs {
                pod: "my-app-1".to_string(),
                container: "web".to_string(),
            }
        );
        assert_eq!(table.breadcrumbs().len(), 3);
    }

    #[tokio::test]
    async fn cursor_survives_rebuilds_but_stays_in_range() {
        let api = FakeCluster::default();
        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("a", RowStyle::Info), ("b", RowStyle::Info), ("c", RowStyle::Info)],
        ));
        let mut table = view(&api);
        table.poll().await;
        table.move_cursor(2);

        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("a", RowStyle::Info), ("b", RowStyle::Error), ("c", RowStyle::Info)],
        ));
        table.poll().await;
        assert_eq!(table.cursor(), 2);

        api.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("a", RowStyle::Info)],
        ));
        table.poll().await;
        assert_eq!(table.cursor(), 0);
    }

    #[test]
    fn resize_relays_out_columns_without_fetching() {
        let api = FakeCluster::default();
        let mut table = view(&api);
        table.on_resize(80);
        assert!(api.calls().is_empty());
        assert!(table.selected_row().is_none());
    }
}
