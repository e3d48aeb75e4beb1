use crossterm::event::KeyCode;

use crate::cluster::ClusterApi;
use crate::input::Action;
use crate::model::{ResourceKind, TableAction};
use crate::table::{DrillOutcome, NavigableTableView};
use crate::tilt::{ProcessControl, StatusClient};
use crate::tree::StatusTreeView;

const PAGE_SIZE: isize = 10;
const NO_LOGS: &str = "No logs available.";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Overlay,
    Confirm,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FocusPane {
    Tree,
    Table,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Overlay {
    Describe {
        title: String,
        text: String,
    },
    Logs {
        namespace: String,
        pod: String,
        container: String,
        text: String,
    },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AppCommand {
    None,
    RefreshAll,
    /// Fetch for the table right away after a breadcrumb change.
    RefreshTable,
    StartService {
        key: String,
    },
    StopService {
        key: String,
    },
    TearDownService {
        key: String,
    },
    OpenBrowser {
        port: u16,
    },
    DescribeResource {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },
    DeleteResource {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },
    LoadLogs {
        namespace: String,
        pod: String,
        container: String,
    },
    OpenShell {
        namespace: String,
        pod: String,
        container: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct PendingConfirmation {
    prompt: String,
    command: AppCommand,
}

/// Keys handled by the project tree.
pub const TREE_BINDINGS: [(char, &str); 4] = [
    ('s', "Start"),
    ('x', "Stop"),
    ('t', "Tear down"),
    ('o', "Open"),
];

pub struct App<A, C, P> {
    table: NavigableTableView<A>,
    tree: StatusTreeView<C, P>,
    context: String,
    focus: FocusPane,
    overlay: Option<Overlay>,
    overlay_scroll: u16,
    pending_confirmation: Option<PendingConfirmation>,
    show_help: bool,
    status: String,
    running: bool,
}

impl<A: ClusterApi, C: StatusClient, P: ProcessControl> App<A, C, P> {
    pub fn new(
        table: NavigableTableView<A>,
        tree: StatusTreeView<C, P>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            table,
            tree,
            context: context.into(),
            focus: FocusPane::Tree,
            overlay: None,
            overlay_scroll: 0,
            pending_confirmation: None,
            show_help: false,
            status: "Ready".to_string(),
            running: true,
        }
    }

    pub fn table(&self) -> &NavigableTableView<A> {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut NavigableTableView<A> {
        &mut self.table
    }

    pub fn tree(&self) -> &StatusTreeView<C, P> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut StatusTreeView<C, P> {
        &mut self.tree
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn namespace(&self) -> &str {
        self.table.cache().namespace()
    }

    pub fn focus(&self) -> FocusPane {
        self.focus
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn overlay_scroll(&self) -> u16 {
        self.overlay_scroll
    }

    pub fn confirmation_prompt(&self) -> Option<&str> {
        self.pending_confirmation
            .as_ref()
            .map(|pending| pending.prompt.as_str())
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn input_mode(&self) -> InputMode {
        if self.pending_confirmation.is_some() {
            InputMode::Confirm
        } else if self.overlay.is_some() || self.show_help {
            InputMode::Overlay
        } else {
            InputMode::Normal
        }
    }

    pub fn show_describe(&mut self, title: impl Into<String>, text: String) {
        self.overlay = Some(Overlay::Describe {
            title: title.into(),
            text,
        });
        self.overlay_scroll = 0;
    }

    pub fn show_logs(&mut self, namespace: String, pod: String, container: String, text: String) {
        let text = if text.is_empty() {
            NO_LOGS.to_string()
        } else {
            text
        };
        let same_target = matches!(
            &self.overlay,
            Some(Overlay::Logs { pod: open_pod, container: open_container, .. })
                if *open_pod == pod && *open_container == container
        );
        if !same_target {
            self.overlay_scroll = 0;
        }
        self.overlay = Some(Overlay::Logs {
            namespace,
            pod,
            container,
            text,
        });
    }

    /// The logs overlay to re-fetch on the next table tick, if one is open.
    pub fn logs_refresh_command(&self) -> Option<AppCommand> {
        match &self.overlay {
            Some(Overlay::Logs {
                namespace,
                pod,
                container,
                ..
            }) => Some(AppCommand::LoadLogs {
                namespace: namespace.clone(),
                pod: pod.clone(),
                container: container.clone(),
            }),
            _ => None,
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if let Some(pending) = self.pending_confirmation.take() {
            match action {
                Action::ConfirmYes => {
                    self.status = format!("Confirmed: {}", pending.prompt);
                    return pending.command;
                }
                Action::ConfirmNo => {
                    self.status = "Action cancelled".to_string();
                    return AppCommand::None;
                }
                Action::Quit => {
                    self.running = false;
                    return AppCommand::None;
                }
                _ => {
                    self.pending_confirmation = Some(pending);
                    self.status =
                        "Pending confirmation: press y to confirm or n to cancel".to_string();
                    return AppCommand::None;
                }
            }
        }

        if self.show_help && !matches!(action, Action::ToggleHelp | Action::Quit) {
            self.show_help = false;
            return AppCommand::None;
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::ToggleFocus => {
                self.focus = match self.focus {
                    FocusPane::Tree => FocusPane::Table,
                    FocusPane::Table => FocusPane::Tree,
                };
                AppCommand::None
            }
            Action::Refresh => {
                self.tree.request_rebuild();
                self.table.request_rebuild();
                self.status = "Refreshing".to_string();
                AppCommand::RefreshAll
            }
            Action::CloseOverlay => {
                self.overlay = None;
                self.overlay_scroll = 0;
                AppCommand::None
            }
            Action::Down => self.move_selection(1),
            Action::Up => self.move_selection(-1),
            Action::PageDown => self.move_selection(PAGE_SIZE),
            Action::PageUp => self.move_selection(-PAGE_SIZE),
            Action::Top => self.move_to_edge(true),
            Action::Bottom => self.move_to_edge(false),
            Action::ConfirmYes | Action::ConfirmNo => AppCommand::None,
            Action::Bound(key) => match self.focus {
                FocusPane::Tree => self.apply_tree_key(key),
                FocusPane::Table => match self.table.binding_for(key) {
                    Some(action) => self.apply_table_action(action),
                    None => AppCommand::None,
                },
            },
        }
    }

    fn move_selection(&mut self, delta: isize) -> AppCommand {
        if self.overlay.is_some() {
            self.overlay_scroll = if delta < 0 {
                self.overlay_scroll
                    .saturating_sub(u16::try_from(delta.unsigned_abs()).unwrap_or(u16::MAX))
            } else {
                self.overlay_scroll
                    .saturating_add(u16::try_from(delta).unwrap_or(u16::MAX))
            };
            return AppCommand::None;
        }
        match self.focus {
            FocusPane::Tree => self.tree.move_cursor(delta),
            FocusPane::Table => self.table.move_cursor(delta),
        }
        AppCommand::None
    }

    fn move_to_edge(&mut self, top: bool) -> AppCommand {
        if self.overlay.is_some() {
            self.overlay_scroll = if top { 0 } else { u16::MAX };
            return AppCommand::None;
        }
        match (self.focus, top) {
            (FocusPane::Tree, true) => self.tree.select_first(),
            (FocusPane::Tree, false) => self.tree.select_last(),
            (FocusPane::Table, true) => self.table.select_first(),
            (FocusPane::Table, false) => self.table.select_last(),
        }
        AppCommand::None
    }

    fn apply_tree_key(&mut self, key: KeyCode) -> AppCommand {
        let Some(node) = self.tree.selected() else {
            return AppCommand::None;
        };
        let key_name = node.key.clone();
        match key {
            KeyCode::Char('s') => {
                self.status = format!("Starting {}", node.label);
                AppCommand::StartService { key: key_name }
            }
            KeyCode::Char('x') => {
                self.status = format!("Stopping {}", node.label);
                AppCommand::StopService { key: key_name }
            }
            KeyCode::Char('t') => {
                self.pending_confirmation = Some(PendingConfirmation {
                    prompt: format!("Tear down {}?", node.label),
                    command: AppCommand::TearDownService { key: key_name },
                });
                self.status = "Confirm tear down with y, cancel with n".to_string();
                AppCommand::None
            }
            KeyCode::Char('o') if node.can_open_browser() => {
                AppCommand::OpenBrowser { port: node.port }
            }
            KeyCode::Char('o') => {
                self.status = format!("{} is offline", node.label);
                AppCommand::None
            }
            _ => AppCommand::None,
        }
    }

    fn apply_table_action(&mut self, action: TableAction) -> AppCommand {
        let kind = self.table.active_kind();
        let namespace = self.namespace().to_string();
        match action {
            TableAction::Back => {
                if self.table.go_back() {
                    AppCommand::RefreshTable
                } else {
                    AppCommand::None
                }
            }
            TableAction::SelectRow(target) => match self.table.drill_into(target) {
                DrillOutcome::Pushed(kind) => {
                    self.status = format!("Showing {kind}");
                    AppCommand::RefreshTable
                }
                DrillOutcome::ShowLogs { pod, container } => AppCommand::LoadLogs {
                    namespace,
                    pod,
                    container,
                },
                DrillOutcome::Ignored => AppCommand::None,
            },
            TableAction::Describe => match self.selected_name() {
                Some(name) => AppCommand::DescribeResource {
                    kind,
                    namespace,
                    name,
                },
                None => AppCommand::None,
            },
            TableAction::Delete => {
                let Some(name) = self.selected_name() else {
                    return AppCommand::None;
                };
                self.pending_confirmation = Some(PendingConfirmation {
                    prompt: format!("Delete {name} ({kind})?"),
                    command: AppCommand::DeleteResource {
                        kind,
                        namespace,
                        name,
                    },
                });
                self.status = "Confirm delete with y, cancel with n".to_string();
                AppCommand::None
            }
            TableAction::Shell => {
                let Some(name) = self.selected_name() else {
                    return AppCommand::None;
                };
                let (pod, container) = match kind {
                    ResourceKind::Containers => {
                        match self.table.scoped_parent(ResourceKind::Containers) {
                            Some(pod) => (pod, Some(name)),
                            None => return AppCommand::None,
                        }
                    }
                    _ => (name, None),
                };
                AppCommand::OpenShell {
                    namespace,
                    pod,
                    container,
                }
            }
        }
    }

    fn selected_name(&self) -> Option<String> {
        self.table
            .selected_row()
            .and_then(|row| row.name())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::{App, AppCommand, FocusPane, InputMode, Overlay};
    use crate::cluster::ClusterStatusCache;
    use crate::input::Action;
    use crate::model::{ResourceKind, RowStyle, ServiceStatusEntry};
    use crate::table::NavigableTableView;
    use crate::testing::{FakeCluster, FakeProcesses, FakeStatus, dataset_with_rows, tilt_view};
    use crate::tilt::{BASE_PORT, ServiceStatusCache};
    use crate::tree::StatusTreeView;
    use crossterm::event::KeyCode;
    use std::collections::BTreeMap;
    use tokio::time::Duration;

    type TestApp = App<FakeCluster, FakeStatus, FakeProcesses>;

    struct Harness {
        app: TestApp,
        cluster: FakeCluster,
        status: FakeStatus,
    }

    async fn harness() -> Harness {
        let cluster = FakeCluster::default();
        cluster.set_dataset(dataset_with_rows(
            ResourceKind::Deployments,
            &[("my-app", RowStyle::Info)],
        ));
        cluster.set_dataset(dataset_with_rows(ResourceKind::Pods, &[("my-app-1", RowStyle::Info)]));
        cluster.set_dataset(dataset_with_rows(ResourceKind::Containers, &[("web", RowStyle::Info)]));
        let status = FakeStatus::default();

        let cache = ClusterStatusCache::new(cluster.clone(), "dev", &ResourceKind::ALL);
        let table = NavigableTableView::new(cache, ResourceKind::Deployments, Duration::from_secs(2));
        let entries = vec![ServiceStatusEntry::new("svc/Tiltfile", "svc", BTreeMap::new())];
        let services = ServiceStatusCache::new(entries, status.clone(), FakeProcesses::default());
        let tree = StatusTreeView::new(services, Duration::from_secs(1));

        let mut app = App::new(table, tree, "kind-dev");
        app.table_mut().poll().await;
        app.tree_mut().poll().await;
        Harness {
            app,
            cluster,
            status,
        }
    }

    #[tokio::test]
    async fn delete_waits_for_confirmation() {
        let Harness { mut app, .. } = harness().await;
        app.apply_action(Action::ToggleFocus);

        let command = app.apply_action(Action::Bound(KeyCode::Char('x')));
        assert_eq!(command, AppCommand::None);
        assert_eq!(app.input_mode(), InputMode::Confirm);
        assert_eq!(app.confirmation_prompt(), Some("Delete my-app (Deployments)?"));

        assert_eq!(app.apply_action(Action::Down), AppCommand::None);
        let command = app.apply_action(Action::ConfirmYes);
        assert_eq!(
            command,
            AppCommand::DeleteResource {
                kind: ResourceKind::Deployments,
                namespace: "dev".to_string(),
                name: "my-app".to_string(),
            }
        );
        assert_eq!(app.input_mode(), InputMode::Normal);
    }

    #[tokio::test]
    async fn cancelled_delete_issues_nothing() {
        let Harness { mut app, .. } = harness().await;
        app.apply_action(Action::ToggleFocus);
        app.apply_action(Action::Bound(KeyCode::Char('x')));

        assert_eq!(app.apply_action(Action::ConfirmNo), AppCommand::None);
        assert_eq!(app.status(), "Action cancelled");
        assert_eq!(app.confirmation_prompt(), None);
    }

    #[tokio::test]
    async fn tree_keys_issue_service_commands() {
        let Harness { mut app, .. } = harness().await;
        assert_eq!(app.focus(), FocusPane::Tree);

        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Char('s'))),
            AppCommand::StartService {
                key: "svc/Tiltfile".to_string()
            }
        );
        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Char('x'))),
            AppCommand::StopService {
                key: "svc/Tiltfile".to_string()
            }
        );
        app.apply_action(Action::Bound(KeyCode::Char('t')));
        assert_eq!(
            app.apply_action(Action::ConfirmYes),
            AppCommand::TearDownService {
                key: "svc/Tiltfile".to_string()
            }
        );
    }

    #[tokio::test]
    async fn open_browser_needs_an_online_service() {
        let Harness {
            mut app, status, ..
        } = harness().await;

        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Char('o'))),
            AppCommand::None
        );
        assert_eq!(app.status(), "svc is offline");

        app.tree_mut().start("svc/Tiltfile");
        status.set(BASE_PORT, tilt_view(&[("web", "ok")]));
        app.tree_mut().poll().await;

        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Char('o'))),
            AppCommand::OpenBrowser { port: BASE_PORT }
        );
    }

    #[tokio::test]
    async fn drilling_to_containers_then_enter_loads_logs() {
        let Harness { mut app, cluster, .. } = harness().await;
        app.apply_action(Action::ToggleFocus);

        app.apply_action(Action::Bound(KeyCode::Enter));
        app.table_mut().poll().await;
        app.apply_action(Action::Bound(KeyCode::Enter));
        app.table_mut().poll().await;
        let command = app.apply_action(Action::Bound(KeyCode::Enter));

        assert_eq!(
            command,
            AppCommand::LoadLogs {
                namespace: "dev".to_string(),
                pod: "my-app-1".to_string(),
                container: "web".to_string(),
            }
        );
        assert!(cluster.calls().iter().any(|(kind, _, selector)| {
            *kind == ResourceKind::Containers && selector.as_deref() == Some("pod=my-app-1")
        }));

        app.show_logs(
            "dev".to_string(),
            "my-app-1".to_string(),
            "web".to_string(),
            "hello".to_string(),
        );
        assert_eq!(app.logs_refresh_command(), Some(command));
        assert_eq!(app.input_mode(), InputMode::Overlay);
    }

    #[tokio::test]
    async fn shell_on_container_targets_its_pod() {
        let Harness { mut app, .. } = harness().await;
        app.apply_action(Action::ToggleFocus);
        app.apply_action(Action::Bound(KeyCode::Enter));
        app.table_mut().poll().await;

        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Char('s'))),
            AppCommand::OpenShell {
                namespace: "dev".to_string(),
                pod: "my-app-1".to_string(),
                container: None,
            }
        );

        app.apply_action(Action::Bound(KeyCode::Enter));
        app.table_mut().poll().await;
        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Char('s'))),
            AppCommand::OpenShell {
                namespace: "dev".to_string(),
                pod: "my-app-1".to_string(),
                container: Some("web".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn escape_walks_back_up_the_breadcrumbs() {
        let Harness { mut app, .. } = harness().await;
        app.apply_action(Action::ToggleFocus);
        app.apply_action(Action::Bound(KeyCode::Enter));

        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Esc)),
            AppCommand::RefreshTable
        );
        assert_eq!(app.table().breadcrumbs(), &[ResourceKind::Deployments]);

        assert_eq!(
            app.apply_action(Action::Bound(KeyCode::Esc)),
            AppCommand::None
        );
        assert_eq!(app.table().breadcrumbs(), &[ResourceKind::Deployments]);
    }

    #[tokio::test]
    async fn drilling_in_fetches_the_child_table_at_once() {
        let Harness {
            mut app, cluster, ..
        } = harness().await;
        app.apply_action(Action::ToggleFocus);
        let fetches = cluster.calls().len();

        let command = app.apply_action(Action::Bound(KeyCode::Enter));
        assert_eq!(command, AppCommand::RefreshTable);
        app.table_mut().poll().await;

        assert_eq!(cluster.calls().len(), fetches + ResourceKind::ALL.len());
        assert!(cluster.calls()[fetches..].iter().any(|(kind, _, selector)| {
            *kind == ResourceKind::Pods && selector.as_deref() == Some("app=my-app")
        }));
        let frame = app.table().frame();
        assert_eq!(frame.kind, Some(ResourceKind::Pods));
        assert_eq!(frame.rows.len(), 1);
        assert!(!frame.columns.is_empty());
    }

    #[tokio::test]
    async fn empty_logs_show_a_placeholder() {
        let Harness { mut app, .. } = harness().await;

        app.show_logs(
            "dev".to_string(),
            "my-app-1".to_string(),
            "web".to_string(),
            String::new(),
        );

        assert!(matches!(
            app.overlay(),
            Some(Overlay::Logs { text, .. }) if text == "No logs available."
        ));
    }

    #[tokio::test]
    async fn overlay_captures_scrolling_until_closed() {
        let Harness { mut app, .. } = harness().await;
        app.show_describe("Deployments my-app", "kind: Deployment".to_string());

        app.apply_action(Action::Down);
        app.apply_action(Action::Down);
        assert_eq!(app.overlay_scroll(), 2);
        assert!(matches!(app.overlay(), Some(Overlay::Describe { .. })));

        app.apply_action(Action::CloseOverlay);
        assert_eq!(app.overlay(), None);
        assert_eq!(app.input_mode(), InputMode::Normal);
    }

    #[tokio::test]
    async fn refresh_forces_both_views() {
        let Harness { mut app, .. } = harness().await;

        assert_eq!(app.apply_action(Action::Refresh), AppCommand::RefreshAll);
        assert!(app.tree().engine().rebuild_pending());
        assert!(app.table().engine().rebuild_pending());
    }
}
