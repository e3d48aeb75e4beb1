use crossterm::event::KeyCode;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ResourceKind {
    Deployments,
    Pods,
    Containers,
}

impl ResourceKind {
    pub const ALL: [Self; 3] = [Self::Deployments, Self::Pods, Self::Containers];

    pub fn title(self) -> &'static str {
        match self {
            Self::Deployments => "Deployments",
            Self::Pods => "Pods",
            Self::Containers => "Containers",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// Where a row drill-down leads: another resource table, or the log view
/// for the selected container.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ViewTarget {
    Kind(ResourceKind),
    Logs,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ColumnAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    /// `None` marks a dynamic column that absorbs leftover table width.
    pub width: Option<usize>,
    pub align: ColumnAlign,
}

impl ColumnSpec {
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: None,
            align: ColumnAlign::Left,
        }
    }

    pub fn fixed(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width: Some(width),
            align: ColumnAlign::Left,
        }
    }

    pub fn align(mut self, align: ColumnAlign) -> Self {
        self.align = align;
        self
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum RowStyle {
    #[default]
    Info,
    Warning,
    Error,
    Loading,
    Terminating,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceRow {
    pub values: Vec<String>,
    pub style: RowStyle,
}

impl ResourceRow {
    pub fn new(values: Vec<String>, style: RowStyle) -> Self {
        Self { values, style }
    }

    /// First column holds the resource name for every kind.
    pub fn name(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChildSelector {
    pub label_prefix: String,
    pub source_column: usize,
}

impl ChildSelector {
    pub fn new(label_prefix: impl Into<String>, source_column: usize) -> Self {
        Self {
            label_prefix: label_prefix.into(),
            source_column,
        }
    }

    pub fn selector_for(&self, row: &ResourceRow) -> Option<String> {
        row.values
            .get(self.source_column)
            .map(|value| format!("{}{}", self.label_prefix, value))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TableAction {
    Back,
    SelectRow(ViewTarget),
    Describe,
    Delete,
    Shell,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct KeyBinding {
    pub key: KeyCode,
    pub action: TableAction,
    pub label: String,
}

impl KeyBinding {
    pub fn new(key: KeyCode, action: TableAction, label: impl Into<String>) -> Self {
        Self {
            key,
            action,
            label: label.into(),
        }
    }
}

pub fn key_label(key: KeyCode) -> String {
    match key {
        KeyCode::Enter => "enter".to_string(),
        KeyCode::Esc => "esc".to_string(),
        KeyCode::Tab => "tab".to_string(),
        KeyCode::Char(c) => c.to_string(),
        other => format!("{other:?}").to_ascii_lowercase(),
    }
}

/// One fetched resource collection. Built fresh on every successful fetch and
/// never mutated afterwards.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceDataset {
    kind: ResourceKind,
    namespace: String,
    columns: Vec<ColumnSpec>,
    rows: Vec<ResourceRow>,
    child_selector: Option<ChildSelector>,
    actions: Vec<KeyBinding>,
    min_widths: Vec<usize>,
    dynamic_columns: Vec<usize>,
}

impl ResourceDataset {
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        columns: Vec<ColumnSpec>,
        rows: Vec<ResourceRow>,
    ) -> Self {
        for (index, row) in rows.iter().enumerate() {
            assert_eq!(
                row.values.len(),
                columns.len(),
                "{kind} row {index} has {} values for {} columns",
                row.values.len(),
                columns.len()
            );
        }

        let mut min_widths = Vec::with_capacity(columns.len());
        let mut dynamic_columns = Vec::new();
        for (index, column) in columns.iter().enumerate() {
            let name_width = column.name.chars().count();
            match column.width {
                None => {
                    min_widths.push(name_width);
                    dynamic_columns.push(index);
                }
                Some(width) => min_widths.push(width.max(name_width)),
            }
        }

        Self {
            kind,
            namespace: namespace.into(),
            columns,
            rows,
            child_selector: None,
            actions: Vec::new(),
            min_widths,
            dynamic_columns,
        }
    }

    pub fn with_child_selector(mut self, selector: ChildSelector) -> Self {
        assert!(
            selector.source_column < self.columns.len(),
            "{} child selector points at column {} of {}",
            self.kind,
            selector.source_column,
            self.columns.len()
        );
        self.child_selector = Some(selector);
        self
    }

    pub fn with_actions(mut self, actions: Vec<KeyBinding>) -> Self {
        let mut unique: Vec<KeyBinding> = Vec::with_capacity(actions.len());
        for binding in actions {
            if let Some(existing) = unique.iter_mut().find(|entry| entry.key == binding.key) {
                *existing = binding;
            } else {
                unique.push(binding);
            }
        }
        self.actions = unique;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn rows(&self) -> &[ResourceRow] {
        &self.rows
    }

    pub fn child_selector(&self) -> Option<&ChildSelector> {
        self.child_selector.as_ref()
    }

    pub fn actions(&self) -> &[KeyBinding] {
        &self.actions
    }

    pub fn min_widths(&self) -> &[usize] {
        &self.min_widths
    }

    pub fn dynamic_columns(&self) -> &[usize] {
        &self.dynamic_columns
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UpdateStatus {
    Ok,
    Pending,
    InProgress,
    Error,
    Offline,
    None,
    Other(String),
}

impl UpdateStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("offline") => Self::Offline,
            Some("ok") => Self::Ok,
            Some("pending") => Self::Pending,
            Some("in_progress") => Self::InProgress,
            Some("error") => Self::Error,
            Some("none") => Self::None,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubResource {
    pub name: String,
    pub update_status: UpdateStatus,
}

/// Last known state of one supervised Tilt project.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ServiceStatusEntry {
    /// Path to the project's Tiltfile.
    pub key: String,
    pub display_name: String,
    pub sub_resources: Vec<SubResource>,
    pub online: bool,
    /// 0 until the first start.
    pub port: u16,
    /// 0 when no process is running.
    pub pid: u32,
    pub environment: BTreeMap<String, String>,
}

impl ServiceStatusEntry {
    pub fn new(
        key: impl Into<String>,
        display_name: impl Into<String>,
        environment: BTreeMap<String, String>,
    ) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            sub_resources: Vec::new(),
            online: false,
            port: 0,
            pid: 0,
            environment,
        }
    }
}
