use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
    Wrap,
};

use crate::app::{App, FocusPane, Overlay, TREE_BINDINGS};
use crate::cluster::ClusterApi;
use crate::model::{ColumnAlign, RowStyle, key_label};
use crate::table::COLUMN_SPACING;
use crate::tilt::{ProcessControl, StatusClient};
use crate::tree::{StatusIcon, TreeLine};

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const INFO: Color = Color::Rgb(103, 232, 249);
const LOADING: Color = Color::Rgb(74, 222, 128);
const TERMINATING: Color = Color::Rgb(232, 121, 249);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);

const TREE_PERCENT: u16 = 30;
const HIGHLIGHT_SYMBOL: &str = "▶ ";

pub fn render<A, C, P>(frame: &mut Frame, app: &App<A, C, P>)
where
    A: ClusterApi,
    C: StatusClient,
    P: ProcessControl,
{
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    let (tree_area, table_area) = split_body(root[1]);
    render_tree(frame, tree_area, app);
    render_table(frame, table_area, app);
    render_footer(frame, root[2], app);

    if let Some(overlay) = app.overlay() {
        render_overlay(frame, overlay, app.overlay_scroll());
    }
    if let Some(prompt) = app.confirmation_prompt() {
        render_confirm_modal(frame, prompt);
    }
    if app.show_help() {
        render_help_modal(frame, app);
    }
}

fn split_body(area: Rect) -> (Rect, Rect) {
    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(TREE_PERCENT),
            Constraint::Percentage(100 - TREE_PERCENT),
        ])
        .split(area);
    (panes[0], panes[1])
}

/// Width the resource table's columns can share for a terminal of
/// `terminal_width` cells.
pub fn table_available_width(terminal_width: u16) -> usize {
    let (_, table_area) = split_body(Rect::new(0, 0, terminal_width, 10));
    let inner = table_area.width.saturating_sub(2) as usize;
    inner.saturating_sub(HIGHLIGHT_SYMBOL.chars().count())
}

fn render_header<A, C, P>(frame: &mut Frame, area: Rect, app: &App<A, C, P>)
where
    A: ClusterApi,
    C: StatusClient,
    P: ProcessControl,
{
    let trail = app
        .table()
        .breadcrumbs()
        .iter()
        .map(|kind| kind.title())
        .collect::<Vec<_>>()
        .join(" › ");
    let line = Line::from(vec![
        Span::styled(
            " ttork ",
            Style::default()
                .fg(Color::White)
                .bg(PL_A)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("  ctx:{}", app.context()), Style::default().fg(INFO)),
        Span::styled(format!("  ns:{}", app.namespace()), Style::default().fg(ACCENT)),
        Span::styled(format!("  {trail}"), Style::default().fg(MUTED)),
    ]);
    frame.render_widget(
        Paragraph::new(line).style(Style::default().bg(BG).fg(Color::White)),
        area,
    );
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL))
}

fn icon_color(icon: StatusIcon) -> Color {
    match icon {
        StatusIcon::Ok => ACCENT,
        StatusIcon::Pending | StatusIcon::InProgress => WARN,
        StatusIcon::Error => ERROR,
        StatusIcon::Offline | StatusIcon::None => MUTED,
        StatusIcon::Other => TERMINATING,
    }
}

fn render_tree<A, C, P>(frame: &mut Frame, area: Rect, app: &App<A, C, P>)
where
    A: ClusterApi,
    C: StatusClient,
    P: ProcessControl,
{
    let tree = app.tree();
    let items = tree
        .lines()
        .into_iter()
        .map(|line| match line {
            TreeLine::Service(node) => {
                let port = if node.port == 0 {
                    String::new()
                } else {
                    format!(" :{}", node.port)
                };
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{} ", node.icon.glyph()),
                        Style::default().fg(icon_color(node.icon)),
                    ),
                    Span::styled(
                        node.label.clone(),
                        Style::default()
                            .fg(Color::White)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(port, Style::default().fg(MUTED)),
                ]))
            }
            TreeLine::Leaf(leaf) => ListItem::new(Line::from(vec![
                Span::raw("   "),
                Span::styled(
                    format!("{} ", leaf.icon.glyph()),
                    Style::default().fg(icon_color(leaf.icon)),
                ),
                Span::styled(leaf.name.clone(), Style::default().fg(MUTED)),
            ])),
        })
        .collect::<Vec<_>>();

    let focused = app.focus() == FocusPane::Tree;
    let list = List::new(items)
        .block(pane_block(format!("Projects ({})", tree.nodes().len()), focused))
        .highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        );

    let mut state = ListState::default();
    if !tree.nodes().is_empty() {
        state.select(Some(tree.selected_line()));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn row_color(style: RowStyle) -> Color {
    match style {
        RowStyle::Info => INFO,
        RowStyle::Warning => WARN,
        RowStyle::Error => ERROR,
        RowStyle::Loading => LOADING,
        RowStyle::Terminating => TERMINATING,
    }
}

fn aligned(value: String, align: ColumnAlign) -> Line<'static> {
    let alignment = match align {
        ColumnAlign::Left => Alignment::Left,
        ColumnAlign::Center => Alignment::Center,
        ColumnAlign::Right => Alignment::Right,
    };
    Line::from(value).alignment(alignment)
}

fn render_table<A, C, P>(frame: &mut Frame, area: Rect, app: &App<A, C, P>)
where
    A: ClusterApi,
    C: StatusClient,
    P: ProcessControl,
{
    let view = app.table();
    let table_frame = view.frame();
    let focused = app.focus() == FocusPane::Table;
    let namespace = if table_frame.namespace.is_empty() {
        app.namespace()
    } else {
        table_frame.namespace.as_str()
    };
    let title = format!(
        "{} ({namespace}) [{}]",
        view.active_kind().title(),
        table_frame.rows.len()
    );

    if table_frame.columns.is_empty() {
        let waiting = Paragraph::new(Text::from("Loading…"))
            .block(pane_block(title, focused))
            .style(Style::default().fg(MUTED));
        frame.render_widget(waiting, area);
        return;
    }

    let header_row = Row::new(table_frame.columns.iter().map(|column| {
        Cell::from(aligned(column.name.clone(), column.align))
            .style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .height(1)
    .style(Style::default().fg(ACCENT));

    let rows = table_frame.rows.iter().map(|row| {
        Row::new(
            row.values
                .iter()
                .zip(&table_frame.columns)
                .map(|(value, column)| {
                    let text = compact_text(value, column.width as usize);
                    Cell::from(aligned(text, column.align))
                }),
        )
        .style(Style::default().fg(row_color(row.style)))
    });

    let constraints = table_frame
        .columns
        .iter()
        .map(|column| Constraint::Length(column.width))
        .collect::<Vec<_>>();

    let table = Table::new(rows, constraints)
        .header(header_row)
        .block(pane_block(title, focused))
        .column_spacing(COLUMN_SPACING)
        .row_highlight_style(
            Style::default()
                .bg(Color::Rgb(24, 36, 58))
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(HIGHLIGHT_SYMBOL);

    let mut state = TableState::default();
    if !table_frame.rows.is_empty() {
        state.select(Some(view.cursor()));
    }
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_footer<A, C, P>(frame: &mut Frame, area: Rect, app: &App<A, C, P>)
where
    A: ClusterApi,
    C: StatusClient,
    P: ProcessControl,
{
    let mut spans = Vec::new();
    let bindings = match app.focus() {
        FocusPane::Tree => TREE_BINDINGS
            .iter()
            .map(|(key, label)| (key.to_string(), (*label).to_string()))
            .collect::<Vec<_>>(),
        FocusPane::Table => app
            .table()
            .bindings()
            .iter()
            .map(|binding| (key_label(binding.key), binding.label.clone()))
            .collect(),
    };
    for (key, label) in bindings
        .into_iter()
        .chain([("tab".to_string(), "Focus".to_string()), ("?".to_string(), "Help".to_string())])
    {
        spans.push(Span::styled(
            format!(" {key} "),
            Style::default().fg(Color::Black).bg(ACCENT),
        ));
        spans.push(Span::styled(format!(" {label} "), Style::default().fg(MUTED)));
    }

    let refreshed = app
        .table()
        .last_refreshed()
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    spans.push(Span::styled(
        format!(" {} ", app.status()),
        Style::default().fg(Color::White).bg(PL_B),
    ));
    spans.push(Span::styled(
        format!(" refreshed {refreshed}"),
        Style::default().fg(MUTED),
    ));

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_overlay(frame: &mut Frame, overlay: &Overlay, scroll: u16) {
    let area = centered_rect(90, 85, frame.area());
    frame.render_widget(Clear, area);

    let (title, text) = match overlay {
        Overlay::Describe { title, text } => (title.clone(), highlight_yaml_text(text)),
        Overlay::Logs {
            pod,
            container,
            text,
            ..
        } => (
            format!("Logs {pod}/{container}"),
            Text::from(text.clone()),
        ),
    };
    let max_scroll = u16::try_from(text.lines.len())
        .unwrap_or(u16::MAX)
        .saturating_sub(area.height.saturating_sub(2));
    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .scroll((scroll.min(max_scroll), 0))
        .block(pane_block(format!("{title}  (esc to close)"), true))
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_confirm_modal(frame: &mut Frame, prompt: &str) {
    let area = centered_rect(50, 20, frame.area());
    frame.render_widget(Clear, area);
    let modal = Paragraph::new(vec![
        Line::from(prompt.to_string()),
        Line::from(""),
        Line::from(Span::styled("y confirm   n cancel", Style::default().fg(MUTED))),
    ])
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: false })
    .block(
        Block::default()
            .title("Confirm")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(WARN))
            .style(Style::default().bg(PANEL)),
    )
    .style(Style::default().fg(Color::White));
    frame.render_widget(modal, area);
}

fn render_help_modal<A, C, P>(frame: &mut Frame, app: &App<A, C, P>)
where
    A: ClusterApi,
    C: StatusClient,
    P: ProcessControl,
{
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(format!(
            "ttork help  ctx:{}  ns:{}",
            app.context(),
            app.namespace()
        )),
        Line::from(""),
        Line::from("Global"),
        Line::from("  tab        switch between projects and resources"),
        Line::from("  j/k        move   g/G top/bottom   pgup/pgdn page"),
        Line::from("  r          refresh both panes now"),
        Line::from("  ?          toggle this help   q quit"),
        Line::from(""),
        Line::from("Projects"),
    ];
    for (key, label) in TREE_BINDINGS {
        lines.push(Line::from(format!("  {key:<10} {label}")));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(app.table().active_kind().title()));
    for binding in app.table().bindings() {
        lines.push(Line::from(format!(
            "  {:<10} {}",
            key_label(binding.key),
            binding.label
        )));
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

fn highlight_yaml_text(input: &str) -> Text<'static> {
    let lines = input
        .lines()
        .map(highlight_yaml_line)
        .collect::<Vec<Line<'static>>>();
    Text::from(lines)
}

fn highlight_yaml_line(line: &str) -> Line<'static> {
    let indent_len = line
        .as_bytes()
        .iter()
        .take_while(|byte| **byte == b' ')
        .count();
    let (indent, trimmed) = line.split_at(indent_len);

    let mut spans = vec![Span::raw(indent.to_string())];
    if let Some(rest) = trimmed.strip_prefix("- ") {
        spans.push(Span::styled("- ", Style::default().fg(ACCENT)));
        spans.extend(highlight_yaml_content(rest));
    } else if !trimmed.is_empty() {
        spans.extend(highlight_yaml_content(trimmed));
    }
    Line::from(spans)
}

fn highlight_yaml_content(content: &str) -> Vec<Span<'static>> {
    let Some((key, value)) = split_yaml_key_value(content) else {
        return vec![Span::styled(
            content.to_string(),
            Style::default().fg(Color::White),
        )];
    };

    let mut spans = vec![
        Span::styled(key.to_string(), Style::default().fg(INFO)),
        Span::styled(":", Style::default().fg(MUTED)),
    ];
    let value = value.trim();
    if !value.is_empty() {
        spans.push(Span::raw(" "));
        spans.push(Span::styled(
            value.to_string(),
            Style::default().fg(yaml_value_color(value)),
        ));
    }
    spans
}

fn split_yaml_key_value(content: &str) -> Option<(&str, &str)> {
    let (key, value) = content.split_once(':')?;
    let key = key.trim_end();
    if key.is_empty() || key.contains(' ') {
        return None;
    }
    Some((key, value))
}

fn yaml_value_color(value: &str) -> Color {
    if value.starts_with('"') || value.starts_with('\'') {
        Color::Rgb(125, 211, 252)
    } else if matches!(value, "true" | "false" | "null" | "~") {
        WARN
    } else if value.parse::<f64>().is_ok() {
        Color::Rgb(251, 146, 60)
    } else {
        Color::Rgb(147, 197, 253)
    }
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
