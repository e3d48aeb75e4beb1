mod app;
mod cli;
mod cluster;
mod config;
mod engine;
mod input;
mod k8s;
mod model;
mod table;
#[cfg(test)]
mod testing;
mod tilt;
mod tree;
mod ui;

use anyhow::{Context, Result};
use app::{App, AppCommand};
use clap::Parser;
use cli::{CliArgs, Command, StartArgs};
use cluster::ClusterStatusCache;
use crossterm::event::{Event, EventStream, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use k8s::KubeGateway;
use model::ResourceKind;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use table::NavigableTableView;
use tilt::{ServiceStatusCache, TiltHttpClient, TiltProcesses};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tree::StatusTreeView;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
type LiveApp = App<KubeGateway, TiltHttpClient, TiltProcesses>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(error) => {
            error.print().context("failed to print usage")?;
            std::process::exit(cli::exit_code(&error));
        }
    };

    let start = match &args.command {
        Some(Command::Version) => {
            println!("{}", cli::version_line());
            return Ok(());
        }
        Some(Command::Start(start)) => start.clone(),
        None => StartArgs::default(),
    };

    init_tracing(&args.log_filter, args.log_file.as_deref())?;
    let config = config::load_config(args.config.as_deref())?;
    info!(
        "loaded {} with {} projects",
        config.source.display(),
        config.projects.len()
    );

    let gateway = KubeGateway::new(&config.k8s.context).await?;
    let cluster = ClusterStatusCache::new(
        gateway.clone(),
        config.k8s.namespace.clone(),
        &ResourceKind::ALL,
    );
    let table = NavigableTableView::new(cluster, ResourceKind::Deployments, start.table_period());
    let services = ServiceStatusCache::from_projects(
        &config.projects,
        TiltHttpClient::new()?,
        TiltProcesses::default(),
    );
    let tree = StatusTreeView::new(services, start.tree_period());

    let mut app = App::new(table, tree, gateway.context());
    if start.autostart {
        info!("autostarting every project");
        app.tree_mut().start_all();
    }

    run(&mut app, &gateway).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(io::sink).try_init();
        }
    }

    Ok(())
}

async fn run(app: &mut LiveApp, gateway: &KubeGateway) -> Result<()> {
    let mut terminal = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, gateway).await;
    let restore_result = restore_terminal(&mut terminal);
    app.tree_mut().shutdown();
    for engine in [app.tree().engine(), app.table().engine()] {
        info!(
            "{}: {} ticks, {} rebuilds",
            engine.name(),
            engine.ticks(),
            engine.rebuilds()
        );
    }

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<TuiTerminal> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut TuiTerminal) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut LiveApp,
    gateway: &KubeGateway,
) -> Result<()> {
    let size = terminal.size().context("failed to read terminal size")?;
    app.table_mut()
        .on_resize(ui::table_available_width(size.width));

    let mut reader = EventStream::new();
    let mut tree_ticker = app.tree().engine().ticker();
    let mut table_ticker = app.table().engine().ticker();

    loop {
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if !app.is_running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.input_mode(), key) {
                            debug!("action={action:?}");
                            let command = app.apply_action(action);
                            terminal
                                .draw(|frame| ui::render(frame, app))
                                .context("failed to render terminal frame")?;
                            execute_app_command(terminal, app, gateway, command).await;
                        }
                    }
                    Some(Ok(Event::Resize(width, _))) => {
                        app.table_mut().on_resize(ui::table_available_width(width));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            _ = tree_ticker.tick() => {
                app.tree_mut().poll().await;
            }
            _ = table_ticker.tick() => {
                app.table_mut().poll().await;
                if let Some(command) = app.logs_refresh_command() {
                    execute_app_command(terminal, app, gateway, command).await;
                }
            }
        }
    }

    Ok(())
}

async fn execute_app_command(
    terminal: &mut TuiTerminal,
    app: &mut LiveApp,
    gateway: &KubeGateway,
    command: AppCommand,
) {
    match command {
        AppCommand::None => {}
        AppCommand::RefreshAll => {
            app.tree_mut().poll().await;
            app.table_mut().poll().await;
            app.set_status("Refreshed");
        }
        AppCommand::RefreshTable => {
            app.table_mut().poll().await;
        }
        AppCommand::StartService { key } => {
            app.tree_mut().start(&key);
        }
        AppCommand::StopService { key } => {
            app.tree_mut().stop(&key);
            app.set_status(format!("Stopped {key}"));
        }
        AppCommand::TearDownService { key } => {
            app.set_status(format!("Tearing down {key}"));
            app.tree_mut().tear_down(&key).await;
            app.set_status(format!("Tore down {key}"));
        }
        AppCommand::OpenBrowser { port } => {
            let url = format!("http://localhost:{port}");
            match open_browser(&url) {
                Ok(()) => app.set_status(format!("Opened {url}")),
                Err(error) => {
                    warn!("{error:#}");
                    app.set_status(compact_error(&error));
                }
            }
        }
        AppCommand::DescribeResource {
            kind,
            namespace,
            name,
        } => match gateway.describe(kind, &namespace, &name).await {
            Ok(yaml) => app.show_describe(format!("{kind} {namespace}/{name}"), yaml),
            Err(error) => {
                warn!("{error:#}");
                app.set_status(compact_error(&error));
            }
        },
        AppCommand::DeleteResource {
            kind,
            namespace,
            name,
        } => match gateway.delete(kind, &namespace, &name).await {
            Ok(()) => {
                app.set_status(format!("Deleted {namespace}/{name}"));
                app.table_mut().request_rebuild();
                app.table_mut().poll().await;
            }
            Err(error) => {
                warn!("{error:#}");
                app.set_status(compact_error(&error));
            }
        },
        AppCommand::LoadLogs {
            namespace,
            pod,
            container,
        } => match gateway.fetch_logs(&namespace, &pod, &container).await {
            Ok(logs) => app.show_logs(namespace, pod, container, logs),
            Err(error) => {
                warn!("{error:#}");
                app.set_status(compact_error(&error));
            }
        },
        AppCommand::OpenShell {
            namespace,
            pod,
            container,
        } => {
            let result = run_kubectl_shell(
                terminal,
                gateway.context(),
                &namespace,
                &pod,
                container.as_deref(),
            )
            .await;
            match result {
                Ok(()) => app.set_status(format!("Shell closed for {namespace}/{pod}")),
                Err(error) => {
                    warn!("{error:#}");
                    app.set_status(compact_error(&error));
                }
            }
        }
    }
}

fn open_browser(url: &str) -> Result<()> {
    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    TokioCommand::new(opener)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to run {opener} {url}"))?;
    Ok(())
}

async fn run_kubectl_shell(
    terminal: &mut TuiTerminal,
    context: &str,
    namespace: &str,
    pod_name: &str,
    container: Option<&str>,
) -> Result<()> {
    suspend_terminal_for_subprocess(terminal)?;

    let mut cmd = TokioCommand::new("kubectl");
    cmd.arg("--context")
        .arg(context)
        .arg("exec")
        .arg("-it")
        .arg("-n")
        .arg(namespace)
        .arg(pod_name);
    if let Some(container) = container {
        cmd.arg("-c").arg(container);
    }
    cmd.arg("--")
        .arg("sh")
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let run_result = cmd
        .status()
        .await
        .with_context(|| format!("failed to run kubectl shell for {namespace}/{pod_name}"));
    let restore_result = resume_terminal_after_subprocess(terminal);

    let status = match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => {
            return Err(anyhow::anyhow!(
                "{run_error:#}\nterminal resume error: {restore_error:#}"
            ));
        }
        (Err(error), _) => return Err(error),
        (_, Err(error)) => return Err(error),
        (Ok(status), Ok(())) => status,
    };

    if status.success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("kubectl shell exited with {status}"))
    }
}

fn suspend_terminal_for_subprocess(terminal: &mut TuiTerminal) -> Result<()> {
    disable_raw_mode().context("failed to disable raw mode for subprocess")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen for subprocess")?;
    terminal
        .show_cursor()
        .context("failed to show cursor for subprocess")?;
    Ok(())
}

fn resume_terminal_after_subprocess(terminal: &mut TuiTerminal) -> Result<()> {
    enable_raw_mode().context("failed to re-enable raw mode after subprocess")?;
    execute!(terminal.backend_mut(), EnterAlternateScreen)
        .context("failed to re-enter alternate screen after subprocess")?;
    terminal
        .clear()
        .context("failed to clear terminal after subprocess")?;
    Ok(())
}

fn compact_error(error: &anyhow::Error) -> String {
    let mut out = Vec::new();
    for (index, cause) in error.chain().enumerate() {
        if index == 0 {
            out.push(cause.to_string());
        } else if index <= 2 {
            out.push(format!("caused by: {cause}"));
        } else {
            break;
        }
    }

    out.join(" | ")
}
