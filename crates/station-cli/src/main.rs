use std::{future::Future, time::Duration};

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use futures_util::future::join_all;
use serde::Serialize;
use station_installer::{
    config::client_config_path, fetch_catalog, ClientConfig, InstallDestination, InstallOutcome,
    InstallTask, InstallerClient, InstallerEvent, NotificationLevel, ResourceKind, SelectionForm,
    StationApi,
};
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "station-cli", version, about = "Station resource installer CLI")]
struct Cli {
    /// Backend base URL
    #[arg(long, global = true, env = "STATION_BASE_URL")]
    base_url: Option<String>,
    /// Path prefix for API endpoints; pass an empty string for none
    #[arg(long, global = true, env = "STATION_API_PREFIX")]
    api_prefix: Option<String>,
    /// Milliseconds between status polls
    #[arg(long, global = true, env = "STATION_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,
    /// Print JSON instead of tab-separated text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List preset resources and installation destinations
    Catalog {
        /// Only show presets of this kind (model, extension, script)
        #[arg(long)]
        kind: Option<String>,
        /// Case-insensitive search over name, description, tags and category
        #[arg(long)]
        search: Option<String>,
    },
    /// List tasks the backend is tracking
    Tasks,
    /// Install a preset or custom resource
    Install(InstallArgs),
    /// Fetch the current status of one or more tasks
    Status {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },
    /// Cancel a task
    Cancel { task_id: String },
    /// Follow an existing task until it finishes
    Watch { task_id: String },
    /// Show dashboard statistics and recent activity
    Dashboard,
    /// Check backend health
    Health,
    /// Client configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Args)]
struct InstallArgs {
    /// Preset resource id from the catalog
    #[arg(long, conflicts_with_all = ["url", "name", "description"])]
    preset: Option<String>,
    /// Download URL for a custom resource
    #[arg(long, requires = "name")]
    url: Option<String>,
    /// Display name for a custom resource
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Destination id or path; defaults to the preset's suggested destination
    #[arg(long)]
    dest: Option<String>,
    /// Return once the backend accepted the request
    #[arg(long)]
    no_watch: bool,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,
    /// Persist the effective configuration
    Save,
}

#[derive(Serialize)]
struct StatusLine {
    task_id: String,
    status: Option<String>,
    progress: Option<f64>,
    error: Option<String>,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    station_util::init_tracing()?;
    let cli = Cli::parse();
    let config = effective_config(&cli);

    match cli.cmd {
        Cmd::Catalog { kind, search } => {
            let catalog = fetch_catalog(&StationApi::new(&config)?).await;
            let kind = match kind.as_deref() {
                Some(raw) => Some(
                    ResourceKind::parse(raw).ok_or_else(|| format!("unknown kind '{raw}'"))?,
                ),
                None => None,
            };
            let presets: Vec<_> = catalog
                .search(search.as_deref().unwrap_or_default())
                .into_iter()
                .filter(|preset| kind.map_or(true, |kind| preset.kind == kind))
                .collect();

            if cli.json {
                let out = serde_json::json!({
                    "resources": presets,
                    "destinations": catalog.destinations(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
                return Ok(());
            }
            if let Some(err) = catalog.resources.error() {
                eprintln!("{err}");
            }
            for preset in presets {
                println!(
                    "{}\t{}\t{}\t{}",
                    preset.id,
                    preset.kind,
                    preset.display_name(),
                    preset.size.as_ref().map(ToString::to_string).unwrap_or_default()
                );
            }
            if let Some(err) = catalog.destinations.error() {
                eprintln!("{err}");
            }
            for dest in catalog.destinations() {
                println!("dest\t{}\t{}\t{}", dest.id, dest.name, dest.path);
            }
        }

        Cmd::Tasks => {
            let api = StationApi::new(&config)?;
            let tasks = api.list_tasks().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                for task in &tasks {
                    println!("{}", task_line(task));
                }
            }
        }

        Cmd::Install(args) => {
            let (client, rx) = InstallerClient::new(&config)?;
            let catalog = client.initialize().await;
            let mut form = SelectionForm::new();

            match &args.preset {
                Some(id) => {
                    let preset = catalog
                        .find_preset(id)
                        .ok_or_else(|| format!("unknown preset '{id}'"))?;
                    form.select_preset(preset, catalog.destinations());
                }
                None => {
                    form.enter_custom_mode();
                    form.set_url(args.url.as_deref().unwrap_or_default())?;
                    form.set_name(args.name.as_deref().unwrap_or_default())?;
                    if let Some(description) = &args.description {
                        form.set_description(description)?;
                    }
                }
            }
            if let Some(dest) = &args.dest {
                let destination = catalog
                    .find_destination(dest)
                    .cloned()
                    .unwrap_or_else(|| custom_destination(dest));
                form.select_destination(&destination)?;
            }
            let (resource, destination) = form.submit()?;

            match client.install(resource, destination).await {
                InstallOutcome::Started { task_id } => {
                    println!("task_id={task_id}");
                    if args.no_watch {
                        client.shutdown();
                    } else {
                        watch(&client, rx, &task_id, tokio::signal::ctrl_c()).await;
                    }
                }
                InstallOutcome::Failed { task_id, error } => {
                    client.shutdown();
                    return Err(format!("{task_id}: {error}").into());
                }
            }
        }

        Cmd::Status { task_ids } => {
            let api = StationApi::new(&config)?;
            let reports = join_all(task_ids.iter().map(|id| api.status(id))).await;
            let lines: Vec<StatusLine> = task_ids
                .into_iter()
                .zip(reports)
                .map(|(task_id, report)| match report {
                    Ok(report) => StatusLine {
                        task_id,
                        status: Some(report.status.to_string()),
                        progress: Some(report.progress),
                        error: report.error,
                    },
                    Err(err) => StatusLine {
                        task_id,
                        status: None,
                        progress: None,
                        error: Some(err.to_string()),
                    },
                })
                .collect();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&lines)?);
            } else {
                for line in lines {
                    match (line.status, line.progress) {
                        (Some(status), Some(progress)) => println!(
                            "{}\t{status}\t{progress:.0}%\t{}",
                            line.task_id,
                            line.error.unwrap_or_default()
                        ),
                        _ => eprintln!("{}\t{}", line.task_id, line.error.unwrap_or_default()),
                    }
                }
            }
        }

        Cmd::Cancel { task_id } => {
            let api = StationApi::new(&config)?;
            api.cancel(&task_id).await?;
            println!("cancelled={task_id}");
        }

        Cmd::Watch { task_id } => {
            let (client, rx) = InstallerClient::new(&config)?;
            client.initialize().await;
            match client.task(&task_id).await {
                Some(task) if task.is_terminal() => println!("{}", task_line(&task)),
                Some(_) => watch(&client, rx, &task_id, tokio::signal::ctrl_c()).await,
                None => {
                    client.shutdown();
                    return Err(format!("task '{task_id}' not found").into());
                }
            }
        }

        Cmd::Dashboard => {
            let api = StationApi::new(&config)?;
            let dashboard = api.dashboard().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                let stats = &dashboard.stats;
                println!("users\t{}", stats.total_users);
                println!("connections\t{}", stats.active_connections);
                println!("uptime\t{}", stats.system_uptime);
                println!(
                    "cpu/mem/disk\t{:.1}%\t{:.1}%\t{:.1}%",
                    stats.cpu_usage, stats.memory_usage, stats.disk_usage
                );
                println!(
                    "requests\t{}/min\terrors {:.2}%",
                    stats.requests_per_minute, stats.error_rate
                );
                for activity in &dashboard.recent_activity {
                    let when = activity
                        .timestamp
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_default();
                    println!("{when}\t{}\t{}", activity.kind, activity.message);
                }
            }
        }

        Cmd::Health => {
            let api = StationApi::new(&config)?;
            let health = api.health().await?;
            println!("status={}", health.status);
            if !health.is_ok() {
                return Err(format!("backend at {} is unhealthy", api.base_url()).into());
            }
        }

        Cmd::Config { cmd } => match cmd {
            ConfigCmd::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                println!("file={}", client_config_path().display());
            }
            ConfigCmd::Save => {
                let path = config.save()?;
                println!("saved={}", path.display());
            }
        },
    }

    Ok(())
}

fn effective_config(cli: &Cli) -> ClientConfig {
    let mut config = ClientConfig::load();
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(prefix) = &cli.api_prefix {
        config.api_prefix = prefix.clone();
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.poll_interval_ms = interval;
    }
    config
}

fn custom_destination(path: &str) -> InstallDestination {
    InstallDestination {
        id: path.to_string(),
        name: "Custom".into(),
        path: path.to_string(),
        kind: "custom".into(),
    }
}

fn task_line(task: &InstallTask) -> String {
    let mut line = format!(
        "{}\t{}\t{:.0}%\t{}\t{}\t{}",
        task.id,
        task.status,
        task.progress,
        task.resource.name,
        task.destination.path,
        task.elapsed_label(Utc::now())
    );
    if let Some(err) = &task.error {
        line.push('\t');
        line.push_str(err);
    }
    if task.is_stalled() {
        line.push_str("\t(not updating)");
    }
    line
}

/// Prints events for `task_id` until its poller stops. Resolving `stop`
/// (Ctrl-C in the binary) ends watching without cancelling the task.
async fn watch<F: Future>(
    client: &InstallerClient,
    mut rx: mpsc::Receiver<()>,
    task_id: &str,
    stop: F,
) {
    let mut task_id = task_id.to_string();
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = rx.recv() => {}
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            _ = &mut stop => {
                warn!("Stopped watching {task_id}; the installation continues on the backend");
                break;
            }
        }

        for event in client.drain_events() {
            match event {
                InstallerEvent::TaskRenamed { from, to } if from == task_id => task_id = to,
                InstallerEvent::TaskUpdated {
                    task_id: id,
                    status,
                    progress,
                } if id == task_id => println!("{id}\t{status}\t{progress:.0}%"),
                InstallerEvent::Notification {
                    task_id: Some(id),
                    level,
                    message,
                } if id == task_id => match level {
                    NotificationLevel::Success => println!("{message}"),
                    NotificationLevel::Warning | NotificationLevel::Error => {
                        eprintln!("{message}")
                    }
                },
                _ => {}
            }
        }

        if !client.is_polling(&task_id) {
            if let Some(task) = client.task(&task_id).await {
                println!("{}", task_line(&task));
            }
            break;
        }
    }
    client.shutdown();
}
