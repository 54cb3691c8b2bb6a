//! Tenant Sync - Entry Point
//!
//! Command line front end for a tenant's deployments: sign in, list, create
//! and follow deployments, scale them and delete them with an undo window.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use colored::{ColoredString, Colorize};
use secrecy::SecretString;
use tracing::{info, warn};
use uuid::Uuid;

use openapi_client::models::{
    DeploymentCreate, DeploymentDetails, DeploymentStatus, ServerType, Theme,
};
use tenant_sync::actions::registry::PendingActionRegistry;
use tenant_sync::app::options::AppOptions;
use tenant_sync::app::run::run;
use tenant_sync::app::state::AppState;
use tenant_sync::errors::SyncError;
use tenant_sync::filesys::file::File;
use tenant_sync::logs::{init_logging, LogLevel, LogOptions};
use tenant_sync::notify::{Notification, Notifier};
use tenant_sync::storage::layout::StorageLayout;
use tenant_sync::storage::settings::Settings;
use tenant_sync::sync::state::{DeploymentRow, LogTail, StatusSnapshot};
use tenant_sync::sync::tracker::TrackOutcome;
use tenant_sync::utils::{format_secs, version_info};

type CliArgs = HashMap<String, String>;

const USAGE: &str = "\
usage: tenant-sync [--api=<url>] [--log-level=<level>] <command>

commands:
  --login --email=<email> [--password=<pw>]
  --register --email=<email> [--password=<pw>]
  --logout
  --whoami
  --list
  --create --name=<name> [--server-type=nginx|apache|tomcat] [--replicas=<n>] [--index-html=<file>]
  --track --id=<id> [--logs]
  --logs --id=<id>
  --details --id=<id>
  --scale --id=<id> --replicas=<n>
  --delete --id=<id> [--delay=<secs>]
  --close-account --confirm
  --theme[=light|dark|toggle]
  --health
  --watch
  --version

The password may also be given through TENANT_SYNC_PASSWORD.";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: CliArgs = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    let layout = StorageLayout::default();
    let settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} unable to read settings file: {}", "warning:".yellow(), e);
            Settings::default()
        }
    };

    // Initialize logging
    let log_level = match cli_args.get("log-level").map(|level| level.parse::<LogLevel>()) {
        Some(Ok(level)) => level,
        Some(Err(e)) => {
            eprintln!("{} {}", "warning:".yellow(), e);
            settings.log_level.clone()
        }
        None => settings.log_level.clone(),
    };
    let log_options = LogOptions {
        log_level,
        json_format: settings.json_logs,
        log_dir: settings.log_to_file.then(|| layout.logs_dir()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let mut options = settings.app_options(layout);
    if let Some(api) = cli_args.get("api") {
        options.api_base_url = api.trim_end_matches('/').to_string();
    }
    info!("Running tenant sync against {}", options.api_base_url);

    let state = match AppState::init(&options, Arc::new(ConsoleNotifier)).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch(&cli_args, options, state).await {
        match e {
            SyncError::AuthExpired => eprintln!(
                "{} not logged in. Run: tenant-sync --login --email=<email>",
                "error:".red().bold()
            ),
            other => eprintln!("{} {}", "error:".red().bold(), other.user_message()),
        }
        std::process::exit(1);
    }
}

async fn dispatch(args: &CliArgs, options: AppOptions, state: Arc<AppState>) -> Result<(), SyncError> {
    if args.contains_key("login") {
        let email = require(args, "email")?;
        let session = state.accounts.login(email, &password(args)?).await?;
        println!(
            "{} as {} (session valid for {})",
            "Logged in".green(),
            email,
            format_secs(session.seconds_remaining(tenant_sync::utils::now_millis()))
        );
    } else if args.contains_key("register") {
        let email = require(args, "email")?;
        state.accounts.register(email, &password(args)?).await?;
        println!("{} {}", "Registered".green(), email);
    } else if args.contains_key("logout") {
        state.accounts.logout().await;
        println!("Logged out");
    } else if args.contains_key("whoami") {
        let me = state.accounts.me().await?;
        let remaining = state.session_mngr.seconds_remaining().await.unwrap_or(0);
        println!("{} ({})", me.email.bold(), me.user_slug);
        println!("session expires in {}", format_secs(remaining));
    } else if args.contains_key("list") {
        state.engine.refresh_all().await?.ok_or(SyncError::AuthExpired)?;
        print_rows(&state.actions);
    } else if args.contains_key("create") {
        create(args, &state).await?;
    } else if args.contains_key("track") || args.contains_key("logs") {
        let id = parse_id(args)?;
        let view = if args.contains_key("track") {
            TrackView::Progress {
                logs: args.contains_key("logs"),
            }
        } else {
            TrackView::LogsOnly
        };
        track(&state, id, view).await?;
    } else if args.contains_key("details") {
        let id = parse_id(args)?;
        let details = state.engine.fetch_details(id).await?;
        print_details(&details);
    } else if args.contains_key("scale") {
        let id = parse_id(args)?;
        let replicas = parse_u32(args, "replicas")?;
        state.engine.refresh_all().await?.ok_or(SyncError::AuthExpired)?;
        if !state.actions.apply_scale(id, replicas).await {
            return Err(SyncError::Internal(format!(
                "replicas remain at {}",
                state.actions.scale_input(id)
            )));
        }
        print_rows(&state.actions);
    } else if args.contains_key("delete") {
        let id = parse_id(args)?;
        let delay = match args.get("delay") {
            Some(_) => Duration::from_secs(u64::from(parse_u32(args, "delay")?)),
            None => options.sync.delete_delay,
        };
        delete(&state, id, delay).await?;
    } else if args.contains_key("close-account") {
        if !args.contains_key("confirm") {
            return Err(SyncError::ValidationError(
                "closing the account deletes every deployment; pass --confirm".to_string(),
            ));
        }
        state.accounts.close_account().await?;
        println!("{}", "Account closed".green());
    } else if let Some(theme) = args.get("theme") {
        set_or_show_theme(&state, theme).await?;
    } else if args.contains_key("health") {
        let health = state.api.cluster_health().await?;
        let mark = |ok: bool| if ok { "ok".green() } else { "down".red() };
        println!("k8s: {}  ingress: {}", mark(health.k8s), mark(health.ingress));
        if let Some(error) = health.error {
            println!("{}", error.red());
        }
    } else if args.contains_key("watch") {
        watch(options, state).await?;
    } else {
        println!("{}", USAGE);
    }
    Ok(())
}

async fn create(args: &CliArgs, state: &AppState) -> Result<(), SyncError> {
    let server_type = match args.get("server-type") {
        Some(raw) => raw
            .parse::<ServerType>()
            .map_err(SyncError::ValidationError)?,
        None => ServerType::default(),
    };
    let replicas = match args.get("replicas") {
        Some(_) => Some(parse_u32(args, "replicas")?),
        None => Some(1),
    };
    let index_html = match args.get("index-html") {
        Some(path) => Some(File::new(path).read_string().await?),
        None => None,
    };

    let created = state
        .engine
        .create_deployment(DeploymentCreate {
            display_name: require(args, "name")?.to_string(),
            server_type,
            index_html,
            replicas,
        })
        .await?;

    println!("id: {}", created.id);
    track(state, created.id, TrackView::Progress { logs: false }).await
}

/// What `track` prints for each observation
#[derive(Debug, Clone, Copy)]
enum TrackView {
    Progress { logs: bool },
    LogsOnly,
}

async fn track(state: &AppState, id: Uuid, view: TrackView) -> Result<(), SyncError> {
    println!("Waiting for {} to become ready...", id);
    let mut tail = LogTail::default();
    let outcome = state
        .engine
        .track_until_ready(id, |snapshot| {
            let logs = match view {
                TrackView::Progress { logs } => {
                    print_progress(snapshot);
                    logs
                }
                TrackView::LogsOnly => true,
            };
            if logs {
                for line in tail.fresh(&snapshot.logs) {
                    println!("{}", line.dimmed());
                }
            }
        })
        .await;

    match outcome {
        TrackOutcome::Ready(_) => {
            let url = state.engine.deployment(id).and_then(|d| d.url());
            println!("{} {}", "Ready".green().bold(), url.unwrap_or_default());
        }
        TrackOutcome::Failed(snapshot) => {
            return Err(SyncError::Internal(format!(
                "deployment failed: {}",
                snapshot.last_error.unwrap_or_else(|| "no error reported".to_string())
            )));
        }
        TrackOutcome::StreamEnded => {
            println!("Status stream ended; run --list for the latest state");
        }
        TrackOutcome::Inconclusive => {
            return Err(SyncError::Timeout(format!(
                "{} not ready after {}s, it may still come up",
                id,
                state.engine.options().readiness_deadline.as_secs()
            )));
        }
        TrackOutcome::LoggedOut => return Err(SyncError::AuthExpired),
    }
    Ok(())
}

async fn delete(state: &AppState, id: Uuid, delay: Duration) -> Result<(), SyncError> {
    state.engine.refresh_all().await?.ok_or(SyncError::AuthExpired)?;
    if state.engine.deployment(id).is_none() {
        return Err(SyncError::NotFound(format!("deployment {}", id)));
    }

    let handle = state.actions.schedule_delete(id, delay);
    println!("Press Ctrl+C to undo");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !handle.cancel() {
                println!("Too late to undo, the delete is already running");
                wait_until_settled(&state.actions, id).await;
            }
        }
        _ = wait_until_settled(&state.actions, id) => {}
    }
    Ok(())
}

async fn wait_until_settled(actions: &PendingActionRegistry, id: Uuid) {
    while actions.is_pending(id) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn set_or_show_theme(state: &AppState, value: &str) -> Result<(), SyncError> {
    let current = state.accounts.theme().await?;
    let next = match value {
        "true" => {
            match current {
                Some(Theme::Dark) => println!("dark"),
                Some(Theme::Light) => println!("light"),
                None => println!("not set"),
            }
            return Ok(());
        }
        "toggle" => current.unwrap_or(Theme::Light).toggled(),
        "dark" => Theme::Dark,
        "light" => Theme::Light,
        other => {
            return Err(SyncError::ValidationError(format!("Invalid theme: {}", other)));
        }
    };
    state.accounts.set_theme(next).await?;
    println!("Theme saved");
    Ok(())
}

async fn watch(options: AppOptions, state: Arc<AppState>) -> Result<(), SyncError> {
    let actions = state.actions.clone();
    let interval = options.refresher.interval;
    let printer = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            print_rows(&actions);
        }
    });

    let result = run(options, state, await_shutdown_signal()).await;
    printer.abort();
    result
}

// ================================= HELPERS ====================================== //

fn require<'a>(args: &'a CliArgs, key: &str) -> Result<&'a str, SyncError> {
    args.get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty() && *value != "true")
        .ok_or_else(|| SyncError::ValidationError(format!("missing --{}=<value>", key)))
}

fn parse_id(args: &CliArgs) -> Result<Uuid, SyncError> {
    let raw = require(args, "id")?;
    Uuid::parse_str(raw).map_err(|e| SyncError::ValidationError(format!("Invalid id {}: {}", raw, e)))
}

fn parse_u32(args: &CliArgs, key: &str) -> Result<u32, SyncError> {
    let raw = require(args, key)?;
    raw.parse::<u32>()
        .map_err(|_| SyncError::ValidationError(format!("--{} must be a whole number", key)))
}

fn password(args: &CliArgs) -> Result<SecretString, SyncError> {
    let raw = match args.get("password") {
        Some(password) => password.clone(),
        None => env::var("TENANT_SYNC_PASSWORD").map_err(|_| {
            SyncError::ValidationError(
                "missing --password=<value> or TENANT_SYNC_PASSWORD".to_string(),
            )
        })?,
    };
    Ok(SecretString::from(raw))
}

fn colored_status(status: DeploymentStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        DeploymentStatus::Ready => label.green(),
        DeploymentStatus::Creating => label.yellow(),
        DeploymentStatus::Error => label.red(),
        DeploymentStatus::Deleting => label.magenta(),
        DeploymentStatus::Unknown => label.dimmed(),
    }
}

fn print_progress(snapshot: &StatusSnapshot) {
    println!(
        "  {} {}/{} ready",
        colored_status(snapshot.status),
        snapshot.ready_replicas.unwrap_or(0),
        snapshot.replicas.unwrap_or(0)
    );
}

fn print_details(details: &DeploymentDetails) {
    let report = &details.report;
    println!(
        "replicas: {}/{} ready, {} endpoints",
        report.ready_replicas.unwrap_or(0),
        report.replicas.unwrap_or(0),
        report.endpoints.unwrap_or(0)
    );

    for pod in &details.pods {
        println!(
            "pod {} {} on {}",
            pod.name.bold(),
            pod.phase.as_deref().unwrap_or("Unknown"),
            pod.node.as_deref().unwrap_or("-")
        );
        for container in &pod.containers {
            let ready = if container.ready { "ready".green() } else { "not ready".red() };
            println!("  {} {} ({} restarts)", container.name, ready, container.restarts);
        }
        for condition in pod.conditions.iter().filter(|c| c.status != "True") {
            println!(
                "  {} {}: {}",
                condition.kind.yellow(),
                condition.reason.as_deref().unwrap_or(""),
                condition.message.as_deref().unwrap_or("")
            );
        }
    }

    if !details.events.is_empty() {
        println!("events:");
    }
    for event in &details.events {
        let kind = event.kind.as_deref().unwrap_or("Normal");
        let kind = if kind == "Warning" { kind.red() } else { kind.normal() };
        println!(
            "  {} {} {} (x{})",
            kind,
            event.reason.as_deref().unwrap_or(""),
            event.message.as_deref().unwrap_or(""),
            event.count.unwrap_or(1)
        );
    }
}

fn print_rows(actions: &PendingActionRegistry) {
    let rows: Vec<DeploymentRow> = actions.rows();
    if rows.is_empty() {
        println!("No deployments");
        return;
    }

    println!(
        "{:<36}  {:<24}  {:<7}  {:<9}  {:<7}  {}",
        "ID", "NAME", "SERVER", "STATUS", "READY", "URL"
    );
    for row in rows {
        println!(
            "{:<36}  {:<24}  {:<7}  {:<9}  {:<7}  {}",
            row.id,
            row.display_name,
            row.server_type.to_string(),
            colored_status(row.status),
            format!("{}/{}", row.ready_replicas, row.replicas),
            row.url.unwrap_or_default()
        );
        if let Some(error) = row.last_error.filter(|_| row.status == DeploymentStatus::Error) {
            println!("    {}", error.red());
        }
    }
}

/// Prints notifications as they happen
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        let line = notification.to_string();
        match notification {
            Notification::Ready { .. } | Notification::Deleted { .. } | Notification::Scaled { .. } => {
                println!("{}", line.green())
            }
            Notification::DeleteFailed { .. } | Notification::ScaleFailed { .. } => {
                eprintln!("{}", line.red())
            }
            _ => println!("{}", line.cyan()),
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl+C received, shutting down...");
                    }
                }
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
