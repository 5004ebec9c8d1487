use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use refmon_core::audit::{AuditLog, AuditLogger};
use refmon_core::credential::{CredentialGate, PasswordDigest};
use refmon_core::dispatch::InterceptionDispatcher;
use refmon_core::ipc::IpcServer;
use refmon_core::paths::PASSWORD_ENV;
use refmon_core::probes::{registrations, LoggedProbes, ProbeTable};
use refmon_core::settings::MonitorSettings;
use refmon_core::{MonitorState, ReferenceMonitor};
use refmon_service::handler::MonitorHandler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reference monitor service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitor and serve the management socket
    Run {
        /// JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        socket: Option<PathBuf>,
        /// Audit log file
        #[arg(long)]
        log_path: Option<PathBuf>,
        /// Override the configured initial state (on, off, rec-on, rec-off)
        #[arg(long)]
        initial_state: Option<MonitorState>,
        /// Hex SHA-256 of the administrator password, instead of a prompt
        #[arg(long)]
        password_digest: Option<String>,
    },
    /// Print the digest of a password, for --password-digest
    Digest,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            socket,
            log_path,
            initial_state,
            password_digest,
        } => {
            let mut settings = MonitorSettings::load_or_default(config.as_deref())?;
            if socket.is_some() {
                settings.socket_path = socket;
            }
            if log_path.is_some() {
                settings.log_path = log_path;
            }
            if let Some(state) = initial_state {
                settings.initial_state = state;
            }
            run_command(settings, password_digest).await
        }
        Commands::Digest => {
            let password = prompt_password("Password: ")?;
            println!("{}", PasswordDigest::from_secret(&password).to_hex());
            Ok(())
        }
    }
}

async fn run_command(settings: MonitorSettings, digest_hex: Option<String>) -> Result<()> {
    let digest = match digest_hex {
        Some(hex) => PasswordDigest::from_hex(&hex)?,
        None => {
            let password = prompt_password("Administrator password: ")?;
            PasswordDigest::from_secret(&password)
        }
    };
    let gate = CredentialGate::new(digest, settings.admin_euid);
    let probes = ProbeTable::new(registrations(&settings.probe_symbols), Arc::new(LoggedProbes));
    let monitor = Arc::new(ReferenceMonitor::new(settings.initial_state, gate, probes));

    let log_path = settings.resolved_log_path()?;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let (logger, worker) = AuditLogger::spawn(AuditLog::new(&log_path))?;
    info!(log = %log_path.display(), "audit worker started");

    let dispatcher = InterceptionDispatcher::new(monitor.clone(), Arc::new(logger));
    let handler = Arc::new(MonitorHandler::new(dispatcher));
    let server = Arc::new(IpcServer::new(settings.resolved_socket_path()?));
    let listener = server.bind()?;
    let server_task = {
        let server = server.clone();
        let handler = handler.clone();
        tokio::spawn(async move { server.serve(listener, handler).await })
    };

    info!(state = %monitor.query_state(), "service started");
    signal::ctrl_c().await?;
    info!("service stopping");
    server_task.abort();
    drop(handler);
    monitor.teardown();
    if let Err(e) = std::fs::remove_file(server.socket_path()) {
        warn!(error = %e, "could not remove management socket");
    }

    // Connections still open keep the audit queue alive; do not wait forever.
    match tokio::time::timeout(
        Duration::from_secs(2),
        tokio::task::spawn_blocking(move || worker.join()),
    )
    .await
    {
        Ok(Ok(written)) => info!(written, "audit worker drained"),
        Ok(Err(e)) => warn!(error = %e, "audit worker join failed"),
        Err(_) => warn!("audit worker still busy at shutdown"),
    }
    Ok(())
}

fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            std::env::remove_var(PASSWORD_ENV);
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    if pw.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    Ok(Zeroizing::new(pw))
}
