use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use refmon_core::dispatch::{InterceptedCall, OpenFlags};
use refmon_core::identity::CallerIdentity;
use refmon_core::ipc::{IpcRequest, IpcResponse};
use refmon_core::ipc_client::IpcClient;
use refmon_core::matcher;
use refmon_core::paths::{ipc_socket_path, PASSWORD_ENV};
use refmon_core::probes::FsOperation;
use refmon_core::MonitorState;
use std::path::PathBuf;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "refmon")]
#[command(about = "Manage the reference monitor service", long_about = None)]
struct Cli {
    /// Management socket (defaults to $REFMON_SOCKET, then the data directory)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Administrator password (defaults to $REFMON_PASSWORD, then a prompt)
    #[arg(long, global = true)]
    password: Option<String>,

    /// Print responses as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Switch the operating state (on, off, rec-on, rec-off or 0-3)
    SwitchState { state: String },

    /// Add a path to the blacklist
    Add { path: String },

    /// Remove a path from the blacklist
    Remove { path: String },

    /// Show the current state
    State,

    /// Show the number of blacklisted paths
    Size,

    /// List blacklisted paths
    List,

    /// Ask the service whether an operation on a path would be blocked
    Check {
        path: String,
        #[arg(long, value_enum, default_value = "open")]
        op: CheckOp,
        /// New path, for rename and link
        #[arg(long)]
        to: Option<String>,
        /// Check a read-only open instead of a write
        #[arg(long)]
        read_only: bool,
    },

    /// Check the service is reachable
    Ping,
}

#[derive(Clone, Copy, ValueEnum)]
enum CheckOp {
    Open,
    Write,
    Create,
    Unlink,
    Rename,
    Mkdir,
    Rmdir,
    Link,
    Symlink,
    Lseek,
}

impl From<CheckOp> for FsOperation {
    fn from(op: CheckOp) -> Self {
        match op {
            CheckOp::Open => FsOperation::Open,
            CheckOp::Write => FsOperation::Write,
            CheckOp::Create => FsOperation::Create,
            CheckOp::Unlink => FsOperation::Unlink,
            CheckOp::Rename => FsOperation::Rename,
            CheckOp::Mkdir => FsOperation::Mkdir,
            CheckOp::Rmdir => FsOperation::Rmdir,
            CheckOp::Link => FsOperation::Link,
            CheckOp::Symlink => FsOperation::Symlink,
            CheckOp::Lseek => FsOperation::Lseek,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = match &cli.socket {
        Some(p) => p.clone(),
        None => ipc_socket_path()?,
    };
    let mut client = IpcClient::connect(&socket, "refmon-cli").await?;

    let request = match &cli.command {
        Commands::SwitchState { state } => IpcRequest::SwitchState {
            state: parse_state(state)?,
            password: password(&cli)?.to_string(),
        },
        Commands::Add { path } => IpcRequest::AddToBlacklist {
            path: absolute(path)?,
            password: password(&cli)?.to_string(),
        },
        Commands::Remove { path } => IpcRequest::RemoveFromBlacklist {
            path: absolute(path)?,
            password: password(&cli)?.to_string(),
        },
        Commands::State => IpcRequest::QueryState,
        Commands::Size => IpcRequest::GetBlacklistSize,
        Commands::List => IpcRequest::PrintBlacklist,
        Commands::Check {
            path,
            op,
            to,
            read_only,
        } => {
            let caller = CallerIdentity::current();
            let op = FsOperation::from(*op);
            let mut call = if op == FsOperation::Open {
                let flags = if *read_only {
                    OpenFlags::READ_ONLY
                } else {
                    OpenFlags::WRITE_ONLY
                };
                InterceptedCall::open(path.clone(), flags, caller)
            } else {
                InterceptedCall::new(op, path.clone(), caller)
            };
            if let Some(to) = to {
                call = call.with_secondary(to.clone());
            }
            IpcRequest::Intercept {
                call: call.with_cwd(std::env::current_dir()?),
            }
        }
        Commands::Ping => IpcRequest::Ping,
    };

    let response = client.send_request(request).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        if let IpcResponse::Failure { code, .. } = response {
            std::process::exit(code.errno());
        }
        return Ok(());
    }
    print_response(response)
}

fn print_response(response: IpcResponse) -> Result<()> {
    match response {
        IpcResponse::Pong => println!("pong"),
        IpcResponse::Ok => println!("ok"),
        IpcResponse::State { state } => println!("{} ({})", state, state.as_raw()),
        IpcResponse::Size { size } => println!("{size}"),
        IpcResponse::Blacklist { entries } => {
            if entries.is_empty() {
                println!("blacklist is empty");
            }
            for entry in entries {
                println!("{:?}\t{}", entry.kind, entry.path);
            }
        }
        IpcResponse::Verdict { verdict, errno } => {
            if verdict.is_denied() {
                println!("denied (errno {errno})");
            } else {
                println!("allowed");
            }
        }
        IpcResponse::Failure { code, message } => {
            eprintln!("refmon: {message}");
            std::process::exit(code.errno());
        }
    }
    Ok(())
}

/// Numbers are passed through unchanged so the service can reject them.
fn parse_state(raw: &str) -> Result<i32> {
    if let Ok(n) = raw.trim().parse::<i32>() {
        return Ok(n);
    }
    let state: MonitorState = raw.parse().map_err(|e| anyhow!("{e}"))?;
    Ok(state.as_raw())
}

/// The service resolves relative paths against its own directory, so send
/// ours instead, resolved the same way the service would.
fn absolute(path: &str) -> Result<String> {
    if path.starts_with(matcher::SEPARATOR) || path.is_empty() {
        return Ok(path.to_string());
    }
    let cwd = std::env::current_dir()?;
    Ok(matcher::resolve_relative(path, &cwd))
}

fn password(cli: &Cli) -> Result<Zeroizing<String>> {
    if let Some(pw) = &cli.password {
        return Ok(Zeroizing::new(pw.clone()));
    }
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password("Monitor password: ")
        .map_err(|e| anyhow!("password prompt: {e}"))?;
    Ok(Zeroizing::new(pw))
}
