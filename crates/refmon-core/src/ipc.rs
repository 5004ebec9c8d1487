use crate::blacklist::BlacklistEntry;
use crate::dispatch::{InterceptedCall, Verdict};
use crate::error::{ErrorCode, MonitorError};
use crate::identity::Principal;
use crate::state::MonitorState;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const IPC_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub protocol_version: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHello {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IpcEnvelope {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Error { message: String },
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub request: IpcRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub session_id: String,
    pub nonce: u64,
    pub response: IpcResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "request", content = "data")]
pub enum IpcRequest {
    Ping,
    QueryState,
    GetBlacklistSize,
    PrintBlacklist,
    SwitchState {
        /// Raw requested state; unknown values are rejected by the monitor.
        state: i32,
        password: String,
    },
    AddToBlacklist {
        path: String,
        password: String,
    },
    RemoveFromBlacklist {
        path: String,
        password: String,
    },
    /// Verdict for a call trapped by an external interception layer.
    Intercept {
        call: InterceptedCall,
    },
}

impl IpcRequest {
    /// Name for logs; never includes the password.
    pub fn kind(&self) -> &'static str {
        match self {
            IpcRequest::Ping => "ping",
            IpcRequest::QueryState => "query_state",
            IpcRequest::GetBlacklistSize => "get_blacklist_size",
            IpcRequest::PrintBlacklist => "print_blacklist",
            IpcRequest::SwitchState { .. } => "switch_state",
            IpcRequest::AddToBlacklist { .. } => "add_to_blacklist",
            IpcRequest::RemoveFromBlacklist { .. } => "remove_from_blacklist",
            IpcRequest::Intercept { .. } => "intercept",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "response", content = "data")]
pub enum IpcResponse {
    Pong,
    State {
        state: MonitorState,
    },
    Ok,
    Size {
        size: usize,
    },
    Blacklist {
        entries: Vec<BlacklistEntry>,
    },
    Verdict {
        verdict: Verdict,
        errno: i32,
    },
    Failure {
        code: ErrorCode,
        message: String,
    },
}

impl From<MonitorError> for IpcResponse {
    fn from(err: MonitorError) -> Self {
        IpcResponse::Failure {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<Verdict> for IpcResponse {
    fn from(verdict: Verdict) -> Self {
        IpcResponse::Verdict {
            verdict,
            errno: verdict.errno(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub last_nonce: u64,
}

/// Per-session replay protection: request nonces must strictly increase.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionState>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_session(&self, session_id: String) {
        let mut guard = self.sessions.lock().await;
        guard.insert(session_id, SessionState { last_nonce: 0 });
    }

    pub async fn end_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    pub async fn verify_and_update_nonce(&self, session_id: &str, nonce: u64) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session"))?;
        if nonce <= session.last_nonce {
            return Err(anyhow!("replay detected: nonce not increasing"));
        }
        session.last_nonce = nonce;
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait IpcHandler {
    /// `caller` is the effective uid of the connected peer.
    async fn handle(&self, caller: Principal, req: IpcRequest) -> Result<IpcResponse>;
}

pub struct IpcServer {
    sessions: Arc<SessionRegistry>,
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            socket_path,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the management socket, replacing a stale one.
    pub fn bind(&self) -> Result<tokio::net::UnixListener> {
        use std::os::unix::fs::PermissionsExt;
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = tokio::net::UnixListener::bind(&self.socket_path)
            .with_context(|| format!("binding {}", self.socket_path.display()))?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;
        info!(socket = %self.socket_path.display(), "management socket listening");
        Ok(listener)
    }

    pub async fn start(self: Arc<Self>, handler: Arc<dyn IpcHandler + Send + Sync>) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, handler).await
    }

    pub async fn serve(
        self: Arc<Self>,
        listener: tokio::net::UnixListener,
        handler: Arc<dyn IpcHandler + Send + Sync>,
    ) -> Result<()> {
        loop {
            let (stream, _addr) = listener.accept().await?;
            let caller = match stream.peer_cred() {
                Ok(cred) => Principal::new(cred.uid()),
                Err(e) => {
                    warn!(error = %e, "rejecting peer without credentials");
                    continue;
                }
            };
            let sessions = self.sessions.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, caller, sessions, handler).await {
                    warn!(euid = caller.euid, error = %e, "ipc connection error");
                }
            });
        }
    }
}

async fn write_envelope<W>(writer: &mut W, envelope: &IpcEnvelope) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer
        .write_all(serde_json::to_string(envelope)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Serve one client: handshake, then request/response until EOF.
pub async fn handle_connection<S>(
    stream: S,
    caller: Principal,
    sessions: Arc<SessionRegistry>,
    handler: Arc<dyn IpcHandler + Send + Sync>,
) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(anyhow!("empty hello"));
    }
    let envelope: IpcEnvelope = serde_json::from_str(line.trim_end())?;
    let hello = match envelope {
        IpcEnvelope::ClientHello(h) => h,
        _ => return Err(anyhow!("expected ClientHello")),
    };
    if hello.protocol_version != IPC_PROTOCOL_VERSION {
        write_envelope(
            &mut writer,
            &IpcEnvelope::Error {
                message: "protocol version mismatch".to_string(),
            },
        )
        .await?;
        return Err(anyhow!("protocol version mismatch"));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    sessions.register_session(session_id.clone()).await;
    debug!(%session_id, client = %hello.client_id, euid = caller.euid, "session opened");
    write_envelope(
        &mut writer,
        &IpcEnvelope::ServerHello(ServerHello {
            session_id: session_id.clone(),
        }),
    )
    .await?;

    let result = serve_requests(&mut reader, &mut writer, &session_id, caller, &sessions, &handler).await;
    sessions.end_session(&session_id).await;
    result
}

async fn serve_requests<R, W>(
    reader: &mut R,
    writer: &mut W,
    session_id: &str,
    caller: Principal,
    sessions: &SessionRegistry,
    handler: &Arc<dyn IpcHandler + Send + Sync>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        let env: IpcEnvelope = serde_json::from_str(line.trim_end())?;
        let req_env = match env {
            IpcEnvelope::Request(r) => r,
            _ => return Err(anyhow!("expected Request envelope")),
        };
        if req_env.session_id != session_id {
            return Err(anyhow!("session mismatch"));
        }
        if let Err(e) = sessions
            .verify_and_update_nonce(session_id, req_env.nonce)
            .await
        {
            write_envelope(writer, &IpcEnvelope::Error { message: e.to_string() }).await?;
            return Err(e);
        }

        debug!(kind = req_env.request.kind(), euid = caller.euid, "ipc request");
        let envelope = match req_env.request {
            IpcRequest::Ping => response(session_id, req_env.nonce, IpcResponse::Pong),
            other => match handler.handle(caller, other).await {
                Ok(resp) => response(session_id, req_env.nonce, resp),
                Err(e) => IpcEnvelope::Error {
                    message: e.to_string(),
                },
            },
        };
        write_envelope(writer, &envelope).await?;
    }
}

fn response(session_id: &str, nonce: u64, response: IpcResponse) -> IpcEnvelope {
    IpcEnvelope::Response(ResponseEnvelope {
        session_id: session_id.to_string(),
        nonce,
        response,
    })
}
