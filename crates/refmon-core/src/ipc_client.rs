use crate::ipc::{
    ClientHello, IpcEnvelope, IpcRequest, IpcResponse, RequestEnvelope, ResponseEnvelope,
    ServerHello, IPC_PROTOCOL_VERSION,
};
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// One management session over the service socket.
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    session_id: String,
    nonce: u64,
}

impl IpcClient {
    pub async fn connect(socket_path: &Path, client_id: &str) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .with_context(|| format!("connecting to {}", socket_path.display()))?;
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
            session_id: String::new(),
            nonce: 0,
        };
        client.handshake(client_id).await?;
        Ok(client)
    }

    async fn handshake(&mut self, client_id: &str) -> Result<()> {
        self.write(&IpcEnvelope::ClientHello(ClientHello {
            protocol_version: IPC_PROTOCOL_VERSION,
            client_id: client_id.to_string(),
        }))
        .await?;
        match self.read().await? {
            IpcEnvelope::ServerHello(ServerHello { session_id }) => {
                self.session_id = session_id;
                Ok(())
            }
            IpcEnvelope::Error { message } => Err(anyhow!("server error: {message}")),
            _ => Err(anyhow!("expected ServerHello")),
        }
    }

    pub async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.nonce += 1;
        self.write(&IpcEnvelope::Request(RequestEnvelope {
            session_id: self.session_id.clone(),
            nonce: self.nonce,
            request,
        }))
        .await?;
        match self.read().await? {
            IpcEnvelope::Response(ResponseEnvelope { nonce, response, .. }) if nonce == self.nonce => {
                Ok(response)
            }
            IpcEnvelope::Response(_) => Err(anyhow!("response nonce mismatch")),
            IpcEnvelope::Error { message } => Err(anyhow!("request failed: {message}")),
            _ => Err(anyhow!("unexpected response")),
        }
    }

    async fn write(&mut self, envelope: &IpcEnvelope) -> Result<()> {
        self.writer
            .write_all(serde_json::to_string(envelope)?.as_bytes())
            .await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read(&mut self) -> Result<IpcEnvelope> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(anyhow!("connection closed by service"));
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// Open a session, send one request and return its response.
pub async fn send_request(socket_path: &Path, request: IpcRequest) -> Result<IpcResponse> {
    let mut client = IpcClient::connect(socket_path, "refmon").await?;
    client.send_request(request).await
}
