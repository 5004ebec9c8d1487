use anyhow::Result;
use refmon_core::dispatch::InterceptionDispatcher;
use refmon_core::identity::Principal;
use refmon_core::ipc::{IpcHandler, IpcRequest, IpcResponse};
use refmon_core::{MonitorError, MonitorResult, ReferenceMonitor};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Maps management requests onto the shared monitor.
pub struct MonitorHandler {
    monitor: Arc<ReferenceMonitor>,
    dispatcher: InterceptionDispatcher,
}

impl MonitorHandler {
    pub fn new(dispatcher: InterceptionDispatcher) -> Self {
        Self {
            monitor: dispatcher.monitor().clone(),
            dispatcher,
        }
    }
}

fn unit(result: MonitorResult<()>) -> IpcResponse {
    match result {
        Ok(()) => IpcResponse::Ok,
        Err(e) => e.into(),
    }
}

#[async_trait::async_trait]
impl IpcHandler for MonitorHandler {
    async fn handle(&self, caller: Principal, req: IpcRequest) -> Result<IpcResponse> {
        let response = match req {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::QueryState => IpcResponse::State {
                state: self.monitor.query_state(),
            },
            IpcRequest::GetBlacklistSize => IpcResponse::Size {
                size: self.monitor.blacklist_size(),
            },
            IpcRequest::PrintBlacklist => IpcResponse::Blacklist {
                entries: self.monitor.enumerate_blacklist(),
            },
            IpcRequest::SwitchState { state, password } => {
                let password = Zeroizing::new(password);
                match self.monitor.switch_state(state, &password, &caller) {
                    Ok(state) => IpcResponse::State { state },
                    Err(e) => e.into(),
                }
            }
            IpcRequest::AddToBlacklist { path, password } => {
                let password = Zeroizing::new(password);
                unit(self.monitor.add_path(&path, &password, &caller))
            }
            IpcRequest::RemoveFromBlacklist { path, password } => {
                let password = Zeroizing::new(password);
                let result = self.monitor.remove_path(&path, &password, &caller);
                if let Err(e) = &result {
                    if e.is_informational() {
                        info!(%path, "removal of absent entry");
                    }
                }
                unit(result)
            }
            IpcRequest::Intercept { call } => {
                if !self.monitor.is_administrator(&caller) {
                    warn!(euid = caller.euid, "intercept request from unprivileged peer");
                    MonitorError::PermissionDenied.into()
                } else {
                    self.dispatcher.dispatch(call).into()
                }
            }
        };
        Ok(response)
    }
}
