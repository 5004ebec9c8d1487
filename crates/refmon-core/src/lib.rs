pub mod audit;
pub mod blacklist;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod ipc;
pub mod ipc_client;
pub mod matcher;
pub mod monitor;
pub mod paths;
pub mod probes;
pub mod settings;
pub mod state;

pub use error::{MonitorError, MonitorResult};
pub use monitor::ReferenceMonitor;
pub use state::MonitorState;
