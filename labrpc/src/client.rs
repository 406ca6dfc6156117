use std::time::Duration;

use tokio::sync::mpsc::Sender;

use crate::network::NetworkPackage;

/// How long a call waits for its reply before giving up on it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

pub trait Client {
    fn from_server(server_id: String, net_tx: Sender<NetworkPackage>) -> Self;
}
