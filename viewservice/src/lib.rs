#![deny(missing_docs)]
#![deny(clippy::all)]
//! View service: decides which server is primary and which is backup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Numbered assignment of the primary and backup roles.
///
/// An empty string means the role is unassigned.
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// Increases by one on every role change.
    pub viewnum: u64,
    /// Server allowed to serve clients.
    pub primary: String,
    /// Server receiving the primary's writes.
    pub backup: String,
}

/// Timing shared by the view service, the replicas and their clients.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Heartbeat period, also the period of every `tick`.
    pub ping_interval: Duration,
    /// Missed heartbeats after which a server is considered dead.
    pub dead_pings: u32,
    /// Upper bound on any single RPC.
    pub rpc_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(100),
            dead_pings: 5,
            rpc_timeout: Duration::from_millis(250),
        }
    }
}

impl Config {
    /// Silence after which a server must stop trusting its last view.
    pub fn dead_timeout(&self) -> Duration {
        self.ping_interval * self.dead_pings
    }
}

labrpc::service! {
    service view_svc {
        fn ping(me: String, viewnum: u64) -> View;
        fn get() -> View;
    }
}

pub use view_svc::{Client as ViewClient, Server as ViewServer, Service as ViewService};

mod coordinator;


pub use coordinator::Coordinator;
