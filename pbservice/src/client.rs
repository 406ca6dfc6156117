use labrpc::{client::Client as _, network::NetworkPackage};
use rand::{distributions::Alphanumeric, Rng};
use log::debug;
use tokio::sync::mpsc::Sender;
use viewservice::{Config, View, ViewClient};

use crate::{OpArgs, OpKind, OpReply, PbClient, Status};

/// Client of the replicated store.
///
/// Every operation gets a fresh sequence number and is retried with that
/// same number until the primary gives a definite answer, so a write lands
/// once even if replies get lost.
pub struct Clerk {
    id: String,
    seq: u64,
    net: Sender<NetworkPackage>,
    vs: ViewClient,
    view: View,
    config: Config,
}

impl Clerk {
    /// Create a clerk with a random ID.
    pub fn new(vs: String, net: Sender<NetworkPackage>, config: Config) -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        let vs = ViewClient::from_server(vs, net.clone()).with_timeout(config.rpc_timeout);
        Self {
            id,
            seq: 0,
            net,
            vs,
            view: View::default(),
            config,
        }
    }

    /// Value of `key`, or `None` if it was never written.
    pub async fn get(&mut self, key: &str) -> Option<String> {
        let reply = self.call(OpKind::Get, key, "").await;
        match reply.status {
            Status::Ok => Some(reply.value),
            _ => None,
        }
    }

    /// Set `key` to `value`.
    pub async fn put(&mut self, key: &str, value: &str) {
        self.call(OpKind::Put, key, value).await;
    }

    /// Append `value` to `key`.
    pub async fn append(&mut self, key: &str, value: &str) {
        self.call(OpKind::Append, key, value).await;
    }

    async fn call(&mut self, op: OpKind, key: &str, value: &str) -> OpReply {
        self.seq += 1;
        let args = OpArgs {
            op,
            key: key.to_owned(),
            value: value.to_owned(),
            client: self.id.clone(),
            seq: self.seq,
            source: String::new(),
        };
        loop {
            if !self.view.primary.is_empty() {
                let primary = PbClient::from_server(self.view.primary.clone(), self.net.clone())
                    .with_timeout(self.config.rpc_timeout);
                match primary.operation(args.clone()).await {
                    Ok(reply) if reply.status != Status::WrongServer => return reply,
                    Ok(_) => debug!("{} is not serving, refreshing view", self.view.primary),
                    Err(e) => debug!("call to {} failed: {}", self.view.primary, e),
                }
            }
            tokio::time::sleep(self.config.ping_interval).await;
            if let Ok(view) = self.vs.get().await {
                self.view = view;
            }
        }
    }
}
