use std::collections::HashMap;
use std::mem;
use std::time::Duration;

use labrpc::{anyhow::Result, client::Client as _, network::NetworkPackage};
use log::{debug, info, warn};
use tokio::sync::mpsc::Sender;
use tokio::time::Instant;
use viewservice::{Config, View, ViewClient};

use crate::{DedupTable, OpArgs, OpKind, OpReply, PbClient, PbService, PushArgs, Status};

/// One server of the replicated store. Its role comes from the last view it
/// obtained from the view service.
pub struct Replica {
    me: String,
    config: Config,
    net: Sender<NetworkPackage>,
    vs: ViewClient,
    dead: bool,

    view: View,
    prev: View,
    /// View number reported to the view service. Held back while the backup
    /// of the current view lacks our state.
    reported: u64,
    /// Backup and view number of the last push it confirmed.
    synced: Option<(String, u64)>,
    last_contact: Option<Instant>,

    store: HashMap<String, String>,
    dedup: DedupTable,
}

impl Replica {
    /// Create a replica named `me` that talks to the view service `vs` over `net`.
    pub fn new(me: String, vs: String, net: Sender<NetworkPackage>, config: Config) -> Self {
        let vs = ViewClient::from_server(vs, net.clone()).with_timeout(config.rpc_timeout);
        Self {
            me,
            config,
            net,
            vs,
            dead: false,
            view: View::default(),
            prev: View::default(),
            reported: 0,
            synced: None,
            last_contact: None,
            store: HashMap::new(),
            dedup: HashMap::new(),
        }
    }

    fn is_primary(&self) -> bool {
        self.view.primary == self.me
    }

    fn is_backup(&self) -> bool {
        self.view.backup == self.me
    }

    fn peer(&self, id: &str) -> PbClient {
        PbClient::from_server(id.to_owned(), self.net.clone()).with_timeout(self.config.rpc_timeout)
    }

    fn backup_synced(&self) -> bool {
        let backup = &self.view.backup;
        backup.is_empty()
            || *backup == self.me
            || self.synced.as_ref() == Some(&(backup.clone(), self.view.viewnum))
    }

    /// Why this replica must not take `args` right now, if it must not.
    fn rejection(&self, args: &OpArgs) -> Option<&'static str> {
        if self.dead {
            return Some("shut down");
        }
        match self.last_contact {
            None => return Some("never reached the view service"),
            Some(t) if t.elapsed() > self.config.dead_timeout() => {
                return Some("lost contact with the view service")
            }
            _ => {}
        }
        if args.source.is_empty() {
            if !self.is_primary() {
                return Some("not primary");
            }
        } else if !(self.is_backup() && args.source == self.view.primary)
            && !(self.is_primary() && args.source == self.me)
        {
            return Some("forward from a server that is not our primary");
        }
        None
    }

    fn execute(&mut self, args: &OpArgs) -> OpReply {
        match args.op {
            OpKind::Get => match self.store.get(&args.key) {
                Some(v) => OpReply::ok(v.clone()),
                None => OpReply::with_status(Status::NoKey),
            },
            OpKind::Put => {
                self.store.insert(args.key.clone(), args.value.clone());
                OpReply::ok(String::new())
            }
            OpKind::Append => {
                self.store
                    .entry(args.key.clone())
                    .or_default()
                    .push_str(&args.value);
                OpReply::ok(String::new())
            }
        }
    }

    /// Sends the whole state to the backup of the current view.
    async fn sync_backup(&mut self) -> bool {
        let backup = self.view.backup.clone();
        let args = PushArgs {
            view: self.view.clone(),
            store: self.store.clone(),
            dedup: self.dedup.clone(),
        };
        match self.peer(&backup).push(args).await {
            Ok(Status::Ok) => {
                info!("{} pushed state to {} in view {}", self.me, backup, self.view.viewnum);
                self.synced = Some((backup, self.view.viewnum));
                true
            }
            Ok(status) => {
                warn!("{} push to {} refused: {:?}", self.me, backup, status);
                false
            }
            Err(e) => {
                warn!("{} push to {} failed: {}", self.me, backup, e);
                false
            }
        }
    }

    /// Makes the backup apply `args` first. Any failure counts as a refusal.
    async fn forward(&mut self, args: &OpArgs) -> bool {
        let backup = self.view.backup.clone();
        if backup.is_empty() || backup == self.me {
            return true;
        }
        if !self.backup_synced() && !self.sync_backup().await {
            return false;
        }
        let forwarded = OpArgs {
            source: self.me.clone(),
            ..args.clone()
        };
        match self.peer(&backup).operation(forwarded).await {
            Ok(OpReply {
                status: Status::Ok, ..
            }) => true,
            Ok(reply) => {
                warn!("{} forward to {} refused: {:?}", self.me, backup, reply.status);
                false
            }
            Err(e) => {
                warn!("{} forward to {} failed: {}", self.me, backup, e);
                false
            }
        }
    }
}

#[labrpc::async_trait]
impl PbService for Replica {
    async fn operation(&mut self, args: OpArgs) -> Result<OpReply> {
        if let Some(reason) = self.rejection(&args) {
            debug!("{} rejects {:?}: {}", self.me, args, reason);
            return Ok(OpReply::with_status(Status::WrongServer));
        }
        if let Some(reply) = self.dedup.get(&args.client).and_then(|seen| seen.get(&args.seq)) {
            return Ok(reply.clone());
        }
        if args.op == OpKind::Get {
            return Ok(self.execute(&args));
        }
        if self.is_primary() && args.source.is_empty() && !self.forward(&args).await {
            return Ok(OpReply::with_status(Status::WrongServer));
        }
        let reply = self.execute(&args);
        self.dedup
            .entry(args.client)
            .or_default()
            .insert(args.seq, reply.clone());
        Ok(reply)
    }

    async fn push(&mut self, args: PushArgs) -> Result<Status> {
        if self.dead
            || !self.is_backup()
            || args.view.viewnum < self.view.viewnum
            || args.view.backup != self.me
        {
            debug!("{} rejects push for view {:?}", self.me, args.view);
            return Ok(Status::WrongServer);
        }
        self.store = args.store;
        self.dedup = args.dedup;
        if args.view.viewnum != self.view.viewnum {
            self.prev = mem::replace(&mut self.view, args.view);
        }
        Ok(Status::Ok)
    }

    async fn kill(&mut self) -> Result<()> {
        info!("{} shutting down", self.me);
        self.dead = true;
        Ok(())
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.config.ping_interval)
    }

    async fn tick(&mut self) -> Result<()> {
        if self.dead {
            return Ok(());
        }
        let view = match self.vs.ping(self.me.clone(), self.reported).await {
            Ok(view) => view,
            Err(e) => {
                debug!("{} ping failed: {}", self.me, e);
                return Ok(());
            }
        };
        self.last_contact = Some(Instant::now());
        if view.viewnum != self.view.viewnum {
            self.prev = mem::replace(&mut self.view, view);
            info!(
                "{} leaves view {} for {:?}",
                self.me, self.prev.viewnum, self.view
            );
        }
        if self.is_primary() && !self.backup_synced() {
            self.sync_backup().await;
        }
        if !self.is_primary() || self.backup_synced() {
            self.reported = self.view.viewnum;
        }
        Ok(())
    }
}
