use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use futures::Future;
use log::{info, trace, warn};
use rand::Rng;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::{client::Client, server::Server};

/// Chance that an unreliable network loses a request, and separately a reply.
const DROP_RATE: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct NetworkPackage {
    pub to: String,
    pub reply: Sender<String>,
    pub data: String,
}

#[derive(Debug, Default)]
struct Faults {
    unreliable: AtomicBool,
    disabled: Mutex<HashSet<String>>,
}

/// Handle used to register services and inject faults.
#[derive(Clone)]
pub struct Network {
    pub tx: Sender<NetworkPackage>,
    pub nodes: Arc<Mutex<HashMap<String, Sender<NetworkPackage>>>>,
    faults: Arc<Faults>,
}

/// Delivery loop moving packages from callers to registered nodes.
pub struct Router {
    rx: Receiver<NetworkPackage>,
    nodes: Arc<Mutex<HashMap<String, Sender<NetworkPackage>>>>,
    faults: Arc<Faults>,
}

impl Network {
    pub fn new() -> (Self, Router) {
        let (tx, rx) = mpsc::channel(100);
        let nodes = Arc::new(Mutex::new(HashMap::default()));
        let faults = Arc::new(Faults::default());
        (
            Self {
                tx,
                nodes: nodes.clone(),
                faults: faults.clone(),
            },
            Router { rx, nodes, faults },
        )
    }

    /// Returns a client for `id` and the routine serving it. The routine
    /// rebuilds the service with `f` whenever a handler fails, which is how
    /// a crash with loss of all in-memory state looks from outside.
    pub fn register_service<S, C, F, V>(&self, id: String, f: F) -> (C, impl Future<Output = ()>)
    where
        F: Fn() -> V,
        S: Server<Service = V> + Send + 'static,
        C: Client,
    {
        let client = C::from_server(id.clone(), self.tx.clone());
        let nodes = self.nodes.clone();
        (client, async move {
            loop {
                let mut server = S::from_service(f());
                nodes
                    .lock()
                    .unwrap()
                    .insert(id.clone(), server.client_chan());
                if let Ok(_) = server.run().await {
                    break;
                } else {
                    info!("server {} restart", id);
                }
            }
        })
    }

    /// Waits until the routine for `id` has been polled at least once.
    pub async fn wait_registered(&self, id: &str) {
        while !self.nodes.lock().unwrap().contains_key(id) {
            tokio::task::yield_now().await;
        }
    }

    /// In unreliable mode requests and replies are randomly lost.
    pub fn set_reliable(&self, reliable: bool) {
        self.faults.unreliable.store(!reliable, Ordering::SeqCst);
    }

    /// A disabled node receives nothing; its own outgoing calls still work.
    pub fn enable(&self, id: &str, enabled: bool) {
        let mut disabled = self.faults.disabled.lock().unwrap();
        if enabled {
            disabled.remove(id);
        } else {
            disabled.insert(id.to_owned());
        }
    }
}

impl Router {
    pub async fn run(mut self) {
        loop {
            let mut p = self
                .rx
                .recv()
                .await
                .expect("sender cannot be dropped by itself");

            if self.faults.disabled.lock().unwrap().contains(&p.to) {
                trace!("{} disabled, dropped", p.to);
                continue;
            }

            if self.faults.unreliable.load(Ordering::SeqCst) {
                if rand::thread_rng().gen_bool(DROP_RATE) {
                    trace!("request to {} lost", p.to);
                    continue;
                }
                let lose_reply = rand::thread_rng().gen_bool(DROP_RATE);
                let (tx, mut rx) = mpsc::channel(1);
                let reply = std::mem::replace(&mut p.reply, tx);
                tokio::spawn(async move {
                    if let Some(resp) = rx.recv().await {
                        if lose_reply {
                            trace!("reply lost");
                        } else {
                            let _ = reply.send(resp).await;
                        }
                    }
                });
            }

            let node = {
                let x = self.nodes.lock().unwrap();
                x.get(&p.to).map(|x| x.clone())
            };

            if let Some(x) = node {
                if x.send(p).await.is_err() {
                    warn!("send to node failed, dropped");
                }
            } else {
                warn!("node {} not found", p.to);
            }
        }
    }
}
