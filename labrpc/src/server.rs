use std::time::Duration;

use crate::network::NetworkPackage;
use anyhow::Result;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{self, Interval, MissedTickBehavior};

#[async_trait::async_trait]
pub trait Server {
    type Service;
    fn from_service(svc: Self::Service) -> Self;
    fn client_chan(&self) -> Sender<NetworkPackage>;
    async fn handle(&mut self) -> Result<()>;
    async fn run(&mut self) -> Result<()> {
        loop {
            self.handle().await?;
        }
    }
}

/// What woke the server loop up.
#[derive(Debug)]
pub enum Event {
    Request(NetworkPackage),
    Tick,
    Closed,
}

/// Periodic timer driving `Service::tick`. Late ticks are delayed, not bunched.
pub fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Waits for the next request, or the next tick when a ticker is present.
pub async fn next_event(rx: &mut Receiver<NetworkPackage>, ticker: Option<&mut Interval>) -> Event {
    match ticker {
        Some(ticker) => tokio::select! {
            p = rx.recv() => p.map_or(Event::Closed, Event::Request),
            _ = ticker.tick() => Event::Tick,
        },
        None => rx.recv().await.map_or(Event::Closed, Event::Request),
    }
}
