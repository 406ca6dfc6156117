use std::collections::BTreeMap;
use std::mem;
use std::time::Duration;

use labrpc::anyhow::Result;
use log::{info, warn};

use crate::{Config, View, ViewService};

/// What the coordinator remembers about a server.
#[derive(Clone, Copy, Debug, Default)]
struct ServerRecord {
    /// Tick at which the last ping arrived.
    last_heard: u64,
    /// View number reported by the last ping.
    viewnum: u64,
    /// Reported 0 after having reported something else.
    restarted: bool,
}

/// Tracks live servers and hands out views.
///
/// Records are never removed; a server that stops pinging only stops being
/// a candidate for a role.
#[derive(Debug)]
pub struct Coordinator {
    config: Config,
    view: View,
    /// Primary of the current view has reported the current view number.
    acked: bool,
    ticks: u64,
    servers: BTreeMap<String, ServerRecord>,
}

impl Coordinator {
    /// Create a coordinator with an empty view 0.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            view: View::default(),
            acked: false,
            ticks: 0,
            servers: BTreeMap::new(),
        }
    }

    fn is_live(&self, record: &ServerRecord) -> bool {
        self.ticks - record.last_heard <= u64::from(self.config.dead_pings)
    }

    fn is_restarted(&self, id: &str) -> bool {
        self.servers.get(id).is_some_and(|r| r.restarted)
    }

    /// View number `id` reported last, if it ever pinged.
    fn reported(&self, id: &str) -> Option<u64> {
        self.servers.get(id).map(|r| r.viewnum)
    }

    /// Live servers that survived at least one ping round, by ascending ID.
    fn candidates<'a>(&'a self, except: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.servers
            .iter()
            .filter(move |(id, r)| self.is_live(r) && r.viewnum != 0 && id.as_str() != except)
            .map(|(id, _)| id)
    }

    /// Removes the primary. The backup takes over only if the outgoing
    /// primary acknowledged the current view; otherwise both roles are vacated.
    fn replace_primary(&mut self) {
        let backup = mem::take(&mut self.view.backup);
        if self.acked && !backup.is_empty() && !self.is_restarted(&backup) {
            self.view.primary = backup;
        } else {
            self.view.primary.clear();
        }
        self.acked = false;
    }

    /// Evicts `id` from whatever role it holds.
    fn evict(&mut self, id: &str, why: &str) -> bool {
        if id == self.view.primary {
            warn!("primary {} {}", id, why);
            self.replace_primary();
            true
        } else if id == self.view.backup {
            warn!("backup {} {}", id, why);
            self.view.backup.clear();
            true
        } else {
            false
        }
    }

    fn commit(&mut self, changed: bool) {
        if changed {
            self.view.viewnum += 1;
            self.acked = false;
            info!(
                "view {}: primary {:?}, backup {:?}",
                self.view.viewnum, self.view.primary, self.view.backup
            );
        }
    }
}

#[labrpc::async_trait]
impl ViewService for Coordinator {
    async fn ping(&mut self, me: String, viewnum: u64) -> Result<View> {
        let ticks = self.ticks;
        let record = self.servers.entry(me.clone()).or_default();
        record.last_heard = ticks;
        record.restarted = viewnum == 0 && (record.viewnum != 0 || record.restarted);

        let restarted = self.is_restarted(&me);
        let mut changed = restarted && self.evict(&me, "restarted");

        // A restarted server waits until it reports a view before taking a role.
        if !restarted {
            if self.view.primary.is_empty() {
                self.view.primary = me.clone();
                changed = true;
            } else if self.view.backup.is_empty() && me != self.view.primary && self.acked {
                self.view.backup = me.clone();
                changed = true;
            }
        }
        self.commit(changed);

        if let Some(record) = self.servers.get_mut(&me) {
            record.viewnum = viewnum;
        }
        if me == self.view.primary && viewnum == self.view.viewnum {
            self.acked = true;
        }

        Ok(self.view.clone())
    }

    async fn get(&mut self) -> Result<View> {
        Ok(self.view.clone())
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.config.ping_interval)
    }

    async fn tick(&mut self) -> Result<()> {
        self.ticks += 1;
        let mut changed = false;

        let dead: Vec<String> = self
            .servers
            .iter()
            .filter(|(_, r)| !self.is_live(r))
            .map(|(id, _)| id.clone())
            .collect();

        for id in dead.iter() {
            let primary = self.view.primary.clone();
            if !primary.is_empty() && self.reported(&primary) == Some(0) {
                changed |= self.evict(&primary, "has not reported a view");
            } else if *id == primary && self.acked && !self.view.backup.is_empty() {
                warn!("primary {} is dead", id);
                self.replace_primary();
                changed = true;
            }
            if *id == self.view.backup {
                warn!("backup {} is dead", id);
                self.view.backup.clear();
                changed = true;
            }
            if self.reported(id) == Some(0) {
                changed |= self.evict(id, "died before reporting a view");
            }
        }

        if self.view.primary.is_empty() {
            let next = self.candidates("").next().cloned();
            if let Some(id) = next {
                self.view.primary = id;
                changed = true;
            }
        }
        if self.view.backup.is_empty() && !self.view.primary.is_empty() && self.acked {
            let next = self.candidates(&self.view.primary).next().cloned();
            if let Some(id) = next {
                self.view.backup = id;
                changed = true;
            }
        }
        self.commit(changed);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn coordinator() -> Coordinator {
        Coordinator::new(Config::default())
    }

    /// Enough ticks for anything not pinging in between to be declared dead.
    async fn silence(c: &mut Coordinator) {
        for _ in 0..=Config::default().dead_pings {
            c.tick().await.unwrap();
        }
    }

    fn view(viewnum: u64, primary: &str, backup: &str) -> View {
        View {
            viewnum,
            primary: primary.to_owned(),
            backup: backup.to_owned(),
        }
    }

    /// Brings `c` to view 2 with s1 primary, s2 backup, acknowledged by s1.
    async fn primary_and_backup(c: &mut Coordinator) {
        c.ping("s1".into(), 0).await.unwrap();
        c.ping("s1".into(), 1).await.unwrap();
        assert_eq!(c.ping("s2".into(), 0).await.unwrap(), view(2, "s1", "s2"));
        c.ping("s1".into(), 2).await.unwrap();
        c.ping("s2".into(), 2).await.unwrap();
    }

    #[tokio::test]
    async fn test_backup_waits_for_primary_ack() {
        let mut c = coordinator();

        assert_eq!(c.ping("s1".into(), 0).await.unwrap(), view(1, "s1", ""));
        // s1 has not reported view 1 yet.
        assert_eq!(c.ping("s2".into(), 0).await.unwrap(), view(1, "s1", ""));
        assert_eq!(c.ping("s1".into(), 1).await.unwrap(), view(1, "s1", ""));
        assert_eq!(c.ping("s2".into(), 1).await.unwrap(), view(2, "s1", "s2"));
    }

    #[tokio::test]
    async fn test_get_has_no_side_effect() {
        let mut c = coordinator();
        assert_eq!(c.get().await.unwrap(), View::default());
        c.ping("s1".into(), 0).await.unwrap();
        assert_eq!(c.get().await.unwrap(), view(1, "s1", ""));
        assert_eq!(c.get().await.unwrap(), view(1, "s1", ""));
    }

    #[tokio::test]
    async fn test_backup_promoted_when_primary_dies() {
        let mut c = coordinator();
        primary_and_backup(&mut c).await;

        for _ in 0..=Config::default().dead_pings {
            c.ping("s2".into(), 2).await.unwrap();
            c.tick().await.unwrap();
        }
        assert_eq!(c.get().await.unwrap(), view(3, "s2", ""));
    }

    #[tokio::test]
    async fn test_no_promotion_without_ack() {
        let mut c = coordinator();
        c.ping("s1".into(), 0).await.unwrap();
        c.ping("s1".into(), 1).await.unwrap();
        c.ping("s2".into(), 1).await.unwrap();
        assert_eq!(c.get().await.unwrap(), view(2, "s1", "s2"));

        // s1 dies before acknowledging view 2, so s2 may lack its state.
        for _ in 0..=Config::default().dead_pings {
            c.ping("s2".into(), 2).await.unwrap();
            c.tick().await.unwrap();
        }
        assert_eq!(c.get().await.unwrap(), view(2, "s1", "s2"));
    }

    #[tokio::test]
    async fn test_dead_backup_replaced_in_one_view_change() {
        let mut c = coordinator();
        primary_and_backup(&mut c).await;
        c.ping("s3".into(), 2).await.unwrap();

        for _ in 0..=Config::default().dead_pings {
            c.ping("s1".into(), 2).await.unwrap();
            c.ping("s3".into(), 2).await.unwrap();
            c.tick().await.unwrap();
        }
        assert_eq!(c.get().await.unwrap(), view(3, "s1", "s3"));
    }

    #[tokio::test]
    async fn test_restarted_primary_loses_role_at_once() {
        let mut c = coordinator();
        primary_and_backup(&mut c).await;

        let v = c.ping("s1".into(), 0).await.unwrap();
        assert_eq!(v, view(3, "s2", ""));
        // Later pings of the restarted process do not shake the view.
        assert_eq!(c.ping("s1".into(), 0).await.unwrap(), view(3, "s2", ""));
    }

    #[tokio::test]
    async fn test_restarted_primary_without_backup_waits_for_report() {
        let mut c = coordinator();
        c.ping("s1".into(), 0).await.unwrap();
        c.ping("s1".into(), 1).await.unwrap();

        assert_eq!(c.ping("s1".into(), 0).await.unwrap(), view(2, "", ""));
        assert_eq!(c.ping("s1".into(), 0).await.unwrap(), view(2, "", ""));
        c.tick().await.unwrap();
        assert_eq!(c.get().await.unwrap(), view(2, "", ""));
        assert_eq!(c.ping("s1".into(), 2).await.unwrap(), view(3, "s1", ""));
    }

    #[tokio::test]
    async fn test_restart_before_ack_leaves_primary_to_backup() {
        let mut c = coordinator();
        c.ping("s1".into(), 0).await.unwrap();
        c.ping("s1".into(), 1).await.unwrap();
        assert_eq!(c.ping("s2".into(), 1).await.unwrap(), view(2, "s1", "s2"));

        // s1 never acknowledged view 2, so s2 is not promoted on the spot.
        let v = c.ping("s1".into(), 0).await.unwrap();
        assert_eq!(v, view(3, "", ""));
        c.ping("s2".into(), 2).await.unwrap();
        c.tick().await.unwrap();
        assert_eq!(c.get().await.unwrap(), view(4, "s2", ""));
    }

    #[tokio::test]
    async fn test_primary_dying_before_report_is_replaced() {
        let mut c = coordinator();
        assert_eq!(c.ping("s1".into(), 0).await.unwrap(), view(1, "s1", ""));

        for _ in 0..=Config::default().dead_pings {
            c.ping("s2".into(), 1).await.unwrap();
            c.tick().await.unwrap();
        }
        assert_eq!(c.get().await.unwrap(), view(2, "s2", ""));
    }

    #[tokio::test]
    async fn test_unreported_primary_cleared_when_anyone_times_out() {
        let mut c = coordinator();
        c.ping("s2".into(), 1).await.unwrap();
        assert_eq!(c.ping("s2".into(), 0).await.unwrap(), view(2, "", ""));
        assert_eq!(c.ping("s1".into(), 0).await.unwrap(), view(3, "s1", ""));

        // s1 keeps reporting 0 while s2 goes silent.
        for _ in 0..=Config::default().dead_pings {
            c.ping("s1".into(), 0).await.unwrap();
            c.tick().await.unwrap();
        }
        assert_eq!(c.get().await.unwrap(), view(4, "", ""));
    }

    #[tokio::test]
    async fn test_restarted_backup_is_dropped_then_readmitted() {
        let mut c = coordinator();
        primary_and_backup(&mut c).await;

        assert_eq!(c.ping("s2".into(), 0).await.unwrap(), view(3, "s1", ""));
        c.ping("s1".into(), 3).await.unwrap();
        assert_eq!(c.ping("s2".into(), 3).await.unwrap(), view(4, "s1", "s2"));
    }

    #[tokio::test]
    async fn test_fresh_primary_repeating_zero_is_not_a_restart() {
        let mut c = coordinator();
        c.ping("s1".into(), 0).await.unwrap();
        assert_eq!(c.ping("s1".into(), 0).await.unwrap(), view(1, "s1", ""));
    }

    #[tokio::test]
    async fn test_idle_server_becomes_backup_on_tick() {
        let mut c = coordinator();
        c.ping("s1".into(), 0).await.unwrap();
        c.ping("s3".into(), 0).await.unwrap();
        c.ping("s2".into(), 1).await.unwrap();
        c.ping("s3".into(), 1).await.unwrap();
        c.ping("s1".into(), 1).await.unwrap();

        c.tick().await.unwrap();
        // Lowest eligible ID wins.
        assert_eq!(c.get().await.unwrap(), view(2, "s1", "s2"));
    }

    #[tokio::test]
    async fn test_everyone_dead_changes_view_once() {
        let mut c = coordinator();
        primary_and_backup(&mut c).await;
        silence(&mut c).await;
        // s1 is swept first and hands over to s2, which nobody can replace.
        assert_eq!(c.get().await.unwrap(), view(3, "s2", ""));
        silence(&mut c).await;
        assert_eq!(c.get().await.unwrap(), view(3, "s2", ""));
    }

    #[tokio::test]
    async fn test_viewnum_never_decreases() {
        let mut c = coordinator();
        let ids = ["s1", "s2", "s3"];
        let mut known = [0u64; 3];
        let mut last = 0;

        for _ in 0..2000 {
            let (i, restart, tick) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(0..3), rng.gen_bool(0.02), rng.gen_bool(0.3))
            };
            if restart {
                known[i] = 0;
            }
            let v = if tick {
                c.tick().await.unwrap();
                c.get().await.unwrap()
            } else {
                let v = c.ping(ids[i].into(), known[i]).await.unwrap();
                known[i] = v.viewnum;
                v
            };
            assert!(v.viewnum >= last);
            assert!(v.primary.is_empty() || v.primary != v.backup);
            last = v.viewnum;
        }
    }
}
