//! Collaborator: gossip rounds, peer reaping, and batch dispatch.
//!
//! The collaborator is the node's control loop. On every syn tick it
//! runs a catchup round against a bounded set of live peers; on every
//! expiry tick it reaps peers marked not-alive. `sync_distribute` spreads
//! a batch over the current membership view and collects one result per
//! index.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use collab_core::{Card, CollabConfig, Task};
use collab_scheduler::Scheduler;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::case::Case;
use crate::error::{ClusterError, ClusterResult};
use crate::executor::Executor;
use crate::message::{CardMessage, MessageType};
use crate::transport::Transport;

/// Timing and fan-out knobs for a collaborator.
#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    /// Maximum peers contacted per catchup round.
    pub gossip_num: usize,
    pub syn_interval: Duration,
    /// Period of the dead-peer reaper.
    pub collaborator_expiry: Duration,
    /// Deadline for a single remote call.
    pub remote_timeout: Duration,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self::from(&CollabConfig::default())
    }
}

impl From<&CollabConfig> for CollaboratorConfig {
    fn from(config: &CollabConfig) -> Self {
        Self {
            gossip_num: config.gossip.gossip_num,
            syn_interval: config.syn_interval(),
            collaborator_expiry: config.collaborator_expiry(),
            remote_timeout: config.remote_timeout(),
        }
    }
}

/// Outcome of one catchup round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchupReport {
    pub contacted: usize,
    /// Rounds that adopted the peer's newer digest.
    pub merged: usize,
    pub marked_down: usize,
    /// Rounds rejected by the peer or ended early.
    pub failed: usize,
}

pub struct Collaborator<T: Transport> {
    case: Arc<Case>,
    scheduler: Arc<Scheduler>,
    transport: Arc<T>,
    config: CollaboratorConfig,
    /// Rotates the starting peer between rounds.
    round: AtomicUsize,
}

impl<T: Transport> Collaborator<T> {
    pub fn new(
        case: Arc<Case>,
        scheduler: Arc<Scheduler>,
        transport: Arc<T>,
        config: CollaboratorConfig,
    ) -> Self {
        Self {
            case,
            scheduler,
            transport,
            config,
            round: AtomicUsize::new(0),
        }
    }

    pub fn case(&self) -> &Arc<Case> {
        &self.case
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &CollaboratorConfig {
        &self.config
    }

    // ── Gossip ─────────────────────────────────────────────────────

    /// Gossip with up to `gossip_num` live peers. A `gossip_num` of 0
    /// disables gossip.
    ///
    /// A peer that cannot be reached is marked not-alive. A peer that
    /// rejects the round is left as is.
    pub async fn catchup(&self) -> CatchupReport {
        let mut eligible: Vec<Card> = self
            .case
            .peers()
            .into_iter()
            .filter(|c| c.alive && !self.case.is_local(c))
            .collect();

        let mut report = CatchupReport::default();
        if self.config.gossip_num == 0 {
            debug!("gossip disabled");
            return report;
        }
        if eligible.is_empty() {
            debug!("no peers to gossip with");
            return report;
        }

        let offset = self.round.fetch_add(1, Ordering::Relaxed) % eligible.len();
        eligible.rotate_left(offset);
        eligible.truncate(self.config.gossip_num);

        for peer in &eligible {
            report.contacted += 1;
            match self.gossip_with(peer).await {
                Ok(merged) => {
                    if merged {
                        report.merged += 1;
                    }
                }
                Err(e) if e.is_connection() => {
                    warn!(%peer, error = %e, "peer unreachable");
                    match self.case.mark_down(&peer.identity()) {
                        Ok(_) => report.marked_down += 1,
                        Err(e) => warn!(%peer, error = %e, "failed to persist peer down"),
                    }
                }
                Err(e) => {
                    warn!(%peer, error = %e, "gossip round failed");
                    report.failed += 1;
                }
            }
        }

        debug!(
            contacted = report.contacted,
            merged = report.merged,
            marked_down = report.marked_down,
            failed = report.failed,
            "catchup round finished"
        );
        report
    }

    /// One SYNC, ACK, ACK2, ACK3 round. Returns true if the local view
    /// adopted the peer's digest.
    async fn gossip_with(&self, peer: &Card) -> ClusterResult<bool> {
        let before = self.case.digest().timestamp;

        let sync = self.case.message(peer, MessageType::Sync);
        let ack = self.call(peer, sync).await?.ok_or(ClusterError::RoundAborted)?;
        ack.check_status()?;
        if ack.msg_type != MessageType::Ack {
            return Err(ClusterError::UnknownMsgType(ack.msg_type.into()));
        }

        let ack2 = self.case.exchange(&ack).ok_or(ClusterError::RoundAborted)?;
        ack2.check_status()?;
        let merged = self.case.digest().timestamp != before;

        if let Some(ack3) = self.call(peer, ack2).await? {
            ack3.check_status()?;
            self.case.exchange(&ack3);
        }
        Ok(merged)
    }

    async fn call(&self, peer: &Card, msg: CardMessage) -> ClusterResult<Option<CardMessage>> {
        tokio::time::timeout(self.config.remote_timeout, self.transport.exchange(peer, msg))
            .await
            .map_err(|_| ClusterError::Connection(format!("{peer}: exchange timed out")))?
    }

    /// Drop every peer marked not-alive from the local view.
    pub fn clean(&self) -> ClusterResult<Vec<Card>> {
        let removed = self.case.clean()?;
        for card in &removed {
            info!(peer = %card, "dead peer reaped");
        }
        Ok(removed)
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Spread a batch across the membership view and wait for all of it.
    ///
    /// Fails only with `NoPeers`. Unreachable or slow peers cost a local
    /// rerun, never a missing index; each index is recorded at most once.
    pub async fn sync_distribute(
        self: &Arc<Self>,
        tasks: BTreeMap<usize, Task>,
    ) -> ClusterResult<BTreeMap<usize, Task>> {
        let peers = self.case.peers();
        if peers.is_empty() {
            return Err(ClusterError::NoPeers);
        }

        let total = tasks.len();
        let (tx, mut rx) = mpsc::channel(total.max(1));
        for (idx, task) in tasks {
            let executor = Executor::place(&self.case, &peers, idx, &task);
            let this = Arc::clone(self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let done = executor
                    .execute(
                        idx,
                        task,
                        &this.scheduler,
                        this.transport.as_ref(),
                        this.config.remote_timeout,
                    )
                    .await;
                let _ = tx.send((idx, done)).await;
            });
        }
        drop(tx);

        info!(tasks = total, peers = peers.len(), "dispatching batch");
        let step = (total / 10).max(1);
        let mut results = BTreeMap::new();
        while let Some((idx, task)) = rx.recv().await {
            match results.entry(idx) {
                Entry::Vacant(slot) => {
                    slot.insert(task);
                }
                Entry::Occupied(_) => {
                    warn!(index = idx, "duplicate result discarded");
                    continue;
                }
            }
            if results.len() % step == 0 || results.len() == total {
                info!(done = results.len(), total, "dispatch progress");
            }
            if results.len() == total {
                break;
            }
        }

        if results.len() < total {
            warn!(done = results.len(), total, "dispatch finished with missing results");
        }
        Ok(results)
    }

    // ── Background loop ────────────────────────────────────────────

    /// Run catchup and reaping on their intervals until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut syn = tokio::time::interval(self.config.syn_interval);
        let mut reap = tokio::time::interval(self.config.collaborator_expiry);
        syn.set_missed_tick_behavior(MissedTickBehavior::Delay);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            syn_interval = ?self.config.syn_interval,
            expiry = ?self.config.collaborator_expiry,
            gossip_num = self.config.gossip_num,
            "collaborator loop started"
        );

        loop {
            tokio::select! {
                _ = syn.tick() => {
                    self.catchup().await;
                }
                _ = reap.tick() => {
                    if let Err(e) = self.clean() {
                        warn!(error = %e, "failed to reap dead peers");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("collaborator loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use collab_core::Digest;
    use collab_scheduler::HandlerRegistry;
    use serde_json::json;

    fn card(port: u16) -> Card {
        Card::new("127.0.0.1", port)
    }

    fn scheduler(tag: &'static str) -> Arc<Scheduler> {
        let registry = HandlerRegistry::new();
        registry.register("tag", move |source, result, _| {
            result.extend(source.iter().cloned());
            result.push(json!(tag));
            true
        });
        let scheduler = Scheduler::new(registry).with_task_expire(Duration::from_secs(2));
        scheduler.batch_attach(2);
        scheduler.launch_all().unwrap();
        Arc::new(scheduler)
    }

    fn config() -> CollaboratorConfig {
        CollaboratorConfig {
            gossip_num: 3,
            syn_interval: Duration::from_millis(50),
            collaborator_expiry: Duration::from_millis(50),
            remote_timeout: Duration::from_secs(1),
        }
    }

    fn collaborator(
        transport: &Arc<LoopbackTransport>,
        port: u16,
        seeds: &[u16],
        tag: &'static str,
    ) -> Arc<Collaborator<LoopbackTransport>> {
        let case = Arc::new(Case::new("c1", card(port), seeds.iter().map(|p| card(*p))));
        let scheduler = scheduler(tag);
        transport.register(Arc::clone(&case), Arc::clone(&scheduler));
        Arc::new(Collaborator::new(case, scheduler, Arc::clone(transport), config()))
    }

    fn batch(n: usize) -> BTreeMap<usize, Task> {
        (0..n)
            .map(|i| (i, Task::new("tag").with_source(vec![json!(i)])))
            .collect()
    }

    fn ids(case: &Case) -> Vec<String> {
        case.digest().cards.keys().cloned().collect()
    }

    #[tokio::test]
    async fn catchup_converges_two_nodes() {
        let transport = Arc::new(LoopbackTransport::new());
        let a = collaborator(&transport, 1, &[2], "a");
        let b = collaborator(&transport, 2, &[1], "b");

        let report = a.catchup().await;
        assert_eq!(report.contacted, 1);
        assert_eq!(report.marked_down, 0);
        assert_eq!(ids(a.case()), ids(b.case()));
    }

    #[tokio::test]
    async fn catchup_spreads_newer_view() {
        let transport = Arc::new(LoopbackTransport::new());
        let a = collaborator(&transport, 1, &[2], "a");
        let b = collaborator(&transport, 2, &[], "b");
        // `a` learned about a third node more recently than `b` changed.
        a.case()
            .merge(&Digest {
                cards: [card(1), card(2), card(3)].into_iter().map(|c| (c.identity(), c)).collect(),
                timestamp: b.case().digest().timestamp + 5,
            })
            .unwrap();

        a.catchup().await;
        assert_eq!(ids(b.case()), vec!["127.0.0.1:1", "127.0.0.1:2", "127.0.0.1:3"]);
    }

    #[tokio::test]
    async fn catchup_marks_unreachable_peer_down_and_clean_reaps_it() {
        let transport = Arc::new(LoopbackTransport::new());
        let a = collaborator(&transport, 1, &[2], "a");

        let report = a.catchup().await;
        assert_eq!(report.marked_down, 1);
        assert!(!a.case().digest().cards["127.0.0.1:2"].alive);

        // Dead peers are no longer contacted.
        assert_eq!(a.catchup().await.contacted, 0);

        let removed = a.clean().unwrap();
        assert_eq!(removed, vec![card(2)]);
        assert_eq!(ids(a.case()), vec!["127.0.0.1:1"]);
    }

    #[tokio::test]
    async fn catchup_respects_gossip_fan_out() {
        let transport = Arc::new(LoopbackTransport::new());
        let case = Arc::new(Case::new("c1", card(1), (2..10).map(card)));
        let mut cfg = config();
        cfg.gossip_num = 2;
        let a = Collaborator::new(case, scheduler("a"), Arc::clone(&transport), cfg);

        let report = a.catchup().await;
        assert_eq!(report.contacted, 2);
        assert_eq!(report.marked_down, 2);
    }

    #[tokio::test]
    async fn zero_gossip_num_contacts_nobody() {
        let transport = Arc::new(LoopbackTransport::new());
        let case = Arc::new(Case::new("c1", card(1), (2..5).map(card)));
        let mut cfg = config();
        cfg.gossip_num = 0;
        let a = Collaborator::new(Arc::clone(&case), scheduler("a"), transport, cfg);

        let report = a.catchup().await;
        assert_eq!(report.contacted, 0);
        assert_eq!(report.marked_down, 0);
        assert!(case.peers().iter().all(|c| c.alive));
    }

    #[tokio::test]
    async fn catchup_rejected_by_other_cluster() {
        let transport = Arc::new(LoopbackTransport::new());
        let a = collaborator(&transport, 1, &[2], "a");
        let other = Arc::new(Case::new("other", card(2), []));
        transport.register(other, scheduler("b"));

        let report = a.catchup().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.marked_down, 0);
        assert!(a.case().digest().cards["127.0.0.1:2"].alive);
    }

    #[tokio::test]
    async fn sync_distribute_without_peers_fails() {
        let transport = Arc::new(LoopbackTransport::new());
        let case = Arc::new(Case::new("c1", card(1), []));
        case.mark_down("127.0.0.1:1").unwrap();
        case.clean().unwrap();
        let a = Arc::new(Collaborator::new(case, scheduler("a"), transport, config()));

        assert!(matches!(
            a.sync_distribute(batch(3)).await,
            Err(ClusterError::NoPeers)
        ));
    }

    #[tokio::test]
    async fn sync_distribute_places_by_index() {
        let transport = Arc::new(LoopbackTransport::new());
        let a = collaborator(&transport, 1, &[2], "a");
        let _b = collaborator(&transport, 2, &[1], "b");

        let results = a.sync_distribute(batch(6)).await.unwrap();
        assert_eq!(results.len(), 6);
        for (idx, task) in &results {
            let expected = if idx % 2 == 0 { "a" } else { "b" };
            assert_eq!(task.result, vec![json!(idx), json!(expected)]);
        }
    }

    #[tokio::test]
    async fn sync_distribute_falls_back_when_peers_unreachable() {
        for n in [1, 5, 50] {
            let transport = Arc::new(LoopbackTransport::new());
            let a = collaborator(&transport, 1, &[2, 3, 4], "a");

            let results = a.sync_distribute(batch(n)).await.unwrap();
            assert_eq!(results.len(), n);
            for (idx, task) in &results {
                assert_eq!(task.result, vec![json!(idx), json!("a")]);
            }
        }
    }

    #[tokio::test]
    async fn sync_distribute_skips_handlerless_tasks() {
        let transport = Arc::new(LoopbackTransport::new());
        let a = collaborator(&transport, 1, &[], "a");
        let mut tasks = batch(2);
        tasks.insert(9, Task::new("").with_source(vec![json!("raw")]));

        let results = a.sync_distribute(tasks).await.unwrap();
        assert_eq!(results[&9].result, Vec::<serde_json::Value>::new());
        assert_eq!(results[&1].result, vec![json!(1), json!("a")]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let transport = Arc::new(LoopbackTransport::new());
        let a = collaborator(&transport, 1, &[2], "a");
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&a).run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // The unreachable seed was marked down and then reaped.
        assert_eq!(ids(a.case()), vec!["127.0.0.1:1"]);
    }
}
