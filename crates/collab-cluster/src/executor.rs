//! Executors: where a placed task actually runs.
//!
//! Placement resolves each task of a batch to one of three executors:
//! the local scheduler, a remote peer, or the no-op `Dummy` for tasks
//! that name no handler. Every path hands a task back; a failed remote
//! call falls back to local execution rather than dropping the task.

use std::collections::BTreeMap;
use std::time::Duration;

use collab_core::{Card, Task};
use collab_scheduler::Scheduler;
use tracing::{debug, warn};

use crate::case::Case;
use crate::transport::Transport;

/// Resolved execution target for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executor {
    Local,
    Remote(Card),
    /// Returns the task untouched.
    Dummy,
}

impl Executor {
    /// Place the task at batch index `idx` onto `peers`.
    ///
    /// `peers` must be in stable identity order; the owner is
    /// `peers[idx % peers.len()]`. Tasks owned by this node or by a peer
    /// marked not-alive run locally.
    pub fn place(case: &Case, peers: &[Card], idx: usize, task: &Task) -> Executor {
        if task.consumable.is_empty() {
            return Executor::Dummy;
        }
        if peers.is_empty() {
            return Executor::Local;
        }
        let owner = &peers[idx % peers.len()];
        if !owner.alive || case.is_local(owner) {
            Executor::Local
        } else {
            Executor::Remote(owner.clone())
        }
    }

    /// Run `task` and return it with its result populated.
    ///
    /// A remote call is bounded by `remote_timeout`; any transport error
    /// or an expired deadline reruns the task locally.
    pub async fn execute<T: Transport>(
        self,
        idx: usize,
        task: Task,
        scheduler: &Scheduler,
        transport: &T,
        remote_timeout: Duration,
    ) -> Task {
        match self {
            Executor::Dummy => task,
            Executor::Local => run_one(scheduler, idx, task).await,
            Executor::Remote(peer) => {
                let batch = BTreeMap::from([(idx, task.clone())]);
                let outcome = tokio::time::timeout(remote_timeout, transport.distribute(&peer, batch)).await;
                match outcome {
                    Ok(Ok(mut returned)) => match returned.remove(&idx) {
                        Some(done) => {
                            debug!(index = idx, %peer, "remote task returned");
                            return done;
                        }
                        None => warn!(index = idx, %peer, "peer reply missing task, running locally"),
                    },
                    Ok(Err(e)) => warn!(index = idx, %peer, error = %e, "remote call failed, running locally"),
                    Err(_) => warn!(index = idx, %peer, ?remote_timeout, "remote call timed out, running locally"),
                }
                run_one(scheduler, idx, task).await
            }
        }
    }
}

async fn run_one(scheduler: &Scheduler, idx: usize, task: Task) -> Task {
    match scheduler.done(task.clone()).await {
        Ok(completion) => completion.task,
        Err(e) => {
            warn!(index = idx, consumable = %task.consumable, error = %e, "local execution failed");
            task
        }
    }
}

/// Run a batch on the local scheduler.
///
/// Every index comes back: a task that timed out or could not be queued
/// is returned as submitted.
pub async fn run_local(scheduler: &Scheduler, tasks: BTreeMap<usize, Task>) -> BTreeMap<usize, Task> {
    let submitted = tasks.clone();
    match scheduler.done_each(tasks).await {
        Ok(outcomes) => submitted
            .into_iter()
            .map(|(idx, original)| {
                let task = match outcomes.get(&idx) {
                    Some(Ok(completion)) => completion.task.clone(),
                    Some(Err(e)) => {
                        warn!(index = idx, error = %e, "batch task failed");
                        original
                    }
                    None => original,
                };
                (idx, task)
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, tasks = submitted.len(), "batch could not be queued");
            submitted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use collab_scheduler::HandlerRegistry;
    use serde_json::json;
    use std::sync::Arc;

    fn card(port: u16) -> Card {
        Card::new("127.0.0.1", port)
    }

    fn scheduler() -> Scheduler {
        let registry = HandlerRegistry::new();
        registry.register("echo", |source, result, _| {
            result.extend(source.iter().cloned());
            true
        });
        let scheduler = Scheduler::new(registry).with_task_expire(Duration::from_secs(2));
        scheduler.batch_attach(2);
        scheduler.launch_all().unwrap();
        scheduler
    }

    #[test]
    fn placement_is_index_modulo_peer_count() {
        let case = Case::new("c1", card(1), [card(2), card(3)]);
        let peers = case.peers();
        let task = Task::new("echo");

        assert_eq!(Executor::place(&case, &peers, 0, &task), Executor::Local);
        assert_eq!(Executor::place(&case, &peers, 1, &task), Executor::Remote(card(2)));
        assert_eq!(Executor::place(&case, &peers, 2, &task), Executor::Remote(card(3)));
        assert_eq!(Executor::place(&case, &peers, 3, &task), Executor::Local);
        assert_eq!(Executor::place(&case, &peers, 4, &task), Executor::Remote(card(2)));
    }

    #[test]
    fn dead_owner_and_empty_consumable() {
        let case = Case::new("c1", card(1), [card(2)]);
        case.mark_down("127.0.0.1:2").unwrap();
        let peers = case.peers();

        assert_eq!(Executor::place(&case, &peers, 1, &Task::new("echo")), Executor::Local);
        assert_eq!(Executor::place(&case, &peers, 1, &Task::new("")), Executor::Dummy);
    }

    #[tokio::test]
    async fn unreachable_remote_falls_back_to_local() {
        let transport = LoopbackTransport::new();
        let scheduler = scheduler();
        let task = Task::new("echo").with_source(vec![json!("x")]);

        let done = Executor::Remote(card(2))
            .execute(0, task, &scheduler, &transport, Duration::from_secs(1))
            .await;
        assert_eq!(done.result, vec![json!("x")]);
    }

    #[tokio::test]
    async fn remote_runs_on_peer_scheduler() {
        let transport = LoopbackTransport::new();
        let peer_registry = HandlerRegistry::new();
        peer_registry.register("echo", |_, result, _| {
            result.push(json!("from-peer"));
            true
        });
        let peer_scheduler = Scheduler::new(peer_registry);
        peer_scheduler.attach();
        peer_scheduler.launch_all().unwrap();
        transport.register(
            Arc::new(Case::new("c1", card(2), [])),
            Arc::new(peer_scheduler),
        );

        let local = scheduler();
        let done = Executor::Remote(card(2))
            .execute(5, Task::new("echo"), &local, &transport, Duration::from_secs(1))
            .await;
        assert_eq!(done.result, vec![json!("from-peer")]);
    }

    #[tokio::test]
    async fn dummy_returns_task_unchanged() {
        let transport = LoopbackTransport::new();
        let local = scheduler();
        let task = Task::new("").with_source(vec![json!(1)]);
        let done = Executor::Dummy
            .execute(0, task.clone(), &local, &transport, Duration::from_secs(1))
            .await;
        assert_eq!(done, task);
    }

    #[tokio::test]
    async fn run_local_returns_every_index() {
        let local = scheduler();
        let batch: BTreeMap<usize, Task> = (0..5)
            .map(|i| (i * 2, Task::new("echo").with_source(vec![json!(i)])))
            .collect();
        let out = run_local(&local, batch).await;
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), vec![0, 2, 4, 6, 8]);
        assert_eq!(out[&6].result, vec![json!(3)]);

        local.close();
        let out = run_local(&local, BTreeMap::from([(1, Task::new("echo"))])).await;
        assert_eq!(out.len(), 1);
        assert!(out[&1].result.is_empty());
    }
}
