use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    config::Config,
    core::{
        repository::Repository,
        store::{BracketStore, StoreError, StoreSnapshotV1},
    },
    engine::{
        builder::{BracketBuilder, BuildError},
        invalidate::CacheInvalidator,
        round::{EngineError, Resolution, RoundMachine, VoteOutcome, cast_vote},
    },
    model::{Bracket, Round, User},
    op::{Op, StoredOp},
    persist::{OpSink, PersistError, sqlite::SqliteOpSink},
    types::{BracketId, EntryId, OpSeq, RoundId, Side, UserId},
};

use super::events::BracketEvent;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("threshold must be a positive odd number, got {0}")]
    InvalidThreshold(u32),
    #[error("runtime channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Write a batch out immediately when it resolves a round.
    pub flush_on_resolve: bool,
    pub batch_max_ops: usize,
    pub batch_max_latency_ms: u64,
    pub persist_queue_bound: usize,
    /// Ops between automatic snapshots, `0` disables them.
    pub snapshot_every_ops: usize,
    pub compact_after_snapshot: bool,
    /// Delete the supplied entries when bracket creation is rejected.
    pub discard_entries_on_reject: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_resolve: true,
            batch_max_ops: 32,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
            snapshot_every_ops: 2000,
            compact_after_snapshot: false,
            discard_entries_on_reject: true,
        }
    }
}

/// Result of one vote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReceipt {
    pub outcome: VoteOutcome,
    pub resolution: Option<Resolution>,
}

pub struct EngineHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<BracketEvent>,
}

impl Clone for EngineHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    CreateEntry {
        resp: oneshot::Sender<Result<EntryId, RuntimeError>>,
    },
    DeleteEntry {
        id: EntryId,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    CreateUser {
        name: String,
        resp: oneshot::Sender<Result<User, RuntimeError>>,
    },
    CreateBracket {
        name: String,
        threshold: u32,
        entries: Vec<EntryId>,
        resp: oneshot::Sender<Result<Bracket, RuntimeError>>,
    },
    DeleteBracket {
        id: BracketId,
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Vote {
        round: RoundId,
        user: UserId,
        side: Side,
        resp: oneshot::Sender<Result<VoteReceipt, RuntimeError>>,
    },
    TryResolve {
        round: RoundId,
        resp: oneshot::Sender<Result<Option<Resolution>, RuntimeError>>,
    },
    GetRound {
        id: RoundId,
        resp: oneshot::Sender<Option<Round>>,
    },
    GetBracket {
        id: BracketId,
        resp: oneshot::Sender<Option<Bracket>>,
    },
    Brackets {
        resp: oneshot::Sender<Vec<Bracket>>,
    },
    Rounds {
        bracket: BracketId,
        resp: oneshot::Sender<Vec<Round>>,
    },
    Parents {
        round: RoundId,
        resp: oneshot::Sender<[Option<RoundId>; 2]>,
    },
    UserByName {
        name: String,
        resp: oneshot::Sender<Option<User>>,
    },
    Flush {
        resp: oneshot::Sender<Result<OpSeq, RuntimeError>>,
    },
    Checkpoint {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Ops(Vec<StoredOp>),
    Flush {
        resp: oneshot::Sender<Result<OpSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: StoreSnapshotV1,
        last_seq: OpSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

struct LoopState {
    store: BracketStore,
    invalidator: Option<Box<dyn CacheInvalidator>>,
    events_tx: broadcast::Sender<BracketEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    config: RuntimeConfig,
    ops_since_snapshot: usize,
}

/// Opens the store described by `config` and starts the runtime.
///
/// With a database path the store is replayed from SQLite and every
/// mutation is journaled there. Without one the engine runs in memory.
pub fn open_engine(
    config: &Config,
    invalidator: Option<Box<dyn CacheInvalidator>>,
) -> Result<EngineHandle, RuntimeError> {
    let (store, sink) = match &config.database {
        Some(path) => {
            let sink = SqliteOpSink::open(path)?;
            let store = sink.load_store()?;
            log::info!(
                "Loaded {} brackets from {} (op seq {})",
                store.brackets().len(),
                path.display(),
                store.latest_op_seq()
            );
            (store, Some(Box::new(sink) as Box<dyn OpSink>))
        }
        None => (BracketStore::new(), None),
    };

    Ok(spawn_engine(store, sink, invalidator, config.runtime.clone()))
}

/// Starts the single-writer loop that owns `store`.
///
/// Every command runs to completion before the next one starts, so a vote
/// and the resolution attempt that follows it form one critical section.
pub fn spawn_engine(
    store: BracketStore,
    sink: Option<Box<dyn OpSink>>,
    invalidator: Option<Box<dyn CacheInvalidator>>,
    config: RuntimeConfig,
) -> EngineHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<BracketEvent>(1024);

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<OpSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut state = LoopState {
        store,
        invalidator,
        events_tx: events_tx.clone(),
        persist_tx,
        config,
        ops_since_snapshot: 0,
    };

    tokio::spawn(async move {
        loop {
            if let Some(rx) = durable_rx.as_mut() {
                let mut worker_gone = false;
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        if state.handle_command(cmd).await {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        match durable {
                            Some(Ok(op_seq)) => {
                                let _ = state.events_tx.send(BracketEvent::DurableUpTo { op_seq });
                            }
                            Some(Err(err)) => log::error!("Journal write failed: {err}"),
                            None => worker_gone = true,
                        }
                    }
                }
                if worker_gone {
                    log::warn!("Persistence worker stopped");
                    durable_rx = None;
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                if state.handle_command(cmd).await {
                    break;
                }
            }
        }
        log::debug!("Engine loop stopped");
    });

    EngineHandle { cmd_tx, events_tx }
}

impl EngineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<BracketEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn create_entry(&self) -> Result<EntryId, RuntimeError> {
        self.request(|resp| Command::CreateEntry { resp }).await?
    }

    pub async fn delete_entry(&self, id: EntryId) -> Result<(), RuntimeError> {
        self.request(|resp| Command::DeleteEntry { id, resp }).await?
    }

    pub async fn create_user(&self, name: impl Into<String>) -> Result<User, RuntimeError> {
        let name = name.into();
        self.request(|resp| Command::CreateUser { name, resp }).await?
    }

    /// Validates the request and builds the bracket.
    ///
    /// Rejects thresholds that are zero or even and lists shorter than two
    /// entries. On rejection the entries are deleted when
    /// [`RuntimeConfig::discard_entries_on_reject`] is set.
    pub async fn create_bracket(
        &self,
        name: impl Into<String>,
        threshold: u32,
        entries: Vec<EntryId>,
    ) -> Result<Bracket, RuntimeError> {
        let name = name.into();
        self.request(|resp| Command::CreateBracket {
            name,
            threshold,
            entries,
            resp,
        })
        .await?
    }

    pub async fn delete_bracket(&self, id: BracketId) -> Result<(), RuntimeError> {
        self.request(|resp| Command::DeleteBracket { id, resp }).await?
    }

    /// Records a vote and resolves the round if it reached its threshold.
    pub async fn vote(
        &self,
        round: RoundId,
        user: UserId,
        side: Side,
    ) -> Result<VoteReceipt, RuntimeError> {
        self.request(|resp| Command::Vote {
            round,
            user,
            side,
            resp,
        })
        .await?
    }

    pub async fn try_resolve(&self, round: RoundId) -> Result<Option<Resolution>, RuntimeError> {
        self.request(|resp| Command::TryResolve { round, resp }).await?
    }

    pub async fn get_round(&self, id: RoundId) -> Result<Option<Round>, RuntimeError> {
        self.request(|resp| Command::GetRound { id, resp }).await
    }

    pub async fn get_bracket(&self, id: BracketId) -> Result<Option<Bracket>, RuntimeError> {
        self.request(|resp| Command::GetBracket { id, resp }).await
    }

    pub async fn brackets(&self) -> Result<Vec<Bracket>, RuntimeError> {
        self.request(|resp| Command::Brackets { resp }).await
    }

    /// Rounds of `bracket` in `number` order.
    pub async fn rounds(&self, bracket: BracketId) -> Result<Vec<Round>, RuntimeError> {
        self.request(|resp| Command::Rounds { bracket, resp }).await
    }

    pub async fn parents(&self, round: RoundId) -> Result<[Option<RoundId>; 2], RuntimeError> {
        self.request(|resp| Command::Parents { round, resp }).await
    }

    pub async fn user_by_name(&self, name: impl Into<String>) -> Result<Option<User>, RuntimeError> {
        let name = name.into();
        self.request(|resp| Command::UserByName { name, resp }).await
    }

    pub async fn flush(&self) -> Result<OpSeq, RuntimeError> {
        self.request(|resp| Command::Flush { resp }).await?
    }

    pub async fn checkpoint(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Checkpoint { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|resp| Command::Shutdown { resp }).await?
    }
}

impl LoopState {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::CreateEntry { resp } => {
                let res = self.store.create_entry().map(|e| e.id).map_err(RuntimeError::from);
                let res = self
                    .finish(res, |id| vec![BracketEvent::EntryCreated { id: *id }])
                    .await;
                let _ = resp.send(res);
            }
            Command::DeleteEntry { id, resp } => {
                let res = self.store.delete_entry(id).map_err(RuntimeError::from);
                let res = self.finish(res, |_| vec![BracketEvent::EntryDeleted { id }]).await;
                let _ = resp.send(res);
            }
            Command::CreateUser { name, resp } => {
                let res = self.store.create_user(&name).map_err(RuntimeError::from);
                let res = self
                    .finish(res, |user| vec![BracketEvent::UserCreated { id: user.id }])
                    .await;
                let _ = resp.send(res);
            }
            Command::CreateBracket {
                name,
                threshold,
                entries,
                resp,
            } => {
                let res = self.create_bracket(&name, threshold, &entries);
                let res = self
                    .finish(res, |b| vec![BracketEvent::BracketCreated { id: b.id }])
                    .await;
                let _ = resp.send(res);
            }
            Command::DeleteBracket { id, resp } => {
                let res = self.store.delete_bracket(id).map_err(RuntimeError::from);
                let res = self.finish(res, |_| vec![BracketEvent::BracketDeleted { id }]).await;
                let _ = resp.send(res);
            }
            Command::Vote {
                round,
                user,
                side,
                resp,
            } => {
                let res = cast_vote(&mut self.store, None, round, user, side)
                    .map(|(outcome, resolution)| VoteReceipt {
                        outcome,
                        resolution,
                    })
                    .map_err(RuntimeError::from);
                if let Ok(VoteReceipt {
                    resolution: Some(resolution),
                    ..
                }) = &res
                {
                    self.invalidate(resolution);
                }
                let res = self.finish(res, |receipt| {
                    let mut events = Vec::new();
                    if matches!(
                        receipt.outcome,
                        VoteOutcome::Recorded | VoteOutcome::Changed { .. }
                    ) {
                        events.push(BracketEvent::VoteRecorded { round, user, side });
                    }
                    if let Some(resolution) = &receipt.resolution {
                        events.extend(resolution_events(resolution));
                    }
                    events
                })
                .await;
                let _ = resp.send(res);
            }
            Command::TryResolve { round, resp } => {
                let res = RoundMachine::new(&mut self.store, round)
                    .try_resolve()
                    .map_err(RuntimeError::from);
                if let Ok(Some(resolution)) = &res {
                    self.invalidate(resolution);
                }
                let res = self.finish(res, |resolution| {
                    resolution.iter().flat_map(resolution_events).collect()
                })
                .await;
                let _ = resp.send(res);
            }
            Command::GetRound { id, resp } => {
                let _ = resp.send(self.store.get_round(id).cloned());
            }
            Command::GetBracket { id, resp } => {
                let _ = resp.send(self.store.get_bracket(id).cloned());
            }
            Command::Brackets { resp } => {
                let _ = resp.send(self.store.brackets().into_iter().cloned().collect());
            }
            Command::Rounds { bracket, resp } => {
                let _ = resp.send(self.store.rounds_of_cloned(bracket));
            }
            Command::Parents { round, resp } => {
                let _ = resp.send(self.store.parents_of(round));
            }
            Command::UserByName { name, resp } => {
                let _ = resp.send(self.store.user_by_name(&name).cloned());
            }
            Command::Flush { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (flush_tx, flush_rx) = oneshot::channel();
                    if tx
                        .send(PersistMsg::Flush { resp: flush_tx })
                        .await
                        .is_err()
                    {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        flush_rx
                            .await
                            .map_err(|_| RuntimeError::ChannelClosed)
                            .and_then(|r| r.map_err(RuntimeError::from))
                    }
                } else {
                    Ok(self.store.latest_op_seq())
                };
                let _ = resp.send(out);
            }
            Command::Checkpoint { resp } => {
                let out = self.checkpoint().await;
                let _ = resp.send(out);
            }
            Command::Shutdown { resp } => {
                let out = if let Some(tx) = &self.persist_tx {
                    let (done_tx, done_rx) = oneshot::channel();
                    if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                        Err(RuntimeError::ChannelClosed)
                    } else {
                        done_rx.await.map_err(|_| RuntimeError::ChannelClosed)
                    }
                } else {
                    Ok(())
                };
                let _ = resp.send(out);
                return true;
            }
        }

        self.maybe_auto_checkpoint().await;
        false
    }

    /// The caller-side checks that precede [`BracketBuilder`].
    fn create_bracket(
        &mut self,
        name: &str,
        threshold: u32,
        entries: &[EntryId],
    ) -> Result<Bracket, RuntimeError> {
        let res = if threshold == 0 || threshold % 2 == 0 {
            Err(RuntimeError::InvalidThreshold(threshold))
        } else {
            BracketBuilder::new(&mut self.store)
                .build(name, threshold, entries)
                .map_err(RuntimeError::from)
        };

        if let Err(err) = &res {
            log::warn!("Rejected bracket {name:?}: {err}");
            if self.config.discard_entries_on_reject {
                self.discard_entries(entries);
            }
        }
        res
    }

    fn discard_entries(&mut self, entries: &[EntryId]) {
        for id in entries {
            if self.store.get_entry(*id).is_none() {
                continue;
            }
            match self.store.delete_entry(*id) {
                Ok(()) => {
                    let _ = self.events_tx.send(BracketEvent::EntryDeleted { id: *id });
                }
                Err(err) => log::warn!("Could not discard entry {id}: {err}"),
            }
        }
    }

    fn invalidate(&mut self, resolution: &Resolution) {
        if let Some(invalidator) = self.invalidator.as_mut() {
            let failed = resolution.invalidation.notify(&mut **invalidator);
            if failed > 0 {
                log::warn!(
                    "{failed} cache invalidations failed after resolving round {}",
                    resolution.round
                );
            }
        }
    }

    /// Hands the command's ops to persistence and publishes its events.
    ///
    /// Ops are forwarded even when the command failed, since any mutation
    /// already applied in memory has to reach the journal too. A full
    /// persistence queue holds the command loop back instead of dropping ops.
    async fn finish<T>(
        &mut self,
        res: Result<T, RuntimeError>,
        events: impl FnOnce(&T) -> Vec<BracketEvent>,
    ) -> Result<T, RuntimeError> {
        let persisted = self.persist_pending().await;
        let value = res?;
        persisted?;
        for event in events(&value) {
            let _ = self.events_tx.send(event);
        }
        Ok(value)
    }

    async fn persist_pending(&mut self) -> Result<(), RuntimeError> {
        let ops = self.store.drain_pending_ops();
        if ops.is_empty() {
            return Ok(());
        }
        self.ops_since_snapshot += ops.len();

        let Some(tx) = &self.persist_tx else {
            let _ = self.events_tx.send(BracketEvent::DurableUpTo {
                op_seq: self.store.latest_op_seq(),
            });
            return Ok(());
        };

        let first = ops.first().map(|o| o.seq).unwrap_or_default();
        tx.send(PersistMsg::Ops(ops)).await.map_err(|_| {
            log::error!("Persistence worker is gone, ops from seq {first} were not journaled");
            RuntimeError::ChannelClosed
        })
    }

    async fn checkpoint(&mut self) -> Result<(), RuntimeError> {
        let Some(tx) = &self.persist_tx else {
            return Ok(());
        };

        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot: self.store.export_snapshot(),
            last_seq: self.store.latest_op_seq(),
            compact: self.config.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| RuntimeError::ChannelClosed)?;

        cp_rx.await.map_err(|_| RuntimeError::ChannelClosed)??;
        self.ops_since_snapshot = 0;
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        if self.config.snapshot_every_ops == 0
            || self.ops_since_snapshot < self.config.snapshot_every_ops
        {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            log::warn!("Automatic checkpoint failed: {err}");
        }
    }
}

fn resolution_events(resolution: &Resolution) -> Vec<BracketEvent> {
    let mut events = vec![BracketEvent::RoundResolved {
        bracket: resolution.bracket,
        round: resolution.round,
        winner: resolution.winner,
    }];
    events.extend(
        resolution
            .invalidation
            .keys
            .iter()
            .cloned()
            .map(|key| BracketEvent::Invalidate { key }),
    );
    if resolution.champion {
        events.push(BracketEvent::BracketWon {
            bracket: resolution.bracket,
            winner: resolution.winner,
        });
    }
    events
}

fn spawn_persistence_worker(
    sink: Box<dyn OpSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredOp>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: OpSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Ops(ops) => {
                            let resolves = ops.iter().any(|s| matches!(s.op, Op::Resolve { .. }));
                            buf.extend(ops);

                            if buf.len() >= config.batch_max_ops || (config.flush_on_resolve && resolves) {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let flush_result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let result = if let Err(err) = flush_result {
                                Err(err)
                            } else {
                                let sink_ref = Arc::clone(&sink);
                                match tokio::task::spawn_blocking(move || {
                                    let mut sink = sink_ref.blocking_lock();
                                    sink.write_snapshot(&snapshot, last_seq)?;
                                    if compact {
                                        let removed = sink.compact_through(last_seq)?;
                                        log::debug!("Compacted {removed} ops through seq {last_seq}");
                                    }
                                    Result::<(), PersistError>::Ok(())
                                }).await {
                                    Ok(inner) => inner,
                                    Err(e) => Err(PersistError::Message(format!("join error: {e}"))),
                                }
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn OpSink>>>,
    buf: &mut Vec<StoredOp>,
    last_durable: &mut OpSeq,
    durable_tx: &mpsc::UnboundedSender<Result<OpSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let ops = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<OpSeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_ops(&ops)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}
