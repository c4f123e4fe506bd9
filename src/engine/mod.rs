mod conflict;
mod error;
mod mutations;
mod queries;
mod search;
mod validator;

pub use conflict::find_conflict;
pub use error::EngineError;
pub use queries::ResourceOrder;
pub use search::find_available;
pub use validator::{validate, RejectionReason};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

pub const WAL_FILE_NAME: &str = "slotwise.wal";

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory reservation state backed by a write-ahead log.
///
/// Commits are serialized per resource (resource write lock) and per user
/// (user gate). Lock order is compaction lock, user gate, resource lock.
/// `reserve` validates against live state while holding both the gate and
/// the lock, so no two overlapping reservations can both be accepted.
pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reservations per user, sorted by span.start.
    pub(super) by_user: DashMap<Ulid, Vec<Reservation>>,
    pub(super) user_gates: DashMap<Ulid, Arc<Mutex<()>>>,
    /// Reverse lookup: reservation id → resource id
    pub(super) reservation_to_resource: DashMap<Ulid, Ulid>,
    /// Shared by every commit, exclusive for WAL compaction.
    /// Always taken before any user gate or resource lock.
    pub(super) compaction: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            by_user: DashMap::new(),
            user_gates: DashMap::new(),
            reservation_to_resource: DashMap::new(),
            compaction: RwLock::new(()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this may run inside an async context.
        for event in &events {
            match event {
                Event::ResourceCreated { id, owner_id, name, window, last_reserved_at } => {
                    let rs = ResourceState::new(Resource {
                        id: *id,
                        owner_id: *owner_id,
                        name: name.clone(),
                        window: *window,
                        last_reserved_at: *last_reserved_at,
                    });
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ResourceDeleted { id } => {
                    if let Some((_, rs)) = engine.state.remove(id) {
                        let guard = rs.try_read().expect("replay: uncontended read");
                        engine.forget_reservations(&guard);
                    }
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(entry) = engine.state.get(&resource_id) {
                            let rs_arc = entry.clone();
                            drop(entry);
                            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                            engine.apply(&mut guard, other);
                        }
                }
            }
        }

        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(engine.state.len() as f64);
        info!(
            "replayed {} events: {} resources, {} reservations",
            events.len(),
            engine.state.len(),
            engine.reservation_to_resource.len()
        );
        Ok(engine)
    }

    /// Create the data directory if needed and open the engine's WAL inside it.
    pub fn open(config: &EngineConfig) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.data_dir.join(WAL_FILE_NAME);
        info!("opening engine at {}", wal_path.display());
        Self::new(wal_path)
    }

    /// Apply an event to a ResourceState and the secondary indexes.
    /// Caller holds the resource lock.
    fn apply(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::ReservationCreated {
                id,
                resource_id,
                user_id,
                span,
                reserved_at,
            } => {
                let reservation = Reservation {
                    id: *id,
                    resource_id: *resource_id,
                    user_id: *user_id,
                    span: *span,
                    reserved_at: *reserved_at,
                };
                insert_sorted(&mut self.by_user.entry(*user_id).or_default(), reservation.clone());
                rs.insert_reservation(reservation);
                rs.resource.last_reserved_at = rs.resource.last_reserved_at.max(Some(*reserved_at));
                self.reservation_to_resource.insert(*id, *resource_id);
            }
            Event::ReservationCancelled { id, .. } => {
                if let Some(removed) = rs.remove_reservation(*id) {
                    self.forget_user_reservation(&removed);
                }
                self.reservation_to_resource.remove(id);
            }
            Event::ResourceUpdated { name, window, .. } => {
                rs.resource.name = name.clone();
                rs.resource.window = *window;
            }
            // ResourceCreated/Deleted are handled at the DashMap level, not here
            Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => {}
        }
    }

    /// Drop every reservation of a resource from the secondary indexes.
    fn forget_reservations(&self, rs: &ResourceState) {
        for reservation in &rs.reservations {
            self.forget_user_reservation(reservation);
            self.reservation_to_resource.remove(&reservation.id);
        }
    }

    fn forget_user_reservation(&self, reservation: &Reservation) {
        let now_empty = match self.by_user.get_mut(&reservation.user_id) {
            Some(mut list) => {
                remove_by_id(&mut list, reservation.id);
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_user.remove_if(&reservation.user_id, |_, list| list.is_empty());
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_resource
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply(rs, event);
        Ok(())
    }

    /// Acquire a resource's write lock, failing if the resource was deleted
    /// while we waited for it.
    pub(super) async fn lock_resource_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write_owned().await;
        if !self.state.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Serialize commits for one user. The gate is dropped from the map when
    /// the last holder releases it.
    pub(super) async fn lock_user(&self, user_id: Ulid) -> UserLock<'_> {
        let gate = self.user_gates.entry(user_id).or_default().clone();
        UserLock {
            engine: self,
            user_id,
            guard: Some(gate.lock_owned().await),
        }
    }

    /// Spans of the user's reservations that overlap `query`.
    pub(super) fn user_spans_overlapping(&self, user_id: &Ulid, query: &Span) -> Vec<Span> {
        self.by_user
            .get(user_id)
            .map(|list| {
                list.iter()
                    .filter(|r| r.span.overlaps(query))
                    .map(|r| r.span)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Held user gate. Unlocks on drop and prunes the gate if nobody else holds it.
pub(super) struct UserLock<'a> {
    engine: &'a Engine,
    user_id: Ulid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // strong_count is read under the shard lock, and lock_user clones
        // under the same lock, so a gate in use is never removed.
        self.engine
            .user_gates
            .remove_if(&self.user_id, |_, gate| Arc::strong_count(gate) == 1);
    }
}

/// Reservation id claimed before commit. Released on drop unless committed.
pub(super) struct ReservationClaim<'a> {
    engine: &'a Engine,
    id: Ulid,
    committed: bool,
}

impl<'a> ReservationClaim<'a> {
    pub(super) fn new(engine: &'a Engine, id: Ulid, resource_id: Ulid) -> Result<Self, EngineError> {
        match engine.reservation_to_resource.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(resource_id);
                Ok(Self {
                    engine,
                    id,
                    committed: false,
                })
            }
        }
    }

    pub(super) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ReservationClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.engine.reservation_to_resource.remove(&self.id);
        }
    }
}

/// Extract the resource_id from an event (for non-Create/Delete events).
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { resource_id, .. }
        | Event::ReservationCancelled { resource_id, .. } => Some(*resource_id),
        Event::ResourceUpdated { id, .. } => Some(*id),
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => None,
    }
}
