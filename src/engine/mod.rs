mod conflict;
mod error;
mod lifecycle;
mod queries;
mod search;
mod spaces;
mod status;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::WAL_APPEND_TIMEOUT_MS;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

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
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
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
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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

/// Reservation conflict engine and room-status state machine.
///
/// All state lives in memory behind per-space locks; every mutation is a
/// WAL event appended before it is applied, and `open` replays the WAL.
pub struct Engine {
    pub(super) spaces: DashMap<Ulid, SharedSpaceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    /// Reverse lookup: reservation id → space id.
    pub(super) reservation_to_space: DashMap<Ulid, Ulid>,
    /// Space name → id, for registration-time uniqueness.
    pub(super) names: DashMap<String, Ulid>,
}

/// Apply an event directly to a SpaceState (no locking — caller holds the lock).
fn apply_to_space(space: &mut SpaceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.space_id);
            space.insert_reservation(reservation.clone());
        }
        Event::ReservationModified {
            id,
            window,
            participants,
            purpose,
            notes,
            at,
            version,
            ..
        } => {
            // Remove + reinsert keeps the vec sorted when the window moves.
            if let Some(mut r) = space.remove_reservation(*id) {
                r.window = *window;
                r.participants = *participants;
                r.purpose = *purpose;
                r.notes = notes.clone();
                r.updated_at = *at;
                r.version = *version;
                space.insert_reservation(r);
            }
        }
        Event::ReservationCancelled { id, at, version, .. } => {
            if let Some(r) = space.reservation_mut(*id) {
                r.status = ReservationStatus::Cancelled;
                r.updated_at = *at;
                r.version = *version;
            }
        }
        Event::CheckedIn { id, at, version, .. } => {
            if let Some(r) = space.reservation_mut(*id) {
                r.status = ReservationStatus::CheckedIn;
                r.check_in_time = Some(*at);
                r.updated_at = *at;
                r.version = *version;
            }
        }
        Event::CheckedOut { id, at, version, .. } => {
            if let Some(r) = space.reservation_mut(*id) {
                r.status = ReservationStatus::CheckedOut;
                r.check_out_time = Some(*at);
                r.updated_at = *at;
                r.version = *version;
            }
        }
        Event::NoShowMarked { id, at, version, .. } => {
            if let Some(r) = space.reservation_mut(*id) {
                r.status = ReservationStatus::NoShow;
                r.updated_at = *at;
                r.version = *version;
            }
        }
        Event::StatusProjected { seq, status, .. } => {
            // Stale projections (seq not past the current one) are ignored.
            if *seq > space.status_seq {
                space.status = *status;
                space.status_seq = *seq;
            }
        }
        Event::OverrideSet { seq, .. } => {
            if *seq > space.status_seq {
                space.override_active = true;
                space.status = SpaceStatus::Maintenance;
                space.status_seq = *seq;
            }
        }
        Event::OverrideCleared { seq, status, .. } => {
            if *seq > space.status_seq {
                space.override_active = false;
                space.status = *status;
                space.status_seq = *seq;
            }
        }
        Event::SpaceUpdated {
            name,
            location,
            capacity,
            kind,
            facilities,
            description,
            ..
        } => {
            space.name = name.clone();
            space.location = location.clone();
            space.capacity = *capacity;
            space.kind = *kind;
            space.facilities = facilities.clone();
            space.description = description.clone();
        }
        // SpaceRegistered/Removed are handled at the DashMap level, not here
        Event::SpaceRegistered { .. } | Event::SpaceRemoved { .. } => {}
    }
}

impl Engine {
    /// Open the engine, replaying the WAL at `wal_path` into memory.
    pub fn open(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            spaces: DashMap::new(),
            wal_tx,
            notify: Arc::new(NotifyHub::new()),
            clock,
            reservation_to_space: DashMap::new(),
            names: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context.
        let replayed = events.len();
        for event in &events {
            match event {
                Event::SpaceRegistered {
                    id,
                    name,
                    location,
                    capacity,
                    kind,
                    facilities,
                    description,
                } => {
                    let ss = SpaceState::new(
                        *id,
                        name.clone(),
                        location.clone(),
                        *capacity,
                        *kind,
                        facilities.clone(),
                        description.clone(),
                    );
                    engine.names.insert(name.clone(), *id);
                    engine.spaces.insert(*id, Arc::new(RwLock::new(ss)));
                }
                Event::SpaceRemoved { id } => {
                    if let Some((_, ss)) = engine.spaces.remove(id) {
                        let guard = ss.try_read().expect("replay: uncontended read");
                        for r in &guard.reservations {
                            engine.reservation_to_space.remove(&r.id);
                        }
                        engine.names.remove(&guard.name);
                    }
                }
                other => {
                    if let Some(space_id) = event_space_id(other)
                        && let Some(entry) = engine.spaces.get(&space_id)
                    {
                        let ss = entry.clone();
                        let mut guard = ss.try_write().expect("replay: uncontended write");
                        if let Event::SpaceUpdated { name, .. } = other
                            && *name != guard.name
                        {
                            engine.names.remove(&guard.name);
                            engine.names.insert(name.clone(), space_id);
                        }
                        apply_to_space(&mut guard, other, &engine.reservation_to_space);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::SPACES_ACTIVE).set(engine.spaces.len() as f64);
        info!(
            "engine open: replayed {replayed} events into {} spaces",
            engine.spaces.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    /// The wait is bounded — a wedged writer surfaces as `Unavailable`,
    /// never as an indefinite block.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
        let response = tokio::time::timeout(Duration::from_millis(WAL_APPEND_TIMEOUT_MS), rx)
            .await
            .map_err(|_| EngineError::Unavailable("WAL append timed out".into()))?;
        response
            .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    pub(super) fn get_space_state(&self, id: &Ulid) -> Option<SharedSpaceState> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    pub(super) fn space_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_space
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        space_id: Ulid,
        space: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_space(space, event, &self.reservation_to_space);
        self.notify.send(space_id, event);
        metrics::counter!(
            crate::observability::EVENTS_TOTAL,
            "event" => crate::observability::event_label(event)
        )
        .increment(1);
        Ok(())
    }

    /// Lookup reservation → space, get space, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SpaceState>), EngineError> {
        let space_id = self
            .space_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let ss = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound(space_id))?;
        let guard = ss.write_owned().await;
        if guard.removed {
            return Err(EngineError::NotFound(*reservation_id));
        }
        Ok((space_id, guard))
    }

    /// Current time per the injected clock.
    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Subscribe to applied events for a space (displays, IoT bridges).
    pub fn subscribe(&self, space_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(space_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let ids: Vec<Ulid> = self.spaces.iter().map(|e| *e.key()).collect();
        for id in ids {
            let Some(ss) = self.get_space_state(&id) else {
                continue;
            };
            let guard = ss.read().await;
            if guard.removed {
                continue;
            }
            events.push(Event::SpaceRegistered {
                id: guard.id,
                name: guard.name.clone(),
                location: guard.location.clone(),
                capacity: guard.capacity,
                kind: guard.kind,
                facilities: guard.facilities.clone(),
                description: guard.description.clone(),
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                });
            }
            // Restore the persisted status and its sequence counter.
            if guard.override_active {
                events.push(Event::OverrideSet {
                    space_id: guard.id,
                    seq: guard.status_seq,
                });
            } else if guard.status_seq > 0 {
                events.push(Event::StatusProjected {
                    space_id: guard.id,
                    seq: guard.status_seq,
                    status: guard.status,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the space id from an event (for non-Register/Remove events).
fn event_space_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ReservationCreated { reservation } => Some(reservation.space_id),
        Event::ReservationModified { space_id, .. }
        | Event::ReservationCancelled { space_id, .. }
        | Event::CheckedIn { space_id, .. }
        | Event::CheckedOut { space_id, .. }
        | Event::NoShowMarked { space_id, .. }
        | Event::StatusProjected { space_id, .. }
        | Event::OverrideSet { space_id, .. }
        | Event::OverrideCleared { space_id, .. } => Some(*space_id),
        Event::SpaceUpdated { id, .. } => Some(*id),
        Event::SpaceRegistered { .. } | Event::SpaceRemoved { .. } => None,
    }
}
