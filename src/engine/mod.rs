mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<Calendar>>;
pub type SharedSession = Arc<RwLock<Session>>;

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
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
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

fn respond_batch(
    batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>,
    result: &io::Result<()>,
) {
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
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub users: DashMap<UserId, Role>,
    /// One calendar per expert, lock per calendar. Slot creation, deletion
    /// and the booking CAS all go through the owner's write lock.
    pub calendars: DashMap<UserId, SharedCalendar>,
    pub sessions: DashMap<SessionId, SharedSession>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: slot id → owning expert.
    pub(super) slot_owner: DashMap<SlotId, UserId>,
}

/// Apply a slot-level event to a calendar (no locking — caller holds the lock).
fn apply_to_calendar(cal: &mut Calendar, event: &Event, slot_owner: &DashMap<SlotId, UserId>) {
    match event {
        Event::SlotsCreated { owner, slots } => {
            for (id, span) in slots {
                cal.insert_slot(Slot {
                    id: *id,
                    span: *span,
                    status: SlotStatus::Available,
                    deleted: false,
                });
                slot_owner.insert(*id, *owner);
            }
        }
        Event::SlotDeleted { id, .. } => {
            if let Some(slot) = cal.get_slot_mut(id) {
                slot.deleted = true;
            }
        }
        Event::SessionBooked {
            slot_id: Some(sid), ..
        } => {
            if let Some(slot) = cal.get_slot_mut(sid) {
                slot.status = SlotStatus::Booked;
            }
        }
        Event::SessionCancelled {
            slot_id: Some(sid), ..
        } => {
            if let Some(slot) = cal.get_slot_mut(sid) {
                slot.status = SlotStatus::Available;
            }
        }
        _ => {}
    }
}

/// Apply a lifecycle event to a session (no locking — caller holds the lock).
fn apply_to_session(session: &mut Session, event: &Event) {
    match event {
        Event::SessionStarted { at, .. } => {
            session.status = SessionStatus::InProgress;
            session.detail.started_at = Some(*at);
        }
        Event::SessionCompleted { at, .. } => {
            session.status = SessionStatus::Completed;
            session.detail.ended_at = Some(*at);
        }
        Event::SessionCancelled { by, reason, at, .. } => {
            session.status = SessionStatus::Cancelled;
            session.detail.cancellation = Some(Cancellation {
                reason: reason.clone(),
                cancelled_by: *by,
                cancelled_at: *at,
            });
        }
        Event::FeedbackSubmitted { feedback, .. } => {
            session.detail.feedback = Some(feedback.clone());
        }
        Event::NotesAdded { notes, .. } => {
            session.detail.notes = Some(notes.clone());
        }
        Event::SectionAdvanced { index, .. } => {
            for section in session.detail.sections.iter_mut().take(*index) {
                section.completed = true;
            }
            session.detail.current_section = *index;
        }
        _ => {}
    }
}

/// Build the in-memory session a `SessionBooked` event describes.
fn session_from_booked(event: &Event) -> Option<Session> {
    if let Event::SessionBooked {
        id,
        slot_id,
        expert,
        student,
        span,
        kind,
        title,
        description,
    } = event
    {
        Some(Session {
            id: *id,
            slot_id: *slot_id,
            expert: *expert,
            student: *student,
            span: *span,
            status: SessionStatus::Scheduled,
            title: title.clone(),
            description: description.clone(),
            detail: SessionDetail::new(*kind),
        })
    } else {
        None
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            users: DashMap::new(),
            calendars: DashMap::new(),
            sessions: DashMap::new(),
            wal_tx,
            notify,
            slot_owner: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy tenant
        // creation).
        for event in &events {
            match event {
                Event::UserRegistered { id, role } => {
                    engine.users.insert(*id, *role);
                    if *role == Role::Expert {
                        engine
                            .calendars
                            .insert(*id, Arc::new(RwLock::new(Calendar::new(*id))));
                    }
                }
                Event::SlotsCreated { owner, .. } | Event::SlotDeleted { owner, .. } => {
                    if let Some(entry) = engine.calendars.get(owner) {
                        let cal = entry.value().clone();
                        let mut guard = cal.try_write().expect("replay: uncontended write");
                        apply_to_calendar(&mut guard, event, &engine.slot_owner);
                    }
                }
                Event::SessionBooked { id, slot_id, .. } => {
                    if let Some(session) = session_from_booked(event) {
                        engine.sessions.insert(*id, Arc::new(RwLock::new(session)));
                    }
                    if let Some(sid) = slot_id {
                        engine.apply_replay_slot_flip(sid, event);
                    }
                }
                Event::SessionStarted { id, .. }
                | Event::SessionCompleted { id, .. }
                | Event::SessionCancelled { id, .. }
                | Event::FeedbackSubmitted { id, .. }
                | Event::NotesAdded { id, .. }
                | Event::SectionAdvanced { id, .. } => {
                    if let Some(entry) = engine.sessions.get(id) {
                        let session = entry.value().clone();
                        let mut guard = session.try_write().expect("replay: uncontended write");
                        apply_to_session(&mut guard, event);
                    }
                    if let Event::SessionCancelled {
                        slot_id: Some(sid), ..
                    } = event
                    {
                        engine.apply_replay_slot_flip(sid, event);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Replay helper: route a booking/cancellation slot status change to the
    /// owning calendar.
    fn apply_replay_slot_flip(&self, slot_id: &SlotId, event: &Event) {
        if let Some(owner) = self.owner_of_slot(slot_id)
            && let Some(entry) = self.calendars.get(&owner)
        {
            let cal = entry.value().clone();
            let mut guard = cal.try_write().expect("replay: uncontended write");
            apply_to_calendar(&mut guard, event, &self.slot_owner);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn role_of(&self, id: &UserId) -> Option<Role> {
        self.users.get(id).map(|e| *e.value())
    }

    pub fn get_calendar(&self, owner: &UserId) -> Option<SharedCalendar> {
        self.calendars.get(owner).map(|e| e.value().clone())
    }

    pub fn get_session(&self, id: &SessionId) -> Option<SharedSession> {
        self.sessions.get(id).map(|e| e.value().clone())
    }

    pub fn owner_of_slot(&self, slot_id: &SlotId) -> Option<UserId> {
        self.slot_owner.get(slot_id).map(|e| *e.value())
    }

    /// WAL-append + apply to a locked calendar in one call.
    pub(super) async fn persist_to_calendar(
        &self,
        cal: &mut Calendar,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_calendar(cal, event, &self.slot_owner);
        Ok(())
    }

    /// WAL-append + apply to a locked session in one call.
    pub(super) async fn persist_to_session(
        &self,
        session: &mut Session,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_session(session, event);
        Ok(())
    }

    /// Lookup session, acquire write lock.
    pub(super) async fn resolve_session_write(
        &self,
        id: &SessionId,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<Session>, EngineError> {
        let session = self.get_session(id).ok_or(EngineError::NotFound(*id))?;
        Ok(session.write_owned().await)
    }
}
