use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, NotificationKind, SessionCreated};

use super::conflict::{check_no_overlap, now_ms, validate_span};
use super::{
    Engine, EngineError, SharedCalendar, WalCommand, apply_to_calendar, session_from_booked,
};

impl Engine {
    /// Register a user from the identity feed. Experts get a calendar.
    pub async fn register_user(&self, id: UserId, role: Role) -> Result<(), EngineError> {
        if self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.users.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::UserRegistered { id, role };
        self.wal_append(&event).await?;
        self.users.insert(id, role);
        if role == Role::Expert {
            self.calendars
                .insert(id, Arc::new(RwLock::new(Calendar::new(id))));
        }
        Ok(())
    }

    /// Publish a batch of slots. All-or-nothing: if any span is invalid or
    /// overlaps a live slot (or another span in the batch), none are created.
    pub async fn create_slots(
        &self,
        actor: Actor,
        spans: Vec<(Ms, Ms)>,
    ) -> Result<Vec<SlotId>, EngineError> {
        if actor.role != Role::Expert {
            return Err(EngineError::NotAuthorized("only experts publish slots"));
        }
        if spans.is_empty() {
            return Ok(Vec::new());
        }
        if spans.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let mut validated = Vec::with_capacity(spans.len());
        for (start, end) in &spans {
            validated.push(validate_span(*start, *end)?);
        }

        let cal = self
            .get_calendar(&actor.id)
            .ok_or(EngineError::NotAuthorized("unknown expert"))?;
        let mut guard = cal.write().await;

        if guard.slots.len() + validated.len() > MAX_SLOTS_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many slots for owner"));
        }

        let slots: Vec<(SlotId, Span)> = validated.iter().map(|s| (Ulid::new(), *s)).collect();

        // Phase 1: validate every span against the calendar and the rest
        // of the batch. No state changes yet.
        for (_, span) in &slots {
            check_no_overlap(&guard, span)?;
        }
        let mut sorted = slots.clone();
        sorted.sort_by_key(|(_, s)| s.start);
        for pair in sorted.windows(2) {
            if pair[0].1.overlaps(&pair[1].1) {
                return Err(EngineError::Overlap {
                    candidate: pair[1].1,
                    conflicting: pair[0].0,
                });
            }
        }

        // Phase 2: commit the whole batch as one WAL record.
        let ids = slots.iter().map(|(id, _)| *id).collect();
        let event = Event::SlotsCreated {
            owner: actor.id,
            slots,
        };
        self.persist_to_calendar(&mut guard, &event).await?;
        Ok(ids)
    }

    /// Soft-delete an available slot. A booked slot cannot be deleted;
    /// cancel the session first.
    pub async fn delete_slot(&self, actor: Actor, slot_id: SlotId) -> Result<(), EngineError> {
        let owner = self
            .owner_of_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        if owner != actor.id {
            return Err(EngineError::NotAuthorized("not the slot owner"));
        }

        let cal = self
            .get_calendar(&owner)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = cal.write().await;
        let slot = guard
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        if slot.deleted {
            return Err(EngineError::NotFound(slot_id));
        }
        if slot.status == SlotStatus::Booked {
            return Err(EngineError::SlotBooked(slot_id));
        }

        let event = Event::SlotDeleted { id: slot_id, owner };
        self.persist_to_calendar(&mut guard, &event).await
    }

    /// Book an available slot, creating a scheduled session.
    ///
    /// The owner's calendar write lock covers the whole check-and-flip, so
    /// of N concurrent bookers exactly one wins and the rest see
    /// `SlotUnavailable`.
    pub async fn book_slot(
        &self,
        actor: Actor,
        slot_id: SlotId,
        kind: SessionKind,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<SessionId, EngineError> {
        validate_texts(title.as_deref(), description.as_deref())?;
        if self.sessions.len() >= MAX_SESSIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many sessions"));
        }
        if self.role_of(&actor.id).is_none() {
            return Err(EngineError::NotAuthorized("unknown user"));
        }

        let owner = self
            .owner_of_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        if owner == actor.id {
            return Err(EngineError::SelfBooking(slot_id));
        }

        let cal = self
            .get_calendar(&owner)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = cal.write().await;
        let slot = guard
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        if slot.deleted || slot.status != SlotStatus::Available {
            return Err(EngineError::SlotUnavailable(slot_id));
        }
        let span = slot.span;

        let id = Ulid::new();
        let title = title.unwrap_or_else(|| kind.default_title().to_string());
        let event = Event::SessionBooked {
            id,
            slot_id: Some(slot_id),
            expert: owner,
            student: actor.id,
            span,
            kind,
            title,
            description,
        };
        self.persist_to_calendar(&mut guard, &event).await?;
        if let Some(session) = session_from_booked(&event) {
            self.sessions.insert(id, Arc::new(RwLock::new(session)));
        }
        drop(guard);

        self.notify_user(owner, NotificationKind::BookingReceived, id, "slot booked");
        self.notify_user(
            actor.id,
            NotificationKind::SessionScheduled,
            id,
            "session scheduled",
        );
        self.notify.announce_session(SessionCreated {
            session_id: id,
            expert: owner,
            student: actor.id,
            start: span.start,
            end: span.end,
        });
        Ok(id)
    }

    /// Create a session directly, without consuming a slot.
    pub async fn create_session(
        &self,
        actor: Actor,
        expert: UserId,
        student: UserId,
        start: Ms,
        end: Ms,
        kind: SessionKind,
        title: Option<String>,
        description: Option<String>,
    ) -> Result<SessionId, EngineError> {
        validate_texts(title.as_deref(), description.as_deref())?;
        if self.sessions.len() >= MAX_SESSIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many sessions"));
        }
        if actor.id != expert && actor.id != student {
            return Err(EngineError::NotAuthorized("not a session participant"));
        }
        if expert == student {
            return Err(EngineError::SelfBooking(expert));
        }
        if self.role_of(&expert) != Some(Role::Expert) {
            return Err(EngineError::NotAuthorized("expert side must be an expert"));
        }
        if self.role_of(&student).is_none() {
            return Err(EngineError::NotFound(student));
        }
        let span = validate_span(start, end)?;

        let id = Ulid::new();
        let title = title.unwrap_or_else(|| kind.default_title().to_string());
        let event = Event::SessionBooked {
            id,
            slot_id: None,
            expert,
            student,
            span,
            kind,
            title,
            description,
        };
        self.wal_append(&event).await?;
        if let Some(session) = session_from_booked(&event) {
            self.sessions.insert(id, Arc::new(RwLock::new(session)));
        }

        let other = if actor.id == expert { student } else { expert };
        self.notify_user(
            other,
            NotificationKind::SessionScheduled,
            id,
            "session scheduled",
        );
        self.notify.announce_session(SessionCreated {
            session_id: id,
            expert,
            student,
            start: span.start,
            end: span.end,
        });
        Ok(id)
    }

    pub async fn start_session(&self, actor: Actor, id: SessionId) -> Result<(), EngineError> {
        let mut guard = self.resolve_session_write(&id).await?;
        if guard.expert != actor.id {
            return Err(EngineError::NotAuthorized("only the expert starts a session"));
        }
        if guard.status != SessionStatus::Scheduled {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                action: "start",
            });
        }

        let event = Event::SessionStarted { id, at: now_ms() };
        self.persist_to_session(&mut guard, &event).await?;

        let other = guard.other_participant(&actor.id);
        drop(guard);
        self.notify_user(
            other,
            NotificationKind::SessionStarted,
            id,
            "session started",
        );
        Ok(())
    }

    /// Complete a running session. The booked span is kept; `ended_at`
    /// records the actual finish.
    pub async fn end_session(&self, actor: Actor, id: SessionId) -> Result<(), EngineError> {
        let mut guard = self.resolve_session_write(&id).await?;
        if guard.expert != actor.id {
            return Err(EngineError::NotAuthorized("only the expert ends a session"));
        }
        if guard.status != SessionStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                action: "end",
            });
        }

        let event = Event::SessionCompleted { id, at: now_ms() };
        self.persist_to_session(&mut guard, &event).await?;

        let other = guard.other_participant(&actor.id);
        drop(guard);
        self.notify_user(
            other,
            NotificationKind::SessionCompleted,
            id,
            "session completed",
        );
        Ok(())
    }

    /// Cancel a scheduled or running session. If the session consumed a
    /// slot, the slot returns to available and can be booked again.
    pub async fn cancel_session(
        &self,
        actor: Actor,
        id: SessionId,
        reason: String,
    ) -> Result<(), EngineError> {
        if reason.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut guard = self.resolve_session_write(&id).await?;
        if !guard.is_participant(&actor.id) {
            return Err(EngineError::NotAuthorized("not a session participant"));
        }
        if guard.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                action: "cancel",
            });
        }

        let event = Event::SessionCancelled {
            id,
            slot_id: guard.slot_id,
            by: actor.id,
            reason,
            at: now_ms(),
        };
        self.persist_to_session(&mut guard, &event).await?;

        // Lock order is session then calendar; booking never holds a
        // session lock, so this cannot deadlock against it.
        if let Some(slot_id) = guard.slot_id
            && let Some(owner) = self.owner_of_slot(&slot_id)
            && let Some(cal) = self.get_calendar(&owner)
        {
            let mut cal_guard = cal.write().await;
            apply_to_calendar(&mut cal_guard, &event, &self.slot_owner);
        }

        let other = guard.other_participant(&actor.id);
        drop(guard);
        self.notify_user(
            other,
            NotificationKind::SessionCancelled,
            id,
            "session cancelled",
        );
        Ok(())
    }

    /// Expert feedback on a running or completed session.
    pub async fn submit_feedback(
        &self,
        actor: Actor,
        id: SessionId,
        feedback: Feedback,
    ) -> Result<(), EngineError> {
        if feedback.rating < 1 || feedback.rating > 5 {
            return Err(EngineError::LimitExceeded("rating must be 1..=5"));
        }
        if feedback.strengths.len() > MAX_FEEDBACK_ITEMS
            || feedback.improvements.len() > MAX_FEEDBACK_ITEMS
        {
            return Err(EngineError::LimitExceeded("too many feedback items"));
        }
        if feedback.notes.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("feedback notes too long"));
        }

        let mut guard = self.resolve_session_write(&id).await?;
        if guard.expert != actor.id {
            return Err(EngineError::NotAuthorized("only the expert leaves feedback"));
        }
        if guard.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                action: "review",
            });
        }

        let event = Event::FeedbackSubmitted { id, feedback };
        self.persist_to_session(&mut guard, &event).await?;

        let student = guard.student;
        drop(guard);
        self.notify_user(
            student,
            NotificationKind::FeedbackReceived,
            id,
            "feedback received",
        );
        Ok(())
    }

    pub async fn add_notes(
        &self,
        actor: Actor,
        id: SessionId,
        notes: String,
    ) -> Result<(), EngineError> {
        if notes.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
        let mut guard = self.resolve_session_write(&id).await?;
        if guard.expert != actor.id {
            return Err(EngineError::NotAuthorized("only the expert keeps notes"));
        }
        if guard.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                action: "annotate",
            });
        }

        let event = Event::NotesAdded { id, notes };
        self.persist_to_session(&mut guard, &event).await
    }

    /// Move the running session to a later section, marking earlier ones
    /// completed.
    pub async fn advance_section(
        &self,
        actor: Actor,
        id: SessionId,
        index: usize,
    ) -> Result<(), EngineError> {
        let mut guard = self.resolve_session_write(&id).await?;
        if guard.expert != actor.id {
            return Err(EngineError::NotAuthorized("only the expert runs sections"));
        }
        if guard.status != SessionStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                from: guard.status,
                action: "advance",
            });
        }
        if index >= guard.detail.sections.len() {
            return Err(EngineError::LimitExceeded("section index out of range"));
        }
        if index <= guard.detail.current_section {
            return Err(EngineError::LimitExceeded("section index must advance"));
        }

        let event = Event::SectionAdvanced { id, index };
        self.persist_to_session(&mut guard, &event).await
    }

    fn notify_user(&self, user: UserId, kind: NotificationKind, session_id: SessionId, msg: &str) {
        self.notify.send(Notification {
            id: Ulid::new(),
            user,
            kind,
            session_id,
            message: msg.to_string(),
            at: now_ms(),
        });
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            events.push(Event::UserRegistered {
                id: *entry.key(),
                role: *entry.value(),
            });
        }

        // Live slots replay as available; session events below restore
        // booked status. Clone the Arcs up front so no DashMap shard is
        // held across an await; in-flight mutations holding a write lock
        // just delay the snapshot, they never fail it.
        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();
        for cal in calendars {
            let guard = cal.read().await;
            let slots: Vec<(SlotId, Span)> = guard
                .slots
                .iter()
                .filter(|s| !s.deleted)
                .map(|s| (s.id, s.span))
                .collect();
            if !slots.is_empty() {
                events.push(Event::SlotsCreated {
                    owner: guard.owner,
                    slots,
                });
            }
        }

        // ULIDs are creation-ordered, so sorting by id replays sessions in
        // their original order.
        let mut session_ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        session_ids.sort();
        for id in session_ids {
            let Some(session) = self.get_session(&id) else {
                continue;
            };
            let guard = session.read().await;
            events.push(Event::SessionBooked {
                id: guard.id,
                slot_id: guard.slot_id,
                expert: guard.expert,
                student: guard.student,
                span: guard.span,
                kind: guard.detail.kind,
                title: guard.title.clone(),
                description: guard.description.clone(),
            });
            if let Some(at) = guard.detail.started_at {
                events.push(Event::SessionStarted { id: guard.id, at });
            }
            if guard.detail.current_section > 0 {
                events.push(Event::SectionAdvanced {
                    id: guard.id,
                    index: guard.detail.current_section,
                });
            }
            if let Some(ref notes) = guard.detail.notes {
                events.push(Event::NotesAdded {
                    id: guard.id,
                    notes: notes.clone(),
                });
            }
            if let Some(ref feedback) = guard.detail.feedback {
                events.push(Event::FeedbackSubmitted {
                    id: guard.id,
                    feedback: feedback.clone(),
                });
            }
            match guard.status {
                SessionStatus::Completed => {
                    if let Some(at) = guard.detail.ended_at {
                        events.push(Event::SessionCompleted { id: guard.id, at });
                    }
                }
                SessionStatus::Cancelled => {
                    if let Some(ref c) = guard.detail.cancellation {
                        events.push(Event::SessionCancelled {
                            id: guard.id,
                            slot_id: guard.slot_id,
                            by: c.cancelled_by,
                            reason: c.reason.clone(),
                            at: c.cancelled_at,
                        });
                    }
                }
                SessionStatus::Scheduled | SessionStatus::InProgress => {}
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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

fn validate_texts(title: Option<&str>, description: Option<&str>) -> Result<(), EngineError> {
    if let Some(t) = title
        && t.len() > MAX_TEXT_LEN
    {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if let Some(d) = description
        && d.len() > MAX_TEXT_LEN
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}
