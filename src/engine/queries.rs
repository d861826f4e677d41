use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Slots of one expert intersecting the query window, sorted by start.
    /// `only_available` drops booked slots; deleted slots never show.
    pub async fn query_availability(
        &self,
        owner: UserId,
        query_start: Ms,
        query_end: Ms,
        only_available: bool,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        if query_start >= query_end {
            return Err(EngineError::InvalidInterval {
                start: query_start,
                end: query_end,
            });
        }
        if query_end - query_start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let cal = match self.get_calendar(&owner) {
            Some(cal) => cal,
            None => return Ok(Vec::new()),
        };
        let guard = cal.read().await;

        let query = Span::new(query_start, query_end);
        Ok(guard
            .live_overlapping(&query)
            .filter(|s| !only_available || s.status == SlotStatus::Available)
            .map(|s| SlotInfo::from_slot(owner, s))
            .collect())
    }

    /// A session, visible to its participants only.
    pub async fn get_session_info(
        &self,
        actor: Actor,
        id: SessionId,
    ) -> Result<SessionInfo, EngineError> {
        let session = self.get_session(&id).ok_or(EngineError::NotFound(id))?;
        let guard = session.read().await;
        if !guard.is_participant(&actor.id) {
            return Err(EngineError::NotAuthorized("not a session participant"));
        }
        Ok(SessionInfo::from_session(&guard))
    }

    /// Full session state including sections, feedback and cancellation.
    pub async fn get_session_detail(
        &self,
        actor: Actor,
        id: SessionId,
    ) -> Result<(SessionInfo, SessionDetail), EngineError> {
        let session = self.get_session(&id).ok_or(EngineError::NotFound(id))?;
        let guard = session.read().await;
        if !guard.is_participant(&actor.id) {
            return Err(EngineError::NotAuthorized("not a session participant"));
        }
        Ok((SessionInfo::from_session(&guard), guard.detail.clone()))
    }

    /// All sessions the actor takes part in, optionally narrowed to one
    /// status, sorted by start time.
    pub async fn list_sessions(
        &self,
        actor: Actor,
        status: Option<SessionStatus>,
    ) -> Vec<SessionInfo> {
        let mut out = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value().clone();
            let guard = session.read().await;
            if guard.is_participant(&actor.id) && status.is_none_or(|s| s == guard.status) {
                out.push(SessionInfo::from_session(&guard));
            }
        }
        out.sort_by_key(|s| (s.start, s.id));
        out
    }
}
