use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub type UserId = Ulid;
pub type SlotId = Ulid;
pub type SessionId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Minutes, rounded up.
    pub fn duration_minutes(&self) -> i64 {
        (self.duration_ms() + 59_999) / 60_000
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Platform role of a registered user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Expert,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Expert => "expert",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "expert" => Some(Role::Expert),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Available,
    Booked,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
        }
    }
}

/// An atomic bookable interval published by an expert.
///
/// Deleted slots stay in the calendar with `deleted = true`; every read path
/// filters on it, so the no-overlap invariant only binds live slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub span: Span,
    pub status: SlotStatus,
    pub deleted: bool,
}

/// One expert's slots, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub owner: UserId,
    pub slots: Vec<Slot>,
}

impl Calendar {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            slots: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn get_slot(&self, id: &SlotId) -> Option<&Slot> {
        self.slots.iter().find(|s| &s.id == id)
    }

    pub fn get_slot_mut(&mut self, id: &SlotId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| &s.id == id)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.deleted).count()
    }

    /// Live (non-deleted) slots whose span overlaps the query window.
    /// Binary search skips slots starting at or after `query.end`.
    pub fn live_overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| !s.deleted && s.span.end > query.start)
    }

    /// First live slot conflicting with `candidate` (open-interval overlap).
    pub fn find_overlap(&self, candidate: &Span) -> Option<SlotId> {
        self.live_overlapping(candidate).map(|s| s.id).next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<SessionStatus> {
        match s.to_lowercase().as_str() {
            "scheduled" => Some(SessionStatus::Scheduled),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Technical,
    Behavioral,
    Mock,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Technical => "technical",
            SessionKind::Behavioral => "behavioral",
            SessionKind::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Option<SessionKind> {
        match s.to_lowercase().as_str() {
            "technical" => Some(SessionKind::Technical),
            "behavioral" => Some(SessionKind::Behavioral),
            "mock" => Some(SessionKind::Mock),
            _ => None,
        }
    }

    pub fn default_title(&self) -> &'static str {
        match self {
            SessionKind::Technical => "Technical interview",
            SessionKind::Behavioral => "Behavioral interview",
            SessionKind::Mock => "Mock interview",
        }
    }

    /// Section plan for a fresh session of this kind.
    pub fn sections(&self) -> Vec<Section> {
        let plan: &[(&str, u32)] = match self {
            SessionKind::Technical => &[
                ("Algorithms", 20),
                ("System Design", 20),
                ("Code Review", 20),
            ],
            SessionKind::Behavioral => &[
                ("Introduction", 10),
                ("Past Experience", 20),
                ("Situational", 20),
                ("Questions", 10),
            ],
            SessionKind::Mock => &[
                ("Presentation", 10),
                ("Technical Questions", 25),
                ("Behavioral Questions", 15),
                ("Feedback", 10),
            ],
        };
        plan.iter()
            .map(|&(title, minutes)| Section {
                title: title.to_string(),
                minutes,
                completed: false,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub minutes: u32,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_by: UserId,
    pub cancelled_at: Ms,
}

/// Kind-specific session payload. Owned by the session, opaque to the
/// slot/booking machinery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetail {
    pub kind: SessionKind,
    pub sections: Vec<Section>,
    pub current_section: usize,
    pub feedback: Option<Feedback>,
    pub notes: Option<String>,
    pub cancellation: Option<Cancellation>,
    pub started_at: Option<Ms>,
    pub ended_at: Option<Ms>,
}

impl SessionDetail {
    pub fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            sections: kind.sections(),
            current_section: 0,
            feedback: None,
            notes: None,
            cancellation: None,
            started_at: None,
            ended_at: None,
        }
    }
}

/// A scheduled expert/student interaction, possibly originating from a
/// booked slot (`slot_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub slot_id: Option<SlotId>,
    pub expert: UserId,
    pub student: UserId,
    pub span: Span,
    pub status: SessionStatus,
    pub title: String,
    pub description: Option<String>,
    pub detail: SessionDetail,
}

impl Session {
    pub fn duration_minutes(&self) -> i64 {
        self.span.duration_minutes()
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        &self.expert == user || &self.student == user
    }

    /// The counterparty of a participant.
    pub fn other_participant(&self, user: &UserId) -> UserId {
        if &self.expert == user {
            self.student
        } else {
            self.expert
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// `SlotsCreated` carries a whole batch in one record so a crash can never
/// persist half of an all-or-nothing creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: UserId,
        role: Role,
    },
    SlotsCreated {
        owner: UserId,
        slots: Vec<(SlotId, Span)>,
    },
    SlotDeleted {
        id: SlotId,
        owner: UserId,
    },
    SessionBooked {
        id: SessionId,
        slot_id: Option<SlotId>,
        expert: UserId,
        student: UserId,
        span: Span,
        kind: SessionKind,
        title: String,
        description: Option<String>,
    },
    SessionStarted {
        id: SessionId,
        at: Ms,
    },
    SessionCompleted {
        id: SessionId,
        at: Ms,
    },
    SessionCancelled {
        id: SessionId,
        slot_id: Option<SlotId>,
        by: UserId,
        reason: String,
        at: Ms,
    },
    FeedbackSubmitted {
        id: SessionId,
        feedback: Feedback,
    },
    NotesAdded {
        id: SessionId,
        notes: String,
    },
    SectionAdvanced {
        id: SessionId,
        index: usize,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: SlotId,
    pub owner: UserId,
    pub start: Ms,
    pub end: Ms,
    pub status: SlotStatus,
}

impl SlotInfo {
    pub fn from_slot(owner: UserId, slot: &Slot) -> Self {
        Self {
            id: slot.id,
            owner,
            start: slot.span.start,
            end: slot.span.end,
            status: slot.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub slot_id: Option<SlotId>,
    pub expert: UserId,
    pub student: UserId,
    pub start: Ms,
    pub end: Ms,
    pub status: SessionStatus,
    pub kind: SessionKind,
    pub title: String,
    pub duration_minutes: i64,
}

impl SessionInfo {
    pub fn from_session(s: &Session) -> Self {
        Self {
            id: s.id,
            slot_id: s.slot_id,
            expert: s.expert,
            student: s.student,
            start: s.span.start,
            end: s.span.end,
            status: s.status,
            kind: s.detail.kind,
            title: s.title.clone(),
            duration_minutes: s.duration_minutes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: Ms, end: Ms) -> Slot {
        Slot {
            id: Ulid::new(),
            span: Span::new(start, end),
            status: SlotStatus::Available,
            deleted: false,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.overlaps(&Span::new(150, 250)));
        assert!(!s.overlaps(&Span::new(200, 300))); // adjacent, not overlapping
    }

    #[test]
    fn duration_minutes_rounds_up() {
        assert_eq!(Span::new(0, 3_600_000).duration_minutes(), 60);
        assert_eq!(Span::new(0, 3_600_001).duration_minutes(), 61);
        assert_eq!(Span::new(0, 1).duration_minutes(), 1);
    }

    #[test]
    fn calendar_keeps_sort_order() {
        let mut cal = Calendar::new(Ulid::new());
        cal.insert_slot(slot(300, 400));
        cal.insert_slot(slot(100, 200));
        cal.insert_slot(slot(200, 300));
        assert_eq!(cal.slots[0].span.start, 100);
        assert_eq!(cal.slots[1].span.start, 200);
        assert_eq!(cal.slots[2].span.start, 300);
    }

    #[test]
    fn live_overlapping_skips_deleted() {
        let mut cal = Calendar::new(Ulid::new());
        let mut dead = slot(100, 200);
        dead.deleted = true;
        cal.insert_slot(dead);
        cal.insert_slot(slot(250, 350));

        let hits: Vec<_> = cal.live_overlapping(&Span::new(0, 1000)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(250, 350));
        assert_eq!(cal.live_count(), 1);
    }

    #[test]
    fn find_overlap_adjacent_is_clear() {
        let mut cal = Calendar::new(Ulid::new());
        cal.insert_slot(slot(100, 200));
        assert!(cal.find_overlap(&Span::new(200, 300)).is_none());
        assert!(cal.find_overlap(&Span::new(199, 300)).is_some());
        assert!(cal.find_overlap(&Span::new(0, 101)).is_some());
    }

    #[test]
    fn find_overlap_ignores_far_future_slots() {
        let mut cal = Calendar::new(Ulid::new());
        cal.insert_slot(slot(0, 50));
        cal.insert_slot(slot(1000, 1100));
        assert!(cal.find_overlap(&Span::new(100, 900)).is_none());
    }

    #[test]
    fn section_plans_match_kind() {
        assert_eq!(SessionKind::Technical.sections().len(), 3);
        assert_eq!(SessionKind::Behavioral.sections().len(), 4);
        let mock = SessionKind::Mock.sections();
        assert_eq!(mock.len(), 4);
        assert_eq!(mock[0].title, "Presentation");
        assert!(mock.iter().all(|s| !s.completed));
    }

    #[test]
    fn kind_and_status_parse_roundtrip() {
        for kind in [
            SessionKind::Technical,
            SessionKind::Behavioral,
            SessionKind::Mock,
        ] {
            assert_eq!(SessionKind::parse(kind.as_str()), Some(kind));
        }
        for status in [
            SessionStatus::Scheduled,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Role::parse("EXPERT"), Some(Role::Expert));
        assert_eq!(SessionKind::parse("waffle"), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SessionBooked {
            id: Ulid::new(),
            slot_id: Some(Ulid::new()),
            expert: Ulid::new(),
            student: Ulid::new(),
            span: Span::new(1000, 2000),
            kind: SessionKind::Mock,
            title: "Mock interview".into(),
            description: None,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn batch_event_roundtrip() {
        let event = Event::SlotsCreated {
            owner: Ulid::new(),
            slots: vec![
                (Ulid::new(), Span::new(0, 100)),
                (Ulid::new(), Span::new(100, 200)),
            ],
        };
        let bytes = bincode::serialize(&event).unwrap();
        assert_eq!(bincode::deserialize::<Event>(&bytes).unwrap(), event);
    }
}
