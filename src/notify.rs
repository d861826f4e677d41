use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::limits::MAX_INBOX_LEN;
use crate::model::{Ms, SessionId, UserId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    BookingReceived,
    SessionScheduled,
    SessionStarted,
    SessionCompleted,
    SessionCancelled,
    FeedbackReceived,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingReceived => "booking_received",
            NotificationKind::SessionScheduled => "session_scheduled",
            NotificationKind::SessionStarted => "session_started",
            NotificationKind::SessionCompleted => "session_completed",
            NotificationKind::SessionCancelled => "session_cancelled",
            NotificationKind::FeedbackReceived => "feedback_received",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Ulid,
    pub user: UserId,
    pub kind: NotificationKind,
    pub session_id: SessionId,
    pub message: String,
    pub at: Ms,
}

/// Announced on every session creation so downstream provisioning
/// (video rooms, interview tooling) can react.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreated {
    pub session_id: SessionId,
    pub expert: UserId,
    pub student: UserId,
    pub start: Ms,
    pub end: Ms,
}

/// Fan-out hub for session notifications.
///
/// Each user gets an in-process broadcast channel plus a bounded inbox.
/// The inbox backs `SELECT * FROM notifications` polling over the wire;
/// the channel serves in-process subscribers. A separate firehose carries
/// session-created events. All of it is fire-and-forget: a full channel
/// or a trimmed inbox never fails the mutation that produced the event.
pub struct NotifyHub {
    channels: DashMap<UserId, broadcast::Sender<Notification>>,
    inboxes: DashMap<UserId, VecDeque<Notification>>,
    sessions: broadcast::Sender<SessionCreated>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            inboxes: DashMap::new(),
            sessions: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to session-created events across all users.
    pub fn subscribe_sessions(&self) -> broadcast::Receiver<SessionCreated> {
        self.sessions.subscribe()
    }

    /// Announce a freshly created session.
    pub fn announce_session(&self, event: SessionCreated) {
        let _ = self.sessions.send(event);
    }

    /// Subscribe to a user's notifications. Creates the channel if needed.
    pub fn subscribe(&self, user: UserId) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Deliver a notification: append to the user's inbox (dropping the
    /// oldest entry past the cap) and broadcast to live subscribers.
    pub fn send(&self, notification: Notification) {
        let mut inbox = self.inboxes.entry(notification.user).or_default();
        if inbox.len() >= MAX_INBOX_LEN {
            inbox.pop_front();
        }
        inbox.push_back(notification.clone());
        drop(inbox);

        if let Some(sender) = self.channels.get(&notification.user) {
            let _ = sender.send(notification);
        }
    }

    /// Drain and return a user's pending notifications, oldest first.
    pub fn drain_inbox(&self, user: &UserId) -> Vec<Notification> {
        match self.inboxes.get_mut(user) {
            Some(mut inbox) => inbox.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Pending notifications without consuming them.
    pub fn peek_inbox(&self, user: &UserId) -> Vec<Notification> {
        match self.inboxes.get(user) {
            Some(inbox) => inbox.iter().cloned().collect(),
            None => Vec::new(),
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
