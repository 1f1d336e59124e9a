// Typing presence for one chat: who is typing right now, driven purely by
// inbound presence events. There is no local expiry; an entry leaves the set
// only on an explicit off event or when the view tears down.

use log::debug;

use crate::models::{PresenceEvent, TypingUser};

/// Ephemeral set of currently-typing users. Insertion order is kept so the
/// summary names users in the order they started typing.
#[derive(Debug, Default)]
pub struct TypingTracker {
    users: Vec<TypingUser>,
}

impl TypingTracker {
    pub fn new() -> Self {
        TypingTracker { users: Vec::new() }
    }

    /// Apply an inbound typing transition. Idempotent in both directions:
    /// a repeated "on" for a tracked user and an "off" for an untracked one
    /// are no-ops.
    pub fn on_presence_event(&mut self, event: &PresenceEvent) {
        if event.is_typing {
            if self.users.iter().any(|u| u.user_id == event.user_id) {
                return;
            }
            debug!("{} started typing", event.user_id);
            self.users.push(TypingUser {
                user_id: event.user_id.clone(),
                name: event.name.clone(),
            });
        } else {
            let before = self.users.len();
            self.users.retain(|u| u.user_id != event.user_id);
            if self.users.len() != before {
                debug!("{} stopped typing", event.user_id);
            }
        }
    }

    /// Empty the set. Invoked on chat-view teardown; no entry survives it.
    pub fn clear(&mut self) {
        self.users.clear();
    }

    pub fn users(&self) -> &[TypingUser] {
        &self.users
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Human-readable summary for the UI, recomputed on every set change:
    /// nobody, one or two users by name, three or more as a count.
    pub fn summary(&self) -> Option<String> {
        match self.users.as_slice() {
            [] => None,
            [one] => Some(format!("{} is typing...", one.name)),
            [one, two] => Some(format!("{} and {} are typing...", one.name, two.name)),
            many => Some(format!("{} people are typing...", many.len())),
        }
    }
}
