// Typing presence set behavior as seen through the public API.

use chatwire::chat::TypingTracker;
use chatwire::models::PresenceEvent;

fn event(user_id: &str, name: &str, is_typing: bool) -> PresenceEvent {
    PresenceEvent {
        user_id: user_id.to_string(),
        name: name.to_string(),
        is_typing,
    }
}

#[test]
fn typing_set_tracks_on_and_off_transitions() {
    let mut tracker = TypingTracker::new();

    tracker.on_presence_event(&event("user1", "Ada", true));
    tracker.on_presence_event(&event("user2", "Grace", true));
    tracker.on_presence_event(&event("user1", "Ada", false));

    let users = tracker.users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, "user2");

    let summary = tracker.summary().unwrap();
    assert_eq!(summary, "Grace is typing...");
}

#[test]
fn at_most_one_entry_per_user() {
    let mut tracker = TypingTracker::new();
    tracker.on_presence_event(&event("user1", "Ada", true));
    tracker.on_presence_event(&event("user1", "Ada", true));
    tracker.on_presence_event(&event("user1", "Ada", true));
    assert_eq!(tracker.users().len(), 1);
}

#[test]
fn clear_empties_the_set() {
    let mut tracker = TypingTracker::new();
    tracker.on_presence_event(&event("user1", "Ada", true));
    tracker.on_presence_event(&event("user2", "Grace", true));
    tracker.clear();
    assert!(tracker.is_empty());
    assert_eq!(tracker.summary(), None);
}

#[test]
fn summary_counts_three_or_more() {
    let mut tracker = TypingTracker::new();
    tracker.on_presence_event(&event("user1", "Ada", true));
    tracker.on_presence_event(&event("user2", "Grace", true));
    tracker.on_presence_event(&event("user3", "Edsger", true));
    tracker.on_presence_event(&event("user4", "Barbara", true));
    assert_eq!(tracker.summary().unwrap(), "4 people are typing...");
}

// An entry with no off event stays forever: there is deliberately no local
// expiry, matching the event source's contract.
#[test]
fn entries_never_expire_on_their_own() {
    let mut tracker = TypingTracker::new();
    tracker.on_presence_event(&event("user1", "Ada", true));
    assert_eq!(tracker.users().len(), 1);
    // Nothing but an off event or clear() removes the entry
    tracker.on_presence_event(&event("user2", "Grace", false));
    assert_eq!(tracker.users().len(), 1);
}
