//! Room and participant bookkeeping.
//!
//! A room exists in the table if and only if it has at least one participant
//! or is inside its post-empty grace window awaiting deferred deletion. All
//! mutation happens under the single room-table lock; broadcast snapshots
//! its targets before removing dead members so the map is never mutated
//! while iterated.

use std::collections::HashMap;

use uuid::Uuid;

use crate::state::{OutboundFrame, OutboundSender};

/// One live connection to the server, identified within its room.
pub struct Participant {
    /// Identity of the underlying connection, distinct from the user id.
    /// Guards the departure path against a stale session removing the
    /// replacement that evicted it.
    pub conn_id: Uuid,
    pub user_name: String,
    pub joined_at: i64,
    pub sender: OutboundSender,
}

impl Participant {
    pub fn new(conn_id: Uuid, user_name: String, joined_at: i64, sender: OutboundSender) -> Self {
        Self {
            conn_id,
            user_name,
            joined_at,
            sender,
        }
    }
}

/// A signaling broadcast domain, keyed by an externally supplied identifier.
pub struct Room {
    pub id: String,
    pub created_at: i64,
    /// Set when the last participant departs, cleared on the next join.
    pub emptied_at: Option<i64>,
    participants: HashMap<String, Participant>,
}

impl Room {
    pub fn new(id: String, created_at: i64) -> Self {
        Self {
            id,
            created_at,
            emptied_at: None,
            participants: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.participants.get(user_id)
    }

    /// Insert a participant, evicting any live entry under the same id.
    ///
    /// The evicted participant is returned so the caller can close its
    /// socket and broadcast its departure. Clears any pending-empty marker.
    pub fn insert(&mut self, user_id: String, participant: Participant) -> Option<Participant> {
        self.emptied_at = None;
        self.participants.insert(user_id, participant)
    }

    /// Remove a live entry under this id regardless of which connection owns
    /// it (reconnect-replaces-stale-session eviction).
    pub fn evict(&mut self, user_id: &str) -> Option<Participant> {
        self.participants.remove(user_id)
    }

    /// Remove a participant only if it is the given connection.
    ///
    /// Returns the removed entry, or `None` when the id is absent or held by
    /// a newer connection (reconnect-replaces-stale-session semantics).
    pub fn remove_conn(&mut self, user_id: &str, conn_id: Uuid) -> Option<Participant> {
        match self.participants.get(user_id) {
            Some(p) if p.conn_id == conn_id => self.participants.remove(user_id),
            _ => None,
        }
    }

    /// Membership snapshot excluding one participant, for room-state.
    pub fn members_except(&self, exclude_user_id: &str) -> Vec<(String, String)> {
        self.participants
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_user_id)
            .map(|(id, p)| (id.clone(), p.user_name.clone()))
            .collect()
    }

    /// Queue a text frame to every member except `exclude`.
    ///
    /// Members whose outbound channel is gone are removed after the loop and
    /// returned so the caller can cascade their departure notices.
    pub fn broadcast(&mut self, text: &str, exclude: Option<&str>) -> Vec<String> {
        let mut dead = Vec::new();
        for (user_id, participant) in &self.participants {
            if exclude == Some(user_id.as_str()) {
                continue;
            }
            if participant
                .sender
                .send(OutboundFrame::Text(text.to_string()))
                .is_err()
            {
                tracing::warn!(room = %self.id, user = %user_id, "dropping unreachable participant during broadcast");
                dead.push(user_id.clone());
            }
        }
        for user_id in &dead {
            self.participants.remove(user_id);
        }
        dead
    }

    /// Queue a text frame to a single member. `false` when the target is
    /// absent or its channel is gone; an unreachable target is removed.
    pub fn forward(&mut self, text: &str, target_user_id: &str) -> bool {
        match self.participants.get(target_user_id) {
            Some(target) => {
                if target
                    .sender
                    .send(OutboundFrame::Text(text.to_string()))
                    .is_ok()
                {
                    true
                } else {
                    tracing::warn!(room = %self.id, user = %target_user_id, "removing unreachable forward target");
                    self.participants.remove(target_user_id);
                    false
                }
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn test_participant(name: &str) -> (Participant, UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let participant = Participant::new(Uuid::new_v4(), name.to_string(), 1000, tx);
        (participant, rx)
    }

    fn text_frames(rx: &mut UnboundedReceiver<OutboundFrame>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let OutboundFrame::Text(text) = frame {
                frames.push(text);
            }
        }
        frames
    }

    #[test]
    fn test_insert_evicts_same_id_and_returns_old_entry() {
        let mut room = Room::new("r1".to_string(), 0);
        let (first, _first_rx) = test_participant("Alice v1");
        let first_conn = first.conn_id;
        let (second, _second_rx) = test_participant("Alice v2");

        assert!(room.insert("alice".to_string(), first).is_none());
        let evicted = room.insert("alice".to_string(), second);

        let evicted = evicted.expect("stale entry should be evicted");
        assert_eq!(evicted.conn_id, first_conn);
        assert_eq!(room.len(), 1);
        assert_eq!(room.get("alice").unwrap().user_name, "Alice v2");
    }

    #[test]
    fn test_insert_clears_pending_empty_marker() {
        let mut room = Room::new("r1".to_string(), 0);
        room.emptied_at = Some(500);
        let (p, _rx) = test_participant("Alice");

        room.insert("alice".to_string(), p);

        assert!(room.emptied_at.is_none());
    }

    #[test]
    fn test_remove_conn_ignores_stale_connection() {
        let mut room = Room::new("r1".to_string(), 0);
        let (p, _rx) = test_participant("Alice");
        let live_conn = p.conn_id;
        room.insert("alice".to_string(), p);

        // a connection that no longer owns the entry must not remove it
        assert!(room.remove_conn("alice", Uuid::new_v4()).is_none());
        assert_eq!(room.len(), 1);

        assert!(room.remove_conn("alice", live_conn).is_some());
        assert!(room.is_empty());
    }

    #[test]
    fn test_broadcast_excludes_the_trigger() {
        let mut room = Room::new("r1".to_string(), 0);
        let (alice, mut alice_rx) = test_participant("Alice");
        let (bob, mut bob_rx) = test_participant("Bob");
        room.insert("alice".to_string(), alice);
        room.insert("bob".to_string(), bob);

        let dead = room.broadcast("notice", Some("alice"));

        assert!(dead.is_empty());
        assert_eq!(text_frames(&mut alice_rx), Vec::<String>::new());
        assert_eq!(text_frames(&mut bob_rx), vec!["notice".to_string()]);
    }

    #[test]
    fn test_broadcast_reaps_dead_members_without_aborting() {
        let mut room = Room::new("r1".to_string(), 0);
        let (alice, alice_rx) = test_participant("Alice");
        let (bob, mut bob_rx) = test_participant("Bob");
        room.insert("alice".to_string(), alice);
        room.insert("bob".to_string(), bob);
        drop(alice_rx); // alice's pump is gone

        let dead = room.broadcast("notice", None);

        assert_eq!(dead, vec!["alice".to_string()]);
        assert_eq!(room.len(), 1);
        assert_eq!(text_frames(&mut bob_rx), vec!["notice".to_string()]);
    }

    #[test]
    fn test_forward_to_missing_target_fails() {
        let mut room = Room::new("r1".to_string(), 0);
        let (alice, _rx) = test_participant("Alice");
        room.insert("alice".to_string(), alice);

        assert!(!room.forward("offer", "carol"));
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn test_forward_to_unreachable_target_removes_it() {
        let mut room = Room::new("r1".to_string(), 0);
        let (bob, bob_rx) = test_participant("Bob");
        room.insert("bob".to_string(), bob);
        drop(bob_rx);

        assert!(!room.forward("offer", "bob"));
        assert!(room.is_empty());
    }

    #[test]
    fn test_members_except_excludes_self() {
        let mut room = Room::new("r1".to_string(), 0);
        let (alice, _a) = test_participant("Alice");
        let (bob, _b) = test_participant("Bob");
        room.insert("alice".to_string(), alice);
        room.insert("bob".to_string(), bob);

        let members = room.members_except("alice");

        assert_eq!(members, vec![("bob".to_string(), "Bob".to_string())]);
    }
}
