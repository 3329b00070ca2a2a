use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
pub use world::SessionId;
use world::{AccountId, ObjectId};

/// Server-side copy of one Portal session.
///
/// Timestamps are wall-clock seconds since the unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSession {
    pub session_id: SessionId,
    #[serde(default)]
    pub protocol_key: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub account: Option<AccountId>,
    #[serde(default)]
    pub puppet: Option<ObjectId>,
    #[serde(default)]
    pub logged_in: bool,
    pub connected_at: f64,
    pub last_activity: f64,
    /// Set by the Server once it has asked the Portal to drop the session.
    #[serde(default)]
    pub disconnecting: bool,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

impl ServerSession {
    pub fn new(session_id: SessionId, now: f64) -> Self {
        Self {
            session_id,
            protocol_key: String::new(),
            address: String::new(),
            account: None,
            puppet: None,
            logged_in: false,
            connected_at: now,
            last_activity: now,
            disconnecting: false,
            flags: BTreeMap::new(),
        }
    }

    pub fn with_account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self.logged_in = true;
        self
    }

    pub fn with_puppet(mut self, puppet: ObjectId) -> Self {
        self.puppet = Some(puppet);
        self
    }

    pub fn idle_for(&self, now: f64) -> f64 {
        now - self.last_activity
    }
}

/// The Server's mirror of the Portal's session table.
///
/// The Portal owns sessions; the only change the Server makes on its own
/// authority is [`mark_disconnecting`](SessionMirror::mark_disconnecting).
#[derive(Debug, Default)]
pub struct SessionMirror {
    sessions: BTreeMap<SessionId, ServerSession>,
    puppet_to_session: BTreeMap<ObjectId, SessionId>,
}

impl SessionMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mirror with the Portal's authoritative list.
    pub fn sync_from_portal(&mut self, sessions: Vec<ServerSession>) {
        self.sessions.clear();
        self.puppet_to_session.clear();
        for session in sessions {
            self.connect(session);
        }
        tracing::info!(count = self.sessions.len(), "Session mirror synced from portal");
    }

    /// Insert or replace one session.
    pub fn connect(&mut self, session: ServerSession) {
        let sid = session.session_id;
        if let Some(old) = self.sessions.remove(&sid) {
            if let Some(obj) = old.puppet {
                self.puppet_to_session.remove(&obj);
            }
        }
        if let Some(obj) = session.puppet {
            self.puppet_to_session.insert(obj, sid);
        }
        self.sessions.insert(sid, session);
    }

    /// Drop a session the Portal reported gone.
    pub fn disconnect(&mut self, session_id: SessionId) -> Option<ServerSession> {
        let session = self.sessions.remove(&session_id)?;
        if let Some(obj) = session.puppet {
            self.puppet_to_session.remove(&obj);
        }
        Some(session)
    }

    pub fn get(&self, session_id: SessionId) -> Option<&ServerSession> {
        self.sessions.get(&session_id)
    }

    /// Record input activity.
    pub fn touch(&mut self, session_id: SessionId, now: f64) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) => {
                session.last_activity = now;
                true
            }
            None => false,
        }
    }

    pub fn login(&mut self, session_id: SessionId, account: AccountId) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) => {
                session.account = Some(account);
                session.logged_in = true;
                true
            }
            None => false,
        }
    }

    pub fn bind_puppet(&mut self, session_id: SessionId, puppet: ObjectId) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        if let Some(old) = session.puppet.replace(puppet) {
            self.puppet_to_session.remove(&old);
        }
        self.puppet_to_session.insert(puppet, session_id);
        true
    }

    pub fn unbind_puppet(&mut self, session_id: SessionId) -> Option<ObjectId> {
        let puppet = self.sessions.get_mut(&session_id)?.puppet.take()?;
        self.puppet_to_session.remove(&puppet);
        Some(puppet)
    }

    /// Flag a session as being disconnected by the Server. Returns false if
    /// it was unknown or already flagged.
    pub fn mark_disconnecting(&mut self, session_id: SessionId) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) if !session.disconnecting => {
                session.disconnecting = true;
                true
            }
            _ => false,
        }
    }

    /// Undo [`mark_disconnecting`](SessionMirror::mark_disconnecting) after
    /// the disconnect could not be delivered.
    pub fn clear_disconnecting(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.disconnecting = false;
        }
    }

    /// Sessions idle longer than `threshold` seconds. A threshold of zero
    /// or less disables idle detection.
    pub fn idle_candidates(&self, now: f64, threshold: f64) -> Vec<&ServerSession> {
        if threshold <= 0.0 {
            return Vec::new();
        }
        self.sessions
            .values()
            .filter(|s| !s.disconnecting && s.idle_for(now) > threshold)
            .collect()
    }

    /// True if a live session currently controls `object`.
    pub fn is_puppeted(&self, object: ObjectId) -> bool {
        self.puppet_to_session.contains_key(&object)
    }

    pub fn session_for_puppet(&self, object: ObjectId) -> Option<SessionId> {
        self.puppet_to_session.get(&object).copied()
    }

    /// Full copy of the mirror for pushing back to the Portal.
    pub fn portal_snapshot(&self) -> Vec<ServerSession> {
        self.sessions.values().cloned().collect()
    }

    pub fn all_session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions not yet flagged for disconnect.
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| !s.disconnecting).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_replaces_everything() {
        let mut mirror = SessionMirror::new();
        mirror.connect(ServerSession::new(SessionId(1), 0.0).with_puppet(ObjectId(5)));
        assert!(mirror.is_puppeted(ObjectId(5)));

        mirror.sync_from_portal(vec![
            ServerSession::new(SessionId(2), 10.0),
            ServerSession::new(SessionId(3), 10.0).with_puppet(ObjectId(6)),
        ]);
        assert_eq!(mirror.all_session_ids(), vec![SessionId(2), SessionId(3)]);
        assert!(!mirror.is_puppeted(ObjectId(5)));
        assert_eq!(mirror.session_for_puppet(ObjectId(6)), Some(SessionId(3)));
    }

    #[test]
    fn puppet_index_follows_binding() {
        let mut mirror = SessionMirror::new();
        mirror.connect(ServerSession::new(SessionId(1), 0.0));
        assert!(mirror.bind_puppet(SessionId(1), ObjectId(2)));
        assert!(mirror.bind_puppet(SessionId(1), ObjectId(3)));
        assert!(!mirror.is_puppeted(ObjectId(2)));
        assert!(mirror.is_puppeted(ObjectId(3)));

        assert_eq!(mirror.unbind_puppet(SessionId(1)), Some(ObjectId(3)));
        assert!(!mirror.is_puppeted(ObjectId(3)));
        assert!(!mirror.bind_puppet(SessionId(99), ObjectId(1)));
    }

    #[test]
    fn disconnect_removes_puppet_index() {
        let mut mirror = SessionMirror::new();
        mirror.connect(ServerSession::new(SessionId(1), 0.0).with_puppet(ObjectId(4)));
        let gone = mirror.disconnect(SessionId(1)).unwrap();
        assert_eq!(gone.puppet, Some(ObjectId(4)));
        assert!(!mirror.is_puppeted(ObjectId(4)));
        assert!(mirror.is_empty());
    }

    #[test]
    fn idle_candidates_respect_threshold_and_flag() {
        let mut mirror = SessionMirror::new();
        mirror.connect(ServerSession::new(SessionId(1), 0.0));
        mirror.connect(ServerSession::new(SessionId(2), 0.0));
        mirror.connect(ServerSession::new(SessionId(3), 350.0));
        mirror.touch(SessionId(2), 200.0);

        let idle: Vec<_> = mirror.idle_candidates(400.0, 300.0).iter().map(|s| s.session_id).collect();
        assert_eq!(idle, vec![SessionId(1)]);

        assert!(mirror.mark_disconnecting(SessionId(1)));
        assert!(!mirror.mark_disconnecting(SessionId(1)));
        assert!(mirror.idle_candidates(400.0, 300.0).is_empty());
        assert_eq!(mirror.active_count(), 2);

        assert!(mirror.idle_candidates(10_000.0, 0.0).is_empty());
        assert!(mirror.idle_candidates(10_000.0, -1.0).is_empty());
    }

    #[test]
    fn login_sets_account() {
        let mut mirror = SessionMirror::new();
        mirror.connect(ServerSession::new(SessionId(1), 0.0));
        assert!(mirror.login(SessionId(1), AccountId(7)));
        let s = mirror.get(SessionId(1)).unwrap();
        assert!(s.logged_in);
        assert_eq!(s.account, Some(AccountId(7)));
    }

    #[test]
    fn session_serde_defaults() {
        let s: ServerSession = serde_json::from_str(
            r#"{"session_id": 4, "connected_at": 1.0, "last_activity": 2.5}"#,
        )
        .unwrap();
        assert_eq!(s.session_id, SessionId(4));
        assert!(!s.disconnecting);
        assert_eq!(mirror_roundtrip(&s), s);
    }

    fn mirror_roundtrip(s: &ServerSession) -> ServerSession {
        let mut mirror = SessionMirror::new();
        mirror.connect(s.clone());
        mirror.portal_snapshot().remove(0)
    }
}
