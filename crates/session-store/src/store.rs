//! Process-wide session store
//!
//! The current `Session` lives in a `tokio::sync::watch` channel: readers take
//! a synchronous snapshot (or subscribe for change notifications) and never
//! wait on a writer's persistence I/O. Writers are serialized by a separate
//! mutex that covers "replace the session, then persist it", so two
//! mutations can never persist out of order.

use std::sync::{Mutex, PoisonError};

use common::Secret;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::Durability;
use crate::policy::{Placement, StoragePolicy};
use crate::session::{
    LoginGrant, PERSISTED_VERSION, PersistedSession, Session, TokenPair, UserIdentity,
};

/// Storage key the session envelope is written under.
pub const DEFAULT_SESSION_KEY: &str = "auth-storage";

pub struct SessionStore {
    state: watch::Sender<Session>,
    writer: Mutex<()>,
    storage: StoragePolicy,
    key: String,
}

impl SessionStore {
    /// Empty store. Does not read storage.
    pub fn new(storage: StoragePolicy, key: impl Into<String>) -> Self {
        Self {
            state: watch::Sender::new(Session::default()),
            writer: Mutex::new(()),
            storage,
            key: key.into(),
        }
    }

    /// Recover the persisted session, if any.
    ///
    /// A stored envelope with only one of the two tokens is invalid: it is
    /// removed from both backends and the store starts empty. So is an
    /// envelope written by a newer schema version than this build reads.
    pub fn restore(storage: StoragePolicy, key: impl Into<String>) -> Self {
        let store = Self::new(storage, key);
        let Some(persisted) = store.storage.read::<PersistedSession>(&store.key) else {
            debug!(key = %store.key, "no persisted session");
            return store;
        };

        if persisted.version > PERSISTED_VERSION {
            warn!(
                key = %store.key,
                version = persisted.version,
                supported = PERSISTED_VERSION,
                "persisted session has an unknown schema version, discarding"
            );
            store.storage.remove(&store.key);
            return store;
        }

        match Session::from_persisted(persisted) {
            Some(session) => {
                info!(
                    authenticated = session.is_authenticated(),
                    remember_me = session.remember_me,
                    "restored persisted session"
                );
                store.state.send_replace(session);
            }
            None => {
                warn!(key = %store.key, "persisted session has a partial token pair, discarding");
                store.storage.remove(&store.key);
            }
        }
        store
    }

    /// Clone of the current session.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receiver notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn access_token(&self) -> Option<Secret<String>> {
        self.state.borrow().access_token().cloned()
    }

    pub fn refresh_token(&self) -> Option<Secret<String>> {
        self.state.borrow().refresh_token().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn storage(&self) -> &StoragePolicy {
        &self.storage
    }

    /// Replace the whole session with a fresh login.
    pub fn login(&self, grant: LoginGrant) -> Placement {
        let _writer = self.lock_writer();
        let session = Session::from_grant(grant);
        info!(
            authenticated = session.is_authenticated(),
            remember_me = session.remember_me,
            "session established"
        );
        self.state.send_replace(session.clone());
        self.persist(&session)
    }

    /// Clear the session from memory and both backends.
    ///
    /// Returns `true` if an authenticated session was cleared. Calling it on
    /// an already-empty store is a no-op apart from the storage cleanup.
    pub fn logout(&self) -> bool {
        let _writer = self.lock_writer();
        let previous = self.state.send_replace(Session::default());
        self.storage.remove(&self.key);
        if previous.is_authenticated() {
            info!("session cleared");
        }
        previous.is_authenticated()
    }

    /// Swap the token pair after a refresh, leaving user and flags alone.
    ///
    /// The session is authenticated afterwards iff `access` is non-empty. An
    /// empty access or refresh token clears both, since a partial pair is
    /// never stored.
    pub fn set_tokens(&self, access: impl Into<String>, refresh: impl Into<String>) {
        let tokens = TokenPair::new(access, refresh);
        if tokens.is_none() {
            warn!("set_tokens called without a complete token pair, clearing tokens");
        }
        self.mutate(|session| session.replace_tokens(tokens));
        debug!("token pair replaced");
    }

    /// `set_tokens`, but only if the session still holds `expected_refresh`.
    ///
    /// A refresh that completes after a logout or a new login must not
    /// resurrect or overwrite that session. Returns whether the swap happened.
    pub fn rotate_tokens(
        &self,
        expected_refresh: &Secret<String>,
        access: impl Into<String>,
        refresh: impl Into<String>,
    ) -> bool {
        let _writer = self.lock_writer();
        let mut session = self.snapshot();
        if session.refresh_token() != Some(expected_refresh) {
            debug!("session changed during refresh, discarding rotated tokens");
            return false;
        }
        session.replace_tokens(TokenPair::new(access, refresh));
        self.state.send_replace(session.clone());
        self.persist(&session);
        true
    }

    pub fn set_user(&self, user: UserIdentity) {
        self.mutate(|session| session.user = Some(user));
    }

    pub fn set_profile_status(&self, completed: bool) {
        self.mutate(|session| session.profile_completed = completed);
    }

    fn mutate(&self, apply: impl FnOnce(&mut Session)) {
        let _writer = self.lock_writer();
        let mut session = self.snapshot();
        apply(&mut session);
        self.state.send_replace(session.clone());
        self.persist(&session);
    }

    fn persist(&self, session: &Session) -> Placement {
        let durability = Durability::from_remember_me(session.remember_me);
        self.storage
            .write(&self.key, &session.to_persisted(), durability)
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, KeyValueBackend, MemoryBackend};
    use std::sync::Arc;

    struct Fixture {
        durable: Arc<MemoryBackend>,
        ephemeral: Arc<MemoryBackend>,
        store: SessionStore,
    }

    fn fixture() -> Fixture {
        let durable = Arc::new(MemoryBackend::new());
        let ephemeral = Arc::new(MemoryBackend::new());
        let policy = StoragePolicy::new(durable.clone(), ephemeral.clone());
        Fixture {
            durable,
            ephemeral,
            store: SessionStore::new(policy, DEFAULT_SESSION_KEY),
        }
    }

    fn grant(remember_me: bool) -> LoginGrant {
        LoginGrant {
            access_token: "at_1".into(),
            refresh_token: "rt_1".into(),
            user: Some(UserIdentity::new("u1", "Nurse Joy", "staff")),
            profile_completed: false,
            remember_me,
        }
    }

    #[test]
    fn login_authenticates_and_persists_to_selected_backend() {
        for remember_me in [true, false] {
            let f = fixture();
            let placement = f.store.login(grant(remember_me));

            assert!(f.store.is_authenticated());
            assert_eq!(f.store.access_token().unwrap().expose(), "at_1");

            let (selected, other) = if remember_me {
                (&f.durable, &f.ephemeral)
            } else {
                (&f.ephemeral, &f.durable)
            };
            assert_eq!(placement, Placement::from(Durability::from_remember_me(remember_me)));
            assert!(selected.get(DEFAULT_SESSION_KEY).unwrap().is_some());
            assert_eq!(other.get(DEFAULT_SESSION_KEY).unwrap(), None);
        }
    }

    #[test]
    fn login_roundtrips_through_storage() {
        for remember_me in [true, false] {
            let f = fixture();
            f.store.login(grant(remember_me));

            let persisted: PersistedSession = f.store.storage().read(DEFAULT_SESSION_KEY).unwrap();
            let restored = Session::from_persisted(persisted).unwrap();
            assert_eq!(restored.access_token().unwrap().expose(), "at_1");
            assert_eq!(restored.refresh_token().unwrap().expose(), "rt_1");
            assert_eq!(restored.user.as_ref().unwrap().name, "Nurse Joy");
            assert!(!restored.profile_completed);
            assert_eq!(restored.remember_me, remember_me);
        }
    }

    #[test]
    fn logout_twice_clears_both_backends() {
        let f = fixture();
        f.store.login(grant(true));

        assert!(f.store.logout());
        assert!(!f.store.logout(), "second logout has nothing to clear");

        assert!(!f.store.is_authenticated());
        assert!(f.store.access_token().is_none());
        assert_eq!(f.store.snapshot(), Session::default());
        assert_eq!(f.durable.get(DEFAULT_SESSION_KEY).unwrap(), None);
        assert_eq!(f.ephemeral.get(DEFAULT_SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn set_tokens_keeps_user_and_backend() {
        let f = fixture();
        f.store.login(grant(true));
        f.store.set_profile_status(true);

        f.store.set_tokens("at_2", "rt_2");

        let session = f.store.snapshot();
        assert!(session.is_authenticated());
        assert_eq!(session.access_token().unwrap().expose(), "at_2");
        assert_eq!(session.refresh_token().unwrap().expose(), "rt_2");
        assert_eq!(session.user.unwrap().id, "u1");
        assert!(session.profile_completed);
        assert_eq!(f.store.storage().locate(DEFAULT_SESSION_KEY), Some(Durability::Durable));
    }

    #[test]
    fn set_tokens_with_empty_access_deauthenticates() {
        let f = fixture();
        f.store.login(grant(false));

        f.store.set_tokens("", "rt_2");

        let session = f.store.snapshot();
        assert!(!session.is_authenticated());
        assert!(session.refresh_token().is_none());
        assert!(session.user.is_some());
    }

    #[test]
    fn rotate_tokens_requires_matching_refresh_token() {
        let f = fixture();
        f.store.login(grant(false));

        let stale = Secret::new("rt_other".to_string());
        assert!(!f.store.rotate_tokens(&stale, "at_2", "rt_2"));
        assert_eq!(f.store.access_token().unwrap().expose(), "at_1");

        let current = f.store.refresh_token().unwrap();
        assert!(f.store.rotate_tokens(&current, "at_2", "rt_2"));
        assert_eq!(f.store.access_token().unwrap().expose(), "at_2");
        assert_eq!(f.store.refresh_token().unwrap().expose(), "rt_2");
    }

    #[test]
    fn rotate_tokens_after_logout_is_discarded() {
        let f = fixture();
        f.store.login(grant(true));
        let refresh = f.store.refresh_token().unwrap();
        f.store.logout();

        assert!(!f.store.rotate_tokens(&refresh, "at_2", "rt_2"));
        assert!(!f.store.is_authenticated());
        assert_eq!(f.durable.get(DEFAULT_SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn set_user_does_not_touch_tokens() {
        let f = fixture();
        f.store.login(grant(false));

        let mut user = UserIdentity::new("u1", "Nurse Joy Renamed", "staff");
        user.email = Some("joy@example.com".into());
        f.store.set_user(user.clone());

        let session = f.store.snapshot();
        assert_eq!(session.user, Some(user));
        assert_eq!(session.access_token().unwrap().expose(), "at_1");
    }

    #[test]
    fn restore_recovers_remembered_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let durable = Arc::new(FileBackend::open(path.clone()).unwrap());
            let policy = StoragePolicy::new(durable, Arc::new(MemoryBackend::new()));
            let store = SessionStore::new(policy, DEFAULT_SESSION_KEY);
            store.login(grant(true));
        }

        // New process: fresh ephemeral backend, same file
        let durable = Arc::new(FileBackend::open(path).unwrap());
        let policy = StoragePolicy::new(durable, Arc::new(MemoryBackend::new()));
        let store = SessionStore::restore(policy, DEFAULT_SESSION_KEY);

        assert!(store.is_authenticated());
        assert_eq!(store.refresh_token().unwrap().expose(), "rt_1");
        assert!(store.snapshot().remember_me);
    }

    #[test]
    fn restore_discards_partial_session() {
        let durable = Arc::new(MemoryBackend::new());
        durable
            .set(
                DEFAULT_SESSION_KEY,
                r#"{"state":{"accessToken":"at_1","isAuthenticated":true},"version":1}"#,
            )
            .unwrap();
        let policy = StoragePolicy::new(durable.clone(), Arc::new(MemoryBackend::new()));

        let store = SessionStore::restore(policy, DEFAULT_SESSION_KEY);

        assert!(!store.is_authenticated());
        assert_eq!(durable.get(DEFAULT_SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn restore_discards_newer_schema_version() {
        let durable = Arc::new(MemoryBackend::new());
        let ephemeral = Arc::new(MemoryBackend::new());
        ephemeral
            .set(
                DEFAULT_SESSION_KEY,
                r#"{"state":{"accessToken":"at_1","refreshToken":"rt_1","isAuthenticated":true},"version":2}"#,
            )
            .unwrap();
        let policy = StoragePolicy::new(durable.clone(), ephemeral.clone());

        let store = SessionStore::restore(policy, DEFAULT_SESSION_KEY);

        assert!(!store.is_authenticated());
        assert_eq!(ephemeral.get(DEFAULT_SESSION_KEY).unwrap(), None);
        assert_eq!(durable.get(DEFAULT_SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn restore_accepts_envelope_without_version() {
        let durable = Arc::new(MemoryBackend::new());
        durable
            .set(
                DEFAULT_SESSION_KEY,
                r#"{"state":{"accessToken":"at_1","refreshToken":"rt_1","isAuthenticated":true}}"#,
            )
            .unwrap();
        let policy = StoragePolicy::new(durable, Arc::new(MemoryBackend::new()));

        let store = SessionStore::restore(policy, DEFAULT_SESSION_KEY);

        assert!(store.is_authenticated());
    }

    #[test]
    fn restore_with_nothing_stored_is_empty() {
        let store = SessionStore::restore(StoragePolicy::in_memory(), DEFAULT_SESSION_KEY);
        assert_eq!(store.snapshot(), Session::default());
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let f = fixture();
        let mut rx = f.store.subscribe();

        f.store.login(grant(false));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_authenticated());

        f.store.logout();
        rx.changed().await.unwrap();
        assert!(!rx.borrow_and_update().is_authenticated());
    }

    #[test]
    fn concurrent_mutations_leave_consistent_state() {
        let f = Arc::new(fixture());
        f.store.login(grant(true));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let f = f.clone();
                std::thread::spawn(move || {
                    f.store.set_tokens(format!("at_{i}"), format!("rt_{i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Whatever won, memory and storage agree and the pair is intact
        let session = f.store.snapshot();
        let access = session.access_token().unwrap().expose().clone();
        let refresh = session.refresh_token().unwrap().expose().clone();
        assert_eq!(access.trim_start_matches("at_"), refresh.trim_start_matches("rt_"));

        let persisted: PersistedSession = f.store.storage().read(DEFAULT_SESSION_KEY).unwrap();
        assert_eq!(Session::from_persisted(persisted), Some(session));
    }
}
