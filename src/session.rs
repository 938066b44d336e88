//! Session/token store.
//!
//! Holds the active identity and its tokens, persisted through a
//! [`KeyValueStore`] so a restart picks the session back up. Tokens are
//! written under a role-specific key and under the legacy shared `token`
//! key; readers written against either layout keep working.

use crate::clock::Clock;
use crate::models::{Identity, Role};
use crate::storage::KeyValueStore;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const KEY_TOKEN: &str = "token";
pub const KEY_ADMIN_TOKEN: &str = "adminToken";
pub const KEY_USER_TOKEN: &str = "userToken";
pub const KEY_USER: &str = "user";

const ALL_KEYS: &[&str] = &[KEY_TOKEN, KEY_ADMIN_TOKEN, KEY_USER_TOKEN, KEY_USER];

pub const ADMIN_EXIT_ROUTE: &str = "/admin/login";
pub const CLIENT_EXIT_ROUTE: &str = "/login";

pub struct SessionStore {
    storage: Box<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    inactivity: Duration,
    identity: Option<Identity>,
    /// Last interaction; the one live inactivity timer
    last_activity: Option<Instant>,
}

impl SessionStore {
    /// Create the store and read any persisted session back
    pub fn new(storage: Box<dyn KeyValueStore>, clock: Arc<dyn Clock>, inactivity: Duration) -> Self {
        let mut store = Self {
            storage,
            clock,
            inactivity,
            identity: None,
            last_activity: None,
        };
        store.restore();
        store
    }

    fn restore(&mut self) {
        if let Some(raw) = self.storage.get(KEY_USER) {
            match serde_json::from_str::<Identity>(&raw) {
                Ok(identity) => {
                    debug!(email = %identity.email, role = identity.role.as_str(), "restored session");
                    self.identity = Some(identity);
                }
                Err(e) => warn!(error = %e, "ignoring unparsable stored identity"),
            }
        }
        if self.is_authenticated() {
            self.last_activity = Some(self.clock.now());
        }
    }

    /// Store the identity and token and start the inactivity timer
    pub fn login(&mut self, mut identity: Identity, token: &str) -> Result<()> {
        if identity.logged_in_at.is_none() {
            identity.logged_in_at = Some(Utc::now());
        }

        let role_key = match identity.role {
            Role::Admin => KEY_ADMIN_TOKEN,
            Role::Client => KEY_USER_TOKEN,
        };
        self.storage.set(role_key, token)?;
        self.storage.set(KEY_TOKEN, token)?;
        self.storage.set(KEY_USER, &serde_json::to_string(&identity)?)?;

        info!(email = %identity.email, role = identity.role.as_str(), "logged in");
        self.identity = Some(identity);
        self.last_activity = Some(self.clock.now());
        Ok(())
    }

    /// Clear every stored key and return the route the user should land on
    pub fn logout(&mut self) -> Result<&'static str> {
        let route = match self.role() {
            Some(Role::Admin) => ADMIN_EXIT_ROUTE,
            _ => CLIENT_EXIT_ROUTE,
        };
        for key in ALL_KEYS {
            self.storage.remove(key)?;
        }
        if let Some(identity) = self.identity.take() {
            info!(email = %identity.email, "logged out");
        }
        self.last_activity = None;
        Ok(route)
    }

    /// Record a user interaction, resetting the inactivity timer
    pub fn touch(&mut self) {
        if self.is_authenticated() {
            self.last_activity = Some(self.clock.now());
        }
    }

    /// Log out if the session has been idle for the whole inactivity window.
    ///
    /// Returns the exit route when a logout happened.
    pub fn expire_if_idle(&mut self) -> Result<Option<&'static str>> {
        let Some(last) = self.last_activity else {
            return Ok(None);
        };
        if !self.is_authenticated() {
            return Ok(None);
        }
        let idle = self.clock.now().saturating_duration_since(last);
        if idle < self.inactivity {
            return Ok(None);
        }
        info!(idle_secs = idle.as_secs(), "session idle, logging out");
        self.logout().map(Some)
    }

    /// Token for the active role, falling back to the legacy shared key
    pub fn get_token(&self) -> Option<String> {
        let role_key = match self.role() {
            Some(Role::Admin) => KEY_ADMIN_TOKEN,
            _ => KEY_USER_TOKEN,
        };
        self.storage
            .get(role_key)
            .filter(|t| !t.is_empty())
            .or_else(|| self.storage.get(KEY_TOKEN).filter(|t| !t.is_empty()))
    }

    /// True when any token key is present, even if the identity failed to load
    pub fn is_authenticated(&self) -> bool {
        [KEY_TOKEN, KEY_ADMIN_TOKEN, KEY_USER_TOKEN]
            .iter()
            .any(|key| self.storage.get(key).is_some_and(|t| !t.is_empty()))
    }

    pub fn current(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(|i| i.role)
    }

    pub fn is_admin(&self) -> bool {
        self.identity.as_ref().is_some_and(Identity::is_admin)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::storage::{FileStore, MemoryStore};
    use tempfile::TempDir;

    fn identity(role: Role) -> Identity {
        Identity {
            id: 7,
            email: "ana@example.com".to_string(),
            role,
            name: None,
            logged_in_at: None,
        }
    }

    fn store_with(clock: Arc<ManualClock>) -> SessionStore {
        SessionStore::new(
            Box::new(MemoryStore::new()),
            clock,
            Duration::from_secs(15 * 60),
        )
    }

    #[test]
    fn test_login_writes_role_and_legacy_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let clock = Arc::new(ManualClock::new());

        let mut store = SessionStore::new(
            Box::new(FileStore::open(&path)),
            clock.clone(),
            Duration::from_secs(900),
        );
        assert!(!store.is_authenticated());
        store.login(identity(Role::Admin), "adm-1").unwrap();

        let raw = FileStore::open(&path);
        assert_eq!(raw.get(KEY_ADMIN_TOKEN).as_deref(), Some("adm-1"));
        assert_eq!(raw.get(KEY_TOKEN).as_deref(), Some("adm-1"));
        assert!(raw.get(KEY_USER_TOKEN).is_none());
        assert!(raw.get(KEY_USER).unwrap().contains("ana@example.com"));

        // Reload picks the session back up
        let reloaded = SessionStore::new(Box::new(raw), clock, Duration::from_secs(900));
        assert!(reloaded.is_admin());
        assert_eq!(reloaded.get_token().as_deref(), Some("adm-1"));
        assert!(reloaded.current().unwrap().logged_in_at.is_some());
    }

    #[test]
    fn test_admin_token_preferred_over_user_token() {
        let storage = MemoryStore::new();
        storage.set(KEY_USER_TOKEN, "usr").unwrap();
        storage.set(KEY_ADMIN_TOKEN, "adm").unwrap();
        storage
            .set(KEY_USER, &serde_json::to_string(&identity(Role::Admin)).unwrap())
            .unwrap();

        let store = SessionStore::new(
            Box::new(storage),
            Arc::new(ManualClock::new()),
            Duration::from_secs(900),
        );
        assert_eq!(store.get_token().as_deref(), Some("adm"));
    }

    #[test]
    fn test_client_gets_user_token() {
        let storage = MemoryStore::new();
        storage.set(KEY_USER_TOKEN, "usr").unwrap();
        storage.set(KEY_ADMIN_TOKEN, "adm").unwrap();
        storage
            .set(KEY_USER, &serde_json::to_string(&identity(Role::Client)).unwrap())
            .unwrap();

        let store = SessionStore::new(
            Box::new(storage),
            Arc::new(ManualClock::new()),
            Duration::from_secs(900),
        );
        assert_eq!(store.get_token().as_deref(), Some("usr"));
    }

    #[test]
    fn test_legacy_token_fallback() {
        let storage = MemoryStore::new();
        storage.set(KEY_TOKEN, "legacy").unwrap();
        storage
            .set(KEY_USER, &serde_json::to_string(&identity(Role::Admin)).unwrap())
            .unwrap();

        let store = SessionStore::new(
            Box::new(storage),
            Arc::new(ManualClock::new()),
            Duration::from_secs(900),
        );
        assert_eq!(store.get_token().as_deref(), Some("legacy"));
    }

    #[test]
    fn test_authenticated_before_identity_loads() {
        let storage = MemoryStore::new();
        storage.set(KEY_USER_TOKEN, "usr").unwrap();
        storage.set(KEY_USER, "{not json").unwrap();

        let store = SessionStore::new(
            Box::new(storage),
            Arc::new(ManualClock::new()),
            Duration::from_secs(900),
        );
        assert!(store.is_authenticated());
        assert!(store.current().is_none());
        assert_eq!(store.get_token().as_deref(), Some("usr"));
    }

    #[test]
    fn test_logout_clears_everything() {
        let clock = Arc::new(ManualClock::new());
        let mut store = store_with(clock);
        store.login(identity(Role::Admin), "adm").unwrap();

        assert_eq!(store.logout().unwrap(), ADMIN_EXIT_ROUTE);
        assert!(!store.is_authenticated());
        assert!(store.get_token().is_none());
        assert!(store.current().is_none());

        store.login(identity(Role::Client), "usr").unwrap();
        assert_eq!(store.logout().unwrap(), CLIENT_EXIT_ROUTE);
    }

    #[test]
    fn test_inactivity_logout() {
        let clock = Arc::new(ManualClock::new());
        let mut store = store_with(clock.clone());
        store.login(identity(Role::Client), "usr").unwrap();

        clock.advance(Duration::from_secs(14 * 60));
        assert_eq!(store.expire_if_idle().unwrap(), None);

        // Interaction resets the timer
        store.touch();
        clock.advance(Duration::from_secs(14 * 60));
        assert_eq!(store.expire_if_idle().unwrap(), None);
        assert!(store.is_authenticated());

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.expire_if_idle().unwrap(), Some(CLIENT_EXIT_ROUTE));
        assert!(!store.is_authenticated());

        // Nothing left to expire
        clock.advance(Duration::from_secs(3600));
        assert_eq!(store.expire_if_idle().unwrap(), None);
    }

    #[test]
    fn test_touch_while_unauthenticated_starts_no_timer() {
        let clock = Arc::new(ManualClock::new());
        let mut store = store_with(clock.clone());
        store.touch();
        clock.advance(Duration::from_secs(3600));
        assert_eq!(store.expire_if_idle().unwrap(), None);
    }
}
