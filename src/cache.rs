//! Shared, lazily-populated cache of the admin reference collections.
//!
//! All views read the same snapshot; within the staleness window no view
//! triggers a network call. A failed fetch never throws away data that was
//! loaded before it.

use crate::clock::Clock;
use crate::error::ApiError;
use crate::models::{Item, Order, User};
use crate::session::SessionStore;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the cache gets its collections from
pub trait ReferenceSource: Send + Sync {
    fn fetch_items(&self, token: Option<&str>) -> Result<Vec<Item>, ApiError>;
    fn fetch_users(&self, token: Option<&str>) -> Result<Vec<User>, ApiError>;
    fn fetch_orders(&self, token: Option<&str>) -> Result<Vec<Order>, ApiError>;
}

/// Last-fetched state of one collection
#[derive(Debug, Clone)]
pub struct CachedCollection<T> {
    pub data: Option<Vec<T>>,
    pub loaded_at: Option<Instant>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for CachedCollection<T> {
    fn default() -> Self {
        Self {
            data: None,
            loaded_at: None,
            loading: false,
            error: None,
        }
    }
}

impl<T: Clone> CachedCollection<T> {
    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        match self.loaded_at {
            Some(at) => now.saturating_duration_since(at) >= window,
            None => true,
        }
    }

    fn apply(&mut self, name: &str, result: Result<Vec<T>, ApiError>, now: Instant) -> Option<ApiError> {
        self.loading = false;
        match result {
            Ok(data) => {
                debug!(collection = name, len = data.len(), "collection loaded");
                self.data = Some(data);
                self.loaded_at = Some(now);
                self.error = None;
                None
            }
            Err(e) => {
                warn!(collection = name, error = %e, kept = self.data.is_some(), "collection fetch failed");
                self.error = Some(e.to_string());
                Some(e)
            }
        }
    }

    fn snapshot(&self) -> Snapshot<T> {
        match (&self.data, &self.error) {
            (Some(data), None) => Snapshot::Fresh(data.clone()),
            (Some(data), Some(error)) => Snapshot::Stale(data.clone(), error.clone()),
            (None, error) => Snapshot::Empty(error.clone()),
        }
    }
}

/// What a view gets when it reads a collection
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot<T> {
    /// Last fetch succeeded
    Fresh(Vec<T>),
    /// Last fetch failed; this is the data from the fetch before it
    Stale(Vec<T>, String),
    /// Nothing loaded yet, with the failure if a fetch was attempted
    Empty(Option<String>),
}

impl<T> Snapshot<T> {
    pub fn data(&self) -> Option<&[T]> {
        match self {
            Snapshot::Fresh(data) | Snapshot::Stale(data, _) => Some(data),
            Snapshot::Empty(_) => None,
        }
    }
}

/// Result of `ensure_loaded` / `refresh`
#[derive(Debug)]
pub enum LoadOutcome {
    /// Everything was inside the staleness window; no requests made
    AlreadyFresh,
    /// Another fetch is in flight; this call did nothing
    AlreadyLoading,
    /// A batch ran; any per-collection failures are listed
    Fetched { errors: Vec<ApiError> },
}

impl LoadOutcome {
    pub fn errors(&self) -> &[ApiError] {
        match self {
            LoadOutcome::Fetched { errors } => errors,
            _ => &[],
        }
    }
}

/// Summary line for one collection, used by status views
#[derive(Debug, Clone)]
pub struct CollectionStatus {
    pub name: &'static str,
    pub len: Option<usize>,
    pub age: Option<Duration>,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct CacheState {
    items: CachedCollection<Item>,
    users: CachedCollection<User>,
    orders: CachedCollection<Order>,
    in_flight: bool,
    /// Whether the current snapshot was fetched with admin rights
    loaded_as_admin: Option<bool>,
}

pub struct ReferenceCache {
    source: Arc<dyn ReferenceSource>,
    clock: Arc<dyn Clock>,
    window: Duration,
    state: Mutex<CacheState>,
}

impl ReferenceCache {
    pub fn new(source: Arc<dyn ReferenceSource>, clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self {
            source,
            clock,
            window,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // State is replaced field-by-field; a poisoned lock still holds a usable snapshot
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn staleness_window(&self) -> Duration {
        self.window
    }

    /// Fetch everything if nothing is loaded, the snapshot is stale, or the session's rights changed
    pub fn ensure_loaded(&self, session: &SessionStore) -> LoadOutcome {
        let needs_load = {
            let state = self.lock();
            let now = self.clock.now();
            state.loaded_as_admin != Some(session.is_admin())
                || state.items.is_stale(now, self.window)
                || state.users.is_stale(now, self.window)
                || state.orders.is_stale(now, self.window)
        };
        if !needs_load {
            debug!("reference data fresh, serving from cache");
            return LoadOutcome::AlreadyFresh;
        }
        self.fetch_all(session)
    }

    /// Fetch everything regardless of age, e.g. after a mutation
    pub fn refresh(&self, session: &SessionStore) -> LoadOutcome {
        info!("refreshing reference data");
        self.fetch_all(session)
    }

    /// Mark every collection stale without dropping its data
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.items.loaded_at = None;
        state.users.loaded_at = None;
        state.orders.loaded_at = None;
    }

    /// Drop all cached data (used when the session ends)
    pub fn clear(&self) {
        let mut state = self.lock();
        let in_flight = state.in_flight;
        *state = CacheState::default();
        state.in_flight = in_flight;
    }

    fn fetch_all(&self, session: &SessionStore) -> LoadOutcome {
        {
            let mut state = self.lock();
            if state.in_flight {
                debug!("reference fetch already in flight");
                return LoadOutcome::AlreadyLoading;
            }
            state.in_flight = true;
            state.items.loading = true;
            state.users.loading = true;
            state.orders.loading = true;
        }

        let token = session.get_token();
        let admin = session.is_admin();
        let source = &*self.source;

        // One worker per collection; admin-only collections are empty for everyone else
        let (items, users, orders) = std::thread::scope(|s| {
            let token = token.as_deref();
            let items = s.spawn(move || source.fetch_items(token));
            let users = admin.then(|| s.spawn(move || source.fetch_users(token)));
            let orders = admin.then(|| s.spawn(move || source.fetch_orders(token)));

            (
                join(items),
                users.map(join).unwrap_or_else(|| Ok(Vec::new())),
                orders.map(join).unwrap_or_else(|| Ok(Vec::new())),
            )
        });

        let now = self.clock.now();
        let mut state = self.lock();
        let errors: Vec<ApiError> = [
            state.items.apply("items", items, now),
            state.users.apply("users", users, now),
            state.orders.apply("orders", orders, now),
        ]
        .into_iter()
        .flatten()
        .collect();
        state.in_flight = false;
        state.loaded_as_admin = Some(admin);

        LoadOutcome::Fetched { errors }
    }

    pub fn items(&self) -> Snapshot<Item> {
        self.lock().items.snapshot()
    }

    pub fn users(&self) -> Snapshot<User> {
        self.lock().users.snapshot()
    }

    pub fn orders(&self) -> Snapshot<Order> {
        self.lock().orders.snapshot()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().in_flight
    }

    pub fn status(&self) -> Vec<CollectionStatus> {
        let state = self.lock();
        let now = self.clock.now();
        vec![
            status_of("items", &state.items, now),
            status_of("users", &state.users, now),
            status_of("orders", &state.orders, now),
        ]
    }
}

fn status_of<T>(name: &'static str, col: &CachedCollection<T>, now: Instant) -> CollectionStatus {
    CollectionStatus {
        name,
        len: col.data.as_ref().map(Vec::len),
        age: col.loaded_at.map(|at| now.saturating_duration_since(at)),
        loading: col.loading,
        error: col.error.clone(),
    }
}

fn join<T>(handle: std::thread::ScopedJoinHandle<'_, Result<Vec<T>, ApiError>>) -> Result<Vec<T>, ApiError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(ApiError::Network("fetch worker panicked".to_string())))
}
