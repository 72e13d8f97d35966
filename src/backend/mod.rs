//! Hosted backend access: authentication, document rows, and the changefeed
//!
//! The rest of the application only talks to the [`Backend`] trait. Two
//! implementations exist: [`supabase::SupabaseBackend`] for a hosted project
//! and [`memory::MemoryBackend`] for offline use and tests.

pub mod error;
pub mod memory;
pub mod supabase;

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::config::{self, BackendConfig, BackendKind};
use crate::core::document::{Document, DocumentPatch, NewDocument};
use crate::core::sync::lock;

pub use error::BackendError;

/// Identity of a signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
}

/// An authenticated session as handed out by the auth service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    /// Whether the access token expires within `margin_secs`
    pub fn expires_within(&self, margin_secs: i64) -> bool {
        self.expires_at <= Utc::now() + chrono::Duration::seconds(margin_secs)
    }
}

/// Auth state transitions observed by the client
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

impl AuthEvent {
    /// Session after this event, if any
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change on the documents table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record_id: Option<Uuid>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, record_id: Uuid) -> Self {
        Self {
            kind,
            record_id: Some(record_id),
        }
    }
}

pub type AuthListener = Box<dyn Fn(&AuthEvent) + Send + Sync>;
pub type ChangeListener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Narrow interface to the hosted database, auth service, and changefeed
///
/// Every row operation takes the owner explicitly; implementations must only
/// ever touch rows whose `owner_id` matches.
pub trait Backend: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    /// Current session, if the client holds one
    fn session(&self) -> Result<Option<Session>, BackendError>;

    /// User of the current session
    fn current_user(&self) -> Result<Option<User>, BackendError> {
        Ok(self.session()?.map(|session| session.user))
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    fn sign_out(&self) -> Result<(), BackendError>;

    /// Observe sign-in, sign-out, and token refresh
    fn on_auth_state_change(&self, listener: AuthListener) -> Subscription;

    /// All documents of `owner`, most recently updated first
    fn select_documents(&self, owner: Uuid) -> Result<Vec<Document>, BackendError>;

    /// Exactly one document; [`BackendError::NotFound`] when no row matches
    fn select_document(&self, id: Uuid, owner: Uuid) -> Result<Document, BackendError>;

    fn insert_document(&self, new: &NewDocument) -> Result<Document, BackendError>;

    fn update_document(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: &DocumentPatch,
    ) -> Result<Document, BackendError>;

    /// Deleting a row that does not exist is not an error
    fn delete_document(&self, id: Uuid, owner: Uuid) -> Result<(), BackendError>;

    /// Observe every insert, update, and delete on the documents table
    fn subscribe_changes(&self, listener: ChangeListener) -> Subscription;
}

/// Build the backend selected in the configuration
pub fn connect(settings: &BackendConfig) -> Result<Arc<dyn Backend>> {
    match settings.kind {
        BackendKind::Memory => {
            let database = match (settings.local_snapshot, config::data_dir()) {
                (true, Some(dir)) => memory::MemoryDatabase::open(dir.join("documents.json"))
                    .context("Failed to open local document snapshot")?,
                _ => memory::MemoryDatabase::new(),
            };
            tracing::info!("Using local in-process backend");
            Ok(Arc::new(database.connect()))
        }
        BackendKind::Supabase => {
            let url = settings
                .supabase_url
                .clone()
                .context("backend.supabase_url is not configured")?;
            let anon_key = settings
                .supabase_anon_key
                .clone()
                .context("backend.supabase_anon_key is not configured")?;
            let options = supabase::SupabaseOptions {
                url,
                anon_key,
                timeout_secs: settings.request_timeout_secs,
                poll_interval_secs: settings.poll_interval_secs,
                session_path: config::data_dir().map(|dir| dir.join("session.json")),
            };
            tracing::info!("Using Supabase backend at {}", options.url);
            Ok(Arc::new(supabase::SupabaseBackend::new(options)))
        }
    }
}

/// Releases a listener when dropped
#[must_use = "dropping a Subscription releases the listener immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release the listener now instead of at drop
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Registry of event callbacks shared between a backend and its subscriptions
pub struct Listeners<T> {
    set: Arc<Mutex<ListenerSet<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            set: Arc::clone(&self.set),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            set: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut set = lock(&self.set);
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(listener)));
            id
        };

        let weak = Arc::downgrade(&self.set);
        Subscription::new(move || {
            if let Some(set) = weak.upgrade() {
                lock(&set).entries.retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Call every listener; the registry lock is not held while they run
    pub fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.set)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.set).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_releases_on_drop() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let subscription = listeners.subscribe(move |value| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
        });
        listeners.emit(&2);
        assert_eq!(listeners.len(), 1);

        drop(subscription);
        listeners.emit(&5);
        assert!(listeners.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_explicit_unsubscribe_leaves_other_listeners() {
        let listeners: Listeners<()> = Listeners::new();
        let first = listeners.subscribe(|_| {});
        let _second = listeners.subscribe(|_| {});

        first.unsubscribe();
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_emit() {
        let listeners: Listeners<()> = Listeners::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&slot);
        let subscription = listeners.subscribe(move |_| {
            lock(&inner).take();
        });
        *lock(&slot) = Some(subscription);

        listeners.emit(&());
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_session_expiry_margin() {
        let session = Session {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(20),
            user: User {
                id: Uuid::new_v4(),
                email: "a@example.com".into(),
            },
        };
        assert!(session.expires_within(60));
        assert!(!session.expires_within(0));
    }
}
