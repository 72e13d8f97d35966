//! In-process backend
//!
//! A [`MemoryDatabase`] plays the hosted project: accounts, the documents
//! table, and the changefeed. Each [`MemoryBackend`] connected to it is one
//! client with its own session, so several clients can watch the same table.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{
    AuthEvent, AuthListener, Backend, BackendError, ChangeEvent, ChangeKind, ChangeListener,
    Listeners, Session, Subscription, User,
};
use crate::core::document::{Document, DocumentPatch, NewDocument};
use crate::core::sync::lock;

const MIN_PASSWORD_LEN: usize = 6;
const SESSION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    user: User,
    salt: String,
    password_hash: String,
}

impl Account {
    fn new(email: String, password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let password_hash = hash_password(&salt, password);
        Self {
            user: User {
                id: Uuid::new_v4(),
                email,
            },
            salt,
            password_hash,
        }
    }

    fn verify(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    hex::encode(
        Sha256::new()
            .chain_update(salt.as_bytes())
            .chain_update(password.as_bytes())
            .finalize(),
    )
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    documents: Vec<Document>,
}

struct DatabaseInner {
    tables: Mutex<Tables>,
    changes: Listeners<ChangeEvent>,
    snapshot_path: Option<PathBuf>,
}

/// Shared in-process database
#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<DatabaseInner>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    /// Empty database that lives only as long as the process
    pub fn new() -> Self {
        Self::with_tables(Tables::default(), None)
    }

    /// Database backed by a JSON snapshot file, loaded if it exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let path = path.into();
        let tables = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Tables::default()
        };
        tracing::info!(
            "Opened local snapshot {} ({} documents)",
            path.display(),
            tables.documents.len()
        );
        Ok(Self::with_tables(tables, Some(path)))
    }

    fn with_tables(tables: Tables, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                tables: Mutex::new(tables),
                changes: Listeners::new(),
                snapshot_path,
            }),
        }
    }

    /// New client with no session
    pub fn connect(&self) -> MemoryBackend {
        MemoryBackend {
            database: self.clone(),
            session: Mutex::new(None),
            auth: Listeners::new(),
        }
    }

    /// Number of stored documents across all owners
    pub fn document_count(&self) -> usize {
        lock(&self.inner.tables).documents.len()
    }

    /// Number of live changefeed subscriptions across all clients
    pub fn change_listener_count(&self) -> usize {
        self.inner.changes.len()
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&lock(&self.inner.tables))
    }

    /// Apply a change and write the snapshot; the change is rolled back if
    /// either step fails
    fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let mut tables = lock(&self.inner.tables);
        let backup = tables.clone();
        let result = f(&mut tables).and_then(|value| {
            self.persist(&tables)?;
            Ok(value)
        });
        if result.is_err() {
            *tables = backup;
        }
        result
    }

    fn persist(&self, tables: &Tables) -> Result<(), BackendError> {
        let Some(path) = &self.inner.snapshot_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(tables)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn notify(&self, event: ChangeEvent) {
        tracing::debug!("documents change: {:?}", event);
        self.inner.changes.emit(&event);
    }
}

/// One client of a [`MemoryDatabase`]
pub struct MemoryBackend {
    database: MemoryDatabase,
    session: Mutex<Option<Session>>,
    auth: Listeners<AuthEvent>,
}

impl MemoryBackend {
    /// Number of live auth-state subscriptions on this client
    pub fn auth_listener_count(&self) -> usize {
        self.auth.len()
    }

    fn start_session(&self, user: User) -> Session {
        let session = Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(SESSION_LIFETIME_SECS),
            user,
        };
        *lock(&self.session) = Some(session.clone());
        self.auth.emit(&AuthEvent::SignedIn(session.clone()));
        session
    }

    /// Row-level policy: the session user may only touch their own rows
    fn authorize(&self, owner: Uuid) -> Result<(), BackendError> {
        let user = self.current_user()?.ok_or(BackendError::NotAuthenticated)?;
        if user.id != owner {
            return Err(BackendError::Forbidden);
        }
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn session(&self) -> Result<Option<Session>, BackendError> {
        Ok(lock(&self.session).clone())
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let email = normalize_email(email);
        let user = self
            .database
            .read(|tables| {
                tables
                    .accounts
                    .iter()
                    .find(|account| account.user.email == email && account.verify(password))
                    .map(|account| account.user.clone())
            })
            .ok_or(BackendError::InvalidCredentials)?;

        tracing::info!("Signed in {}", user.email);
        Ok(self.start_session(user))
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(BackendError::Auth(
                "Unable to validate email address: invalid format".into(),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::Auth(format!(
                "Password should be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let user = self.database.write(|tables| {
            if tables.accounts.iter().any(|account| account.user.email == email) {
                return Err(BackendError::Auth("User already registered".into()));
            }
            let account = Account::new(email.clone(), password);
            let user = account.user.clone();
            tables.accounts.push(account);
            Ok(user)
        })?;

        tracing::info!("Registered {}", user.email);
        Ok(self.start_session(user))
    }

    fn sign_out(&self) -> Result<(), BackendError> {
        let previous = lock(&self.session).take();
        if previous.is_some() {
            self.auth.emit(&AuthEvent::SignedOut);
        }
        Ok(())
    }

    fn on_auth_state_change(&self, listener: AuthListener) -> Subscription {
        self.auth.subscribe(listener)
    }

    fn select_documents(&self, owner: Uuid) -> Result<Vec<Document>, BackendError> {
        self.authorize(owner)?;
        let mut documents: Vec<Document> = self.database.read(|tables| {
            tables
                .documents
                .iter()
                .filter(|doc| doc.owner_id == owner)
                .cloned()
                .collect()
        });
        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(documents)
    }

    fn select_document(&self, id: Uuid, owner: Uuid) -> Result<Document, BackendError> {
        self.authorize(owner)?;
        self.database
            .read(|tables| {
                tables
                    .documents
                    .iter()
                    .find(|doc| doc.id == id && doc.owner_id == owner)
                    .cloned()
            })
            .ok_or(BackendError::NotFound)
    }

    fn insert_document(&self, new: &NewDocument) -> Result<Document, BackendError> {
        self.authorize(new.owner_id)?;
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            title: new.title.clone(),
            content: new.content.clone(),
            created_at: now,
            updated_at: now,
            owner_id: new.owner_id,
        };

        let inserted = self.database.write(|tables| {
            tables.documents.push(document.clone());
            Ok(document)
        })?;
        self.database
            .notify(ChangeEvent::new(ChangeKind::Insert, inserted.id));
        Ok(inserted)
    }

    fn update_document(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: &DocumentPatch,
    ) -> Result<Document, BackendError> {
        self.authorize(owner)?;
        let updated = self.database.write(|tables| {
            let row = tables
                .documents
                .iter_mut()
                .find(|doc| doc.id == id && doc.owner_id == owner)
                .ok_or(BackendError::NotFound)?;
            // Timestamps have microsecond precision, as in Postgres
            let floor = row.updated_at + chrono::Duration::microseconds(1);
            row.title = patch.title.clone();
            row.content = patch.content.clone();
            row.updated_at = patch.updated_at.max(floor);
            Ok(row.clone())
        })?;
        self.database
            .notify(ChangeEvent::new(ChangeKind::Update, updated.id));
        Ok(updated)
    }

    fn delete_document(&self, id: Uuid, owner: Uuid) -> Result<(), BackendError> {
        self.authorize(owner)?;
        let removed = self.database.write(|tables| {
            let before = tables.documents.len();
            tables
                .documents
                .retain(|doc| !(doc.id == id && doc.owner_id == owner));
            Ok(tables.documents.len() != before)
        })?;
        if removed {
            self.database
                .notify(ChangeEvent::new(ChangeKind::Delete, id));
        }
        Ok(())
    }

    fn subscribe_changes(&self, listener: ChangeListener) -> Subscription {
        self.database.inner.changes.subscribe(listener)
    }
}
