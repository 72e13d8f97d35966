//! Document store for the signed-in user
//!
//! Wraps the backend calls for listing, loading, creating, updating, and
//! deleting documents. Every successful write and every changefeed event
//! refetches the whole list; nothing is patched locally. Failures are logged
//! and turned into `None`/`false` or a generic message for the list.

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::backend::{Backend, ChangeEvent, Subscription, User};
use crate::core::document::{Document, DocumentDraft, DocumentPatch, NewDocument};
use crate::core::sync::lock;
use crate::core::tasks::Waker;

pub const NOT_AUTHENTICATED: &str = "User not authenticated";
pub const FETCH_FAILED: &str = "Failed to fetch documents";

/// Snapshot of the document list
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState {
    /// Most recently updated first
    pub documents: Vec<Document>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl Default for DocumentState {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            is_loading: true,
            error: None,
        }
    }
}

struct StoreInner {
    backend: Arc<dyn Backend>,
    state: Mutex<DocumentState>,
    waker: Option<Waker>,
    _changes: Subscription,
}

/// Handle to the document list and its operations; clones share state
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl DocumentStore {
    /// Create the store and subscribe to the changefeed
    ///
    /// The list starts out loading; call [`DocumentStore::refresh`] for the
    /// first fetch. The subscription is released when the last handle drops.
    pub fn mount(backend: Arc<dyn Backend>, waker: Option<Waker>) -> Self {
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<StoreInner>| {
            let weak = weak.clone();
            let changes = backend.subscribe_changes(Box::new(move |event: &ChangeEvent| {
                if let Some(inner) = weak.upgrade() {
                    tracing::debug!("Refetching documents after {:?}", event.kind);
                    inner.refresh();
                }
            }));

            StoreInner {
                backend,
                state: Mutex::new(DocumentState::default()),
                waker,
                _changes: changes,
            }
        });

        Self { inner }
    }

    /// Current list state
    pub fn state(&self) -> DocumentState {
        lock(&self.inner.state).clone()
    }

    /// Refetch the full list for the signed-in user
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    pub fn get_document(&self, id: Uuid) -> Option<Document> {
        let user = self.inner.identity()?;
        match self.inner.backend.select_document(id, user.id) {
            Ok(document) => Some(document),
            Err(e) => {
                tracing::error!("Error fetching document {}: {}", id, e);
                None
            }
        }
    }

    pub fn create_document(&self, draft: &DocumentDraft) -> Option<Document> {
        let user = self.inner.identity()?;
        let new = NewDocument::from_draft(draft, user.id);
        match self.inner.backend.insert_document(&new) {
            Ok(document) => {
                tracing::info!("Created document {}", document.id);
                self.inner.refresh();
                Some(document)
            }
            Err(e) => {
                tracing::error!("Error creating document: {}", e);
                None
            }
        }
    }

    /// Save new title and content; the update timestamp is refreshed
    pub fn update_document(&self, id: Uuid, draft: &DocumentDraft) -> Option<Document> {
        let user = self.inner.identity()?;
        let patch = DocumentPatch::from_draft(draft);
        match self.inner.backend.update_document(id, user.id, &patch) {
            Ok(document) => {
                tracing::info!("Updated document {}", id);
                self.inner.refresh();
                Some(document)
            }
            Err(e) => {
                tracing::error!("Error updating document {}: {}", id, e);
                None
            }
        }
    }

    pub fn delete_document(&self, id: Uuid) -> bool {
        let Some(user) = self.inner.identity() else {
            return false;
        };
        match self.inner.backend.delete_document(id, user.id) {
            Ok(()) => {
                tracing::info!("Deleted document {}", id);
                self.inner.refresh();
                true
            }
            Err(e) => {
                tracing::error!("Error deleting document {}: {}", id, e);
                false
            }
        }
    }
}

impl StoreInner {
    fn identity(&self) -> Option<User> {
        match self.backend.current_user() {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Error looking up user: {}", e);
                None
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut DocumentState)) {
        f(&mut lock(&self.state));
        if let Some(waker) = &self.waker {
            waker();
        }
    }

    fn refresh(&self) {
        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });

        let Some(user) = self.identity() else {
            self.update(|state| {
                state.is_loading = false;
                state.error = Some(NOT_AUTHENTICATED.to_string());
            });
            return;
        };

        match self.backend.select_documents(user.id) {
            Ok(documents) => {
                tracing::debug!("Fetched {} documents", documents.len());
                self.update(|state| {
                    *state = DocumentState {
                        documents,
                        is_loading: false,
                        error: None,
                    }
                });
            }
            Err(e) => {
                tracing::error!("Error fetching documents: {}", e);
                self.update(|state| {
                    state.is_loading = false;
                    state.error = Some(FETCH_FAILED.to_string());
                });
            }
        }
    }
}
