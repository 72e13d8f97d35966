//! Supabase project access over its REST endpoints
//!
//! Auth goes through GoTrue (`/auth/v1`), rows through PostgREST
//! (`/rest/v1/documents`). The changefeed combines this client's own writes
//! with a background poller that diffs `(id, updated_at)` snapshots of the
//! table, so edits from other sessions arrive within one poll interval.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use minreq::{Method, Request, Response};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{
    AuthEvent, AuthListener, Backend, BackendError, ChangeEvent, ChangeKind, ChangeListener,
    Listeners, Session, Subscription, User,
};
use crate::core::document::{Document, DocumentPatch, NewDocument};
use crate::core::sync::lock;

/// Refresh the access token when it expires within this many seconds
const REFRESH_MARGIN_SECS: i64 = 60;

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Connection settings for a hosted project
#[derive(Debug, Clone)]
pub struct SupabaseOptions {
    pub url: String,
    pub anon_key: String,
    pub timeout_secs: u64,
    /// 0 disables polling; only this client's writes reach the changefeed
    pub poll_interval_secs: u64,
    /// Where the session is kept between runs
    pub session_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in),
            user: self.user,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RowVersion {
    id: Uuid,
    updated_at: DateTime<Utc>,
}

type Versions = HashMap<Uuid, DateTime<Utc>>;

/// Session held by the client, shared with the poller thread
struct AuthState {
    session: Mutex<Option<Session>>,
    listeners: Listeners<AuthEvent>,
    session_path: Option<PathBuf>,
    refreshing: Mutex<()>,
}

impl AuthState {
    fn load(session_path: Option<PathBuf>) -> Self {
        let session = session_path.as_ref().and_then(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            match serde_json::from_str::<Session>(&content) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                    None
                }
            }
        });

        Self {
            session: Mutex::new(session),
            listeners: Listeners::new(),
            session_path,
            refreshing: Mutex::new(()),
        }
    }

    fn current(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    /// Replace the session, persist it, and tell listeners
    fn set(&self, session: Option<Session>, event: AuthEvent) {
        *lock(&self.session) = session.clone();
        if let Err(e) = self.persist(session.as_ref()) {
            tracing::warn!("Failed to persist session: {}", e);
        }
        self.listeners.emit(&event);
    }

    fn persist(&self, session: Option<&Session>) -> std::io::Result<()> {
        let Some(path) = &self.session_path else {
            return Ok(());
        };
        match session {
            Some(session) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let content = serde_json::to_vec(session)?;
                std::fs::write(path, content)
            }
            None => match std::fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }
}

/// Request plumbing shared by the client and its poller
#[derive(Clone)]
struct Rest {
    base_url: String,
    anon_key: String,
    timeout_secs: u64,
    auth: Arc<AuthState>,
}

impl Rest {
    fn request(&self, method: Method, path: &str) -> Request {
        Request::new(method, format!("{}{}", self.base_url, path))
            .with_header("apikey", self.anon_key.as_str())
            .with_timeout(self.timeout_secs)
    }

    fn authed(&self, method: Method, path: &str) -> Result<Request, BackendError> {
        let token = self.access_token()?;
        Ok(self
            .request(method, path)
            .with_header("Authorization", format!("Bearer {}", token)))
    }

    fn access_token(&self) -> Result<String, BackendError> {
        let session = self.auth.current().ok_or(BackendError::NotAuthenticated)?;
        if !session.expires_within(REFRESH_MARGIN_SECS) {
            return Ok(session.access_token);
        }

        let _guard = lock(&self.auth.refreshing);
        // Another thread may have refreshed while we waited
        match self.auth.current() {
            Some(current) if !current.expires_within(REFRESH_MARGIN_SECS) => {
                Ok(current.access_token)
            }
            Some(current) => Ok(self.refresh(&current.refresh_token)?.access_token),
            None => Err(BackendError::NotAuthenticated),
        }
    }

    fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let response = self
            .request(Method::Post, "/auth/v1/token?grant_type=refresh_token")
            .with_json(&json!({ "refresh_token": refresh_token }))?
            .send()?;

        match check(response) {
            Ok(response) => {
                let session = response.json::<TokenResponse>()?.into_session();
                tracing::debug!("Refreshed access token for {}", session.user.email);
                self.auth
                    .set(Some(session.clone()), AuthEvent::TokenRefreshed(session.clone()));
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("Token refresh failed, signing out: {}", e);
                self.auth.set(None, AuthEvent::SignedOut);
                Err(BackendError::NotAuthenticated)
            }
        }
    }

    fn row_versions(&self) -> Result<Versions, BackendError> {
        let response = self
            .authed(Method::Get, "/rest/v1/documents?select=id,updated_at")?
            .send()?;
        let rows: Vec<RowVersion> = check(response)?.json()?;
        Ok(rows.into_iter().map(|row| (row.id, row.updated_at)).collect())
    }
}

/// Map a non-success response onto the error taxonomy
fn check(response: Response) -> Result<Response, BackendError> {
    let status = response.status_code;
    if (200..300).contains(&status) {
        return Ok(response);
    }

    let message = error_message(response.as_str().unwrap_or_default(), &response.reason_phrase);
    Err(match status {
        401 => BackendError::NotAuthenticated,
        403 => BackendError::Forbidden,
        // PostgREST answers 406 when a single-object request matches no row
        406 => BackendError::NotFound,
        _ => BackendError::Http { status, message },
    })
}

/// Pull the human-readable message out of a GoTrue or PostgREST error body
fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| fallback.to_string())
}

fn auth_error(err: BackendError) -> BackendError {
    match err {
        BackendError::Http { status: 400, message } if message.contains("Invalid login") => {
            BackendError::InvalidCredentials
        }
        BackendError::Http { message, .. } => BackendError::Auth(message),
        other => other,
    }
}

/// Changes between two snapshots of the table
fn diff_versions(previous: &Versions, current: &Versions) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (id, updated_at) in current {
        match previous.get(id) {
            None => events.push(ChangeEvent::new(ChangeKind::Insert, *id)),
            Some(before) if before != updated_at => {
                events.push(ChangeEvent::new(ChangeKind::Update, *id))
            }
            Some(_) => {}
        }
    }
    for id in previous.keys() {
        if !current.contains_key(id) {
            events.push(ChangeEvent::new(ChangeKind::Delete, *id));
        }
    }
    events
}

#[derive(Default)]
struct PollerState {
    running: AtomicBool,
    shutdown: AtomicBool,
}

/// Client for a hosted Supabase project
pub struct SupabaseBackend {
    rest: Rest,
    changes: Listeners<ChangeEvent>,
    poll_interval: Duration,
    poller: Arc<PollerState>,
}

impl SupabaseBackend {
    pub fn new(options: SupabaseOptions) -> Self {
        let auth = AuthState::load(options.session_path);
        if let Some(session) = auth.current() {
            tracing::info!("Restored session for {}", session.user.email);
        }

        Self {
            rest: Rest {
                base_url: options.url.trim_end_matches('/').to_string(),
                anon_key: options.anon_key,
                timeout_secs: options.timeout_secs,
                auth: Arc::new(auth),
            },
            changes: Listeners::new(),
            poll_interval: Duration::from_secs(options.poll_interval_secs),
            poller: Arc::new(PollerState::default()),
        }
    }

    fn password_grant(&self, path: &str, email: &str, password: &str) -> Result<Response, BackendError> {
        let response = self
            .rest
            .request(Method::Post, path)
            .with_json(&json!({ "email": email.trim(), "password": password }))?
            .send()?;
        check(response).map_err(auth_error)
    }

    fn emit_change(&self, kind: ChangeKind, id: Uuid) {
        self.changes.emit(&ChangeEvent::new(kind, id));
    }

    fn ensure_poller(&self) {
        if self.poll_interval.is_zero() || self.poller.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let rest = self.rest.clone();
        let changes = self.changes.clone();
        let state = Arc::clone(&self.poller);
        let interval = self.poll_interval;
        let spawned = thread::Builder::new()
            .name("changefeed-poll".into())
            .spawn(move || poll_changes(rest, changes, state, interval));

        if let Err(e) = spawned {
            tracing::error!("Failed to start changefeed poller: {}", e);
            self.poller.running.store(false, Ordering::SeqCst);
        }
    }
}

/// Poll until the last changefeed subscription goes away
fn poll_changes(rest: Rest, changes: Listeners<ChangeEvent>, state: Arc<PollerState>, interval: Duration) {
    tracing::debug!("Changefeed poller started");
    let mut known: Option<Versions> = None;

    loop {
        thread::sleep(interval);
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if changes.is_empty() {
            state.running.store(false, Ordering::SeqCst);
            // A subscriber may have arrived after the check; keep going unless
            // another poller already took over.
            if changes.is_empty() || state.running.swap(true, Ordering::SeqCst) {
                break;
            }
        }

        match rest.row_versions() {
            Ok(current) => {
                if let Some(previous) = &known {
                    for event in diff_versions(previous, &current) {
                        changes.emit(&event);
                    }
                }
                known = Some(current);
            }
            Err(BackendError::NotAuthenticated) => known = None,
            Err(e) => tracing::debug!("Changefeed poll failed: {}", e),
        }
    }

    tracing::debug!("Changefeed poller stopped");
}

impl Drop for SupabaseBackend {
    fn drop(&mut self) {
        self.poller.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Backend for SupabaseBackend {
    fn name(&self) -> &'static str {
        "supabase"
    }

    fn session(&self) -> Result<Option<Session>, BackendError> {
        Ok(self.rest.auth.current())
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let response = self.password_grant("/auth/v1/token?grant_type=password", email, password)?;
        let session = response.json::<TokenResponse>()?.into_session();
        tracing::info!("Signed in {}", session.user.email);
        self.rest
            .auth
            .set(Some(session.clone()), AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let response = self.password_grant("/auth/v1/signup", email, password)?;
        let body: serde_json::Value = response.json()?;
        if body.get("access_token").is_none() {
            return Err(BackendError::Auth(
                "Check your email to confirm the account, then sign in".into(),
            ));
        }

        let session = serde_json::from_value::<TokenResponse>(body)?.into_session();
        tracing::info!("Registered {}", session.user.email);
        self.rest
            .auth
            .set(Some(session.clone()), AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    fn sign_out(&self) -> Result<(), BackendError> {
        let Some(session) = self.rest.auth.current() else {
            return Ok(());
        };

        let result = self
            .rest
            .request(Method::Post, "/auth/v1/logout")
            .with_header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .map_err(BackendError::from)
            .and_then(check);
        if let Err(e) = result {
            tracing::warn!("Server-side logout failed, clearing local session anyway: {}", e);
        }

        self.rest.auth.set(None, AuthEvent::SignedOut);
        Ok(())
    }

    fn on_auth_state_change(&self, listener: AuthListener) -> Subscription {
        self.rest.auth.listeners.subscribe(listener)
    }

    fn select_documents(&self, owner: Uuid) -> Result<Vec<Document>, BackendError> {
        let path = format!(
            "/rest/v1/documents?select=*&owner_id=eq.{}&order=updated_at.desc",
            owner
        );
        let response = self.rest.authed(Method::Get, &path)?.send()?;
        Ok(check(response)?.json()?)
    }

    fn select_document(&self, id: Uuid, owner: Uuid) -> Result<Document, BackendError> {
        let path = format!(
            "/rest/v1/documents?select=*&id=eq.{}&owner_id=eq.{}",
            id, owner
        );
        let response = self
            .rest
            .authed(Method::Get, &path)?
            .with_header("Accept", SINGLE_OBJECT)
            .send()?;
        Ok(check(response)?.json()?)
    }

    fn insert_document(&self, new: &NewDocument) -> Result<Document, BackendError> {
        let response = self
            .rest
            .authed(Method::Post, "/rest/v1/documents?select=*")?
            .with_header("Accept", SINGLE_OBJECT)
            .with_header("Prefer", "return=representation")
            .with_json(new)?
            .send()?;
        let document: Document = check(response)?.json()?;
        self.emit_change(ChangeKind::Insert, document.id);
        Ok(document)
    }

    fn update_document(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: &DocumentPatch,
    ) -> Result<Document, BackendError> {
        let path = format!(
            "/rest/v1/documents?id=eq.{}&owner_id=eq.{}&select=*",
            id, owner
        );
        let response = self
            .rest
            .authed(Method::Patch, &path)?
            .with_header("Accept", SINGLE_OBJECT)
            .with_header("Prefer", "return=representation")
            .with_json(patch)?
            .send()?;
        let document: Document = check(response)?.json()?;
        self.emit_change(ChangeKind::Update, document.id);
        Ok(document)
    }

    fn delete_document(&self, id: Uuid, owner: Uuid) -> Result<(), BackendError> {
        let path = format!("/rest/v1/documents?id=eq.{}&owner_id=eq.{}", id, owner);
        let response = self
            .rest
            .authed(Method::Delete, &path)?
            .with_header("Prefer", "return=representation")
            .send()?;
        let removed: Vec<Document> = check(response)?.json()?;
        if !removed.is_empty() {
            self.emit_change(ChangeKind::Delete, id);
        }
        Ok(())
    }

    fn subscribe_changes(&self, listener: ChangeListener) -> Subscription {
        let subscription = self.changes.subscribe(listener);
        self.ensure_poller();
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(session_path: Option<PathBuf>) -> SupabaseOptions {
        SupabaseOptions {
            url: "http://127.0.0.1:9/".into(),
            anon_key: "anon".into(),
            timeout_secs: 1,
            poll_interval_secs: 0,
            session_path,
        }
    }

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            user: User {
                id: Uuid::new_v4(),
                email: "ada@example.com".into(),
            },
        }
    }

    #[test]
    fn test_error_message_sources() {
        assert_eq!(
            error_message(r#"{"code":"PGRST116","message":"JSON object requested"}"#, "x"),
            "JSON object requested"
        );
        assert_eq!(
            error_message(
                r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
                "x"
            ),
            "Invalid login credentials"
        );
        assert_eq!(error_message("<html>", "Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_auth_error_mapping() {
        let invalid = BackendError::Http {
            status: 400,
            message: "Invalid login credentials".into(),
        };
        assert!(matches!(auth_error(invalid), BackendError::InvalidCredentials));

        let weak = BackendError::Http {
            status: 422,
            message: "Password should be at least 6 characters".into(),
        };
        assert!(matches!(auth_error(weak), BackendError::Auth(_)));
    }

    #[test]
    fn test_token_response_into_session() {
        let body = r#"{
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "r1",
            "user": { "id": "0b7a4d4e-7f0e-4a53-8d3c-5d5b3c2a1f00", "email": "ada@example.com", "role": "authenticated" }
        }"#;
        let session = serde_json::from_str::<TokenResponse>(body)
            .unwrap()
            .into_session();
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.user.email, "ada@example.com");
        assert!(!session.expires_within(60));
    }

    #[test]
    fn test_diff_versions() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        let (kept, edited, gone, added) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let previous: Versions = [(kept, t0), (edited, t0), (gone, t0)].into_iter().collect();
        let current: Versions = [(kept, t0), (edited, t1), (added, t0)].into_iter().collect();

        let mut events = diff_versions(&previous, &current);
        events.sort_by_key(|event| event.record_id);
        let mut expected = vec![
            ChangeEvent::new(ChangeKind::Update, edited),
            ChangeEvent::new(ChangeKind::Delete, gone),
            ChangeEvent::new(ChangeKind::Insert, added),
        ];
        expected.sort_by_key(|event| event.record_id);
        assert_eq!(events, expected);
        assert!(diff_versions(&current, &current).is_empty());
    }

    #[test]
    fn test_session_is_restored_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let stored = session();
        std::fs::write(&path, serde_json::to_string(&stored).unwrap()).unwrap();

        let backend = SupabaseBackend::new(options(Some(path)));
        assert_eq!(backend.session().unwrap(), Some(stored.clone()));
        assert_eq!(backend.current_user().unwrap(), Some(stored.user));
    }

    #[test]
    fn test_row_operations_require_session() {
        let backend = SupabaseBackend::new(options(None));
        assert!(matches!(
            backend.select_documents(Uuid::new_v4()),
            Err(BackendError::NotAuthenticated)
        ));
        assert!(backend.sign_out().is_ok());
    }

    #[test]
    fn test_sign_out_clears_persisted_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, serde_json::to_string(&session()).unwrap()).unwrap();

        let backend = SupabaseBackend::new(options(Some(path.clone())));
        let signed_out = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&signed_out);
        let _subscription = backend.on_auth_state_change(Box::new(move |event| {
            if *event == AuthEvent::SignedOut {
                flag.store(true, Ordering::SeqCst);
            }
        }));

        // The logout request itself fails (nothing listens on port 9); the
        // local session is dropped regardless.
        backend.sign_out().unwrap();
        assert!(signed_out.load(Ordering::SeqCst));
        assert!(!path.exists());
        assert!(backend.session().unwrap().is_none());
    }
}
