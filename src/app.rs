//! Main application state and UI coordination

use std::sync::Arc;

use anyhow::Result;
use eframe::egui;
use uuid::Uuid;

use crate::backend::{AuthEvent, Backend, Session, Subscription, User};
use crate::core::config::AppConfig;
use crate::core::document::Document;
use crate::core::store::{DocumentState, DocumentStore};
use crate::core::tasks::{TaskRunner, Waker};
use crate::ui::auth::{self, AuthForm, AuthMode, AuthPanel, AuthRequest};
use crate::ui::document_list::{DocumentListPanel, ListAction};
use crate::ui::editor::{EditTarget, EditorAction, EditorState, EditorWindow, SaveRequest};

/// Results of background work, applied on the UI thread
#[derive(Debug)]
pub enum AppMessage {
    /// Initial session lookup finished
    SessionLoaded(Option<Session>),
    /// Auth state changed, from any source
    Auth(AuthEvent),
    AuthFailed(String),
    /// Document fetched for the editor opened as `editor`
    DocumentLoaded {
        editor: u64,
        document: Option<Document>,
    },
    /// Save issued by the editor opened as `editor` finished
    Saved {
        editor: u64,
        ok: bool,
    },
    /// A job with no result for the UI finished
    Finished(&'static str),
}

/// Main application state
pub struct CosmicDocsApp {
    backend: Arc<dyn Backend>,
    config: AppConfig,
    runner: TaskRunner<AppMessage>,
    /// Signed-in user; `None` shows the sign-in screen
    user: Option<User>,
    /// Whether the initial session lookup has answered
    session_checked: bool,
    /// Mounted only while a user is signed in
    store: Option<DocumentStore>,
    auth_form: AuthForm,
    list: DocumentListPanel,
    editor: Option<EditorState>,
    /// Token of the most recently opened editor
    editor_opens: u64,
    _auth_subscription: Subscription,
}

impl CosmicDocsApp {
    /// Create a new application instance
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        backend: Arc<dyn Backend>,
        config: AppConfig,
    ) -> Result<Self> {
        Self::apply_theme(&cc.egui_ctx, &config.ui.theme);

        let ctx = cc.egui_ctx.clone();
        let waker: Waker = Arc::new(move || ctx.request_repaint());
        Self::with_waker(backend, config, Some(waker))
    }

    /// Create the application state without a window
    pub fn with_waker(
        backend: Arc<dyn Backend>,
        config: AppConfig,
        waker: Option<Waker>,
    ) -> Result<Self> {
        let runner = TaskRunner::new(waker)?;

        let sender = runner.sender();
        let repaint = runner.waker();
        let auth_subscription = backend.on_auth_state_change(Box::new(move |event| {
            if sender.send(AppMessage::Auth(event.clone())).is_ok() {
                if let Some(repaint) = &repaint {
                    repaint();
                }
            }
        }));

        let lookup = Arc::clone(&backend);
        runner.spawn(move || match lookup.session() {
            Ok(session) => AppMessage::SessionLoaded(session),
            Err(e) => {
                tracing::error!("Session lookup failed: {}", e);
                AppMessage::SessionLoaded(None)
            }
        });

        tracing::info!("Connected to {} backend", backend.name());

        Ok(Self {
            auth_form: AuthForm::with_email(config.last_email.clone()),
            backend,
            config,
            runner,
            user: None,
            session_checked: false,
            store: None,
            list: DocumentListPanel::default(),
            editor: None,
            editor_opens: 0,
            _auth_subscription: auth_subscription,
        })
    }

    fn apply_theme(ctx: &egui::Context, theme: &str) {
        match theme {
            "light" => ctx.set_visuals(egui::Visuals::light()),
            _ => ctx.set_visuals(egui::Visuals::dark()),
        }
    }

    /// Current document list, or the initial loading state
    pub fn document_state(&self) -> DocumentState {
        self.store
            .as_ref()
            .map(DocumentStore::state)
            .unwrap_or_default()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn editor(&self) -> Option<&EditorState> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut EditorState> {
        self.editor.as_mut()
    }

    /// Apply every message that has arrived
    pub fn process_messages(&mut self) {
        for message in self.runner.drain() {
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: AppMessage) {
        match message {
            AppMessage::SessionLoaded(session) => {
                self.session_checked = true;
                self.set_user(session.map(|session| session.user));
            }
            AppMessage::Auth(event) => {
                self.session_checked = true;
                if let AuthEvent::SignedIn(session) = &event {
                    self.auth_form.finish();
                    self.remember_email(&session.user.email);
                }
                self.set_user(event.session().map(|session| session.user.clone()));
            }
            AppMessage::AuthFailed(message) => self.auth_form.fail(message),
            AppMessage::DocumentLoaded { editor, document } => {
                if let Some(state) = self.editor_for(editor) {
                    state.seed(document);
                }
            }
            AppMessage::Saved { editor, ok } => {
                // Results for an editor that was closed or reopened are stale
                if self.editor_for(editor).is_some() {
                    if ok {
                        self.editor = None;
                    } else if let Some(editor) = self.editor.as_mut() {
                        editor.set_saving(false);
                    }
                }
            }
            AppMessage::Finished(job) => tracing::debug!("{} finished", job),
        }
    }

    fn editor_for(&mut self, token: u64) -> Option<&mut EditorState> {
        self.editor
            .as_mut()
            .filter(|editor| editor.token() == token)
    }

    /// Switch between signed-out and signed-in; a new user gets a fresh store
    fn set_user(&mut self, user: Option<User>) {
        let same_user = self.user.as_ref().map(|u| u.id) == user.as_ref().map(|u| u.id);
        if same_user {
            self.user = user;
            return;
        }

        // Tear down everything tied to the previous user
        self.editor = None;
        self.list = DocumentListPanel::default();
        self.store = None;

        match &user {
            Some(user) => {
                tracing::info!("Signed in as {}", user.email);
                let store = DocumentStore::mount(Arc::clone(&self.backend), self.runner.waker());
                let initial = store.clone();
                self.runner.spawn(move || {
                    initial.refresh();
                    AppMessage::Finished("initial fetch")
                });
                self.store = Some(store);
            }
            None => tracing::info!("Signed out"),
        }
        self.user = user;
    }

    fn remember_email(&mut self, email: &str) {
        if self.config.last_email.as_deref() == Some(email) {
            return;
        }
        self.config.last_email = Some(email.to_string());
        if let Err(e) = self.config.save() {
            tracing::warn!("Failed to save config: {}", e);
        }
    }

    fn submit_auth(&mut self, request: AuthRequest) {
        let backend = Arc::clone(&self.backend);
        self.runner.spawn(move || {
            let result = match request.mode {
                AuthMode::SignIn => backend.sign_in(&request.email, &request.password),
                AuthMode::SignUp => backend.sign_up(&request.email, &request.password),
            };
            match result {
                // The auth listener delivers the new session
                Ok(_) => AppMessage::Finished("sign in"),
                Err(e) => {
                    tracing::warn!("Authentication failed for {}: {}", request.email, e);
                    AppMessage::AuthFailed(auth::error_text(&e))
                }
            }
        });
    }

    /// Sign out; the auth listener unmounts the store
    pub fn sign_out(&mut self) {
        let backend = Arc::clone(&self.backend);
        self.runner.spawn(move || {
            if let Err(e) = backend.sign_out() {
                tracing::error!("Sign out failed: {}", e);
            }
            AppMessage::Finished("sign out")
        });
    }

    /// Open the editor, loading the document for existing targets
    pub fn open_editor(&mut self, target: EditTarget) {
        self.editor_opens += 1;
        let token = self.editor_opens;
        self.editor = Some(EditorState::open(target).with_token(token));

        if let (EditTarget::Existing(id), Some(store)) = (target, &self.store) {
            let store = store.clone();
            self.runner.spawn(move || AppMessage::DocumentLoaded {
                editor: token,
                document: store.get_document(id),
            });
        }
    }

    pub fn close_editor(&mut self) {
        self.editor = None;
    }

    /// Save the open editor; blank titles are ignored
    pub fn save_editor(&mut self) {
        let request = self.editor.as_ref().and_then(EditorState::save_request);
        if let Some(request) = request {
            self.save(request);
        }
    }

    fn save(&mut self, request: SaveRequest) {
        let (Some(editor), Some(store)) = (self.editor.as_mut(), &self.store) else {
            return;
        };
        editor.set_saving(true);
        let token = editor.token();
        let store = store.clone();
        self.runner.spawn(move || AppMessage::Saved {
            editor: token,
            ok: request.commit(&store),
        });
    }

    /// Delete without asking; the list view confirms before calling this
    pub fn delete_document(&mut self, id: Uuid) {
        if let Some(store) = &self.store {
            let store = store.clone();
            self.runner.spawn(move || {
                store.delete_document(id);
                AppMessage::Finished("delete")
            });
        }
    }

    pub fn refresh(&mut self) {
        if let Some(store) = &self.store {
            let store = store.clone();
            self.runner.spawn(move || {
                store.refresh();
                AppMessage::Finished("refresh")
            });
        }
    }

    fn handle_list_action(&mut self, action: ListAction) {
        match action {
            ListAction::Edit(target) => self.open_editor(target),
            ListAction::Delete(id) => self.delete_document(id),
            ListAction::Refresh => self.refresh(),
        }
    }

    /// Render the top bar with the signed-in user
    fn render_top_bar(&mut self, ctx: &egui::Context) {
        let mut sign_out = false;

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("\u{1F4C4} Cosmic Docs");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Sign out").clicked() {
                        sign_out = true;
                    }
                    if let Some(user) = &self.user {
                        ui.label(&user.email);
                    }
                });
            });
        });

        if sign_out {
            self.sign_out();
        }
    }
}

impl eframe::App for CosmicDocsApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_messages();

        if !self.session_checked {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.spinner();
                });
            });
            return;
        }

        if self.user.is_none() {
            let request = egui::CentralPanel::default()
                .show(ctx, |ui| AuthPanel::show(ui, &mut self.auth_form))
                .inner;
            if let Some(request) = request {
                self.submit_auth(request);
            }
            return;
        }

        self.render_top_bar(ctx);

        let state = self.document_state();
        let list_action = egui::CentralPanel::default()
            .show(ctx, |ui| self.list.show(ui, &state))
            .inner;
        let confirmed = self.list.show_confirm(ctx);
        for action in [list_action, confirmed].into_iter().flatten() {
            self.handle_list_action(action);
        }

        let editor_action = self
            .editor
            .as_mut()
            .and_then(|editor| EditorWindow::show(ctx, editor));
        match editor_action {
            Some(EditorAction::Save(request)) => self.save(request),
            Some(EditorAction::Close) => self.close_editor(),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryDatabase};
    use crate::core::document::NO_CONTENT;
    use crate::ui::document_list::{ListView, EMPTY_MESSAGE};

    fn app_with(backend: Arc<MemoryBackend>) -> CosmicDocsApp {
        let mut config = AppConfig::default();
        // Keep tests away from the user's config file
        config.last_email = Some("ada@example.com".into());
        CosmicDocsApp::with_waker(backend, config, None).unwrap()
    }

    /// Apply messages until one matches `done`
    fn pump_until(app: &mut CosmicDocsApp, done: impl Fn(&AppMessage) -> bool) {
        loop {
            let message = app.runner.recv_blocking().expect("runner closed");
            let finished = done(&message);
            app.handle_message(message);
            if finished {
                break;
            }
        }
    }

    fn signed_in_app() -> (CosmicDocsApp, Arc<MemoryBackend>, MemoryDatabase) {
        let database = MemoryDatabase::new();
        let backend = Arc::new(database.connect());
        backend.sign_up("ada@example.com", "secret-pass").unwrap();
        let mut app = app_with(backend.clone());
        pump_until(&mut app, |m| matches!(m, AppMessage::SessionLoaded(_)));
        pump_until(&mut app, |m| matches!(m, AppMessage::Finished("initial fetch")));
        (app, backend, database)
    }

    #[test]
    fn test_initial_session_lookup_mounts_store() {
        let (app, _backend, database) = signed_in_app();
        assert_eq!(app.user().map(|u| u.email.as_str()), Some("ada@example.com"));
        assert_eq!(database.change_listener_count(), 1);
        assert!(!app.document_state().is_loading);
    }

    #[test]
    fn test_signed_out_start_shows_sign_in() {
        let database = MemoryDatabase::new();
        let backend = Arc::new(database.connect());
        let mut app = app_with(backend);
        pump_until(&mut app, |m| matches!(m, AppMessage::SessionLoaded(_)));

        assert!(app.user().is_none());
        assert!(app.session_checked);
        assert_eq!(database.change_listener_count(), 0);
    }

    #[test]
    fn test_auth_events_mount_and_unmount_store() {
        let database = MemoryDatabase::new();
        let backend = Arc::new(database.connect());
        let mut app = app_with(backend.clone());
        pump_until(&mut app, |m| matches!(m, AppMessage::SessionLoaded(_)));

        backend.sign_up("ada@example.com", "secret-pass").unwrap();
        app.process_messages();
        assert!(app.user().is_some());
        pump_until(&mut app, |m| matches!(m, AppMessage::Finished("initial fetch")));
        assert_eq!(database.change_listener_count(), 1);

        app.open_editor(EditTarget::New);
        backend.sign_out().unwrap();
        app.process_messages();
        assert!(app.user().is_none());
        assert!(app.editor().is_none());
        assert_eq!(database.change_listener_count(), 0);
    }

    #[test]
    fn test_drop_releases_auth_subscription() {
        let database = MemoryDatabase::new();
        let backend = Arc::new(database.connect());
        let app = app_with(backend.clone());
        assert_eq!(backend.auth_listener_count(), 1);

        drop(app);
        assert_eq!(backend.auth_listener_count(), 0);
    }

    #[test]
    fn test_blank_title_never_reaches_backend() {
        let (mut app, _backend, database) = signed_in_app();
        app.open_editor(EditTarget::New);
        if let Some(editor) = app.editor_mut() {
            editor.title = "  ".into();
            editor.content = "text".into();
        }

        app.save_editor();
        assert!(app.editor().is_some_and(|editor| !editor.is_saving()));
        assert_eq!(database.document_count(), 0);
    }

    #[test]
    fn test_new_editor_ignores_existing_documents() {
        let (mut app, _backend, _database) = signed_in_app();
        app.open_editor(EditTarget::New);
        app.editor_mut().unwrap().title = "Notes".into();
        app.save_editor();
        pump_until(&mut app, |m| matches!(m, AppMessage::Saved { .. }));

        let id = app.document_state().documents[0].id;
        app.open_editor(EditTarget::Existing(id));
        pump_until(&mut app, |m| matches!(m, AppMessage::DocumentLoaded { .. }));
        assert_eq!(app.editor().unwrap().title, "Notes");

        app.open_editor(EditTarget::New);
        let editor = app.editor().unwrap();
        assert!(editor.title.is_empty());
        assert!(editor.content.is_empty());
    }

    #[test]
    fn test_create_edit_delete_scenario() {
        let (mut app, _backend, _database) = signed_in_app();

        // Create
        app.open_editor(EditTarget::New);
        app.editor_mut().unwrap().title = "Notes".into();
        app.save_editor();
        pump_until(&mut app, |m| matches!(m, AppMessage::Saved { .. }));
        assert!(app.editor().is_none());

        let state = app.document_state();
        assert_eq!(state.documents.len(), 1);
        assert_eq!(state.documents[0].title, "Notes");
        assert_eq!(state.documents[0].preview(), NO_CONTENT);
        let id = state.documents[0].id;

        // Edit
        app.open_editor(EditTarget::Existing(id));
        pump_until(&mut app, |m| matches!(m, AppMessage::DocumentLoaded { .. }));
        app.editor_mut().unwrap().content = "draft".into();
        app.save_editor();
        pump_until(&mut app, |m| matches!(m, AppMessage::Saved { .. }));
        assert!(app.editor().is_none());
        assert_eq!(app.document_state().documents[0].preview(), "draft");

        // Delete
        app.delete_document(id);
        pump_until(&mut app, |m| matches!(m, AppMessage::Finished("delete")));
        let state = app.document_state();
        assert_eq!(ListView::of(&state), ListView::Empty);
        assert!(!EMPTY_MESSAGE.is_empty());
    }

    #[test]
    fn test_late_save_leaves_reopened_editor_alone() {
        let (mut app, _backend, database) = signed_in_app();
        app.open_editor(EditTarget::New);
        app.editor_mut().unwrap().title = "First".into();
        app.save_editor();

        app.close_editor();
        app.open_editor(EditTarget::New);
        app.editor_mut().unwrap().title = "Second draft".into();

        pump_until(&mut app, |m| matches!(m, AppMessage::Saved { .. }));
        let editor = app.editor().expect("second editor still open");
        assert_eq!(editor.title, "Second draft");
        assert!(!editor.is_saving());
        assert_eq!(database.document_count(), 1);
    }

    #[test]
    fn test_late_load_does_not_seed_other_editor() {
        let (mut app, _backend, _database) = signed_in_app();
        app.open_editor(EditTarget::New);
        app.editor_mut().unwrap().title = "Notes".into();
        app.save_editor();
        pump_until(&mut app, |m| matches!(m, AppMessage::Saved { .. }));
        let document = app.document_state().documents[0].clone();

        app.open_editor(EditTarget::Existing(document.id));
        let first = app.editor().unwrap().token();
        app.close_editor();
        app.open_editor(EditTarget::Existing(document.id));
        assert_ne!(app.editor().unwrap().token(), first);

        let mut stale = document.clone();
        stale.title = "Stale".into();
        app.handle_message(AppMessage::DocumentLoaded {
            editor: first,
            document: Some(stale),
        });
        assert!(app.editor().unwrap().is_loading());
        assert!(app.editor().unwrap().title.is_empty());

        // Both real loads answer; only the reopened editor's one seeds it
        for _ in 0..2 {
            pump_until(&mut app, |m| matches!(m, AppMessage::DocumentLoaded { .. }));
        }
        let editor = app.editor().unwrap();
        assert!(!editor.is_loading());
        assert_eq!(editor.title, "Notes");
    }

    #[test]
    fn test_failed_save_keeps_editor_open() {
        let (mut app, backend, _database) = signed_in_app();
        app.open_editor(EditTarget::Existing(Uuid::new_v4()));
        pump_until(&mut app, |m| matches!(m, AppMessage::DocumentLoaded { .. }));
        app.editor_mut().unwrap().title = "Ghost".into();

        app.save_editor();
        pump_until(&mut app, |m| matches!(m, AppMessage::Saved { .. }));
        let editor = app.editor().unwrap();
        assert!(!editor.is_saving());
        assert_eq!(editor.title, "Ghost");
        assert!(backend.current_user().unwrap().is_some());
    }
}
