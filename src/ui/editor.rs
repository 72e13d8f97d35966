//! Document editor window

use std::fmt;

use eframe::egui;
use uuid::Uuid;

use crate::core::document::{Document, DocumentDraft};
use crate::core::store::DocumentStore;

/// What the editor was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditTarget {
    /// A blank document that does not exist yet
    New,
    Existing(Uuid),
}

impl fmt::Display for EditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditTarget::New => f.write_str("new"),
            EditTarget::Existing(id) => write!(f, "{}", id),
        }
    }
}

/// Backend call that persists the editor contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveRequest {
    Create(DocumentDraft),
    Update(Uuid, DocumentDraft),
}

impl SaveRequest {
    /// Run the save; true when the backend accepted it
    pub fn commit(&self, store: &DocumentStore) -> bool {
        match self {
            SaveRequest::Create(draft) => store.create_document(draft).is_some(),
            SaveRequest::Update(id, draft) => store.update_document(*id, draft).is_some(),
        }
    }
}

/// What the user asked the editor to do this frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorAction {
    Save(SaveRequest),
    Close,
}

/// Local title/content of the open editor
#[derive(Debug, Clone)]
pub struct EditorState {
    target: EditTarget,
    /// Tells this opening apart from earlier ones of the same target
    token: u64,
    pub title: String,
    pub content: String,
    loading: bool,
    saving: bool,
}

impl EditorState {
    /// Blank fields; existing documents stay in the loading state until seeded
    pub fn open(target: EditTarget) -> Self {
        Self {
            target,
            token: 0,
            title: String::new(),
            content: String::new(),
            loading: matches!(target, EditTarget::Existing(_)),
            saving: false,
        }
    }

    pub fn with_token(mut self, token: u64) -> Self {
        self.token = token;
        self
    }

    pub fn target(&self) -> EditTarget {
        self.target
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// Title and content stay read-only until the document has been seeded
    pub fn is_editable(&self) -> bool {
        !self.loading
    }

    /// Fill the fields from a loaded document; a failed load leaves them blank
    pub fn seed(&mut self, document: Option<Document>) {
        if let Some(document) = document {
            self.title = document.title;
            self.content = document.content;
        }
        self.loading = false;
    }

    /// Create or update depending on the target; `None` while the title is blank
    pub fn save_request(&self) -> Option<SaveRequest> {
        if self.title.trim().is_empty() {
            return None;
        }

        let draft = DocumentDraft::new(self.title.clone(), self.content.clone());
        Some(match self.target {
            EditTarget::New => SaveRequest::Create(draft),
            EditTarget::Existing(id) => SaveRequest::Update(id, draft),
        })
    }

    pub fn set_saving(&mut self, saving: bool) {
        self.saving = saving;
    }
}

/// Editor window
pub struct EditorWindow;

impl EditorWindow {
    /// Show the editor and report the user's action
    pub fn show(ctx: &egui::Context, state: &mut EditorState) -> Option<EditorAction> {
        let mut action = None;
        let busy = state.is_loading() || state.is_saving();

        egui::Window::new("Document")
            .id(egui::Id::new(("document_editor", state.target)))
            .collapsible(false)
            .resizable(true)
            .default_size([760.0, 560.0])
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.add_enabled(
                        state.is_editable(),
                        egui::TextEdit::singleline(&mut state.title)
                            .hint_text("Document Title")
                            .font(egui::TextStyle::Heading)
                            .desired_width(ui.available_width() - 120.0),
                    );
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("\u{2715}").on_hover_text("Close").clicked() {
                            action = Some(EditorAction::Close);
                        }
                        let save = ui.add_enabled(!busy, egui::Button::new("\u{1F4BE} Save"));
                        if save.clicked() {
                            action = state.save_request().map(EditorAction::Save);
                        }
                    });
                });

                ui.separator();

                if state.loading {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        ui.label("Loading document...");
                    });
                }

                egui::ScrollArea::vertical()
                    .id_salt("editor_scroll")
                    .show(ui, |ui| {
                        ui.add_enabled(
                            state.is_editable(),
                            egui::TextEdit::multiline(&mut state.content)
                                .hint_text("Start writing...")
                                .desired_width(f32::INFINITY)
                                .desired_rows(24),
                        );
                    });
            });

        // Keyboard shortcuts
        let (save_key, close_key) = ctx.input(|i| {
            (
                i.modifiers.ctrl && i.key_pressed(egui::Key::S),
                i.key_pressed(egui::Key::Escape),
            )
        });
        if save_key && !busy && action.is_none() {
            action = state.save_request().map(EditorAction::Save);
        }
        if close_key {
            action = Some(EditorAction::Close);
        }

        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(title: &str, content: &str) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            owner_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_new_target_starts_blank() {
        let editor = EditorState::open(EditTarget::New).with_token(3);
        assert!(editor.title.is_empty());
        assert!(editor.content.is_empty());
        assert!(!editor.is_loading());
        assert!(editor.is_editable());
        assert_eq!(editor.token(), 3);
    }

    #[test]
    fn test_existing_target_seeds_fields() {
        let doc = document("Notes", "draft");
        let mut editor = EditorState::open(EditTarget::Existing(doc.id));
        assert!(editor.is_loading());
        assert!(!editor.is_editable());

        editor.seed(Some(doc));
        assert_eq!(editor.title, "Notes");
        assert_eq!(editor.content, "draft");
        assert!(!editor.is_loading());
        assert!(editor.is_editable());
    }

    #[test]
    fn test_failed_load_leaves_fields_blank() {
        let mut editor = EditorState::open(EditTarget::Existing(Uuid::new_v4()));
        editor.seed(None);
        assert!(editor.title.is_empty());
        assert!(!editor.is_loading());
    }

    #[test]
    fn test_blank_title_blocks_save() {
        let mut editor = EditorState::open(EditTarget::New);
        assert_eq!(editor.save_request(), None);

        editor.title = "   \t".into();
        editor.content = "body".into();
        assert_eq!(editor.save_request(), None);
    }

    #[test]
    fn test_save_request_follows_target() {
        let mut editor = EditorState::open(EditTarget::New);
        editor.title = "Notes".into();
        assert_eq!(
            editor.save_request(),
            Some(SaveRequest::Create(DocumentDraft::new("Notes", "")))
        );

        let id = Uuid::new_v4();
        let mut editor = EditorState::open(EditTarget::Existing(id));
        editor.seed(Some(document("Notes", "")));
        editor.content = "draft".into();
        assert_eq!(
            editor.save_request(),
            Some(SaveRequest::Update(id, DocumentDraft::new("Notes", "draft")))
        );
    }

    #[test]
    fn test_target_display() {
        assert_eq!(EditTarget::New.to_string(), "new");
        let id = Uuid::new_v4();
        assert_eq!(EditTarget::Existing(id).to_string(), id.to_string());
    }
}
