//! Document list panel

use eframe::egui;
use uuid::Uuid;

use super::editor::EditTarget;
use crate::core::document::Document;
use crate::core::store::DocumentState;

pub const EMPTY_MESSAGE: &str = "No documents yet. Create your first one!";
pub const DELETE_PROMPT: &str = "Are you sure you want to delete this document?";

/// Minimum card width used to pick the number of grid columns
const CARD_WIDTH: f32 = 300.0;
const MAX_COLUMNS: usize = 3;

/// What the user asked the list to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListAction {
    Edit(EditTarget),
    /// Confirmed deletion
    Delete(Uuid),
    Refresh,
}

/// What the list should display for a given state
#[derive(Debug, PartialEq, Eq)]
pub enum ListView<'a> {
    Loading,
    Error(&'a str),
    Empty,
    Cards(&'a [Document]),
}

impl<'a> ListView<'a> {
    pub fn of(state: &'a DocumentState) -> Self {
        if state.is_loading {
            ListView::Loading
        } else if let Some(error) = &state.error {
            ListView::Error(error)
        } else if state.documents.is_empty() {
            ListView::Empty
        } else {
            ListView::Cards(&state.documents)
        }
    }
}

/// Document list with a pending delete confirmation
#[derive(Debug, Default)]
pub struct DocumentListPanel {
    pending_delete: Option<Uuid>,
}

impl DocumentListPanel {
    /// Ask for confirmation before deleting `id`
    pub fn request_delete(&mut self, id: Uuid) {
        self.pending_delete = Some(id);
    }

    pub fn pending_delete(&self) -> Option<Uuid> {
        self.pending_delete
    }

    pub fn confirm_delete(&mut self) -> Option<ListAction> {
        self.pending_delete.take().map(ListAction::Delete)
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    /// Show the list panel
    pub fn show(&mut self, ui: &mut egui::Ui, state: &DocumentState) -> Option<ListAction> {
        let mut action = None;

        match ListView::of(state) {
            ListView::Loading => {
                ui.vertical_centered(|ui| {
                    ui.add_space(120.0);
                    ui.add(egui::Spinner::new().size(32.0));
                });
                return None;
            }
            ListView::Error(message) => {
                ui.vertical_centered(|ui| {
                    ui.add_space(60.0);
                    ui.colored_label(egui::Color32::from_rgb(248, 113, 113), message);
                    ui.add_space(10.0);
                    if ui.button("Try again").clicked() {
                        action = Some(ListAction::Refresh);
                    }
                });
                return action;
            }
            ListView::Empty | ListView::Cards(_) => {}
        }

        // Header
        ui.horizontal(|ui| {
            ui.heading("Your Documents");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("+ New Document").clicked() {
                    action = Some(ListAction::Edit(EditTarget::New));
                }
                if ui.button("\u{21BB}").on_hover_text("Refresh").clicked() {
                    action = Some(ListAction::Refresh);
                }
            });
        });

        ui.add_space(8.0);

        match ListView::of(state) {
            ListView::Cards(documents) => {
                egui::ScrollArea::vertical()
                    .id_salt("document_grid")
                    .show(ui, |ui| {
                        let columns = ((ui.available_width() / CARD_WIDTH).floor() as usize)
                            .clamp(1, MAX_COLUMNS);
                        for row in documents.chunks(columns) {
                            ui.columns(columns, |cols| {
                                for (col, doc) in cols.iter_mut().zip(row) {
                                    if let Some(card_action) = self.show_card(col, doc) {
                                        action = Some(card_action);
                                    }
                                }
                            });
                            ui.add_space(8.0);
                        }
                    });
            }
            _ => {
                ui.vertical_centered(|ui| {
                    ui.add_space(60.0);
                    ui.heading("\u{1F4C4}");
                    ui.label(egui::RichText::new(EMPTY_MESSAGE).weak());
                });
            }
        }

        action
    }

    /// Show a single document card
    fn show_card(&mut self, ui: &mut egui::Ui, doc: &Document) -> Option<ListAction> {
        let mut action = None;

        egui::Frame::group(ui.style()).show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.horizontal(|ui| {
                ui.add(
                    egui::Label::new(egui::RichText::new(&doc.title).strong().size(16.0))
                        .truncate(),
                );
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.small_button("\u{1F5D1}").on_hover_text("Delete").clicked() {
                        self.request_delete(doc.id);
                    }
                    if ui.small_button("\u{270F}").on_hover_text("Edit").clicked() {
                        action = Some(ListAction::Edit(EditTarget::Existing(doc.id)));
                    }
                });
            });
            ui.add(egui::Label::new(egui::RichText::new(doc.preview()).weak()).wrap());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Min), |ui| {
                ui.label(egui::RichText::new(doc.updated_date()).small().weak());
            });
        });

        action
    }

    /// Delete confirmation dialog; returns the confirmed deletion
    pub fn show_confirm(&mut self, ctx: &egui::Context) -> Option<ListAction> {
        self.pending_delete()?;
        let mut confirmed = None;

        egui::Window::new("Delete document")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(DELETE_PROMPT);
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        confirmed = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        confirmed = Some(false);
                    }
                });
            });

        match confirmed {
            Some(true) => self.confirm_delete(),
            Some(false) => {
                self.cancel_delete();
                None
            }
            None => None,
        }
    }
}
