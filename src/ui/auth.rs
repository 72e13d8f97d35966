//! Sign-in screen

use eframe::egui;

use crate::backend::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    SignIn,
    SignUp,
}

/// Credentials submitted from the form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub mode: AuthMode,
    pub email: String,
    pub password: String,
}

/// Sign-in form state
#[derive(Debug, Clone, Default)]
pub struct AuthForm {
    pub email: String,
    pub password: String,
    pub mode: AuthMode,
    pub error: Option<String>,
    busy: bool,
}

impl AuthForm {
    /// Form pre-filled with the last used email
    pub fn with_email(email: Option<String>) -> Self {
        Self {
            email: email.unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Validate and hand out the request; the form stays busy until answered
    pub fn submit(&mut self) -> Option<AuthRequest> {
        if self.busy {
            return None;
        }
        if self.email.trim().is_empty() || self.password.is_empty() {
            self.error = Some("Email and password are required".to_string());
            return None;
        }

        self.busy = true;
        self.error = None;
        Some(AuthRequest {
            mode: self.mode,
            email: self.email.trim().to_string(),
            password: self.password.clone(),
        })
    }

    pub fn fail(&mut self, message: String) {
        self.busy = false;
        self.error = Some(message);
    }

    /// Forget the password once a session exists
    pub fn finish(&mut self) {
        self.busy = false;
        self.error = None;
        self.password.clear();
    }
}

/// User-facing text for a failed sign-in or sign-up
pub fn error_text(err: &BackendError) -> String {
    match err {
        BackendError::InvalidCredentials => "Invalid email or password".to_string(),
        BackendError::Auth(message) => message.clone(),
        BackendError::Transport(_) => "Could not reach the server".to_string(),
        _ => "Authentication failed".to_string(),
    }
}

/// Sign-in panel
pub struct AuthPanel;

impl AuthPanel {
    /// Show the form; returns a request when the user submits it
    pub fn show(ui: &mut egui::Ui, form: &mut AuthForm) -> Option<AuthRequest> {
        let mut submitted = false;

        ui.vertical_centered(|ui| {
            ui.add_space(100.0);
            ui.heading("\u{1F4C4} Cosmic Docs");
            ui.add_space(20.0);

            ui.horizontal(|ui| {
                ui.selectable_value(&mut form.mode, AuthMode::SignIn, "Sign in");
                ui.selectable_value(&mut form.mode, AuthMode::SignUp, "Sign up");
            });
            ui.add_space(10.0);

            ui.add(
                egui::TextEdit::singleline(&mut form.email)
                    .hint_text("Email")
                    .desired_width(280.0),
            );
            let password = ui.add(
                egui::TextEdit::singleline(&mut form.password)
                    .hint_text("Password")
                    .password(true)
                    .desired_width(280.0),
            );
            if password.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                submitted = true;
            }

            ui.add_space(10.0);
            let label = match form.mode {
                AuthMode::SignIn => "Sign in",
                AuthMode::SignUp => "Create account",
            };
            if ui.add_enabled(!form.is_busy(), egui::Button::new(label)).clicked() {
                submitted = true;
            }
            if form.is_busy() {
                ui.spinner();
            }

            if let Some(error) = &form.error {
                ui.add_space(10.0);
                ui.colored_label(egui::Color32::from_rgb(248, 113, 113), error);
            }
        });

        if submitted {
            form.submit()
        } else {
            None
        }
    }
}
