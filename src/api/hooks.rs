//! UI-facing side-effect hooks for the failure classifier.
//!
//! The real implementations live in the shell application (toast surface,
//! router); the core only depends on these traits. The silent defaults keep
//! headless use (tests, background jobs) from needing any UI.

/// Toast-style notification surface.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Navigation service. `skip_history` replaces the current view without
/// altering browser history, used for status-code error views.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str, skip_history: bool);
}

/// Notifier that drops every message.
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _message: &str) {}
}

/// Navigator that goes nowhere.
pub struct SilentNavigator;

impl Navigator for SilentNavigator {
    fn navigate(&self, _path: &str, _skip_history: bool) {}
}
