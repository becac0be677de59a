//! Client-side collaboration settings.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Prefix of every replication room name.
    pub room_namespace: String,
    /// Minimum spacing between two local cursor publications.
    pub cursor_debounce: Duration,
    /// Name of the shared text inside each document.
    pub text_name: String,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            room_namespace: "code-canvas".to_string(),
            cursor_debounce: Duration::from_millis(100),
            text_name: "monaco".to_string(),
        }
    }
}
