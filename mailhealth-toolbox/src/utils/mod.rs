//! Utility modules.

/// Log sanitization helpers that keep credentials and long payloads out of logs.
pub mod log_sanitizer;
