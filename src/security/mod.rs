//! Redaction of diagnostics that may carry sensitive data.

pub mod redactor;

pub use redactor::{PREVIEW_MAX_CHARS, redact_statement, statement_preview};
