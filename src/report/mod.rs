//! Report presentation.
//!
//! Normalization of agent answers into plain report text, plus the small
//! message helpers used by the interactive loop.

pub mod messages;
pub mod normalizer;

pub use messages::{format_error_message, format_status_message, format_summary, StatusKind};
pub use normalizer::TextNormalizer;
