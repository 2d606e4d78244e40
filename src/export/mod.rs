//! Export functionality: per-year JSON and plain-text transcripts.

pub mod json;
pub mod text;
